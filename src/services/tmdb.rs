//! TMDB (The Movie Database) title lookup
//!
//! Base URL: https://api.themoviedb.org/3
//!
//! Only the search endpoints are used: `search/movie` and `search/tv`.
//! Rate limiting: TMDB allows ~40 requests per 10 seconds.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::rate_limiter::{RateLimitedClient, ResponseExt, RetryConfig, retry_async};
use super::text_utils::title_similarity;
use super::title_resolver::{CanonicalIdentity, TitleLookup};

/// Below this similarity a search result is not considered the same work
const MIN_SIMILARITY: f64 = 0.6;

static TRAILING_YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<title>.+?)\s*\((?P<year>\d{4})\)$").expect("year pattern is valid"));

/// TMDB lookup client with rate limiting and retry logic
pub struct TmdbLookup {
    client: Arc<RateLimitedClient>,
    base_url: String,
    api_key: String,
    retry_config: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbSearchResult<T> {
    pub page: i32,
    pub results: Vec<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbMovie {
    pub id: i32,
    pub title: String,
    pub original_title: Option<String>,
    pub release_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbSeries {
    pub id: i32,
    pub name: String,
    pub original_name: Option<String>,
    pub first_air_date: Option<String>,
}

fn year_of(date: Option<&str>) -> Option<i32> {
    date.and_then(|d| d.split('-').next().and_then(|y| y.parse().ok()))
}

impl TmdbMovie {
    /// Get the release year from the release_date
    pub fn year(&self) -> Option<i32> {
        year_of(self.release_date.as_deref())
    }

    fn similarity(&self, query: &str) -> f64 {
        let main = title_similarity(query, &self.title);
        let original = self
            .original_title
            .as_deref()
            .map(|t| title_similarity(query, t))
            .unwrap_or(0.0);
        main.max(original)
    }
}

impl TmdbSeries {
    pub fn year(&self) -> Option<i32> {
        year_of(self.first_air_date.as_deref())
    }

    fn similarity(&self, query: &str) -> f64 {
        let main = title_similarity(query, &self.name);
        let original = self
            .original_name
            .as_deref()
            .map(|t| title_similarity(query, t))
            .unwrap_or(0.0);
        main.max(original)
    }
}

/// Best movie for `title (year)`: an exact-year match wins, then a release
/// one year off, then anything; within each tier the most similar title.
pub fn best_movie_match<'a>(results: &'a [TmdbMovie], title: &str, year: i32) -> Option<&'a TmdbMovie> {
    let tier = |m: &TmdbMovie| match m.year() {
        Some(y) if y == year => 0,
        Some(y) if (y - year).abs() == 1 => 1,
        _ => 2,
    };
    results
        .iter()
        .map(|m| (tier(m), m.similarity(title), m))
        .filter(|(_, sim, _)| *sim >= MIN_SIMILARITY)
        .min_by(|a, b| a.0.cmp(&b.0).then(b.1.total_cmp(&a.1)))
        .map(|(_, _, m)| m)
}

/// Best series for `title`, preferring the first-air year when one is given
pub fn best_series_match<'a>(
    results: &'a [TmdbSeries],
    title: &str,
    year: Option<i32>,
) -> Option<&'a TmdbSeries> {
    let tier = |s: &TmdbSeries| match (year, s.year()) {
        (Some(want), Some(got)) if want == got => 0,
        (None, _) => 0,
        _ => 1,
    };
    results
        .iter()
        .map(|s| (tier(s), s.similarity(title), s))
        .filter(|(_, sim, _)| *sim >= MIN_SIMILARITY)
        .min_by(|a, b| a.0.cmp(&b.0).then(b.1.total_cmp(&a.1)))
        .map(|(_, _, s)| s)
}

/// Split "Show (2019)" into ("Show", Some(2019))
pub fn split_trailing_year(title: &str) -> (&str, Option<i32>) {
    match TRAILING_YEAR_RE.captures(title) {
        Some(caps) => match (caps.name("title"), caps["year"].parse().ok()) {
            (Some(t), Some(year)) => (t.as_str(), Some(year)),
            _ => (title, None),
        },
        None => (title, None),
    }
}

fn external_id(id: i32) -> String {
    format!("tmdb:{}", id)
}

impl TmdbLookup {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Arc::new(RateLimitedClient::for_tmdb(timeout)?),
            base_url: "https://api.themoviedb.org/3".to_string(),
            api_key,
            retry_config: RetryConfig {
                max_retries: 3,
                initial_interval: Duration::from_millis(500),
                max_interval: Duration::from_secs(10),
                multiplier: 2.0,
            },
        })
    }

    /// Check if the client has a valid API key configured
    pub fn has_api_key(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn search<T>(&self, endpoint: &str, params: Vec<(&'static str, String)>) -> Result<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        if !self.has_api_key() {
            anyhow::bail!("TMDB API key not configured");
        }

        let url = format!("{}/{}", self.base_url, endpoint);
        let operation = format!("tmdb_{}", endpoint.replace('/', "_"));

        retry_async(
            || {
                let url = url.clone();
                let client = self.client.clone();
                let mut query = params.clone();
                query.push(("api_key", self.api_key.clone()));
                async move {
                    let response = client.get_with_query(&url, &query).await?;

                    if response.is_rate_limited() {
                        warn!("TMDB rate limit hit, will retry");
                        anyhow::bail!("Rate limited (429)");
                    }

                    if response.status().as_u16() == 401 {
                        anyhow::bail!("TMDB API key is invalid");
                    }

                    if !response.status().is_success() {
                        anyhow::bail!("TMDB search failed with status: {}", response.status());
                    }

                    let results: TmdbSearchResult<T> = response
                        .json()
                        .await
                        .context("Failed to parse TMDB search results")?;

                    Ok(results.results)
                }
            },
            &self.retry_config,
            &operation,
        )
        .await
    }

    /// Search for movies by name
    pub async fn search_movies(&self, query: &str, year: Option<i32>) -> Result<Vec<TmdbMovie>> {
        info!(
            "Searching TMDB for movie '{}'{}",
            query,
            year.map(|y| format!(" ({})", y)).unwrap_or_default()
        );

        // The year filter is applied in ranking, not in the query, so that
        // off-by-one release years still match.
        let results: Vec<TmdbMovie> = self
            .search(
                "search/movie",
                vec![
                    ("query", query.to_string()),
                    ("include_adult", "false".to_string()),
                ],
            )
            .await?;

        debug!(count = results.len(), "TMDB search returned results");
        Ok(results)
    }

    /// Search for TV series by name
    pub async fn search_tv(&self, query: &str) -> Result<Vec<TmdbSeries>> {
        info!("Searching TMDB for series '{}'", query);

        let results: Vec<TmdbSeries> = self
            .search("search/tv", vec![("query", query.to_string())])
            .await?;

        debug!(count = results.len(), "TMDB search returned results");
        Ok(results)
    }
}

#[async_trait]
impl TitleLookup for TmdbLookup {
    async fn search_movie(&self, title: &str, year: i32) -> Result<Option<CanonicalIdentity>> {
        let results = self.search_movies(title, Some(year)).await?;
        Ok(best_movie_match(&results, title, year).map(|m| CanonicalIdentity {
            title: m.title.clone(),
            year: m.year().or(Some(year)),
            external_id: Some(external_id(m.id)),
        }))
    }

    async fn search_series(&self, title: &str) -> Result<Option<CanonicalIdentity>> {
        let (query, year) = split_trailing_year(title);
        let results = self.search_tv(query).await?;
        Ok(best_series_match(&results, query, year).map(|s| {
            // Keep the disambiguating year when the library name carried one
            let name = match (year, s.year()) {
                (Some(_), Some(aired)) => format!("{} ({})", s.name, aired),
                _ => s.name.clone(),
            };
            CanonicalIdentity {
                title: name,
                year: None,
                external_id: Some(external_id(s.id)),
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movie(id: i32, title: &str, date: Option<&str>) -> TmdbMovie {
        TmdbMovie {
            id,
            title: title.to_string(),
            original_title: None,
            release_date: date.map(str::to_string),
        }
    }

    fn series(id: i32, name: &str, date: Option<&str>) -> TmdbSeries {
        TmdbSeries {
            id,
            name: name.to_string(),
            original_name: None,
            first_air_date: date.map(str::to_string),
        }
    }

    #[test]
    fn test_year_parsing() {
        assert_eq!(movie(1, "Test", Some("2023-05-15")).year(), Some(2023));
        assert_eq!(movie(1, "Test", Some("")).year(), None);
        assert_eq!(movie(1, "Test", None).year(), None);
    }

    #[test]
    fn test_best_movie_prefers_exact_year() {
        let results = vec![
            movie(1, "Alien", Some("2019-01-01")),
            movie(348, "Alien", Some("1979-05-25")),
        ];
        assert_eq!(best_movie_match(&results, "Alien", 1979).map(|m| m.id), Some(348));
    }

    #[test]
    fn test_best_movie_tolerates_off_by_one_year() {
        let results = vec![
            movie(1, "Aliens", Some("1986-07-18")),
            movie(348, "Alien", Some("1979-05-25")),
        ];
        assert_eq!(best_movie_match(&results, "Alien", 1978).map(|m| m.id), Some(348));
    }

    #[test]
    fn test_best_movie_rejects_dissimilar_titles() {
        let results = vec![movie(9, "Completely Different", Some("1979-01-01"))];
        assert!(best_movie_match(&results, "Alien", 1979).is_none());
    }

    #[test]
    fn test_best_movie_uses_original_title() {
        let mut m = movie(5, "The Seven Samurai", Some("1954-04-26"));
        m.original_title = Some("Shichinin no samurai".into());
        assert_eq!(
            best_movie_match(&[m], "Shichinin no Samurai", 1954).map(|m| m.id),
            Some(5)
        );
    }

    #[test]
    fn test_best_series_with_year() {
        let results = vec![
            series(1, "Doctor Who", Some("1963-11-23")),
            series(57243, "Doctor Who", Some("2005-03-26")),
        ];
        assert_eq!(
            best_series_match(&results, "Doctor Who", Some(2005)).map(|s| s.id),
            Some(57243)
        );
    }

    #[test]
    fn test_split_trailing_year() {
        assert_eq!(split_trailing_year("Show (2019)"), ("Show", Some(2019)));
        assert_eq!(split_trailing_year("Show"), ("Show", None));
        assert_eq!(split_trailing_year("(2019)"), ("(2019)", None));
    }

    #[tokio::test]
    async fn test_missing_api_key_fails() {
        let lookup = TmdbLookup::new(String::new(), Duration::from_secs(1)).unwrap();
        assert!(!lookup.has_api_key());
        assert!(lookup.search_movie("Alien", 1979).await.is_err());
    }
}
