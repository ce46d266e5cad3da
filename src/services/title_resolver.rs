//! Canonical title resolution
//!
//! Best-effort normalization of parsed titles through an external lookup.
//! When the lookup returns an identifier already cataloged, the cataloged
//! title wins over the lookup's spelling. Any failure (error, timeout, no
//! result) falls back to the parsed values.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::db::{CatalogIndex, TitleKey, TitleKind};
use crate::services::filename_parser::ParsedIdentity;

/// Title after resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalIdentity {
    pub title: String,
    /// Always set for movies, `None` for series
    pub year: Option<i32>,
    pub external_id: Option<String>,
}

impl CanonicalIdentity {
    pub fn key(&self, kind: TitleKind) -> TitleKey {
        match (kind, self.year) {
            (TitleKind::Movie, Some(year)) => TitleKey::Movie {
                title: self.title.clone(),
                year,
            },
            _ => TitleKey::Series {
                title: self.title.clone(),
            },
        }
    }
}

/// External metadata provider
#[async_trait]
pub trait TitleLookup: Send + Sync {
    async fn search_movie(&self, title: &str, year: i32) -> Result<Option<CanonicalIdentity>>;

    async fn search_series(&self, title: &str) -> Result<Option<CanonicalIdentity>>;
}

/// Lookup used when no provider is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLookup;

#[async_trait]
impl TitleLookup for NoLookup {
    async fn search_movie(&self, _title: &str, _year: i32) -> Result<Option<CanonicalIdentity>> {
        Ok(None)
    }

    async fn search_series(&self, _title: &str) -> Result<Option<CanonicalIdentity>> {
        Ok(None)
    }
}

pub struct TitleResolver {
    lookup: Arc<dyn TitleLookup>,
    timeout: Duration,
}

impl TitleResolver {
    pub fn new(lookup: Arc<dyn TitleLookup>, timeout: Duration) -> Self {
        Self { lookup, timeout }
    }

    /// Resolve the title of any parsed identity
    pub async fn resolve(
        &self,
        catalog: &dyn CatalogIndex,
        identity: &ParsedIdentity,
    ) -> CanonicalIdentity {
        match identity {
            ParsedIdentity::Movie(movie) => {
                self.resolve_movie(catalog, &movie.title, movie.year).await
            }
            ParsedIdentity::Episode(episode) => {
                self.resolve_series(catalog, &episode.series_title).await
            }
        }
    }

    pub async fn resolve_movie(
        &self,
        catalog: &dyn CatalogIndex,
        title: &str,
        year: i32,
    ) -> CanonicalIdentity {
        let fallback = CanonicalIdentity {
            title: title.to_string(),
            year: Some(year),
            external_id: None,
        };
        let found = self
            .lookup_with_timeout(title, self.lookup.search_movie(title, year))
            .await;
        self.prefer_cataloged(catalog, TitleKind::Movie, found, fallback)
            .await
    }

    pub async fn resolve_series(&self, catalog: &dyn CatalogIndex, title: &str) -> CanonicalIdentity {
        let fallback = CanonicalIdentity {
            title: title.to_string(),
            year: None,
            external_id: None,
        };
        let found = self
            .lookup_with_timeout(title, self.lookup.search_series(title))
            .await;
        self.prefer_cataloged(catalog, TitleKind::Series, found, fallback)
            .await
    }

    async fn lookup_with_timeout<F>(&self, title: &str, lookup: F) -> Option<CanonicalIdentity>
    where
        F: std::future::Future<Output = Result<Option<CanonicalIdentity>>>,
    {
        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(Some(found))) => Some(found),
            Ok(Ok(None)) => {
                debug!(title = %title, "Title lookup returned no match");
                None
            }
            Ok(Err(e)) => {
                warn!(title = %title, error = %e, "Title lookup failed, using parsed title");
                None
            }
            Err(_) => {
                warn!(
                    title = %title,
                    timeout_secs = self.timeout.as_secs(),
                    "Title lookup timed out, using parsed title"
                );
                None
            }
        }
    }

    async fn prefer_cataloged(
        &self,
        catalog: &dyn CatalogIndex,
        kind: TitleKind,
        found: Option<CanonicalIdentity>,
        fallback: CanonicalIdentity,
    ) -> CanonicalIdentity {
        let Some(mut found) = found else {
            return fallback;
        };
        if kind == TitleKind::Movie && found.year.is_none() {
            found.year = fallback.year;
        }
        if kind == TitleKind::Series {
            found.year = None;
        }

        let Some(external_id) = found.external_id.clone() else {
            return found;
        };
        match catalog.find_title_by_external_id(kind, &external_id).await {
            Ok(Some(existing)) => {
                debug!(
                    external_id = %external_id,
                    cataloged = %existing.title,
                    "Using cataloged title for known external id"
                );
                CanonicalIdentity {
                    title: existing.title,
                    year: if kind == TitleKind::Movie {
                        existing.year.or(found.year)
                    } else {
                        None
                    },
                    external_id: Some(external_id),
                }
            }
            Ok(None) => found,
            Err(e) => {
                warn!(external_id = %external_id, error = %e, "Catalog lookup by external id failed");
                found
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    struct FixedLookup {
        movie: Option<CanonicalIdentity>,
        series: Option<CanonicalIdentity>,
    }

    #[async_trait]
    impl TitleLookup for FixedLookup {
        async fn search_movie(&self, _title: &str, _year: i32) -> Result<Option<CanonicalIdentity>> {
            Ok(self.movie.clone())
        }

        async fn search_series(&self, _title: &str) -> Result<Option<CanonicalIdentity>> {
            Ok(self.series.clone())
        }
    }

    struct FailingLookup;

    #[async_trait]
    impl TitleLookup for FailingLookup {
        async fn search_movie(&self, _title: &str, _year: i32) -> Result<Option<CanonicalIdentity>> {
            anyhow::bail!("connection refused")
        }

        async fn search_series(&self, _title: &str) -> Result<Option<CanonicalIdentity>> {
            anyhow::bail!("connection refused")
        }
    }

    struct SlowLookup;

    #[async_trait]
    impl TitleLookup for SlowLookup {
        async fn search_movie(&self, title: &str, year: i32) -> Result<Option<CanonicalIdentity>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Some(CanonicalIdentity {
                title: format!("{title} (slow)"),
                year: Some(year),
                external_id: None,
            }))
        }

        async fn search_series(&self, _title: &str) -> Result<Option<CanonicalIdentity>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }
    }

    async fn db() -> Database {
        let db = Database::connect_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    fn identity(title: &str, year: Option<i32>, id: Option<&str>) -> CanonicalIdentity {
        CanonicalIdentity {
            title: title.to_string(),
            year,
            external_id: id.map(str::to_string),
        }
    }

    fn resolver(lookup: impl TitleLookup + 'static) -> TitleResolver {
        TitleResolver::new(Arc::new(lookup), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_lookup_result_is_used() {
        let db = db().await;
        let r = resolver(FixedLookup {
            movie: Some(identity("Alien", Some(1979), Some("tmdb:348"))),
            series: None,
        });
        let resolved = r.resolve_movie(&db, "alien", 1978).await;
        assert_eq!(resolved, identity("Alien", Some(1979), Some("tmdb:348")));
    }

    #[tokio::test]
    async fn test_cataloged_title_wins_for_known_external_id() {
        let db = db().await;
        let mut tx = db.begin().await.unwrap();
        tx.get_or_create_title(
            &TitleKey::Movie {
                title: "Alien".into(),
                year: 1979,
            },
            Some("tmdb:348"),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let r = resolver(FixedLookup {
            movie: Some(identity("Alien - Das unheimliche Wesen", Some(1979), Some("tmdb:348"))),
            series: None,
        });
        let resolved = r.resolve_movie(&db, "Alien Das unheimliche Wesen", 1979).await;
        assert_eq!(resolved, identity("Alien", Some(1979), Some("tmdb:348")));
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_parsed_values() {
        let db = db().await;
        let resolved = resolver(FailingLookup).resolve_movie(&db, "Alien", 1979).await;
        assert_eq!(resolved, identity("Alien", Some(1979), None));

        let resolved = resolver(FailingLookup).resolve_series(&db, "Show (2019)").await;
        assert_eq!(resolved, identity("Show (2019)", None, None));
    }

    #[tokio::test]
    async fn test_no_match_falls_back_to_parsed_values() {
        let db = db().await;
        let resolved = resolver(NoLookup).resolve_movie(&db, "Alien", 1979).await;
        assert_eq!(resolved, identity("Alien", Some(1979), None));
    }

    #[tokio::test]
    async fn test_timeout_falls_back_to_parsed_values() {
        let db = db().await;
        let resolved = resolver(SlowLookup).resolve_movie(&db, "Alien", 1979).await;
        assert_eq!(resolved, identity("Alien", Some(1979), None));
    }

    #[tokio::test]
    async fn test_series_resolution_drops_year() {
        let db = db().await;
        let r = resolver(FixedLookup {
            movie: None,
            series: Some(identity("The Office (US)", Some(2005), Some("tmdb:2316"))),
        });
        let resolved = r.resolve_series(&db, "The Office").await;
        assert_eq!(resolved, identity("The Office (US)", None, Some("tmdb:2316")));
        assert_eq!(
            resolved.key(TitleKind::Series),
            TitleKey::Series {
                title: "The Office (US)".into()
            }
        );
    }
}
