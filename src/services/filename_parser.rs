//! Filename parser for library-style media names
//!
//! Parses filenames like:
//! - "Alien (1979) - [Bluray-1080p].mkv"
//! - "Alien (1979) - Director's Cut - Full Screen [DVD].mkv"
//! - "Alien (1979) - Featurettes - Making of Alien [DVD].mkv"
//! - "Show (2019) - S01E01-E02 - [WEBDL-720p].mkv"
//!
//! The episode pattern is always tried before the movie pattern, so a series
//! title that carries a year (`Show (2019)`) still parses as an episode.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ParseError;
use crate::services::quality::QualityTable;

/// Canonical spelling of the fullscreen edition token
pub const FULL_SCREEN: &str = "Full Screen";

/// Separator between edition tokens, on input and output
pub const TOKEN_SEPARATOR: &str = " - ";

static EPISODE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<series>.+?) - [Ss](?P<season>\d{1,4})[Ee](?P<episode>\d{1,4})(?:-?[Ee](?P<last>\d{1,4}))?(?: -(?: (?P<edition>.+?))?)? \[(?P<quality>[^\[\]]+)\]\.(?P<ext>[A-Za-z0-9]+)$",
    )
    .expect("episode pattern is valid")
});

static MOVIE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<title>.+?) \((?P<year>\d{4})\)(?: -(?: (?P<edition>.+?))?)? \[(?P<quality>[^\[\]]+)\]\.(?P<ext>[A-Za-z0-9]+)$",
    )
    .expect("movie pattern is valid")
});

/// Special-feature types recognized among edition tokens (Plex local extras)
pub const DEFAULT_FEATURE_TYPES: &[&str] = &[
    "Behind The Scenes",
    "Deleted Scenes",
    "Featurettes",
    "Interviews",
    "Scenes",
    "Shorts",
    "Trailers",
    "Other",
];

/// Configured set of special-feature type names, matched case-insensitively
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureTypes {
    names: Vec<String>,
}

impl FeatureTypes {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = names
            .into_iter()
            .map(Into::into)
            .map(|n: String| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        Self { names }
    }

    /// Canonical name of the feature type matching `token`, if any
    pub fn lookup(&self, token: &str) -> Option<&str> {
        let token = token.trim();
        self.names
            .iter()
            .find(|n| n.eq_ignore_ascii_case(token))
            .map(String::as_str)
    }

    pub fn is_feature_type(&self, token: &str) -> bool {
        self.lookup(token).is_some()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Default for FeatureTypes {
    fn default() -> Self {
        Self::new(DEFAULT_FEATURE_TYPES.iter().copied())
    }
}

/// A parsed movie (or special feature attached to a movie)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedMovie {
    pub title: String,
    pub year: i32,
    /// Edition tokens before any feature-type marker, fullscreen excluded
    pub edition: Option<String>,
    /// Canonical feature type name when a feature-type token was present
    pub feature_type_name: Option<String>,
    /// Tokens after the feature-type token, or the feature type itself
    pub feature_name: Option<String>,
    /// Normalized edition tokens in their final order
    pub tokens: Vec<String>,
    pub quality_label: String,
    pub is_fullscreen: bool,
    pub extension: String,
}

/// A parsed TV episode, possibly spanning several episodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedEpisode {
    pub series_title: String,
    pub season: u32,
    pub episode: u32,
    /// Equals `episode` unless this is a multi-episode file
    pub last_episode: u32,
    /// Edition tokens, fullscreen excluded
    pub edition: Option<String>,
    pub tokens: Vec<String>,
    pub quality_label: String,
    pub is_fullscreen: bool,
    pub extension: String,
}

/// Structured identity recovered from a raw filename
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParsedIdentity {
    Movie(ParsedMovie),
    Episode(ParsedEpisode),
}

impl ParsedIdentity {
    pub fn quality_label(&self) -> &str {
        match self {
            ParsedIdentity::Movie(m) => &m.quality_label,
            ParsedIdentity::Episode(e) => &e.quality_label,
        }
    }

    pub fn is_fullscreen(&self) -> bool {
        match self {
            ParsedIdentity::Movie(m) => m.is_fullscreen,
            ParsedIdentity::Episode(e) => e.is_fullscreen,
        }
    }

    pub fn extension(&self) -> &str {
        match self {
            ParsedIdentity::Movie(m) => &m.extension,
            ParsedIdentity::Episode(e) => &e.extension,
        }
    }

    /// Movie title or series title
    pub fn title(&self) -> &str {
        match self {
            ParsedIdentity::Movie(m) => &m.title,
            ParsedIdentity::Episode(e) => &e.series_title,
        }
    }

    pub fn edition(&self) -> Option<&str> {
        match self {
            ParsedIdentity::Movie(m) => m.edition.as_deref(),
            ParsedIdentity::Episode(e) => e.edition.as_deref(),
        }
    }

    /// Copy of this identity carrying a canonical title (and year for movies)
    pub fn with_canonical(&self, title: &str, year: Option<i32>) -> Self {
        match self {
            ParsedIdentity::Movie(m) => ParsedIdentity::Movie(ParsedMovie {
                title: title.to_string(),
                year: year.unwrap_or(m.year),
                ..m.clone()
            }),
            ParsedIdentity::Episode(e) => ParsedIdentity::Episode(ParsedEpisode {
                series_title: title.to_string(),
                ..e.clone()
            }),
        }
    }
}

/// Whether a token spells "full screen", ignoring case and internal spaces
pub fn is_fullscreen_token(token: &str) -> bool {
    let compact: String = token.chars().filter(|c| *c != ' ').collect();
    compact.eq_ignore_ascii_case("fullscreen")
}

/// Normalize an ordered edition token list.
///
/// Fullscreen tokens become `Full Screen` and move to the end, unless a
/// feature-type token is present, in which case they keep their position.
/// Returns the new list and whether a fullscreen token was seen.
pub fn normalize_edition_tokens(tokens: Vec<String>, features: &FeatureTypes) -> (Vec<String>, bool) {
    let tokens: Vec<String> = tokens
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    let is_fullscreen = tokens.iter().any(|t| is_fullscreen_token(t));
    if !is_fullscreen {
        return (tokens, false);
    }

    let has_feature = tokens.iter().any(|t| features.is_feature_type(t));
    let mut normalized = Vec::with_capacity(tokens.len());
    let mut placed = false;
    for token in tokens {
        if is_fullscreen_token(&token) {
            if has_feature && !placed {
                normalized.push(FULL_SCREEN.to_string());
                placed = true;
            }
        } else {
            normalized.push(token);
        }
    }
    if !has_feature {
        normalized.push(FULL_SCREEN.to_string());
    }

    (normalized, true)
}

/// Split raw edition text into tokens
pub fn split_edition(edition: &str) -> Vec<String> {
    edition
        .split(TOKEN_SEPARATOR)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

fn join_non_fullscreen<'a>(tokens: impl Iterator<Item = &'a String>) -> Option<String> {
    let kept: Vec<&str> = tokens
        .filter(|t| !is_fullscreen_token(t))
        .map(String::as_str)
        .collect();
    if kept.is_empty() {
        None
    } else {
        Some(kept.join(TOKEN_SEPARATOR))
    }
}

/// Pure filename classifier
#[derive(Debug, Clone)]
pub struct FilenameParser {
    qualities: Arc<QualityTable>,
    feature_types: FeatureTypes,
}

impl FilenameParser {
    pub fn new(qualities: Arc<QualityTable>, feature_types: FeatureTypes) -> Self {
        Self {
            qualities,
            feature_types,
        }
    }

    pub fn feature_types(&self) -> &FeatureTypes {
        &self.feature_types
    }

    pub fn qualities(&self) -> &QualityTable {
        &self.qualities
    }

    pub fn quality_table(&self) -> Arc<QualityTable> {
        self.qualities.clone()
    }

    /// Parse a raw filename (any leading directory is ignored)
    pub fn parse(&self, raw: &str) -> Result<ParsedIdentity, ParseError> {
        let filename = raw.rsplit(['/', '\\']).next().unwrap_or(raw).trim();

        let identity = match self.parse_episode(filename)? {
            Some(episode) => ParsedIdentity::Episode(episode),
            None => match self.parse_movie(filename)? {
                Some(movie) => ParsedIdentity::Movie(movie),
                None => {
                    return Err(ParseError::UnrecognizedFormat {
                        filename: filename.to_string(),
                    });
                }
            },
        };

        debug!(
            filename = filename,
            title = identity.title(),
            quality = identity.quality_label(),
            fullscreen = identity.is_fullscreen(),
            "Parsed filename"
        );

        Ok(identity)
    }

    fn check_quality(&self, filename: &str, label: &str) -> Result<(), ParseError> {
        if self.qualities.contains(label) {
            Ok(())
        } else {
            Err(ParseError::UnknownQuality {
                filename: filename.to_string(),
                label: label.to_string(),
            })
        }
    }

    fn parse_episode(&self, filename: &str) -> Result<Option<ParsedEpisode>, ParseError> {
        let Some(caps) = EPISODE_RE.captures(filename) else {
            return Ok(None);
        };

        let series_title = caps["series"].trim().to_string();
        let season: Option<u32> = caps["season"].parse().ok();
        let episode: Option<u32> = caps["episode"].parse().ok();
        let (Some(season), Some(episode)) = (season, episode) else {
            return Ok(None);
        };
        let last_episode = match caps.name("last") {
            Some(m) => match m.as_str().parse::<u32>() {
                Ok(last) => last,
                Err(_) => return Ok(None),
            },
            None => episode,
        };
        if series_title.is_empty() || last_episode < episode {
            return Ok(None);
        }

        let quality_label = caps["quality"].trim().to_string();
        self.check_quality(filename, &quality_label)?;

        let raw_tokens = caps
            .name("edition")
            .map(|m| split_edition(m.as_str()))
            .unwrap_or_default();
        let (tokens, is_fullscreen) = normalize_edition_tokens(raw_tokens, &self.feature_types);
        let edition = join_non_fullscreen(tokens.iter());

        Ok(Some(ParsedEpisode {
            series_title,
            season,
            episode,
            last_episode,
            edition,
            tokens,
            quality_label,
            is_fullscreen,
            extension: caps["ext"].to_string(),
        }))
    }

    fn parse_movie(&self, filename: &str) -> Result<Option<ParsedMovie>, ParseError> {
        let Some(caps) = MOVIE_RE.captures(filename) else {
            return Ok(None);
        };

        let title = caps["title"].trim().to_string();
        let Ok(year) = caps["year"].parse::<i32>() else {
            return Ok(None);
        };
        if title.is_empty() {
            return Ok(None);
        }

        let quality_label = caps["quality"].trim().to_string();
        self.check_quality(filename, &quality_label)?;

        let raw_tokens = caps
            .name("edition")
            .map(|m| split_edition(m.as_str()))
            .unwrap_or_default();
        let (tokens, is_fullscreen) = normalize_edition_tokens(raw_tokens, &self.feature_types);

        let feature_idx = tokens
            .iter()
            .position(|t| self.feature_types.is_feature_type(t));

        let (edition, feature_type_name, feature_name) = match feature_idx {
            Some(idx) => {
                let type_name = self
                    .feature_types
                    .lookup(&tokens[idx])
                    .unwrap_or(tokens[idx].as_str())
                    .to_string();
                let rest = &tokens[idx + 1..];
                let name = if rest.is_empty() {
                    type_name.clone()
                } else {
                    rest.join(TOKEN_SEPARATOR)
                };
                (
                    join_non_fullscreen(tokens[..idx].iter()),
                    Some(type_name),
                    Some(name),
                )
            }
            None => (join_non_fullscreen(tokens.iter()), None, None),
        };

        Ok(Some(ParsedMovie {
            title,
            year,
            edition,
            feature_type_name,
            feature_name,
            tokens,
            quality_label,
            is_fullscreen,
            extension: caps["ext"].to_string(),
        }))
    }
}
