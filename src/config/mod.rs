//! Application configuration management

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::services::filename_parser::FeatureTypes;
use crate::services::job_queue::RequeuePolicy;
use crate::services::path_planner::{DEFAULT_MOVIES_DIR, DEFAULT_TV_DIR};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database file
    pub database_path: String,

    /// Library root; planned paths are relative to it
    pub library_path: PathBuf,

    /// Root of the labeled rejects area
    pub rejects_path: PathBuf,

    pub movies_dir: String,

    pub tv_dir: String,

    /// TMDB API key; lookups are skipped without one
    pub tmdb_api_key: Option<String>,

    /// JSON file replacing the built-in quality table
    pub quality_table_path: Option<PathBuf>,

    pub feature_types: FeatureTypes,

    pub lease_timeout: Duration,

    pub lookup_timeout: Duration,

    pub requeue: RequeuePolicy,

    /// Maximum concurrent imports
    pub import_concurrency: usize,

    pub log_format: LogFormat,
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Invalid {}", name)),
        _ => Ok(default),
    }
}

impl Config {
    /// Load configuration from `.env` and the process environment
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let requeue_min: u64 = parse_or(&lookup, "REQUEUE_MIN_MINUTES", 45)?;
        let requeue_max: u64 = parse_or(&lookup, "REQUEUE_MAX_MINUTES", 75)?;
        if requeue_max < requeue_min {
            bail!(
                "REQUEUE_MAX_MINUTES ({}) is below REQUEUE_MIN_MINUTES ({})",
                requeue_max,
                requeue_min
            );
        }

        let feature_types = match non_empty("FEATURE_TYPES") {
            Some(list) => FeatureTypes::new(list.split(',')),
            None => FeatureTypes::default(),
        };

        let log_format = match non_empty("LOG_FORMAT").as_deref().map(str::to_lowercase) {
            Some(f) if f == "json" => LogFormat::Json,
            Some(f) if f == "pretty" || f == "text" => LogFormat::Pretty,
            Some(other) => bail!("Invalid LOG_FORMAT: {}", other),
            None => LogFormat::Pretty,
        };

        Ok(Self {
            database_path: non_empty("DATABASE_PATH")
                .unwrap_or_else(|| "./data/curator.db".to_string()),

            library_path: non_empty("LIBRARY_PATH")
                .unwrap_or_else(|| "./data/library".to_string())
                .into(),

            rejects_path: non_empty("REJECTS_PATH")
                .unwrap_or_else(|| "./data/rejects".to_string())
                .into(),

            movies_dir: non_empty("MOVIES_DIR").unwrap_or_else(|| DEFAULT_MOVIES_DIR.to_string()),

            tv_dir: non_empty("TV_DIR").unwrap_or_else(|| DEFAULT_TV_DIR.to_string()),

            tmdb_api_key: non_empty("TMDB_API_KEY"),

            quality_table_path: non_empty("QUALITY_TABLE_PATH").map(PathBuf::from),

            feature_types,

            lease_timeout: Duration::from_secs(parse_or(&lookup, "LEASE_TIMEOUT_SECS", 30)?),

            lookup_timeout: Duration::from_secs(parse_or(&lookup, "LOOKUP_TIMEOUT_SECS", 10)?),

            requeue: RequeuePolicy {
                min_delay: Duration::from_secs(requeue_min * 60),
                max_delay: Duration::from_secs(requeue_max * 60),
                max_attempts: parse_or(&lookup, "REQUEUE_MAX_ATTEMPTS", 10)?,
            },

            import_concurrency: parse_or::<usize>(&lookup, "IMPORT_CONCURRENCY", 2)?.max(1),

            log_format,
        })
    }
}
