//! Database connection and catalog repositories

pub mod catalog;
pub mod media_files;
pub mod titles;

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use uuid::Uuid;

pub use catalog::{CatalogIndex, CatalogTransaction, SqliteCatalogTransaction};
pub use media_files::{
    CreateMediaFile, FilePlacement, MediaFileRecord, MediaFileRepository, MediaKind, PartitionKey,
};
pub use titles::{TitleKey, TitleKind, TitleRecord, TitleRepository};

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database wrapper from an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the maximum connection pool size from environment or default
    fn get_max_connections() -> u32 {
        std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5)
    }

    /// Open (creating if missing) a SQLite database file
    pub async fn connect(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(Self::get_max_connections())
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {}", path))?;

        Ok(Self { pool })
    }

    /// Private in-memory database on a single connection (tests, dry runs)
    pub async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get a titles repository
    pub fn titles(&self) -> TitleRepository {
        TitleRepository::new(self.pool.clone())
    }

    /// Get a media files repository
    pub fn media_files(&self) -> MediaFileRepository {
        MediaFileRepository::new(self.pool.clone())
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl CatalogIndex for Database {
    async fn find_title_by_key(&self, key: &TitleKey) -> Result<Option<TitleRecord>> {
        titles::find_by_key(&self.pool, key).await
    }

    async fn find_title_by_external_id(
        &self,
        kind: TitleKind,
        external_id: &str,
    ) -> Result<Option<TitleRecord>> {
        titles::find_by_external_id(&self.pool, kind, external_id).await
    }

    async fn get_title(&self, id: Uuid) -> Result<Option<TitleRecord>> {
        titles::get(&self.pool, id).await
    }

    async fn find_files_in_partition(&self, key: &PartitionKey) -> Result<Vec<MediaFileRecord>> {
        media_files::find_in_partition(&self.pool, key).await
    }

    async fn find_file_by_path(&self, path: &str) -> Result<Option<MediaFileRecord>> {
        media_files::get_by_path(&self.pool, path).await
    }

    async fn begin(&self) -> Result<Box<dyn CatalogTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin catalog transaction")?;
        Ok(Box::new(SqliteCatalogTransaction::new(tx)))
    }
}
