//! Catalog ports
//!
//! The reconciliation core reads the catalog through [`CatalogIndex`] and
//! applies decisions through a [`CatalogTransaction`]; it never holds ambient
//! session state. [`Database`](super::Database) is the SQLite implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Sqlite, Transaction};
use uuid::Uuid;

use super::media_files::{self, CreateMediaFile, FilePlacement, MediaFileRecord, PartitionKey};
use super::titles::{self, TitleKey, TitleKind, TitleRecord};

/// Read access to titles and files
#[async_trait]
pub trait CatalogIndex: Send + Sync {
    async fn find_title_by_key(&self, key: &TitleKey) -> Result<Option<TitleRecord>>;

    async fn find_title_by_external_id(
        &self,
        kind: TitleKind,
        external_id: &str,
    ) -> Result<Option<TitleRecord>>;

    async fn get_title(&self, id: Uuid) -> Result<Option<TitleRecord>>;

    async fn find_files_in_partition(&self, key: &PartitionKey) -> Result<Vec<MediaFileRecord>>;

    async fn find_file_by_path(&self, path: &str) -> Result<Option<MediaFileRecord>>;

    /// Open a write transaction. Dropping it uncommitted rolls back.
    async fn begin(&self) -> Result<Box<dyn CatalogTransaction>>;
}

/// Atomic unit of catalog mutation
#[async_trait]
pub trait CatalogTransaction: Send {
    async fn find_title_by_key(&mut self, key: &TitleKey) -> Result<Option<TitleRecord>>;

    /// Existing title for `key`, or a newly inserted one
    async fn get_or_create_title(
        &mut self,
        key: &TitleKey,
        external_id: Option<&str>,
    ) -> Result<TitleRecord>;

    async fn update_title(
        &mut self,
        id: Uuid,
        key: &TitleKey,
        external_id: Option<&str>,
    ) -> Result<()>;

    async fn delete_title(&mut self, id: Uuid) -> Result<()>;

    async fn list_files_for_title(&mut self, title_id: Uuid) -> Result<Vec<MediaFileRecord>>;

    async fn insert_file(&mut self, file: &CreateMediaFile) -> Result<MediaFileRecord>;

    async fn delete_file(&mut self, id: Uuid) -> Result<()>;

    async fn find_files_in_partition(&mut self, key: &PartitionKey) -> Result<Vec<MediaFileRecord>>;

    /// Move one file under another title
    async fn reparent_file(&mut self, id: Uuid, title_id: Uuid) -> Result<()>;

    async fn update_file_placement(&mut self, id: Uuid, placement: &FilePlacement) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;
}

/// SQLite transaction behind [`CatalogTransaction`]
pub struct SqliteCatalogTransaction {
    tx: Option<Transaction<'static, Sqlite>>,
}

impl SqliteCatalogTransaction {
    pub fn new(tx: Transaction<'static, Sqlite>) -> Self {
        Self { tx: Some(tx) }
    }

    fn tx(&mut self) -> Result<&mut Transaction<'static, Sqlite>> {
        self.tx.as_mut().context("Catalog transaction already committed")
    }
}

#[async_trait]
impl CatalogTransaction for SqliteCatalogTransaction {
    async fn find_title_by_key(&mut self, key: &TitleKey) -> Result<Option<TitleRecord>> {
        let tx = self.tx()?;
        titles::find_by_key(&mut **tx, key).await
    }

    async fn get_or_create_title(
        &mut self,
        key: &TitleKey,
        external_id: Option<&str>,
    ) -> Result<TitleRecord> {
        let tx = self.tx()?;
        if let Some(existing) = titles::find_by_key(&mut **tx, key).await? {
            return Ok(existing);
        }
        titles::insert(&mut **tx, key, external_id)
            .await
            .with_context(|| format!("Failed to create title {}", key))
    }

    async fn update_title(
        &mut self,
        id: Uuid,
        key: &TitleKey,
        external_id: Option<&str>,
    ) -> Result<()> {
        let tx = self.tx()?;
        if !titles::update(&mut **tx, id, key, external_id).await? {
            anyhow::bail!("Title {} not found", id);
        }
        Ok(())
    }

    async fn delete_title(&mut self, id: Uuid) -> Result<()> {
        let tx = self.tx()?;
        titles::delete(&mut **tx, id).await?;
        Ok(())
    }

    async fn list_files_for_title(&mut self, title_id: Uuid) -> Result<Vec<MediaFileRecord>> {
        let tx = self.tx()?;
        media_files::list_by_title(&mut **tx, title_id).await
    }

    async fn insert_file(&mut self, file: &CreateMediaFile) -> Result<MediaFileRecord> {
        let tx = self.tx()?;
        media_files::insert(&mut **tx, file)
            .await
            .with_context(|| format!("Failed to insert file {}", file.file_path))
    }

    async fn delete_file(&mut self, id: Uuid) -> Result<()> {
        let tx = self.tx()?;
        if !media_files::delete(&mut **tx, id).await? {
            anyhow::bail!("Media file {} not found", id);
        }
        Ok(())
    }

    async fn find_files_in_partition(&mut self, key: &PartitionKey) -> Result<Vec<MediaFileRecord>> {
        let tx = self.tx()?;
        media_files::find_in_partition(&mut **tx, key).await
    }

    async fn reparent_file(&mut self, id: Uuid, title_id: Uuid) -> Result<()> {
        let tx = self.tx()?;
        if !media_files::reparent(&mut **tx, id, title_id).await? {
            anyhow::bail!("Media file {} not found", id);
        }
        Ok(())
    }

    async fn update_file_placement(&mut self, id: Uuid, placement: &FilePlacement) -> Result<()> {
        let tx = self.tx()?;
        if !media_files::update_placement(&mut **tx, id, placement).await? {
            anyhow::bail!("Media file {} not found", id);
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let tx = self
            .tx
            .take()
            .context("Catalog transaction already committed")?;
        tx.commit().await.context("Failed to commit catalog transaction")
    }
}
