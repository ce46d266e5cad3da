//! Import pipeline
//!
//! Runs one input file through parse → resolve → lease → evaluate → apply:
//! - parse failures and dominated candidates are moved to the labeled
//!   rejects area, never dropped
//! - admitted files are moved into the library and recorded in the same
//!   catalog transaction that deletes the files they supersede
//! - the whole evaluate-and-apply step is retried when the transaction fails
//! - a title cataloged under the parsed name is migrated to the canonical
//!   name once a lookup resolves it

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::db::{CatalogIndex, MediaFileRecord, TitleKey, TitleKind};
use crate::error::{ImportError, ImportResult};
use crate::services::file_utils::{move_file, unused_path};
use crate::services::filename_parser::{FilenameParser, ParsedIdentity};
use crate::services::job_queue::{JobQueueConfig, QueueHandle, RequeuePolicy, WorkQueue};
use crate::services::lease::{LeaseManager, acquire_titles};
use crate::services::path_planner::PathPlanner;
use crate::services::quality::QualityTable;
use crate::services::rate_limiter::{RetryConfig, retry_async_when};
use crate::services::reconciler::{
    Decision, Reconciler, Rejection, new_media_file, partition_key, title_key,
};
use crate::services::text_utils::sanitize_path_segment;
use crate::services::title_migration::{TitleMigrator, apply_on_disk};
use crate::services::title_resolver::{CanonicalIdentity, NoLookup, TitleLookup, TitleResolver};
use crate::services::tmdb::TmdbLookup;

/// Parser over the configured quality table and feature types
pub fn parser_from_config(config: &Config) -> Result<FilenameParser> {
    let qualities = match &config.quality_table_path {
        Some(path) => QualityTable::from_json_file(path)?,
        None => QualityTable::default(),
    };
    Ok(FilenameParser::new(Arc::new(qualities), config.feature_types.clone()))
}

/// Rejects label for a destination already taken by an unrelated file
pub const CONFLICT_LABEL: &str = "conflict";

/// Final state of one imported input
#[derive(Debug, Clone, PartialEq)]
pub enum ImportOutcome {
    Admitted {
        file: MediaFileRecord,
        path: PathBuf,
    },
    Replaced {
        file: MediaFileRecord,
        path: PathBuf,
        /// Library paths of the superseded files
        removed: Vec<PathBuf>,
    },
    Rejected {
        label: String,
        reason: String,
        moved_to: PathBuf,
    },
}

/// Filesystem and timing settings of the import service
#[derive(Debug, Clone)]
pub struct ImportSettings {
    pub library_root: PathBuf,
    pub rejects_root: PathBuf,
    pub lease_timeout: Duration,
    pub retry: RetryConfig,
}

/// What the evaluate-and-apply step ended with
enum Applied {
    Outcome(ImportOutcome),
    Rejected { label: &'static str, reason: String },
}

pub struct ImportService {
    parser: FilenameParser,
    resolver: TitleResolver,
    reconciler: Reconciler,
    planner: PathPlanner,
    migrator: TitleMigrator,
    catalog: Arc<dyn CatalogIndex>,
    leases: Arc<dyn LeaseManager>,
    settings: ImportSettings,
}

fn io_error(e: anyhow::Error) -> ImportError {
    ImportError::Io(std::io::Error::other(format!("{:#}", e)))
}

fn tx_error(e: anyhow::Error) -> ImportError {
    ImportError::CatalogTransaction(e)
}

fn is_transaction_error(e: &ImportError) -> bool {
    matches!(e, ImportError::CatalogTransaction(_))
}

fn rejection_reason(rejection: &Rejection) -> String {
    let better: Vec<&str> = rejection
        .better_files
        .iter()
        .map(|f| f.file_path.as_str())
        .collect();
    format!("{} ({})", rejection.reason, better.join(", "))
}

impl ImportService {
    pub fn new(
        parser: FilenameParser,
        resolver: TitleResolver,
        planner: PathPlanner,
        catalog: Arc<dyn CatalogIndex>,
        leases: Arc<dyn LeaseManager>,
        settings: ImportSettings,
    ) -> Self {
        let reconciler = Reconciler::new(parser.quality_table());
        let migrator = TitleMigrator::new(
            planner.clone(),
            reconciler.clone(),
            catalog.clone(),
            leases.clone(),
            settings.lease_timeout,
        );
        Self {
            parser,
            resolver,
            reconciler,
            planner,
            migrator,
            catalog,
            leases,
            settings,
        }
    }

    /// Wire the service from configuration
    pub fn from_config(
        config: &Config,
        catalog: Arc<dyn CatalogIndex>,
        leases: Arc<dyn LeaseManager>,
    ) -> Result<Self> {
        let parser = parser_from_config(config)?;

        let lookup: Arc<dyn TitleLookup> = match &config.tmdb_api_key {
            Some(key) => Arc::new(TmdbLookup::new(key.clone(), config.lookup_timeout)?),
            None => {
                info!("TMDB_API_KEY not set, title lookups disabled");
                Arc::new(NoLookup)
            }
        };

        Ok(Self::new(
            parser,
            TitleResolver::new(lookup, config.lookup_timeout),
            PathPlanner::new(&config.movies_dir, &config.tv_dir),
            catalog,
            leases,
            ImportSettings {
                library_root: config.library_path.clone(),
                rejects_root: config.rejects_path.clone(),
                lease_timeout: config.lease_timeout,
                retry: RetryConfig::default(),
            },
        ))
    }

    pub fn parser(&self) -> &FilenameParser {
        &self.parser
    }

    pub fn planner(&self) -> &PathPlanner {
        &self.planner
    }

    /// Import one file
    pub async fn import(&self, source: &Path) -> ImportResult<ImportOutcome> {
        let filename = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let identity = match self.parser.parse(&filename) {
            Ok(identity) => identity,
            Err(e) => {
                warn!(filename = %filename, error = %e, "Filename rejected");
                return self.reject(source, e.reject_label(), e.to_string()).await;
            }
        };

        let parsed_key = title_key(&identity);
        let canonical = self.resolver.resolve(self.catalog.as_ref(), &identity).await;
        let identity = identity.with_canonical(&canonical.title, canonical.year);
        let kind = match &identity {
            ParsedIdentity::Movie(_) => TitleKind::Movie,
            ParsedIdentity::Episode(_) => TitleKind::Series,
        };
        let key = canonical.key(kind);
        let external_id = canonical.external_id.as_deref();

        let leases = acquire_titles(
            self.leases.as_ref(),
            &[&parsed_key, &key],
            self.settings.lease_timeout,
        )
        .await?;

        if parsed_key != key {
            self.fold_parsed_title(&parsed_key, &key, &canonical).await?;
        }
        let applied = retry_async_when(
            || self.reconcile_and_apply(source, &identity, &key, external_id),
            is_transaction_error,
            &self.settings.retry,
            "import_apply",
        )
        .await?;
        drop(leases);

        match applied {
            Applied::Outcome(outcome) => Ok(outcome),
            Applied::Rejected { label, reason } => self.reject(source, label, reason).await,
        }
    }

    /// Migrate a title cataloged under the parsed name to the canonical one.
    /// Both title leases must be held.
    async fn fold_parsed_title(
        &self,
        parsed_key: &TitleKey,
        key: &TitleKey,
        canonical: &CanonicalIdentity,
    ) -> ImportResult<()> {
        let Some(stale) = self
            .catalog
            .find_title_by_key(parsed_key)
            .await
            .map_err(ImportError::Catalog)?
        else {
            return Ok(());
        };
        let current = self
            .catalog
            .find_title_by_key(key)
            .await
            .map_err(ImportError::Catalog)?;
        if current.is_some_and(|t| t.id == stale.id) {
            return Ok(());
        }

        let report = retry_async_when(
            || self.migrator.migrate_locked(stale.id, canonical),
            is_transaction_error,
            &self.settings.retry,
            "import_migrate",
        )
        .await?;
        let failed = apply_on_disk(&self.settings.library_root, &report).await;
        info!(
            from = %parsed_key,
            to = %key,
            merged = report.merged,
            renamed = report.renames.len() - failed.len(),
            removed = report.removed.len(),
            "Migrated title to canonical name"
        );
        Ok(())
    }

    async fn reconcile_and_apply(
        &self,
        source: &Path,
        identity: &ParsedIdentity,
        key: &TitleKey,
        external_id: Option<&str>,
    ) -> ImportResult<Applied> {
        let title = self
            .catalog
            .find_title_by_key(key)
            .await
            .map_err(ImportError::Catalog)?;
        let existing = match &title {
            Some(title) => self
                .catalog
                .find_files_in_partition(&partition_key(title.id, identity))
                .await
                .map_err(ImportError::Catalog)?,
            None => Vec::new(),
        };

        let to_delete = match self.reconciler.evaluate(identity, &existing)? {
            Decision::Reject(rejection) => {
                return Ok(Applied::Rejected {
                    label: rejection.reason.label(),
                    reason: rejection_reason(&rejection),
                });
            }
            Decision::Admit => Vec::new(),
            Decision::AdmitAndReplace(files) => files,
        };

        let planned = self.planner.plan(identity);
        let relative = planned.relative_path();
        let relative_str = relative.to_string_lossy().into_owned();
        let destination = self.settings.library_root.join(&relative);

        let replaced_in_place = to_delete.iter().any(|f| f.file_path == relative_str);
        let occupied = self
            .catalog
            .find_file_by_path(&relative_str)
            .await
            .map_err(ImportError::Catalog)?
            .is_some()
            || destination.exists();
        if occupied && !replaced_in_place {
            return Ok(Applied::Rejected {
                label: CONFLICT_LABEL,
                reason: format!("destination already exists: {}", relative_str),
            });
        }

        let mut tx = self.catalog.begin().await.map_err(tx_error)?;
        let title = tx
            .get_or_create_title(key, external_id)
            .await
            .map_err(tx_error)?;
        if title.external_id.is_none() && external_id.is_some() {
            tx.update_title(title.id, key, external_id)
                .await
                .map_err(tx_error)?;
        }
        for file in &to_delete {
            tx.delete_file(file.id).await.map_err(tx_error)?;
        }
        let record = tx
            .insert_file(&new_media_file(title.id, identity, &relative_str))
            .await
            .map_err(tx_error)?;

        // Dropping `tx` on any error below rolls the catalog back
        move_file(source, &destination).await.map_err(io_error)?;
        if let Err(e) = tx.commit().await {
            if let Err(undo) = move_file(&destination, source).await {
                error!(
                    path = %destination.display(),
                    error = %undo,
                    "Failed to return file after aborted import"
                );
            }
            return Err(tx_error(e));
        }

        let mut removed = Vec::with_capacity(to_delete.len());
        for file in &to_delete {
            let path = PathBuf::from(&file.file_path);
            if file.file_path != relative_str {
                let absolute = self.settings.library_root.join(&path);
                if let Err(e) = tokio::fs::remove_file(&absolute).await {
                    warn!(path = %absolute.display(), error = %e, "Failed to delete superseded file");
                }
            }
            removed.push(path);
        }

        info!(
            title = %key,
            path = %relative_str,
            quality = identity.quality_label(),
            removed = removed.len(),
            "File admitted"
        );

        Ok(Applied::Outcome(if removed.is_empty() {
            ImportOutcome::Admitted {
                file: record,
                path: relative,
            }
        } else {
            ImportOutcome::Replaced {
                file: record,
                path: relative,
                removed,
            }
        }))
    }

    async fn reject(&self, source: &Path, label: &str, reason: String) -> ImportResult<ImportOutcome> {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let dir = self.settings.rejects_root.join(sanitize_path_segment(label));
        let destination = unused_path(&dir, &name);
        move_file(source, &destination).await.map_err(io_error)?;

        info!(
            filename = %name,
            label = %label,
            reason = %reason,
            moved_to = %destination.display(),
            "File rejected"
        );

        Ok(ImportOutcome::Rejected {
            label: label.to_string(),
            reason,
            moved_to: destination,
        })
    }
}

/// One queued import
#[derive(Debug, Clone)]
pub struct ImportJob {
    pub path: PathBuf,
    pub attempt: u32,
}

impl ImportJob {
    pub fn new(path: PathBuf) -> Self {
        Self { path, attempt: 1 }
    }
}

/// Counts of finished imports
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub admitted: usize,
    pub replaced: usize,
    pub rejected: usize,
    pub failed: usize,
    pub requeued: usize,
}

impl ImportSummary {
    fn record(&mut self, outcome: &ImportOutcome) {
        match outcome {
            ImportOutcome::Admitted { .. } => self.admitted += 1,
            ImportOutcome::Replaced { .. } => self.replaced += 1,
            ImportOutcome::Rejected { .. } => self.rejected += 1,
        }
    }
}

async fn process_job(
    service: &ImportService,
    job: ImportJob,
    queue: QueueHandle<ImportJob>,
    policy: &RequeuePolicy,
    summary: &Mutex<ImportSummary>,
) {
    match service.import(&job.path).await {
        Ok(outcome) => summary.lock().record(&outcome),
        Err(e) if e.is_retryable() && policy.allows_retry(job.attempt) => {
            let delay = policy.delay();
            warn!(
                path = %job.path.display(),
                attempt = job.attempt,
                error = %e,
                retry_in_secs = delay.as_secs(),
                "Import deferred"
            );
            summary.lock().requeued += 1;
            queue.submit_after(
                ImportJob {
                    path: job.path,
                    attempt: job.attempt + 1,
                },
                delay,
            );
        }
        Err(e) => {
            error!(
                path = %job.path.display(),
                attempt = job.attempt,
                error = %e,
                "Import failed, file left in place"
            );
            summary.lock().failed += 1;
        }
    }
}

/// Queue running imports with bounded concurrency, requeueing those that
/// could not get their lease
pub fn spawn_import_queue(
    service: Arc<ImportService>,
    policy: RequeuePolicy,
    concurrency: usize,
) -> (WorkQueue<ImportJob>, Arc<Mutex<ImportSummary>>) {
    let summary = Arc::new(Mutex::new(ImportSummary::default()));
    let queue = {
        let summary = summary.clone();
        WorkQueue::new(
            "import",
            JobQueueConfig {
                max_concurrent: concurrency,
                ..Default::default()
            },
            move |job: ImportJob, handle| {
                let service = service.clone();
                let policy = policy.clone();
                let summary = summary.clone();
                async move { process_job(&service, job, handle, &policy, &summary).await }
            },
        )
    };
    (queue, summary)
}
