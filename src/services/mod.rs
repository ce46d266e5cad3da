//! Classification, reconciliation and import services

pub mod file_utils;
pub mod filename_parser;
pub mod importer;
pub mod job_queue;
pub mod lease;
pub mod logging;
pub mod path_planner;
pub mod quality;
pub mod rate_limiter;
pub mod reconciler;
pub mod text_utils;
pub mod title_migration;
pub mod title_resolver;
pub mod tmdb;

pub use filename_parser::{FeatureTypes, FilenameParser, ParsedEpisode, ParsedIdentity, ParsedMovie};
pub use importer::{ImportJob, ImportOutcome, ImportService, ImportSettings, ImportSummary, spawn_import_queue};
pub use job_queue::{JobQueueConfig, QueueHandle, RequeuePolicy, WorkQueue};
pub use lease::{Lease, LeaseManager, LocalLeaseManager, title_lease_key};
pub use logging::init_tracing;
pub use path_planner::{PathPlanner, PlannedPath};
pub use quality::{QualityLevel, QualityTable};
pub use reconciler::{Decision, Reconciler, RejectReason, Rejection};
pub use title_migration::{MigrationReport, Rename, TitleMigrator};
pub use title_resolver::{CanonicalIdentity, NoLookup, TitleLookup, TitleResolver};
pub use tmdb::TmdbLookup;
