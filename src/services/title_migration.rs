//! Retitling cataloged titles
//!
//! Moves a title to a new canonical name. When another title already holds
//! that name the two are merged: every moved file is reconciled against the
//! target's files, so dominated files are dropped and superseded ones
//! replaced. Surviving files get their plex title, group key and library
//! path recomputed. The report lists the renames and removals for the
//! caller to carry out on disk ([`apply_on_disk`]).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{CatalogIndex, FilePlacement, MediaFileRecord, TitleRecord};
use crate::error::{ImportError, ImportResult};
use crate::services::file_utils::move_file;
use crate::services::filename_parser::{
    FULL_SCREEN, ParsedEpisode, ParsedIdentity, ParsedMovie, TOKEN_SEPARATOR, split_edition,
};
use crate::services::lease::{LeaseManager, acquire_titles};
use crate::services::path_planner::{PathPlanner, plex_title, strip_fullscreen_suffix};
use crate::services::reconciler::{Decision, Reconciler, partition_key};
use crate::services::text_utils::sanitize_path_segment;
use crate::services::title_resolver::CanonicalIdentity;

/// One file whose library path changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub file_id: Uuid,
    pub from: PathBuf,
    pub to: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    /// Title now holding the files
    pub title_id: Uuid,
    /// Whether the source title was merged into an existing one
    pub merged: bool,
    pub renames: Vec<Rename>,
    /// Library-relative files dropped from the catalog while merging
    pub removed: Vec<PathBuf>,
}

pub struct TitleMigrator {
    planner: PathPlanner,
    reconciler: Reconciler,
    catalog: Arc<dyn CatalogIndex>,
    leases: Arc<dyn LeaseManager>,
    lease_timeout: Duration,
}

fn tx_error(e: anyhow::Error) -> ImportError {
    ImportError::CatalogTransaction(e)
}

fn extension(file_path: &str) -> String {
    Path::new(file_path)
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Display tokens stored in a plex title after `prefix`, or rebuilt from the
/// edition when the plex title does not start with it
fn stored_tokens(file: &MediaFileRecord, prefix: &str) -> Vec<String> {
    if let Some(rest) = file.plex_title.strip_prefix(prefix) {
        return match rest.strip_prefix(TOKEN_SEPARATOR) {
            Some(tokens) => split_edition(tokens),
            None => Vec::new(),
        };
    }
    let mut tokens = file.edition.as_deref().map(split_edition).unwrap_or_default();
    if file.is_fullscreen {
        tokens.push(FULL_SCREEN.to_string());
    }
    tokens
}

fn episode_number(value: Option<i64>) -> ImportResult<u32> {
    value
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| ImportError::Catalog(anyhow!("episode file without valid numbering")))
}

/// Identity of a cataloged file under its current title
pub fn stored_identity(title: &TitleRecord, file: &MediaFileRecord) -> ImportResult<ParsedIdentity> {
    if file.is_episode() {
        let season = episode_number(file.season)?;
        let (episode, last_episode) = file
            .episode_range()
            .ok_or_else(|| ImportError::Catalog(anyhow!("episode file without valid numbering")))?;
        let mut numbering = format!("S{:02}E{:02}", season, episode);
        if last_episode != episode {
            numbering.push_str(&format!("-E{:02}", last_episode));
        }
        let prefix = format!(
            "{}{}{}",
            sanitize_path_segment(&title.title),
            TOKEN_SEPARATOR,
            numbering
        );
        return Ok(ParsedIdentity::Episode(ParsedEpisode {
            series_title: title.title.clone(),
            season,
            episode,
            last_episode,
            edition: file.edition.clone(),
            tokens: stored_tokens(file, &prefix),
            quality_label: file.quality_label.clone(),
            is_fullscreen: file.is_fullscreen,
            extension: extension(&file.file_path),
        }));
    }

    let year = title
        .year
        .ok_or_else(|| ImportError::Catalog(anyhow!("movie title {} has no year", title.id)))?;
    let (feature_name, tokens) = match &file.feature_type {
        Some(_) => (Some(file.plex_title.clone()), Vec::new()),
        None => {
            let prefix = sanitize_path_segment(&format!("{} ({})", title.title, year));
            (None, stored_tokens(file, &prefix))
        }
    };
    Ok(ParsedIdentity::Movie(ParsedMovie {
        title: title.title.clone(),
        year,
        edition: file.edition.clone(),
        feature_type_name: file.feature_type.clone(),
        feature_name,
        tokens,
        quality_label: file.quality_label.clone(),
        is_fullscreen: file.is_fullscreen,
        extension: extension(&file.file_path),
    }))
}

impl TitleMigrator {
    pub fn new(
        planner: PathPlanner,
        reconciler: Reconciler,
        catalog: Arc<dyn CatalogIndex>,
        leases: Arc<dyn LeaseManager>,
        lease_timeout: Duration,
    ) -> Self {
        Self {
            planner,
            reconciler,
            catalog,
            leases,
            lease_timeout,
        }
    }

    fn placement(&self, identity: &ParsedIdentity) -> FilePlacement {
        let title = plex_title(identity);
        FilePlacement {
            group_key: strip_fullscreen_suffix(&title).to_string(),
            file_path: self
                .planner
                .plan(identity)
                .relative_path()
                .to_string_lossy()
                .into_owned(),
            plex_title: title,
        }
    }

    /// Give `title_id` the canonical name, merging into the title already
    /// holding it if there is one
    pub async fn migrate(
        &self,
        title_id: Uuid,
        canonical: &CanonicalIdentity,
    ) -> ImportResult<MigrationReport> {
        let title = self.title(title_id).await?;
        let old_key = title.key();
        let new_key = canonical.key(old_key.kind());
        let _leases =
            acquire_titles(self.leases.as_ref(), &[&old_key, &new_key], self.lease_timeout).await?;
        self.migrate_locked(title_id, canonical).await
    }

    async fn title(&self, title_id: Uuid) -> ImportResult<TitleRecord> {
        self.catalog
            .get_title(title_id)
            .await
            .map_err(ImportError::Catalog)?
            .ok_or_else(|| ImportError::Catalog(anyhow!("Title {} not found", title_id)))
    }

    /// [`migrate`](Self::migrate) for a caller already holding the leases
    /// of both the current and the canonical title
    pub async fn migrate_locked(
        &self,
        title_id: Uuid,
        canonical: &CanonicalIdentity,
    ) -> ImportResult<MigrationReport> {
        let title = self.title(title_id).await?;
        let old_key = title.key();
        let new_key = canonical.key(old_key.kind());
        let external_id = canonical.external_id.as_deref();

        let mut tx = self.catalog.begin().await.map_err(tx_error)?;
        let files = tx.list_files_for_title(title_id).await.map_err(tx_error)?;
        let existing = tx
            .find_title_by_key(&new_key)
            .await
            .map_err(tx_error)?
            .filter(|t| t.id != title_id);

        let target = match existing {
            Some(target) => {
                if target.external_id.is_none() && external_id.is_some() {
                    tx.update_title(target.id, &new_key, external_id)
                        .await
                        .map_err(tx_error)?;
                }
                info!(from = %old_key, into = %new_key, files = files.len(), "Merging titles");
                target
            }
            None => {
                tx.update_title(title_id, &new_key, external_id)
                    .await
                    .map_err(tx_error)?;
                info!(from = %old_key, to = %new_key, "Renaming title");
                TitleRecord {
                    title: new_key.title().to_string(),
                    year: new_key.year(),
                    ..title.clone()
                }
            }
        };
        let merged = target.id != title_id;

        let mut renames: Vec<Rename> = Vec::new();
        let mut removed = Vec::new();
        for file in &files {
            let identity = stored_identity(&title, file)?.with_canonical(&target.title, target.year);
            if merged {
                let rivals = tx
                    .find_files_in_partition(&partition_key(target.id, &identity))
                    .await
                    .map_err(tx_error)?;
                match self.reconciler.evaluate(&identity, &rivals)? {
                    Decision::Reject(rejection) => {
                        info!(
                            file = %file.file_path,
                            reason = %rejection.reason,
                            "Dropping file dominated in merged title"
                        );
                        tx.delete_file(file.id).await.map_err(tx_error)?;
                        removed.push(PathBuf::from(&file.file_path));
                        continue;
                    }
                    Decision::AdmitAndReplace(victims) => {
                        for victim in victims {
                            info!(
                                file = %victim.file_path,
                                by = %file.file_path,
                                "Replacing file in merged title"
                            );
                            tx.delete_file(victim.id).await.map_err(tx_error)?;
                            // A victim moved earlier in this merge is still at its old path
                            let moved_earlier = renames.iter().position(|r| r.file_id == victim.id);
                            let on_disk = match moved_earlier {
                                Some(idx) => renames.remove(idx).from,
                                None => PathBuf::from(victim.file_path),
                            };
                            removed.push(on_disk);
                        }
                    }
                    Decision::Admit => {}
                }
                tx.reparent_file(file.id, target.id).await.map_err(tx_error)?;
            }

            let placement = self.placement(&identity);
            if placement.file_path == file.file_path && placement.plex_title == file.plex_title {
                continue;
            }
            tx.update_file_placement(file.id, &placement)
                .await
                .map_err(tx_error)?;
            renames.push(Rename {
                file_id: file.id,
                from: PathBuf::from(&file.file_path),
                to: PathBuf::from(&placement.file_path),
            });
        }

        if merged {
            tx.delete_title(title_id).await.map_err(tx_error)?;
        }
        tx.commit().await.map_err(tx_error)?;
        Ok(MigrationReport {
            title_id: target.id,
            merged,
            renames,
            removed,
        })
    }
}

/// Carry out a committed migration under `library_root`: delete the dropped
/// files, then move the renamed ones. Returns the renames that failed.
pub async fn apply_on_disk(library_root: &Path, report: &MigrationReport) -> Vec<Rename> {
    for path in &report.removed {
        let path = library_root.join(path);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!(path = %path.display(), error = %e, "Failed to remove dropped file");
        }
    }
    perform_renames(library_root, &report.renames).await
}

/// Move renamed files under `library_root`; returns the renames that failed
pub async fn perform_renames(library_root: &Path, renames: &[Rename]) -> Vec<Rename> {
    let mut failed = Vec::new();
    for rename in renames {
        let from = library_root.join(&rename.from);
        let to = library_root.join(&rename.to);
        if let Err(e) = move_file(&from, &to).await {
            warn!(from = %from.display(), to = %to.display(), error = %e, "Rename failed");
            failed.push(rename.clone());
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::services::filename_parser::{FeatureTypes, FilenameParser};
    use crate::services::lease::LocalLeaseManager;
    use crate::services::quality::QualityTable;
    use crate::services::reconciler::{new_media_file, title_key};
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    fn parser() -> FilenameParser {
        FilenameParser::new(Arc::new(QualityTable::default()), FeatureTypes::default())
    }

    async fn db() -> Arc<Database> {
        let db = Database::connect_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        Arc::new(db)
    }

    fn migrator(db: &Arc<Database>) -> TitleMigrator {
        TitleMigrator::new(
            PathPlanner::default(),
            Reconciler::new(Arc::new(QualityTable::default())),
            db.clone(),
            Arc::new(LocalLeaseManager::new()),
            Duration::from_secs(1),
        )
    }

    async fn seed(db: &Database, raw: &str) -> MediaFileRecord {
        let identity = parser().parse(raw).unwrap();
        let key = title_key(&identity);
        let path = PathPlanner::default().plan(&identity).relative_path();
        let mut tx = db.begin().await.unwrap();
        let title = tx.get_or_create_title(&key, None).await.unwrap();
        let file = tx
            .insert_file(&new_media_file(title.id, &identity, &path.to_string_lossy()))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        file
    }

    fn canonical(title: &str, year: Option<i32>) -> CanonicalIdentity {
        CanonicalIdentity {
            title: title.to_string(),
            year,
            external_id: Some("tmdb:348".to_string()),
        }
    }

    #[tokio::test]
    async fn test_rename_in_place() {
        let db = db().await;
        let file = seed(&db, "Alein (1979) - Director's Cut - Full Screen [DVD].mkv").await;

        let report = migrator(&db)
            .migrate(file.title_id, &canonical("Alien", Some(1979)))
            .await
            .unwrap();

        assert!(!report.merged);
        assert_eq!(report.title_id, file.title_id);
        assert_eq!(
            report.renames,
            vec![Rename {
                file_id: file.id,
                from: PathBuf::from(
                    "Movies/Alein (1979)/Alein (1979) - Director's Cut - Full Screen [DVD].mkv"
                ),
                to: PathBuf::from(
                    "Movies/Alien (1979)/Alien (1979) - Director's Cut - Full Screen [DVD].mkv"
                ),
            }]
        );

        let title = db.get_title(file.title_id).await.unwrap().unwrap();
        assert_eq!(title.title, "Alien");
        assert_eq!(title.external_id.as_deref(), Some("tmdb:348"));

        let files = db.media_files().list_by_title(file.title_id).await.unwrap();
        assert_eq!(files[0].plex_title, "Alien (1979) - Director's Cut - Full Screen");
        assert_eq!(files[0].group_key, "Alien (1979) - Director's Cut");
    }

    #[tokio::test]
    async fn test_merge_into_existing_title() {
        let db = db().await;
        let kept = seed(&db, "Alien (1979) [Bluray-1080p].mkv").await;
        let stray = seed(&db, "Alein (1979) - Extended [DVD].mkv").await;
        assert_ne!(kept.title_id, stray.title_id);

        let report = migrator(&db)
            .migrate(stray.title_id, &canonical("Alien", Some(1979)))
            .await
            .unwrap();

        assert!(report.merged);
        assert_eq!(report.title_id, kept.title_id);
        assert_eq!(report.renames.len(), 1);
        assert_eq!(
            report.renames[0].to,
            PathBuf::from("Movies/Alien (1979)/Alien (1979) - Extended [DVD].mkv")
        );
        assert_eq!(db.get_title(stray.title_id).await.unwrap(), None);
        assert_eq!(
            db.media_files().list_by_title(kept.title_id).await.unwrap().len(),
            2
        );
    }

    fn se7en() -> CanonicalIdentity {
        CanonicalIdentity {
            title: "Se7en".to_string(),
            year: Some(1995),
            external_id: Some("tmdb:807".to_string()),
        }
    }

    #[tokio::test]
    async fn test_merge_drops_equal_quality_file() {
        let db = db().await;
        let kept = seed(&db, "Se7en (1995) [DVD].mkv").await;
        let avi = seed(&db, "Seven (1995) [DVD].avi").await;

        let report = migrator(&db).migrate(avi.title_id, &se7en()).await.unwrap();

        assert!(report.merged);
        assert_eq!(report.title_id, kept.title_id);
        assert!(report.renames.is_empty());
        assert_eq!(
            report.removed,
            vec![PathBuf::from("Movies/Seven (1995)/Seven (1995) [DVD].avi")]
        );
        let files = db.media_files().list_by_title(kept.title_id).await.unwrap();
        assert_eq!(files.iter().map(|f| f.id).collect::<Vec<_>>(), vec![kept.id]);
        assert_eq!(db.get_title(avi.title_id).await.unwrap(), None);

        let title = db.get_title(kept.title_id).await.unwrap().unwrap();
        assert_eq!(title.external_id.as_deref(), Some("tmdb:807"));
    }

    #[tokio::test]
    async fn test_merge_with_colliding_path_does_not_fail() {
        let db = db().await;
        let kept = seed(&db, "Se7en (1995) [DVD].mkv").await;
        let twin = seed(&db, "Seven (1995) [DVD].mkv").await;

        let report = migrator(&db).migrate(twin.title_id, &se7en()).await.unwrap();

        assert_eq!(report.removed, vec![PathBuf::from(&twin.file_path)]);
        assert_eq!(db.media_files().count().await.unwrap(), 1);
        let survivor = db.find_file_by_path(&kept.file_path).await.unwrap().unwrap();
        assert_eq!(survivor.id, kept.id);
    }

    #[tokio::test]
    async fn test_merge_replaces_inferior_file() {
        let db = db().await;
        let dvd = seed(&db, "Se7en (1995) [DVD].mkv").await;
        let bluray = seed(&db, "Seven (1995) [Bluray-1080p].mkv").await;

        let report = migrator(&db).migrate(bluray.title_id, &se7en()).await.unwrap();

        assert_eq!(report.removed, vec![PathBuf::from(&dvd.file_path)]);
        assert_eq!(
            report.renames,
            vec![Rename {
                file_id: bluray.id,
                from: PathBuf::from("Movies/Seven (1995)/Seven (1995) [Bluray-1080p].mkv"),
                to: PathBuf::from("Movies/Se7en (1995)/Se7en (1995) [Bluray-1080p].mkv"),
            }]
        );
        let files = db.media_files().list_by_title(dvd.title_id).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].id, bluray.id);
        assert_eq!(files[0].plex_title, "Se7en (1995)");
    }

    #[tokio::test]
    async fn test_apply_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let dropped = PathBuf::from("Movies/Se7en (1995)/Se7en (1995) [DVD].mkv");
        let from = PathBuf::from("Movies/Seven (1995)/Seven (1995) [Bluray-1080p].mkv");
        let to = PathBuf::from("Movies/Se7en (1995)/Se7en (1995) [Bluray-1080p].mkv");
        for path in [&dropped, &from] {
            std::fs::create_dir_all(dir.path().join(path).parent().unwrap()).unwrap();
            std::fs::write(dir.path().join(path), b"x").unwrap();
        }

        let report = MigrationReport {
            title_id: Uuid::new_v4(),
            merged: true,
            renames: vec![Rename {
                file_id: Uuid::new_v4(),
                from: from.clone(),
                to: to.clone(),
            }],
            removed: vec![dropped.clone()],
        };
        assert!(apply_on_disk(dir.path(), &report).await.is_empty());

        assert!(!dir.path().join(&dropped).exists());
        assert!(!dir.path().join(&from).exists());
        assert!(dir.path().join(&to).exists());
    }

    #[tokio::test]
    async fn test_feature_keeps_its_name() {
        let db = db().await;
        let file = seed(&db, "Alein (1979) - Featurettes - Making of Alein [DVD].mkv").await;

        let report = migrator(&db)
            .migrate(file.title_id, &canonical("Alien", Some(1979)))
            .await
            .unwrap();

        assert_eq!(
            report.renames[0].to,
            PathBuf::from("Movies/Alien (1979)/Featurettes/Making of Alein [DVD].mkv")
        );
    }

    #[tokio::test]
    async fn test_series_rename() {
        let db = db().await;
        let file = seed(&db, "Shwo - S01E01-E02 - Extended [WEBDL-720p].mkv").await;

        let report = migrator(&db)
            .migrate(file.title_id, &canonical("Show", None))
            .await
            .unwrap();

        assert_eq!(
            report.renames[0].to,
            PathBuf::from("TV Shows/Show/Season 01/Show - S01E01-E02 - Extended [WEBDL-720p].mkv")
        );
    }

    #[tokio::test]
    async fn test_unchanged_name_has_no_renames() {
        let db = db().await;
        let file = seed(&db, "Alien (1979) [DVD].mkv").await;

        let report = migrator(&db)
            .migrate(file.title_id, &canonical("Alien", Some(1979)))
            .await
            .unwrap();
        assert!(report.renames.is_empty());
    }

    #[tokio::test]
    async fn test_missing_title() {
        let db = db().await;
        let result = migrator(&db)
            .migrate(Uuid::new_v4(), &canonical("Alien", Some(1979)))
            .await;
        assert_matches!(result, Err(ImportError::Catalog(_)));
    }

    #[tokio::test]
    async fn test_perform_renames() {
        let dir = tempfile::tempdir().unwrap();
        let from = PathBuf::from("Movies/Alein (1979)/Alein (1979) [DVD].mkv");
        std::fs::create_dir_all(dir.path().join("Movies/Alein (1979)")).unwrap();
        std::fs::write(dir.path().join(&from), b"x").unwrap();

        let renames = vec![
            Rename {
                file_id: Uuid::new_v4(),
                from,
                to: PathBuf::from("Movies/Alien (1979)/Alien (1979) [DVD].mkv"),
            },
            Rename {
                file_id: Uuid::new_v4(),
                from: PathBuf::from("missing.mkv"),
                to: PathBuf::from("elsewhere.mkv"),
            },
        ];
        let failed = perform_renames(dir.path(), &renames).await;

        assert_eq!(failed, vec![renames[1].clone()]);
        assert!(dir.path().join("Movies/Alien (1979)/Alien (1979) [DVD].mkv").exists());
    }
}
