//! Media files database repository

use anyhow::Result;
use sqlx::{Sqlite, SqlitePool};
use uuid::Uuid;

const FILE_COLUMNS: &str = "id, title_id, media_kind, season, episode, last_episode, \
    feature_type, edition, group_key, plex_title, quality_label, is_fullscreen, file_path, added_at";

/// Kind of media a file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Movie,
    Episode,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Episode => "episode",
        }
    }
}

/// Media file record from database
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct MediaFileRecord {
    pub id: Uuid,
    pub title_id: Uuid,
    pub media_kind: String,
    pub season: Option<i64>,
    pub episode: Option<i64>,
    pub last_episode: Option<i64>,
    pub feature_type: Option<String>,
    pub edition: Option<String>,
    /// Plex title without the fullscreen suffix; movies compete within it
    pub group_key: String,
    pub plex_title: String,
    pub quality_label: String,
    pub is_fullscreen: bool,
    /// Path relative to the library root
    pub file_path: String,
    pub added_at: chrono::DateTime<chrono::Utc>,
}

impl MediaFileRecord {
    pub fn is_episode(&self) -> bool {
        self.media_kind == MediaKind::Episode.as_str()
    }

    /// Inclusive episode range, for episode files
    pub fn episode_range(&self) -> Option<(u32, u32)> {
        let first = u32::try_from(self.episode?).ok()?;
        let last = self
            .last_episode
            .and_then(|l| u32::try_from(l).ok())
            .unwrap_or(first);
        Some((first, last.max(first)))
    }
}

/// Input for creating a media file
#[derive(Debug, Clone)]
pub struct CreateMediaFile {
    pub title_id: Uuid,
    pub media_kind: MediaKind,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub last_episode: Option<u32>,
    pub feature_type: Option<String>,
    pub edition: Option<String>,
    pub group_key: String,
    pub plex_title: String,
    pub quality_label: String,
    pub is_fullscreen: bool,
    pub file_path: String,
}

/// New naming of an existing file after its title changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePlacement {
    pub group_key: String,
    pub plex_title: String,
    pub file_path: String,
}

/// Files competing for "best version" of one logical cut
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionKey {
    Movie {
        title_id: Uuid,
        group_key: String,
        feature_type: Option<String>,
    },
    /// Matches every episode file whose range overlaps `first..=last`
    Episode {
        series_id: Uuid,
        season: u32,
        first_episode: u32,
        last_episode: u32,
        edition: Option<String>,
    },
}

pub async fn find_in_partition<'e, E>(exec: E, key: &PartitionKey) -> Result<Vec<MediaFileRecord>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let records = match key {
        PartitionKey::Movie {
            title_id,
            group_key,
            feature_type,
        } => {
            sqlx::query_as::<_, MediaFileRecord>(&format!(
                "SELECT {FILE_COLUMNS} FROM media_files \
                 WHERE title_id = ?1 AND media_kind = 'movie' AND group_key = ?2 AND feature_type IS ?3 \
                 ORDER BY added_at ASC"
            ))
            .bind(title_id)
            .bind(group_key)
            .bind(feature_type)
            .fetch_all(exec)
            .await?
        }
        PartitionKey::Episode {
            series_id,
            season,
            first_episode,
            last_episode,
            edition,
        } => {
            sqlx::query_as::<_, MediaFileRecord>(&format!(
                "SELECT {FILE_COLUMNS} FROM media_files \
                 WHERE title_id = ?1 AND media_kind = 'episode' AND season = ?2 AND edition IS ?3 \
                   AND episode <= ?5 AND COALESCE(last_episode, episode) >= ?4 \
                 ORDER BY episode ASC, added_at ASC"
            ))
            .bind(series_id)
            .bind(i64::from(*season))
            .bind(edition)
            .bind(i64::from(*first_episode))
            .bind(i64::from(*last_episode))
            .fetch_all(exec)
            .await?
        }
    };

    Ok(records)
}

pub async fn get_by_path<'e, E>(exec: E, path: &str) -> Result<Option<MediaFileRecord>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let record = sqlx::query_as::<_, MediaFileRecord>(&format!(
        "SELECT {FILE_COLUMNS} FROM media_files WHERE file_path = ?1"
    ))
    .bind(path)
    .fetch_optional(exec)
    .await?;

    Ok(record)
}

pub async fn list_by_title<'e, E>(exec: E, title_id: Uuid) -> Result<Vec<MediaFileRecord>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let records = sqlx::query_as::<_, MediaFileRecord>(&format!(
        "SELECT {FILE_COLUMNS} FROM media_files WHERE title_id = ?1 ORDER BY file_path"
    ))
    .bind(title_id)
    .fetch_all(exec)
    .await?;

    Ok(records)
}

pub async fn insert<'e, E>(exec: E, input: &CreateMediaFile) -> Result<MediaFileRecord>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let record = sqlx::query_as::<_, MediaFileRecord>(&format!(
        "INSERT INTO media_files ( \
             id, title_id, media_kind, season, episode, last_episode, feature_type, edition, \
             group_key, plex_title, quality_label, is_fullscreen, file_path, added_at \
         ) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14) \
         RETURNING {FILE_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(input.title_id)
    .bind(input.media_kind.as_str())
    .bind(input.season.map(i64::from))
    .bind(input.episode.map(i64::from))
    .bind(input.last_episode.map(i64::from))
    .bind(&input.feature_type)
    .bind(&input.edition)
    .bind(&input.group_key)
    .bind(&input.plex_title)
    .bind(&input.quality_label)
    .bind(input.is_fullscreen)
    .bind(&input.file_path)
    .bind(chrono::Utc::now())
    .fetch_one(exec)
    .await?;

    Ok(record)
}

pub async fn delete<'e, E>(exec: E, id: Uuid) -> Result<bool>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM media_files WHERE id = ?1")
        .bind(id)
        .execute(exec)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn reparent<'e, E>(exec: E, id: Uuid, title_id: Uuid) -> Result<bool>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("UPDATE media_files SET title_id = ?2 WHERE id = ?1")
        .bind(id)
        .bind(title_id)
        .execute(exec)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn update_placement<'e, E>(exec: E, id: Uuid, placement: &FilePlacement) -> Result<bool>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE media_files SET group_key = ?2, plex_title = ?3, file_path = ?4 WHERE id = ?1",
    )
    .bind(id)
    .bind(&placement.group_key)
    .bind(&placement.plex_title)
    .bind(&placement.file_path)
    .execute(exec)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub struct MediaFileRepository {
    pool: SqlitePool,
}

impl MediaFileRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// All files competing in a partition
    pub async fn find_in_partition(&self, key: &PartitionKey) -> Result<Vec<MediaFileRecord>> {
        find_in_partition(&self.pool, key).await
    }

    pub async fn get_by_path(&self, path: &str) -> Result<Option<MediaFileRecord>> {
        get_by_path(&self.pool, path).await
    }

    pub async fn list_by_title(&self, title_id: Uuid) -> Result<Vec<MediaFileRecord>> {
        list_by_title(&self.pool, title_id).await
    }

    pub async fn count(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM media_files")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}
