//! Titles database repository (movies and series)

use anyhow::Result;
use sqlx::{Sqlite, SqlitePool};
use uuid::Uuid;

const TITLE_COLUMNS: &str = "id, kind, title, year, external_id, created_at, updated_at";

/// Movie or series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TitleKind {
    Movie,
    Series,
}

impl TitleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TitleKind::Movie => "movie",
            TitleKind::Series => "series",
        }
    }
}

/// Natural key of a title: `(title, year)` for movies, `(title)` for series
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TitleKey {
    Movie { title: String, year: i32 },
    Series { title: String },
}

impl TitleKey {
    pub fn kind(&self) -> TitleKind {
        match self {
            TitleKey::Movie { .. } => TitleKind::Movie,
            TitleKey::Series { .. } => TitleKind::Series,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            TitleKey::Movie { title, .. } | TitleKey::Series { title } => title,
        }
    }

    pub fn year(&self) -> Option<i32> {
        match self {
            TitleKey::Movie { year, .. } => Some(*year),
            TitleKey::Series { .. } => None,
        }
    }
}

impl std::fmt::Display for TitleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TitleKey::Movie { title, year } => write!(f, "{} ({})", title, year),
            TitleKey::Series { title } => write!(f, "{}", title),
        }
    }
}

/// Title record from database
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct TitleRecord {
    pub id: Uuid,
    pub kind: String,
    pub title: String,
    pub year: Option<i32>,
    pub external_id: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl TitleRecord {
    pub fn key(&self) -> TitleKey {
        match self.year {
            Some(year) if self.kind == TitleKind::Movie.as_str() => TitleKey::Movie {
                title: self.title.clone(),
                year,
            },
            _ => TitleKey::Series {
                title: self.title.clone(),
            },
        }
    }
}

/// Find a title by its natural key
pub async fn find_by_key<'e, E>(exec: E, key: &TitleKey) -> Result<Option<TitleRecord>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let record = match key {
        TitleKey::Movie { title, year } => {
            sqlx::query_as::<_, TitleRecord>(&format!(
                "SELECT {TITLE_COLUMNS} FROM titles WHERE kind = 'movie' AND title = ?1 AND year = ?2"
            ))
            .bind(title)
            .bind(year)
            .fetch_optional(exec)
            .await?
        }
        TitleKey::Series { title } => {
            sqlx::query_as::<_, TitleRecord>(&format!(
                "SELECT {TITLE_COLUMNS} FROM titles WHERE kind = 'series' AND title = ?1"
            ))
            .bind(title)
            .fetch_optional(exec)
            .await?
        }
    };

    Ok(record)
}

/// Find a title by the identifier of the external metadata provider
pub async fn find_by_external_id<'e, E>(
    exec: E,
    kind: TitleKind,
    external_id: &str,
) -> Result<Option<TitleRecord>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let record = sqlx::query_as::<_, TitleRecord>(&format!(
        "SELECT {TITLE_COLUMNS} FROM titles WHERE kind = ?1 AND external_id = ?2 \
         ORDER BY created_at ASC LIMIT 1"
    ))
    .bind(kind.as_str())
    .bind(external_id)
    .fetch_optional(exec)
    .await?;

    Ok(record)
}

pub async fn get<'e, E>(exec: E, id: Uuid) -> Result<Option<TitleRecord>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let record = sqlx::query_as::<_, TitleRecord>(&format!(
        "SELECT {TITLE_COLUMNS} FROM titles WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(exec)
    .await?;

    Ok(record)
}

pub async fn insert<'e, E>(
    exec: E,
    key: &TitleKey,
    external_id: Option<&str>,
) -> Result<TitleRecord>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let now = chrono::Utc::now();
    let record = sqlx::query_as::<_, TitleRecord>(&format!(
        "INSERT INTO titles (id, kind, title, year, external_id, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6) RETURNING {TITLE_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(key.kind().as_str())
    .bind(key.title())
    .bind(key.year())
    .bind(external_id)
    .bind(now)
    .fetch_one(exec)
    .await?;

    Ok(record)
}

pub async fn update<'e, E>(
    exec: E,
    id: Uuid,
    key: &TitleKey,
    external_id: Option<&str>,
) -> Result<bool>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE titles SET title = ?2, year = ?3, external_id = COALESCE(?4, external_id), \
         updated_at = ?5 WHERE id = ?1",
    )
    .bind(id)
    .bind(key.title())
    .bind(key.year())
    .bind(external_id)
    .bind(chrono::Utc::now())
    .execute(exec)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn delete<'e, E>(exec: E, id: Uuid) -> Result<bool>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM titles WHERE id = ?1")
        .bind(id)
        .execute(exec)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub struct TitleRepository {
    pool: SqlitePool,
}

impl TitleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_by_key(&self, key: &TitleKey) -> Result<Option<TitleRecord>> {
        find_by_key(&self.pool, key).await
    }

    pub async fn find_by_external_id(
        &self,
        kind: TitleKind,
        external_id: &str,
    ) -> Result<Option<TitleRecord>> {
        find_by_external_id(&self.pool, kind, external_id).await
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<TitleRecord>> {
        get(&self.pool, id).await
    }

    /// List all titles of a kind, ordered by title
    pub async fn list(&self, kind: TitleKind) -> Result<Vec<TitleRecord>> {
        let records = sqlx::query_as::<_, TitleRecord>(&format!(
            "SELECT {TITLE_COLUMNS} FROM titles WHERE kind = ?1 ORDER BY title, year"
        ))
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}
