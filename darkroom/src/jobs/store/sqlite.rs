//! Durable job record store on SQLite.
//!
//! Rows carry a `revision` column. Transitions read the row, validate the
//! change with [`Job::apply`], then write it back with
//! `UPDATE ... WHERE id = ? AND revision = ?`; a write that matches no row
//! lost a race and is reported as a conflict.

use super::{JobStore, StoreError, StoreResult};
use crate::jobs::transition::Transition;
use crate::jobs::{DispatchToken, Job, JobId, JobState, OwnerId};
use crate::storage::BlobRef;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{BoxStream, StreamExt};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY NOT NULL,
        owner_id TEXT NOT NULL,
        input_ref TEXT NOT NULL,
        source_name TEXT,
        output_ref TEXT,
        state TEXT NOT NULL,
        error TEXT,
        created_at_ms INTEGER NOT NULL,
        updated_at_ms INTEGER NOT NULL,
        dispatch_token TEXT,
        redispatch_count INTEGER NOT NULL DEFAULT 0,
        revision INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_jobs_owner ON jobs (owner_id, created_at_ms)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_created ON jobs (created_at_ms)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs (state, created_at_ms)",
];

const SELECT_COLUMNS: &str = "SELECT id, owner_id, input_ref, source_name, output_ref, state, error, \
     created_at_ms, updated_at_ms, dispatch_token, redispatch_count, revision FROM jobs";

/// Job records in a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Open (creating if missing) the database at `url` and bootstrap the schema.
    ///
    /// In-memory URLs are pinned to a single connection, since every
    /// connection to `:memory:` would otherwise see its own database.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] if the database cannot be opened or the
    /// schema cannot be created.
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        if url.contains(":memory:") {
            return Self::in_memory().await;
        }

        let options = SqliteConnectOptions::from_str(url)
            .map_err(unavailable)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(unavailable)?;

        Self::from_pool(pool).await
    }

    /// Private in-memory database, kept alive for the lifetime of the store.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] if SQLite cannot be initialized.
    pub async fn in_memory() -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(unavailable)?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool and bootstrap the schema.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] if the schema cannot be created.
    pub async fn from_pool(pool: SqlitePool) -> StoreResult<Self> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await.map_err(unavailable)?;
        }

        // Databases created before uploads were named lack the column
        let has_source_name: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM pragma_table_info('jobs') WHERE name = 'source_name'",
        )
        .fetch_one(&pool)
        .await
        .map_err(unavailable)?;
        if !has_source_name {
            sqlx::query("ALTER TABLE jobs ADD COLUMN source_name TEXT")
                .execute(&pool)
                .await
                .map_err(unavailable)?;
            debug!("added source_name column to jobs");
        }
        debug!("job schema ready");
        Ok(Self { pool })
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool, waiting for connections to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn fetch(&self, id: JobId) -> StoreResult<Option<Job>> {
        let row: Option<JobRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;

        row.map(Job::try_from).transpose()
    }

    async fn fetch_where(&self, clause: &str, value: &str) -> StoreResult<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE {clause} = ? ORDER BY created_at_ms, id"
        ))
        .bind(value)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.into_iter().map(Job::try_from).collect()
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create(&self, job: &Job) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO jobs (id, owner_id, input_ref, source_name, output_ref, state, error, \
             created_at_ms, updated_at_ms, dispatch_token, redispatch_count, revision) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(job.id.to_string())
        .bind(job.owner_id.as_str())
        .bind(job.input_ref.as_str())
        .bind(job.source_name.as_deref())
        .bind(job.output_ref.as_ref().map(BlobRef::as_str))
        .bind(job.state.name())
        .bind(job.error.as_deref())
        .bind(job.created_at.timestamp_millis())
        .bind(job.updated_at.timestamp_millis())
        .bind(job.dispatch_token.map(|t| t.to_string()))
        .bind(i64::from(job.redispatch_count))
        .bind(revision_to_db(job.revision)?)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                StoreError::DuplicateId(job.id)
            } else {
                unavailable(err)
            }
        })?;

        Ok(())
    }

    async fn get(&self, id: JobId) -> StoreResult<Job> {
        self.fetch(id).await?.ok_or(StoreError::NotFound(id))
    }

    async fn transition(&self, id: JobId, transition: &Transition) -> StoreResult<Job> {
        let current = self.get(id).await?;
        let next = current
            .apply(transition)
            .map_err(|err| StoreError::from_transition(id, err))?;

        let result = sqlx::query(
            "UPDATE jobs SET output_ref = ?, state = ?, error = ?, updated_at_ms = ?, \
             dispatch_token = ?, redispatch_count = ?, revision = ? \
             WHERE id = ? AND revision = ?",
        )
        .bind(next.output_ref.as_ref().map(BlobRef::as_str))
        .bind(next.state.name())
        .bind(next.error.as_deref())
        .bind(next.updated_at.timestamp_millis())
        .bind(next.dispatch_token.map(|t| t.to_string()))
        .bind(i64::from(next.redispatch_count))
        .bind(revision_to_db(next.revision)?)
        .bind(id.to_string())
        .bind(revision_to_db(current.revision)?)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        if result.rows_affected() == 0 {
            // Someone else wrote between our read and our write
            return match self.fetch(id).await? {
                None => Err(StoreError::NotFound(id)),
                Some(_) => Err(StoreError::StateConflict {
                    id,
                    reason: format!("record changed since revision {}", current.revision),
                }),
            };
        }

        Ok(next)
    }

    async fn list_by_owner(&self, owner_id: &OwnerId) -> StoreResult<Vec<Job>> {
        self.fetch_where("owner_id", owner_id.as_str()).await
    }

    async fn list_by_state(&self, state: JobState) -> StoreResult<Vec<Job>> {
        self.fetch_where("state", state.name()).await
    }

    fn list_older_than(&self, cutoff: DateTime<Utc>) -> BoxStream<'_, StoreResult<JobId>> {
        sqlx::query_scalar::<_, String>(
            "SELECT id FROM jobs WHERE created_at_ms <= ? ORDER BY created_at_ms, id",
        )
        .bind(cutoff.timestamp_millis())
        .fetch(&self.pool)
        .map(|row| {
            let id = row.map_err(unavailable)?;
            id.parse::<JobId>()
                .map_err(|e| StoreError::Corrupt(format!("job id {id:?}: {e}")))
        })
        .boxed()
    }

    async fn delete(&self, id: JobId, expected_revision: u64) -> StoreResult<Job> {
        let current = self.get(id).await?;
        if current.revision != expected_revision {
            return Err(StoreError::StateConflict {
                id,
                reason: format!(
                    "expected revision {expected_revision}, found {}",
                    current.revision
                ),
            });
        }

        let result = sqlx::query("DELETE FROM jobs WHERE id = ? AND revision = ?")
            .bind(id.to_string())
            .bind(revision_to_db(expected_revision)?)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;

        if result.rows_affected() == 0 {
            return match self.fetch(id).await? {
                None => Err(StoreError::NotFound(id)),
                Some(job) => Err(StoreError::StateConflict {
                    id,
                    reason: format!(
                        "expected revision {expected_revision}, found {}",
                        job.revision
                    ),
                }),
            };
        }

        Ok(current)
    }
}

#[derive(Debug, FromRow)]
struct JobRow {
    id: String,
    owner_id: String,
    input_ref: String,
    source_name: Option<String>,
    output_ref: Option<String>,
    state: String,
    error: Option<String>,
    created_at_ms: i64,
    updated_at_ms: i64,
    dispatch_token: Option<String>,
    redispatch_count: i64,
    revision: i64,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let corrupt = |field: &str, detail: String| {
            StoreError::Corrupt(format!("job {}: {field}: {detail}", row.id))
        };

        let id = row
            .id
            .parse::<JobId>()
            .map_err(|e| corrupt("id", e.to_string()))?;
        let state = row
            .state
            .parse::<JobState>()
            .map_err(|e| corrupt("state", e.to_string()))?;
        let dispatch_token = row
            .dispatch_token
            .as_deref()
            .map(DispatchToken::from_str)
            .transpose()
            .map_err(|e| corrupt("dispatch_token", e.to_string()))?;
        let created_at = DateTime::from_timestamp_millis(row.created_at_ms)
            .ok_or_else(|| corrupt("created_at_ms", row.created_at_ms.to_string()))?;
        let updated_at = DateTime::from_timestamp_millis(row.updated_at_ms)
            .ok_or_else(|| corrupt("updated_at_ms", row.updated_at_ms.to_string()))?;
        let redispatch_count = u32::try_from(row.redispatch_count)
            .map_err(|e| corrupt("redispatch_count", e.to_string()))?;
        let revision =
            u64::try_from(row.revision).map_err(|e| corrupt("revision", e.to_string()))?;

        Ok(Self {
            id,
            owner_id: OwnerId::new(row.owner_id),
            input_ref: BlobRef::new(row.input_ref),
            source_name: row.source_name,
            output_ref: row.output_ref.map(BlobRef::new),
            state,
            error: row.error,
            created_at,
            updated_at,
            dispatch_token,
            redispatch_count,
            revision,
        })
    }
}

fn unavailable(err: sqlx::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

fn revision_to_db(revision: u64) -> StoreResult<i64> {
    i64::try_from(revision).map_err(|_| StoreError::Corrupt(format!("revision {revision} overflows")))
}
