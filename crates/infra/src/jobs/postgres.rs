//! Postgres-backed job store.
//!
//! ## Concurrency
//!
//! - `claim_next` selects the oldest PENDING row with `FOR UPDATE SKIP LOCKED`
//!   and flips it to PROCESSING in the same statement, so concurrent workers
//!   (in one process or many) never receive the same job.
//! - Terminal updates carry `WHERE status = 'PROCESSING'`; a zero-row update is
//!   reported as an illegal transition rather than silently ignored.
//! - A partial unique index on `owner_key` over active statuses backs the
//!   submitter's duplicate check. Losing that race surfaces as
//!   [`JobStoreError::Duplicate`].
//!
//! ## Error Mapping
//!
//! | SQLx error | JobStoreError |
//! |------------|---------------|
//! | unique violation (`23505`) on insert | `Duplicate` |
//! | row decode failures | `Corrupt` |
//! | everything else (pool, I/O, other database errors) | `Unavailable` |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Row};
use tracing::{info, instrument};
use uuid::Uuid;

use skillpath_ai::LearningPlan;
use skillpath_core::{Identity, JobId, OwnerKey, Topic};

use super::store::{JobStore, JobStoreError};
use super::types::{JobRecord, JobStats, JobStatus, ResultRecord};

const SCHEMA: &str = include_str!("../../migrations/0001_generation_jobs.sql");

const JOB_COLUMNS: &str =
    "id, owner_key, identity, topic, status, created_at, processed_at, completed_at, error";

#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, JobStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), JobStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        info!("generation job schema ready");
        Ok(())
    }

    /// Zero rows came back from a conditional update: tell "gone" apart
    /// from "wrong status".
    async fn explain_missed_update(&self, job_id: JobId, to: JobStatus) -> JobStoreError {
        match self.get(job_id).await {
            Ok(Some(job)) => JobStoreError::InvalidTransition {
                job_id,
                from: job.status,
                to,
            },
            Ok(None) => JobStoreError::NotFound(job_id),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip_all, fields(job_id = %job.id, owner_key = %job.owner_key), err)]
    async fn insert(&self, job: &JobRecord) -> Result<(), JobStoreError> {
        sqlx::query(
            r#"
            INSERT INTO generation_jobs
                (id, owner_key, identity, topic, status, created_at, processed_at, completed_at, error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.owner_key.as_str())
        .bind(job.identity.as_str())
        .bind(job.topic.as_str())
        .bind(job.status.as_str())
        .bind(job.created_at)
        .bind(job.processed_at)
        .bind(job.completed_at)
        .bind(job.error.as_deref())
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                JobStoreError::Duplicate(job.owner_key.clone())
            } else {
                map_sqlx_error("insert", e)
            }
        })?;
        Ok(())
    }

    #[instrument(skip_all, fields(owner_key = %owner_key), err)]
    async fn find_active(&self, owner_key: &OwnerKey) -> Result<Option<JobRecord>, JobStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM generation_jobs \
             WHERE owner_key = $1 AND status IN ('PENDING', 'PROCESSING') \
             ORDER BY created_at ASC, id ASC LIMIT 1"
        ))
        .bind(owner_key.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_active", e))?;

        row.map(|r| decode_job(&r)).transpose()
    }

    #[instrument(skip_all, fields(job_id = %job_id), err)]
    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, JobStoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM generation_jobs WHERE id = $1"))
            .bind(job_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        row.map(|r| decode_job(&r)).transpose()
    }

    #[instrument(skip_all, fields(owner_key = %owner_key), err)]
    async fn latest_for_owner(&self, owner_key: &OwnerKey) -> Result<Option<JobRecord>, JobStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM generation_jobs \
             WHERE owner_key = $1 ORDER BY created_at DESC, id DESC LIMIT 1"
        ))
        .bind(owner_key.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("latest_for_owner", e))?;

        row.map(|r| decode_job(&r)).transpose()
    }

    #[instrument(skip(self), err)]
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<JobRecord>, JobStoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE generation_jobs
            SET status = 'PROCESSING', processed_at = $1
            WHERE id = (
                SELECT id FROM generation_jobs
                WHERE status = 'PENDING'
                ORDER BY created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            AND status = 'PENDING'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_next", e))?;

        row.map(|r| decode_job(&r)).transpose()
    }

    #[instrument(skip_all, fields(job_id = %job_id), err)]
    async fn mark_completed(&self, job_id: JobId, now: DateTime<Utc>) -> Result<JobRecord, JobStoreError> {
        let row = sqlx::query(&format!(
            "UPDATE generation_jobs SET status = 'COMPLETED', completed_at = $2, error = NULL \
             WHERE id = $1 AND status = 'PROCESSING' RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_id.as_uuid())
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_completed", e))?;

        match row {
            Some(row) => decode_job(&row),
            None => Err(self.explain_missed_update(job_id, JobStatus::Completed).await),
        }
    }

    #[instrument(skip_all, fields(job_id = %job_id), err)]
    async fn mark_failed(
        &self,
        job_id: JobId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<JobRecord, JobStoreError> {
        let row = sqlx::query(&format!(
            "UPDATE generation_jobs SET status = 'FAILED', completed_at = $2, error = $3 \
             WHERE id = $1 AND status = 'PROCESSING' RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_id.as_uuid())
        .bind(now)
        .bind(error)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_failed", e))?;

        match row {
            Some(row) => decode_job(&row),
            None => Err(self.explain_missed_update(job_id, JobStatus::Failed).await),
        }
    }

    #[instrument(skip_all, fields(owner_key = %result.owner_key, weeks = result.weeks.len()), err)]
    async fn upsert_result(&self, result: &ResultRecord) -> Result<(), JobStoreError> {
        sqlx::query(
            r#"
            INSERT INTO generation_results (owner_key, identity, topic, weeks, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (owner_key) DO UPDATE
            SET identity = EXCLUDED.identity,
                topic = EXCLUDED.topic,
                weeks = EXCLUDED.weeks,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(result.owner_key.as_str())
        .bind(result.identity.as_str())
        .bind(result.topic.as_str())
        .bind(Json(&result.weeks))
        .bind(result.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_result", e))?;
        Ok(())
    }

    #[instrument(skip_all, fields(owner_key = %owner_key), err)]
    async fn get_result(&self, owner_key: &OwnerKey) -> Result<Option<ResultRecord>, JobStoreError> {
        let row = sqlx::query(
            "SELECT owner_key, identity, topic, weeks, created_at \
             FROM generation_results WHERE owner_key = $1",
        )
        .bind(owner_key.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_result", e))?;

        row.map(|r| {
            ResultRow::from_row(&r)
                .map_err(|e| JobStoreError::Corrupt(format!("failed to decode result row: {e}")))?
                .try_into()
        })
        .transpose()
    }

    #[instrument(skip(self), err)]
    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM generation_jobs GROUP BY status")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = JobStats::default();
        for row in rows {
            let status: String = row
                .try_get("status")
                .map_err(|e| map_sqlx_error("stats", e))?;
            let count: i64 = row
                .try_get("count")
                .map_err(|e| map_sqlx_error("stats", e))?;
            let count = usize::try_from(count).unwrap_or_default();
            match status.parse::<JobStatus>()? {
                JobStatus::Pending => stats.pending = count,
                JobStatus::Processing => stats.processing = count,
                JobStatus::Completed => stats.completed = count,
                JobStatus::Failed => stats.failed = count,
            }
        }
        Ok(stats)
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("postgres pool closed");
    }
}

fn decode_job(row: &PgRow) -> Result<JobRecord, JobStoreError> {
    JobRow::from_row(row)
        .map_err(|e| JobStoreError::Corrupt(format!("failed to decode job row: {e}")))?
        .try_into()
}

/// Helper to check if a sqlx error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505"))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
            JobStoreError::Unavailable(format!(
                "database error in {operation} ({code}): {}",
                db_err.message()
            ))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            JobStoreError::Corrupt(format!("{operation}: {err}"))
        }
        sqlx::Error::PoolClosed => {
            JobStoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            JobStoreError::Unavailable(format!("timed out waiting for a connection in {operation}"))
        }
        other => JobStoreError::Unavailable(format!("{operation}: {other}")),
    }
}

struct JobRow {
    id: Uuid,
    owner_key: String,
    identity: String,
    topic: String,
    status: String,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for JobRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            id: row.try_get("id")?,
            owner_key: row.try_get("owner_key")?,
            identity: row.try_get("identity")?,
            topic: row.try_get("topic")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            processed_at: row.try_get("processed_at")?,
            completed_at: row.try_get("completed_at")?,
            error: row.try_get("error")?,
        })
    }
}

impl TryFrom<JobRow> for JobRecord {
    type Error = JobStoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(JobRecord {
            id: JobId::from_uuid(row.id),
            owner_key: OwnerKey::from_stored(row.owner_key),
            identity: Identity::new(row.identity)
                .map_err(|e| JobStoreError::Corrupt(format!("job {}: {e}", row.id)))?,
            topic: Topic::parse(&row.topic)
                .map_err(|e| JobStoreError::Corrupt(format!("job {}: {e}", row.id)))?,
            status: row.status.parse()?,
            created_at: row.created_at,
            processed_at: row.processed_at,
            completed_at: row.completed_at,
            error: row.error,
        })
    }
}

struct ResultRow {
    owner_key: String,
    identity: String,
    topic: String,
    weeks: Json<LearningPlan>,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for ResultRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ResultRow {
            owner_key: row.try_get("owner_key")?,
            identity: row.try_get("identity")?,
            topic: row.try_get("topic")?,
            weeks: row.try_get("weeks")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<ResultRow> for ResultRecord {
    type Error = JobStoreError;

    fn try_from(row: ResultRow) -> Result<Self, Self::Error> {
        let corrupt = |e: skillpath_core::DomainError| {
            JobStoreError::Corrupt(format!("result {}: {e}", row.owner_key))
        };
        Ok(ResultRecord {
            identity: Identity::new(row.identity).map_err(corrupt)?,
            topic: Topic::parse(&row.topic).map_err(corrupt)?,
            owner_key: OwnerKey::from_stored(row.owner_key.clone()),
            weeks: row.weeks.0,
            created_at: row.created_at,
        })
    }
}
