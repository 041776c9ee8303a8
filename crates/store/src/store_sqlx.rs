//! `sqlx`-backed [`JobStore`] (spec.md §6 `jobs`, `execution_logs`).
//!
//! Grounded on `cloud-component-service/src/repo/component.rs`'s row-struct +
//! `TryFrom`/`From` conversion pattern, and on `cloud-component-service/src/db.rs` for
//! the dual Postgres/SQLite pool. The lifecycle guard is enforced twice: once in Rust
//! via `JobStatus::can_transition_to` before issuing any write, and once at the database
//! via a single conditional `UPDATE ... WHERE status = $old` so a concurrent caller
//! cannot win a race the Rust-side check already lost.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use karbos_common::{ExecutionRecord, JobStatus, WorkItem};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::JobStore;

pub enum DbPool {
    Postgres(sqlx::PgPool),
    Sqlite(sqlx::SqlitePool),
}

impl FromStr for JobStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "DELAYED" => Ok(JobStatus::Delayed),
            "RUNNING" => Ok(JobStatus::Running),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(StoreError::Storage(sqlx::Error::Decode(
                format!("unknown job status {other}").into(),
            ))),
        }
    }
}

#[derive(sqlx::FromRow)]
struct WorkItemRow {
    id: Uuid,
    submitter: String,
    docker_image: String,
    argv: String,
    submitted_at: DateTime<Utc>,
    deadline: DateTime<Utc>,
    estimated_runtime_secs: i64,
    region: String,
    scheduled_start: DateTime<Utc>,
    status: String,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    metadata: String,
}

impl TryFrom<WorkItemRow> for WorkItem {
    type Error = StoreError;

    fn try_from(row: WorkItemRow) -> Result<Self, Self::Error> {
        let argv: Vec<String> = serde_json::from_str(&row.argv)
            .map_err(|e| StoreError::Storage(sqlx::Error::Decode(e.into())))?;
        let metadata: HashMap<String, serde_json::Value> = serde_json::from_str(&row.metadata)
            .map_err(|e| StoreError::Storage(sqlx::Error::Decode(e.into())))?;

        Ok(WorkItem {
            id: row.id,
            submitter: row.submitter,
            docker_image: row.docker_image,
            argv,
            submitted_at: row.submitted_at,
            deadline: row.deadline,
            estimated_runtime: chrono::Duration::seconds(row.estimated_runtime_secs),
            region: row.region,
            scheduled_start: row.scheduled_start,
            status: row.status.parse()?,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            metadata,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ExecutionRecordRow {
    id: Uuid,
    job_id: Uuid,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    exit_code: Option<i32>,
    captured_output: String,
    error_message: Option<String>,
    runtime_seconds: i64,
    worker_node_id: String,
}

impl From<ExecutionRecordRow> for ExecutionRecord {
    fn from(row: ExecutionRecordRow) -> Self {
        ExecutionRecord {
            id: row.id,
            job_id: row.job_id,
            started_at: row.started_at,
            completed_at: row.completed_at,
            exit_code: row.exit_code,
            captured_output: row.captured_output,
            error_message: row.error_message,
            runtime_seconds: row.runtime_seconds,
            worker_node_id: row.worker_node_id,
        }
    }
}

/// Durable `JobStore` backed by the logical `jobs`/`execution_logs` tables of §6.
pub struct SqlxJobStore {
    pool: DbPool,
}

impl SqlxJobStore {
    #[must_use]
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self {
            pool: DbPool::Postgres(pool),
        }
    }

    #[must_use]
    pub fn sqlite(pool: sqlx::SqlitePool) -> Self {
        Self {
            pool: DbPool::Sqlite(pool),
        }
    }

    /// Create the `jobs` and `execution_logs` tables if they do not already exist.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        const JOBS_DDL: &str = "CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            submitter TEXT NOT NULL,
            docker_image TEXT NOT NULL,
            argv TEXT NOT NULL,
            submitted_at TIMESTAMPTZ NOT NULL,
            deadline TIMESTAMPTZ NOT NULL,
            estimated_runtime_secs BIGINT NOT NULL,
            region TEXT NOT NULL,
            scheduled_start TIMESTAMPTZ NOT NULL,
            status TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            started_at TIMESTAMPTZ,
            completed_at TIMESTAMPTZ,
            metadata TEXT NOT NULL
        )";
        const EXECUTIONS_DDL: &str = "CREATE TABLE IF NOT EXISTS execution_logs (
            id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL,
            started_at TIMESTAMPTZ NOT NULL,
            completed_at TIMESTAMPTZ,
            exit_code INTEGER,
            captured_output TEXT NOT NULL,
            error_message TEXT,
            runtime_seconds BIGINT NOT NULL,
            worker_node_id TEXT NOT NULL
        )";

        match &self.pool {
            DbPool::Postgres(pool) => {
                sqlx::query(JOBS_DDL).execute(pool).await?;
                sqlx::query(EXECUTIONS_DDL).execute(pool).await?;
            }
            DbPool::Sqlite(pool) => {
                sqlx::query(JOBS_DDL).execute(pool).await?;
                sqlx::query(EXECUTIONS_DDL).execute(pool).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for SqlxJobStore {
    async fn create(&self, job: WorkItem) -> Result<WorkItem, StoreError> {
        let argv = serde_json::to_string(&job.argv)
            .map_err(|e| StoreError::Storage(sqlx::Error::Encode(e.into())))?;
        let metadata = serde_json::to_string(&job.metadata)
            .map_err(|e| StoreError::Storage(sqlx::Error::Encode(e.into())))?;
        let status = job.status.to_string();

        match &self.pool {
            DbPool::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO jobs
                    (id, submitter, docker_image, argv, submitted_at, deadline, estimated_runtime_secs,
                     region, scheduled_start, status, created_at, started_at, completed_at, metadata)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
                )
                    .bind(job.id)
                    .bind(&job.submitter)
                    .bind(&job.docker_image)
                    .bind(&argv)
                    .bind(job.submitted_at)
                    .bind(job.deadline)
                    .bind(job.estimated_runtime.num_seconds())
                    .bind(&job.region)
                    .bind(job.scheduled_start)
                    .bind(&status)
                    .bind(job.created_at)
                    .bind(job.started_at)
                    .bind(job.completed_at)
                    .bind(&metadata)
                    .execute(pool)
                    .await?;
            }
            DbPool::Sqlite(pool) => {
                sqlx::query(
                    "INSERT INTO jobs
                    (id, submitter, docker_image, argv, submitted_at, deadline, estimated_runtime_secs,
                     region, scheduled_start, status, created_at, started_at, completed_at, metadata)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                )
                    .bind(job.id)
                    .bind(&job.submitter)
                    .bind(&job.docker_image)
                    .bind(&argv)
                    .bind(job.submitted_at)
                    .bind(job.deadline)
                    .bind(job.estimated_runtime.num_seconds())
                    .bind(&job.region)
                    .bind(job.scheduled_start)
                    .bind(&status)
                    .bind(job.created_at)
                    .bind(job.started_at)
                    .bind(job.completed_at)
                    .bind(&metadata)
                    .execute(pool)
                    .await?;
            }
        }

        Ok(job)
    }

    async fn get(&self, job_id: Uuid) -> Result<WorkItem, StoreError> {
        let row = match &self.pool {
            DbPool::Postgres(pool) => {
                sqlx::query_as::<_, WorkItemRow>("SELECT * FROM jobs WHERE id = $1")
                    .bind(job_id)
                    .fetch_optional(pool)
                    .await?
            }
            DbPool::Sqlite(pool) => {
                sqlx::query_as::<_, WorkItemRow>("SELECT * FROM jobs WHERE id = ?1")
                    .bind(job_id)
                    .fetch_optional(pool)
                    .await?
            }
        };

        row.ok_or(StoreError::NotFound(job_id))?.try_into()
    }

    async fn update_status(
        &self,
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<(), StoreError> {
        if !from.can_transition_to(to) {
            return Err(StoreError::IllegalTransition { job_id, from, to });
        }

        let rows_affected = match &self.pool {
            DbPool::Postgres(pool) => {
                sqlx::query("UPDATE jobs SET status = $1 WHERE id = $2 AND status = $3")
                    .bind(to.to_string())
                    .bind(job_id)
                    .bind(from.to_string())
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
            DbPool::Sqlite(pool) => {
                sqlx::query("UPDATE jobs SET status = ?1 WHERE id = ?2 AND status = ?3")
                    .bind(to.to_string())
                    .bind(job_id)
                    .bind(from.to_string())
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
        };

        if rows_affected == 0 {
            // Disambiguate "doesn't exist" from "lost the compare-and-set race".
            self.get(job_id).await?;
            return Err(StoreError::ConcurrentUpdate {
                job_id,
                expected: from,
            });
        }

        Ok(())
    }

    async fn list_by_status(
        &self,
        status: JobStatus,
        limit: u64,
    ) -> Result<Vec<WorkItem>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = match &self.pool {
            DbPool::Postgres(pool) => sqlx::query_as::<_, WorkItemRow>(
                "SELECT * FROM jobs WHERE status = $1 ORDER BY created_at DESC LIMIT $2",
            )
            .bind(status.to_string())
            .bind(limit)
            .fetch_all(pool)
            .await?,
            DbPool::Sqlite(pool) => sqlx::query_as::<_, WorkItemRow>(
                "SELECT * FROM jobs WHERE status = ?1 ORDER BY created_at DESC LIMIT ?2",
            )
            .bind(status.to_string())
            .bind(limit)
            .fetch_all(pool)
            .await?,
        };

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_by_user(&self, user: &str, limit: u64) -> Result<Vec<WorkItem>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = match &self.pool {
            DbPool::Postgres(pool) => sqlx::query_as::<_, WorkItemRow>(
                "SELECT * FROM jobs WHERE submitter = $1 ORDER BY created_at DESC LIMIT $2",
            )
            .bind(user)
            .bind(limit)
            .fetch_all(pool)
            .await?,
            DbPool::Sqlite(pool) => sqlx::query_as::<_, WorkItemRow>(
                "SELECT * FROM jobs WHERE submitter = ?1 ORDER BY created_at DESC LIMIT ?2",
            )
            .bind(user)
            .bind(limit)
            .fetch_all(pool)
            .await?,
        };

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_all(&self, limit: u64) -> Result<Vec<WorkItem>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = match &self.pool {
            DbPool::Postgres(pool) => {
                sqlx::query_as::<_, WorkItemRow>("SELECT * FROM jobs ORDER BY created_at DESC LIMIT $1")
                    .bind(limit)
                    .fetch_all(pool)
                    .await?
            }
            DbPool::Sqlite(pool) => {
                sqlx::query_as::<_, WorkItemRow>("SELECT * FROM jobs ORDER BY created_at DESC LIMIT ?1")
                    .bind(limit)
                    .fetch_all(pool)
                    .await?
            }
        };

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<u64, StoreError> {
        let count: i64 = match &self.pool {
            DbPool::Postgres(pool) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = $1")
                    .bind(status.to_string())
                    .fetch_one(pool)
                    .await?
            }
            DbPool::Sqlite(pool) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = ?1")
                    .bind(status.to_string())
                    .fetch_one(pool)
                    .await?
            }
        };
        Ok(count.max(0) as u64)
    }

    async fn record_execution(
        &self,
        record: ExecutionRecord,
    ) -> Result<ExecutionRecord, StoreError> {
        match &self.pool {
            DbPool::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO execution_logs
                    (id, job_id, started_at, completed_at, exit_code, captured_output,
                     error_message, runtime_seconds, worker_node_id)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                )
                    .bind(record.id)
                    .bind(record.job_id)
                    .bind(record.started_at)
                    .bind(record.completed_at)
                    .bind(record.exit_code)
                    .bind(&record.captured_output)
                    .bind(&record.error_message)
                    .bind(record.runtime_seconds)
                    .bind(&record.worker_node_id)
                    .execute(pool)
                    .await?;
            }
            DbPool::Sqlite(pool) => {
                sqlx::query(
                    "INSERT INTO execution_logs
                    (id, job_id, started_at, completed_at, exit_code, captured_output,
                     error_message, runtime_seconds, worker_node_id)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )
                    .bind(record.id)
                    .bind(record.job_id)
                    .bind(record.started_at)
                    .bind(record.completed_at)
                    .bind(record.exit_code)
                    .bind(&record.captured_output)
                    .bind(&record.error_message)
                    .bind(record.runtime_seconds)
                    .bind(&record.worker_node_id)
                    .execute(pool)
                    .await?;
            }
        }

        Ok(record)
    }

    async fn get_execution(&self, job_id: Uuid) -> Result<ExecutionRecord, StoreError> {
        let row = match &self.pool {
            DbPool::Postgres(pool) => sqlx::query_as::<_, ExecutionRecordRow>(
                "SELECT * FROM execution_logs WHERE job_id = $1",
            )
            .bind(job_id)
            .fetch_optional(pool)
            .await?,
            DbPool::Sqlite(pool) => sqlx::query_as::<_, ExecutionRecordRow>(
                "SELECT * FROM execution_logs WHERE job_id = ?1",
            )
            .bind(job_id)
            .fetch_optional(pool)
            .await?,
        };

        row.map(Into::into)
            .ok_or(StoreError::ExecutionNotFound(job_id))
    }

    async fn list_stale_running(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<WorkItem>, StoreError> {
        let status = JobStatus::Running.to_string();
        let rows = match &self.pool {
            DbPool::Postgres(pool) => sqlx::query_as::<_, WorkItemRow>(
                "SELECT * FROM jobs WHERE status = $1 AND started_at < $2",
            )
            .bind(&status)
            .bind(older_than)
            .fetch_all(pool)
            .await?,
            DbPool::Sqlite(pool) => sqlx::query_as::<_, WorkItemRow>(
                "SELECT * FROM jobs WHERE status = ?1 AND started_at < ?2",
            )
            .bind(&status)
            .bind(older_than)
            .fetch_all(pool)
            .await?,
        };

        rows.into_iter().map(TryInto::try_into).collect()
    }
}
