/// SQLite-backed job queue
///
/// The jobs table is the only state shared between workers. Claiming a job is a
/// single `UPDATE ... RETURNING` inside a transaction, so two pollers racing for
/// the same row can never both win it.

use crate::db::{from_millis, from_millis_opt, to_millis};
use crate::error::QueueError;
use crate::queue::types::{
    backoff, EnqueueOptions, Job, JobFilter, JobStats, JobStatus, DEFAULT_MAX_RETRIES, DEFAULT_QUEUE,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{Sqlite, SqlitePool, SqliteRow};
use sqlx::{QueryBuilder, Row};
use std::collections::HashMap;
use uuid::Uuid;

type Result<T> = std::result::Result<T, QueueError>;

const JOB_COLUMNS: &str = "id, tenant_id, queue, job_type, payload, status, priority, attempts, \
    max_retries, scheduled_at, started_at, completed_at, failed_at, error, result, metadata, \
    created_at, updated_at";

const DEFAULT_LIST_LIMIT: i64 = 50;

#[derive(Debug, Clone)]
pub struct JobQueue {
    pool: SqlitePool,
}

impl JobQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new `pending` job
    pub async fn enqueue(
        &self,
        tenant_id: &str,
        job_type: &str,
        payload: Value,
        options: EnqueueOptions,
    ) -> Result<Job> {
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            queue: options
                .queue
                .filter(|q| !q.is_empty())
                .unwrap_or_else(|| DEFAULT_QUEUE.to_string()),
            job_type: job_type.to_string(),
            payload,
            status: JobStatus::Pending,
            priority: options.priority.value(),
            attempts: 0,
            max_retries: options.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            scheduled_at: options.scheduled_at,
            started_at: None,
            completed_at: None,
            failed_at: None,
            error: None,
            result: None,
            metadata: options.metadata,
            created_at: now,
            updated_at: now,
        };

        let metadata = job.metadata.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO jobs
                (id, tenant_id, queue, job_type, payload, status, priority, attempts,
                 max_retries, scheduled_at, metadata, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.tenant_id)
        .bind(&job.queue)
        .bind(&job.job_type)
        .bind(serde_json::to_string(&job.payload)?)
        .bind(job.status.as_str())
        .bind(job.priority)
        .bind(job.max_retries as i64)
        .bind(job.scheduled_at.map(to_millis))
        .bind(metadata)
        .bind(to_millis(job.created_at))
        .bind(to_millis(job.updated_at))
        .execute(&self.pool)
        .await?;

        tracing::debug!("📥 Enqueued job {} ({}) on queue {}", job.id, job.job_type, job.queue);
        Ok(job)
    }

    /// Claim the next eligible job of `queue`, or `None` when nothing is due
    pub async fn dequeue(&self, queue: &str) -> Result<Option<Job>> {
        self.dequeue_at(queue, Utc::now()).await
    }

    /// `dequeue` with an explicit clock
    ///
    /// Eligible jobs are `pending` or `retrying` with no schedule or a schedule
    /// at or before `now`. Highest priority wins, then the oldest.
    pub async fn dequeue_at(&self, queue: &str, now: DateTime<Utc>) -> Result<Option<Job>> {
        let now_ms = to_millis(now);
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            UPDATE jobs SET
                status = 'processing',
                started_at = ?,
                attempts = attempts + 1,
                updated_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE queue = ?
                  AND status IN ('pending', 'retrying')
                  AND (scheduled_at IS NULL OR scheduled_at <= ?)
                ORDER BY priority DESC, created_at ASC, rowid ASC
                LIMIT 1
            )
            AND status IN ('pending', 'retrying')
            RETURNING {}
            "#,
            JOB_COLUMNS
        );

        let row = sqlx::query(&sql)
            .bind(now_ms)
            .bind(now_ms)
            .bind(queue)
            .bind(now_ms)
            .fetch_optional(&mut *tx)
            .await?;

        tx.commit().await?;

        row.map(|r| job_from_row(&r)).transpose()
    }

    /// Terminal success
    pub async fn mark_completed(&self, job_id: &str, result: Option<Value>) -> Result<()> {
        let now = to_millis(Utc::now());
        let result = result.as_ref().map(serde_json::to_string).transpose()?;

        let updated = sqlx::query(
            r#"
            UPDATE jobs SET status = 'completed', completed_at = ?, result = ?, error = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(result)
        .bind(now)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(QueueError::NotFound(job_id.to_string()));
        }
        Ok(())
    }

    /// Record a failed attempt
    pub async fn mark_failed(&self, job_id: &str, error: &str) -> Result<JobStatus> {
        self.mark_failed_at(job_id, error, Utc::now()).await
    }

    /// `mark_failed` with an explicit clock
    ///
    /// While `attempts <= max_retries` the job goes to `retrying` and becomes
    /// due again after `backoff(attempts)`. Otherwise it is terminally `failed`.
    pub async fn mark_failed_at(&self, job_id: &str, error: &str, now: DateTime<Utc>) -> Result<JobStatus> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT attempts, max_retries FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;

        let attempts: i64 = row.try_get("attempts")?;
        let max_retries: i64 = row.try_get("max_retries")?;
        let now_ms = to_millis(now);

        let status = if attempts <= max_retries {
            let retry_at = now + backoff(attempts.max(0) as u32);
            sqlx::query(
                "UPDATE jobs SET status = 'retrying', error = ?, scheduled_at = ?, updated_at = ? WHERE id = ?",
            )
            .bind(error)
            .bind(to_millis(retry_at))
            .bind(now_ms)
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

            tracing::warn!(
                "🔁 Job {} failed (attempt {}/{}), retrying at {}: {}",
                job_id,
                attempts,
                max_retries + 1,
                retry_at,
                error
            );
            JobStatus::Retrying
        } else {
            sqlx::query("UPDATE jobs SET status = 'failed', error = ?, failed_at = ?, updated_at = ? WHERE id = ?")
                .bind(error)
                .bind(now_ms)
                .bind(now_ms)
                .bind(job_id)
                .execute(&mut *tx)
                .await?;

            tracing::error!("❌ Job {} failed permanently after {} attempt(s): {}", job_id, attempts, error);
            JobStatus::Failed
        };

        tx.commit().await?;
        Ok(status)
    }

    /// Cancel a `pending` or `retrying` job of a tenant
    pub async fn cancel(&self, tenant_id: &str, job_id: &str) -> Result<()> {
        let now = to_millis(Utc::now());
        let updated = sqlx::query(
            r#"
            UPDATE jobs SET status = 'cancelled', updated_at = ?
            WHERE id = ? AND tenant_id = ? AND status IN ('pending', 'retrying')
            "#,
        )
        .bind(now)
        .bind(job_id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(QueueError::NotCancellable(job_id.to_string()));
        }

        tracing::info!("🚫 Cancelled job {}", job_id);
        Ok(())
    }

    pub async fn get_job(&self, tenant_id: &str, job_id: &str) -> Result<Option<Job>> {
        let sql = format!("SELECT {} FROM jobs WHERE id = ? AND tenant_id = ?", JOB_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(job_id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| job_from_row(&r)).transpose()
    }

    /// Newest jobs first
    pub async fn list_jobs(&self, tenant_id: &str, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!("SELECT {} FROM jobs WHERE tenant_id = ", JOB_COLUMNS));
        builder.push_bind(tenant_id);

        if let Some(queue) = &filter.queue {
            builder.push(" AND queue = ").push_bind(queue);
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(job_type) = &filter.job_type {
            builder.push(" AND job_type = ").push_bind(job_type);
        }

        builder
            .push(" ORDER BY created_at DESC, rowid DESC LIMIT ")
            .push_bind(filter.limit.unwrap_or(DEFAULT_LIST_LIMIT).max(1))
            .push(" OFFSET ")
            .push_bind(filter.offset.unwrap_or(0).max(0));

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(job_from_row).collect()
    }

    pub async fn get_stats(&self, tenant_id: &str) -> Result<JobStats> {
        let by_status = self.count_by(tenant_id, "status").await?;
        let by_queue = self.count_by(tenant_id, "queue").await?;
        let by_type = self.count_by(tenant_id, "job_type").await?;

        let average_wait_secs: Option<f64> = sqlx::query_scalar(
            r#"
            SELECT AVG((started_at - created_at) / 1000.0) FROM jobs
            WHERE tenant_id = ? AND started_at IS NOT NULL
            "#,
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(JobStats {
            total: by_status.values().sum(),
            by_status,
            by_queue,
            by_type,
            average_wait_secs,
        })
    }

    async fn count_by(&self, tenant_id: &str, column: &'static str) -> Result<HashMap<String, i64>> {
        let sql = format!(
            "SELECT {col} AS key, COUNT(*) AS count FROM jobs WHERE tenant_id = ? GROUP BY {col}",
            col = column
        );
        let rows = sqlx::query(&sql).bind(tenant_id).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|r| Ok((r.try_get::<String, _>("key")?, r.try_get::<i64, _>("count")?)))
            .collect()
    }

    /// Purge `completed`/`failed` jobs that finished before `older_than`
    pub async fn delete_old_jobs(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let deleted = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status IN ('completed', 'failed')
              AND COALESCE(completed_at, failed_at, updated_at) < ?
            "#,
        )
        .bind(to_millis(older_than))
        .execute(&self.pool)
        .await?;

        Ok(deleted.rows_affected())
    }
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let status: String = row.try_get("status")?;
    let payload: String = row.try_get("payload")?;
    let result: Option<String> = row.try_get("result")?;
    let metadata: Option<String> = row.try_get("metadata")?;
    let attempts: i64 = row.try_get("attempts")?;
    let max_retries: i64 = row.try_get("max_retries")?;

    Ok(Job {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        queue: row.try_get("queue")?,
        job_type: row.try_get("job_type")?,
        payload: serde_json::from_str(&payload)?,
        status: JobStatus::parse(&status).ok_or_else(|| {
            QueueError::Database(sqlx::Error::Decode(format!("unknown job status '{}'", status).into()))
        })?,
        priority: row.try_get("priority")?,
        attempts: attempts.max(0) as u32,
        max_retries: max_retries.max(0) as u32,
        scheduled_at: from_millis_opt(row.try_get("scheduled_at")?),
        started_at: from_millis_opt(row.try_get("started_at")?),
        completed_at: from_millis_opt(row.try_get("completed_at")?),
        failed_at: from_millis_opt(row.try_get("failed_at")?),
        error: row.try_get("error")?,
        result: result.as_deref().map(serde_json::from_str).transpose()?,
        metadata: metadata.as_deref().map(serde_json::from_str).transpose()?,
        created_at: from_millis(row.try_get("created_at")?),
        updated_at: from_millis(row.try_get("updated_at")?),
    })
}
