//! Job database operations
//!
//! The claim is the concurrency-safety boundary of the whole system: a
//! conditional UPDATE flips exactly one queued job to processing, so a
//! worker that receives a job knows it is the only owner. Terminal
//! writes are guarded the same way and adjust the campaign's counters
//! in the same transaction, which keeps the count invariant intact and
//! makes double calls harmless.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::{Job, JobPayload, JobResult, JobStatus, TokenUsage};

use super::{format_ts, now_ts, parse_ts, parse_ts_opt};

/// Row type for jobs table
#[derive(Debug, sqlx::FromRow)]
pub struct JobRow {
    pub id: String,
    pub campaign_id: String,
    pub row_index: i64,
    pub payload: String,
    pub status: String,
    pub retries: i32,
    pub error: Option<String>,
    pub score: Option<f64>,
    pub max_score: Option<f64>,
    pub breakdown: Option<String>,
    pub transcript: Option<String>,
    pub translation: Option<String>,
    pub audit_duration_ms: Option<i64>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub updated_at: String,
}

impl JobRow {
    pub fn to_job(&self) -> Job {
        let result = match (self.score, self.max_score) {
            (Some(score), Some(max_score)) => Some(JobResult {
                score,
                max_score,
                breakdown: self
                    .breakdown
                    .as_ref()
                    .and_then(|s| serde_json::from_str(s).ok())
                    .unwrap_or_default(),
                transcript: self.transcript.clone(),
                translation: self.translation.clone(),
                token_usage: match (self.input_tokens, self.output_tokens) {
                    (Some(input_tokens), Some(output_tokens)) => Some(TokenUsage {
                        input_tokens,
                        output_tokens,
                    }),
                    _ => None,
                },
                audit_duration_ms: self.audit_duration_ms,
            }),
            _ => None,
        };

        Job {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            campaign_id: Uuid::parse_str(&self.campaign_id).unwrap_or_default(),
            row_index: self.row_index,
            payload: serde_json::from_str(&self.payload).unwrap_or_else(|_| JobPayload::default()),
            status: self.status.parse().unwrap_or(JobStatus::Queued),
            retries: self.retries,
            error: self.error.clone(),
            result,
            created_at: parse_ts(&self.created_at),
            started_at: parse_ts_opt(self.started_at.as_deref()),
            finished_at: parse_ts_opt(self.finished_at.as_deref()),
            updated_at: parse_ts(&self.updated_at),
        }
    }
}

/// Get a job by ID
pub async fn get_job(pool: &SqlitePool, job_id: &str) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
        .bind(job_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| r.to_job()))
}

/// List a campaign's jobs in row order
pub async fn list_jobs(
    pool: &SqlitePool,
    campaign_id: &str,
    status: Option<&str>,
    limit: i32,
    offset: i32,
) -> Result<Vec<Job>, sqlx::Error> {
    let rows = match status {
        Some(s) => {
            sqlx::query_as::<_, JobRow>(
                "SELECT * FROM jobs WHERE campaign_id = ? AND status = ? ORDER BY row_index LIMIT ? OFFSET ?",
            )
            .bind(campaign_id)
            .bind(s)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, JobRow>(
                "SELECT * FROM jobs WHERE campaign_id = ? ORDER BY row_index LIMIT ? OFFSET ?",
            )
            .bind(campaign_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?
        }
    };

    Ok(rows.into_iter().map(|r| r.to_job()).collect())
}

/// Count a campaign's jobs for pagination
pub async fn count_jobs(
    pool: &SqlitePool,
    campaign_id: &str,
    status: Option<&str>,
) -> Result<i64, sqlx::Error> {
    let count: i64 = match status {
        Some(s) => {
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE campaign_id = ? AND status = ?")
                .bind(campaign_id)
                .bind(s)
                .fetch_one(pool)
                .await?
        }
        None => {
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE campaign_id = ?")
                .bind(campaign_id)
                .fetch_one(pool)
                .await?
        }
    };
    Ok(count)
}

/// Atomically claim the next queued job of a campaign.
///
/// At most one caller gets any given job: the inner SELECT picks the
/// lowest-row_index queued job and the `AND status = 'queued'` guard
/// re-checks it under the write lock, so a concurrent claimer that won
/// the race leaves nothing for this one to flip. The first claim also
/// moves the campaign to running.
pub async fn claim_next_queued(
    pool: &SqlitePool,
    campaign_id: &str,
) -> Result<Option<Job>, sqlx::Error> {
    let now = now_ts();
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, JobRow>(
        r#"
        UPDATE jobs SET status = 'processing', started_at = ?, updated_at = ?
        WHERE id = (
            SELECT id FROM jobs
            WHERE campaign_id = ? AND status = 'queued'
            ORDER BY row_index LIMIT 1
        )
        AND status = 'queued'
        RETURNING *
        "#,
    )
    .bind(&now)
    .bind(&now)
    .bind(campaign_id)
    .fetch_optional(&mut *tx)
    .await?;

    if row.is_some() {
        sqlx::query(
            r#"
            UPDATE campaigns SET
                processing_jobs = processing_jobs + 1,
                status = CASE WHEN status = 'queued' THEN 'running' ELSE status END,
                started_at = COALESCE(started_at, ?),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(campaign_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok(row.map(|r| r.to_job()))
}

/// Record a successful audit for a claimed job.
///
/// Guarded on `status = 'processing'`, so calling this twice (or after a
/// competing terminal write) changes nothing and the campaign counters
/// are incremented exactly once. Returns whether this call took effect.
pub async fn complete_job(
    pool: &SqlitePool,
    job_id: &str,
    result: &JobResult,
) -> Result<bool, sqlx::Error> {
    let breakdown_json =
        serde_json::to_string(&result.breakdown).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    let now = now_ts();
    let mut tx = pool.begin().await?;

    let campaign_id: Option<String> = sqlx::query_scalar(
        r#"
        UPDATE jobs SET
            status = 'completed',
            score = ?, max_score = ?, breakdown = ?,
            transcript = ?, translation = ?,
            input_tokens = ?, output_tokens = ?, total_tokens = ?,
            audit_duration_ms = ?,
            error = NULL,
            finished_at = ?, updated_at = ?
        WHERE id = ? AND status = 'processing'
        RETURNING campaign_id
        "#,
    )
    .bind(result.score)
    .bind(result.max_score)
    .bind(breakdown_json)
    .bind(&result.transcript)
    .bind(&result.translation)
    .bind(result.token_usage.map(|u| u.input_tokens))
    .bind(result.token_usage.map(|u| u.output_tokens))
    .bind(result.token_usage.map(|u| u.total()))
    .bind(result.audit_duration_ms)
    .bind(&now)
    .bind(&now)
    .bind(job_id)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(campaign_id) = &campaign_id {
        sqlx::query(
            r#"
            UPDATE campaigns SET
                completed_jobs = completed_jobs + 1,
                processing_jobs = processing_jobs - 1,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&now)
        .bind(campaign_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok(campaign_id.is_some())
}

/// Record a terminal failure for a claimed job
pub async fn fail_job(pool: &SqlitePool, job_id: &str, error: &str) -> Result<bool, sqlx::Error> {
    let now = now_ts();
    let mut tx = pool.begin().await?;

    let campaign_id: Option<String> = sqlx::query_scalar(
        r#"
        UPDATE jobs SET status = 'failed', error = ?, finished_at = ?, updated_at = ?
        WHERE id = ? AND status = 'processing'
        RETURNING campaign_id
        "#,
    )
    .bind(error)
    .bind(&now)
    .bind(&now)
    .bind(job_id)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(campaign_id) = &campaign_id {
        sqlx::query(
            r#"
            UPDATE campaigns SET
                failed_jobs = failed_jobs + 1,
                processing_jobs = processing_jobs - 1,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&now)
        .bind(campaign_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok(campaign_id.is_some())
}

/// Put a claimed job back in the queue after a transient failure,
/// counting the attempt. The last error is kept for visibility.
pub async fn requeue_job(pool: &SqlitePool, job_id: &str, error: &str) -> Result<bool, sqlx::Error> {
    let now = now_ts();
    let mut tx = pool.begin().await?;

    let campaign_id: Option<String> = sqlx::query_scalar(
        r#"
        UPDATE jobs SET
            status = 'queued', retries = retries + 1, error = ?,
            started_at = NULL, updated_at = ?
        WHERE id = ? AND status = 'processing'
        RETURNING campaign_id
        "#,
    )
    .bind(error)
    .bind(&now)
    .bind(job_id)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(campaign_id) = &campaign_id {
        sqlx::query(
            "UPDATE campaigns SET processing_jobs = processing_jobs - 1, updated_at = ? WHERE id = ?",
        )
        .bind(&now)
        .bind(campaign_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok(campaign_id.is_some())
}

/// Requeue every failed job of a campaign, bumping each retry counter.
/// A finalized campaign goes back to running so the worker picks it up.
pub async fn retry_failed(pool: &SqlitePool, campaign_id: &str) -> Result<u64, sqlx::Error> {
    let now = now_ts();
    let mut tx = pool.begin().await?;

    let count = sqlx::query(
        r#"
        UPDATE jobs SET
            status = 'queued', retries = retries + 1,
            started_at = NULL, finished_at = NULL, updated_at = ?
        WHERE campaign_id = ? AND status = 'failed'
        "#,
    )
    .bind(&now)
    .bind(campaign_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if count > 0 {
        sqlx::query(
            r#"
            UPDATE campaigns SET
                failed_jobs = failed_jobs - ?,
                status = CASE WHEN status IN ('completed', 'completed_with_errors', 'canceled')
                              THEN 'running' ELSE status END,
                finished_at = CASE WHEN status IN ('completed', 'completed_with_errors', 'canceled')
                                   THEN NULL ELSE finished_at END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(count as i64)
        .bind(&now)
        .bind(campaign_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok(count)
}

/// Requeue processing jobs whose claim is older than the staleness
/// threshold, recovering work lost to a crashed or hung worker.
pub async fn reset_stuck(
    pool: &SqlitePool,
    campaign_id: &str,
    stale_after_secs: i64,
) -> Result<u64, sqlx::Error> {
    let cutoff = format_ts(chrono::Utc::now() - chrono::Duration::seconds(stale_after_secs));
    let now = now_ts();
    let mut tx = pool.begin().await?;

    let count = sqlx::query(
        r#"
        UPDATE jobs SET status = 'queued', started_at = NULL, updated_at = ?
        WHERE campaign_id = ? AND status = 'processing' AND started_at < ?
        "#,
    )
    .bind(&now)
    .bind(campaign_id)
    .bind(&cutoff)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if count > 0 {
        sqlx::query(
            "UPDATE campaigns SET processing_jobs = processing_jobs - ?, updated_at = ? WHERE id = ?",
        )
        .bind(count as i64)
        .bind(&now)
        .bind(campaign_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok(count)
}
