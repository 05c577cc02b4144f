//! Campaign database operations

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::{Campaign, CampaignStatus, JobPayload};
use crate::limiter::RateLimitConfig;

use super::{now_ts, parse_ts, parse_ts_opt};

/// Row type for campaigns table
#[derive(Debug, sqlx::FromRow)]
pub struct CampaignRow {
    pub id: String,
    pub name: String,
    pub timezone: String,
    pub created_by: Option<String>,
    pub parameter_set_id: Option<String>,
    pub sop_id: Option<String>,
    pub project_id: Option<String>,
    pub status: String,
    pub total_jobs: i64,
    pub completed_jobs: i64,
    pub failed_jobs: i64,
    pub canceled_jobs: i64,
    pub processing_jobs: i64,
    pub rate_limit_enabled: i64,
    pub requests_per_minute: i64,
    pub requests_per_hour: i64,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub updated_at: String,
}

impl CampaignRow {
    pub fn to_campaign(&self) -> Campaign {
        Campaign {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            name: self.name.clone(),
            timezone: self.timezone.clone(),
            created_by: self.created_by.clone(),
            parameter_set_id: self.parameter_set_id.clone(),
            sop_id: self.sop_id.clone(),
            project_id: self.project_id.clone(),
            status: self.status.parse().unwrap_or(CampaignStatus::Queued),
            total_jobs: self.total_jobs,
            completed_jobs: self.completed_jobs,
            failed_jobs: self.failed_jobs,
            canceled_jobs: self.canceled_jobs,
            processing_jobs: self.processing_jobs,
            rate_limit: RateLimitConfig {
                enabled: self.rate_limit_enabled != 0,
                requests_per_minute: self.requests_per_minute as u32,
                requests_per_hour: self.requests_per_hour as u32,
            },
            created_at: parse_ts(&self.created_at),
            started_at: parse_ts_opt(self.started_at.as_deref()),
            finished_at: parse_ts_opt(self.finished_at.as_deref()),
            updated_at: parse_ts(&self.updated_at),
        }
    }
}

/// Fields needed to create a campaign record
#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub name: String,
    pub timezone: String,
    pub created_by: Option<String>,
    pub parameter_set_id: Option<String>,
    pub sop_id: Option<String>,
    pub project_id: Option<String>,
    pub rate_limit: RateLimitConfig,
}

/// Create a campaign together with one queued job per payload row.
///
/// Runs in a single transaction: either the campaign exists with all of
/// its jobs and total_jobs matching, or nothing was written at all.
pub async fn create_campaign_with_jobs(
    pool: &SqlitePool,
    new: &NewCampaign,
    payloads: &[JobPayload],
) -> Result<Campaign, sqlx::Error> {
    let campaign_id = Uuid::new_v4().to_string();
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO campaigns (
            id, name, timezone, created_by, parameter_set_id, sop_id, project_id,
            total_jobs, rate_limit_enabled, requests_per_minute, requests_per_hour
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&campaign_id)
    .bind(&new.name)
    .bind(&new.timezone)
    .bind(&new.created_by)
    .bind(&new.parameter_set_id)
    .bind(&new.sop_id)
    .bind(&new.project_id)
    .bind(payloads.len() as i64)
    .bind(new.rate_limit.enabled as i64)
    .bind(new.rate_limit.requests_per_minute as i64)
    .bind(new.rate_limit.requests_per_hour as i64)
    .execute(&mut *tx)
    .await?;

    for (row_index, payload) in payloads.iter().enumerate() {
        let payload_json =
            serde_json::to_string(payload).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        sqlx::query(
            r#"
            INSERT INTO jobs (id, campaign_id, row_index, payload)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&campaign_id)
        .bind(row_index as i64)
        .bind(payload_json)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    get_campaign(pool, &campaign_id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)
}

/// Get a campaign by ID
pub async fn get_campaign(
    pool: &SqlitePool,
    campaign_id: &str,
) -> Result<Option<Campaign>, sqlx::Error> {
    let row = sqlx::query_as::<_, CampaignRow>("SELECT * FROM campaigns WHERE id = ?")
        .bind(campaign_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| r.to_campaign()))
}

/// List campaigns, newest first
pub async fn list_campaigns(
    pool: &SqlitePool,
    status: Option<&str>,
    limit: i32,
    offset: i32,
) -> Result<Vec<Campaign>, sqlx::Error> {
    let rows = match status {
        Some(s) => {
            sqlx::query_as::<_, CampaignRow>(
                "SELECT * FROM campaigns WHERE status = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
            )
            .bind(s)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, CampaignRow>(
                "SELECT * FROM campaigns ORDER BY created_at DESC LIMIT ? OFFSET ?",
            )
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?
        }
    };

    Ok(rows.into_iter().map(|r| r.to_campaign()).collect())
}

/// Count campaigns for pagination
pub async fn count_campaigns(pool: &SqlitePool, status: Option<&str>) -> Result<i64, sqlx::Error> {
    let count: i64 = match status {
        Some(s) => {
            sqlx::query_scalar("SELECT COUNT(*) FROM campaigns WHERE status = ?")
                .bind(s)
                .fetch_one(pool)
                .await?
        }
        None => {
            sqlx::query_scalar("SELECT COUNT(*) FROM campaigns")
                .fetch_one(pool)
                .await?
        }
    };
    Ok(count)
}

/// Campaigns the worker should be draining
pub async fn list_active_campaigns(pool: &SqlitePool) -> Result<Vec<Campaign>, sqlx::Error> {
    let rows = sqlx::query_as::<_, CampaignRow>(
        "SELECT * FROM campaigns WHERE status IN ('queued', 'running') ORDER BY created_at ASC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.to_campaign()).collect())
}

/// Average seconds per job over the most recent completions, the ETA input.
/// None until at least one completed job carries both timestamps.
pub async fn recent_job_seconds(
    pool: &SqlitePool,
    campaign_id: &str,
) -> Result<Option<f64>, sqlx::Error> {
    let avg: Option<f64> = sqlx::query_scalar(
        r#"
        SELECT AVG((julianday(finished_at) - julianday(started_at)) * 86400.0)
        FROM (
            SELECT started_at, finished_at FROM jobs
            WHERE campaign_id = ? AND status = 'completed'
              AND started_at IS NOT NULL AND finished_at IS NOT NULL
            ORDER BY finished_at DESC LIMIT 20
        )
        "#,
    )
    .bind(campaign_id)
    .fetch_one(pool)
    .await?;

    Ok(avg.map(|v| v.max(0.0)))
}

/// Finalize a campaign whose jobs have all reached a terminal state.
///
/// The guard clause makes this safe to call redundantly from concurrent
/// ticks: only one caller observes the transition out of `running`, and
/// a canceled campaign is never touched.
pub async fn try_finalize(
    pool: &SqlitePool,
    campaign_id: &str,
) -> Result<Option<CampaignStatus>, sqlx::Error> {
    let now = now_ts();
    let result = sqlx::query(
        r#"
        UPDATE campaigns SET
            status = CASE WHEN failed_jobs > 0 THEN 'completed_with_errors' ELSE 'completed' END,
            finished_at = ?,
            updated_at = ?
        WHERE id = ?
          AND status = 'running'
          AND processing_jobs = 0
          AND completed_jobs + failed_jobs + canceled_jobs = total_jobs
        "#,
    )
    .bind(&now)
    .bind(&now)
    .bind(campaign_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }

    Ok(get_campaign(pool, campaign_id).await?.map(|c| c.status))
}

/// Cancel a campaign: queued jobs become canceled immediately, in-flight
/// processing jobs are left to finish on their own. Returns the number of
/// jobs canceled, or None when the campaign is already terminal or absent.
pub async fn cancel_campaign(
    pool: &SqlitePool,
    campaign_id: &str,
) -> Result<Option<u64>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let status: Option<String> =
        sqlx::query_scalar("SELECT status FROM campaigns WHERE id = ?")
            .bind(campaign_id)
            .fetch_optional(&mut *tx)
            .await?;

    let Some(status) = status else {
        return Ok(None);
    };
    if status
        .parse::<CampaignStatus>()
        .map(|s| s.is_terminal())
        .unwrap_or(true)
    {
        return Ok(None);
    }

    let now = now_ts();
    let canceled = sqlx::query(
        r#"
        UPDATE jobs SET status = 'canceled', finished_at = ?, updated_at = ?
        WHERE campaign_id = ? AND status = 'queued'
        "#,
    )
    .bind(&now)
    .bind(&now)
    .bind(campaign_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    sqlx::query(
        r#"
        UPDATE campaigns SET
            canceled_jobs = canceled_jobs + ?,
            status = 'canceled',
            finished_at = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(canceled as i64)
    .bind(&now)
    .bind(&now)
    .bind(campaign_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Some(canceled))
}

/// Hard-delete a campaign; jobs go with it via ON DELETE CASCADE
pub async fn delete_campaign(pool: &SqlitePool, campaign_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM campaigns WHERE id = ?")
        .bind(campaign_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
