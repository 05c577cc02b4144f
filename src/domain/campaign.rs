//! Campaign domain model - one bulk audit run over an uploaded CSV

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::CampaignStatus;
use crate::limiter::RateLimitConfig;

/// A campaign owns the jobs created from one CSV upload and carries
/// denormalized per-status counters kept in step with job transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    pub timezone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter_set_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sop_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub status: CampaignStatus,
    pub total_jobs: i64,
    pub completed_jobs: i64,
    pub failed_jobs: i64,
    pub canceled_jobs: i64,
    pub processing_jobs: i64,
    pub rate_limit: RateLimitConfig,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Queued jobs are the remainder once every counted bucket is removed
    pub fn queued_jobs(&self) -> i64 {
        self.total_jobs
            - self.completed_jobs
            - self.failed_jobs
            - self.canceled_jobs
            - self.processing_jobs
    }

    /// Jobs that still need an outcome (queued or in flight)
    pub fn remaining_jobs(&self) -> i64 {
        self.queued_jobs() + self.processing_jobs
    }

    /// Estimated seconds to drain the campaign given recent throughput.
    /// None until at least one completion exists to measure.
    pub fn eta_seconds(&self, avg_job_seconds: Option<f64>) -> Option<f64> {
        let avg = avg_job_seconds?;
        if self.status.is_terminal() {
            return Some(0.0);
        }
        Some((self.remaining_jobs() as f64 * avg).max(0.0))
    }
}

/// Campaign plus the derived fields the list and detail views expose
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignDetail {
    #[serde(flatten)]
    pub campaign: Campaign,
    pub queued_jobs: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<f64>,
}

/// Request to create a new campaign. Rows arrive either pre-parsed
/// (`rows`) or as raw CSV text (`csv`); exactly one is required.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCampaignRequest {
    pub campaign_name: String,
    pub timezone: Option<String>,
    pub rows: Option<Vec<BTreeMap<String, String>>>,
    pub csv: Option<String>,
    pub parameter_set_id: Option<String>,
    pub sop_id: Option<String>,
    pub project_id: Option<String>,
    pub created_by: Option<String>,
    pub apply_rate_limit: Option<bool>,
    pub requests_per_minute: Option<u32>,
    pub requests_per_hour: Option<u32>,
}

/// Response returned as soon as the campaign and its jobs are persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCampaignResponse {
    pub campaign_id: Uuid,
    pub total_jobs: i64,
}
