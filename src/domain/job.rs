//! Job domain model - one unit of audit work per uploaded row

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use super::status::JobStatus;

/// The raw row a job was created from. Recognized columns are lifted
/// into named fields; everything else passes through verbatim and
/// reappears in the report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl JobPayload {
    /// Build a payload from a loose column map, lifting recognized keys
    pub fn from_map(mut columns: BTreeMap<String, String>) -> Self {
        let mut take = |keys: &[&str]| {
            for key in keys {
                if let Some(value) = columns.remove(*key) {
                    if !value.trim().is_empty() {
                        return Some(value);
                    }
                }
            }
            None
        };

        let recording_url = take(&["recording_url", "recordingUrl", "recording", "audio_url"]);
        let agent_name = take(&["agent_name", "agentName", "agent"]);
        let user_id = take(&["user_id", "userId"]);
        let call_id = take(&["call_id", "callId"]);
        let customer_name = take(&["customer_name", "customerName", "customer"]);

        Self {
            recording_url,
            agent_name,
            user_id,
            call_id,
            customer_name,
            extra: columns,
        }
    }

    /// Validate the fields required to audit this row.
    ///
    /// A failure here is terminal for the job: no amount of retrying
    /// fixes a missing or malformed recording URL.
    pub fn validate(&self) -> Result<(), String> {
        let raw = self
            .recording_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "missing recording URL".to_string())?;

        let parsed =
            Url::parse(raw).map_err(|e| format!("invalid recording URL '{}': {}", raw, e))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(format!(
                "invalid recording URL '{}': unsupported scheme '{}'",
                raw,
                parsed.scheme()
            ));
        }
        Ok(())
    }
}

/// Whether a scoring parameter can sink the whole call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    Normal,
    Fatal,
}

/// Score for one QA parameter within an audit result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterScore {
    pub parameter_id: String,
    pub name: String,
    pub score: f64,
    pub max_score: f64,
    pub kind: ParameterKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

/// Token usage reported by the audit service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
}

impl TokenUsage {
    pub fn total(&self) -> i64 {
        self.input_tokens + self.output_tokens
    }
}

/// Audit result attached to a completed job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub score: f64,
    pub max_score: f64,
    pub breakdown: Vec<ParameterScore>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_duration_ms: Option<i64>,
}

/// A job is one call recording to be audited within a campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub row_index: i64,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub retries: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
