//! Audit service integration
//!
//! Wraps the external "audit one call" capability (transcription plus
//! scoring against a QA parameter set) behind the [`AuditInvoker`]
//! trait. The HTTP implementation measures wall-clock duration and
//! captures token usage when the service reports it.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{JobPayload, JobResult, ParameterKind, ParameterScore, TokenUsage};

#[derive(Debug, Error)]
pub enum InvokerError {
    /// The row itself is unusable; retrying cannot help
    #[error("validation failed: {0}")]
    Validation(String),

    /// Network trouble, upstream 5xx, or a timeout; worth retrying
    #[error("transient audit failure: {0}")]
    Transient(String),

    /// The upstream provider rejected for quota despite our own limiter
    #[error("audit quota exceeded, retry_after={retry_after:?}")]
    Quota { retry_after: Option<u64> },

    #[error("audit service returned {status}: {message}")]
    Http { status: u16, message: String },

    #[error("failed to parse audit response: {0}")]
    Parse(String),
}

impl InvokerError {
    /// Retryable errors requeue the job; terminal ones fail it outright
    pub fn is_retryable(&self) -> bool {
        !matches!(self, InvokerError::Validation(_))
    }
}

/// Outcome of auditing one call
#[derive(Debug, Clone)]
pub struct AuditOutcome {
    pub result: JobResult,
}

/// The single-call audit capability consumed by the worker
#[async_trait]
pub trait AuditInvoker: Send + Sync {
    async fn run(
        &self,
        payload: &JobPayload,
        parameter_set_id: Option<&str>,
        sop_id: Option<&str>,
    ) -> Result<AuditOutcome, InvokerError>;
}

/// Request body sent to the audit service
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuditRequest<'a> {
    recording_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    call_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameter_set_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sop_id: Option<&'a str>,
}

/// Wire format of a parameter score in the audit response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireParameter {
    id: String,
    name: String,
    score: f64,
    max_score: f64,
    #[serde(default)]
    fatal: bool,
    comments: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUsage {
    input_tokens: i64,
    output_tokens: i64,
}

/// Wire format of the audit service response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuditResponse {
    score: f64,
    max_score: f64,
    #[serde(default)]
    parameters: Vec<WireParameter>,
    transcript: Option<String>,
    translation: Option<String>,
    usage: Option<WireUsage>,
}

impl AuditResponse {
    fn into_result(self, duration_ms: i64) -> JobResult {
        JobResult {
            score: self.score,
            max_score: self.max_score,
            breakdown: self
                .parameters
                .into_iter()
                .map(|p| ParameterScore {
                    parameter_id: p.id,
                    name: p.name,
                    score: p.score,
                    max_score: p.max_score,
                    kind: if p.fatal {
                        ParameterKind::Fatal
                    } else {
                        ParameterKind::Normal
                    },
                    comments: p.comments,
                })
                .collect(),
            transcript: self.transcript,
            translation: self.translation,
            token_usage: self.usage.map(|u| TokenUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            }),
            audit_duration_ms: Some(duration_ms),
        }
    }
}

/// HTTP client for the audit service
pub struct HttpAuditInvoker {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpAuditInvoker {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.into(),
            api_key,
        }
    }
}

#[async_trait]
impl AuditInvoker for HttpAuditInvoker {
    async fn run(
        &self,
        payload: &JobPayload,
        parameter_set_id: Option<&str>,
        sop_id: Option<&str>,
    ) -> Result<AuditOutcome, InvokerError> {
        let recording_url = payload
            .recording_url
            .as_deref()
            .ok_or_else(|| InvokerError::Validation("missing recording URL".to_string()))?;

        let body = AuditRequest {
            recording_url,
            agent_name: payload.agent_name.as_deref(),
            call_id: payload.call_id.as_deref(),
            parameter_set_id,
            sop_id,
        };

        let url = format!("{}/v1/audit", self.base_url.trim_end_matches('/'));
        let started = Instant::now();

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                InvokerError::Transient(format!("audit request timed out: {}", e))
            } else {
                InvokerError::Transient(format!("audit request failed: {}", e))
            }
        })?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(InvokerError::Quota { retry_after });
        }

        if status.is_server_error() {
            let message = response.text().await.unwrap_or_default();
            return Err(InvokerError::Transient(format!(
                "audit service returned {}: {}",
                status, message
            )));
        }

        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
            let message = response.text().await.unwrap_or_default();
            return Err(InvokerError::Validation(message));
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(InvokerError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: AuditResponse = response
            .json()
            .await
            .map_err(|e| InvokerError::Parse(e.to_string()))?;

        let duration_ms = started.elapsed().as_millis() as i64;
        tracing::debug!(
            call_id = payload.call_id.as_deref().unwrap_or("-"),
            duration_ms,
            score = parsed.score,
            "audit call completed"
        );

        Ok(AuditOutcome {
            result: parsed.into_result(duration_ms),
        })
    }
}
