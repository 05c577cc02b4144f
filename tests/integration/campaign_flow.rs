//! End-to-end campaign lifecycle tests
//!
//! These drive the full pipeline (store, worker, limiter, report)
//! against a real database file with a scripted audit invoker.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::SqlitePool;

use callqa::config::WorkerConfig;
use callqa::db;
use callqa::domain::{
    CampaignStatus, JobPayload, JobResult, JobStatus, ParameterKind, ParameterScore, TokenUsage,
};
use callqa::events::EventBus;
use callqa::invoker::{AuditInvoker, AuditOutcome, InvokerError};
use callqa::limiter::RateLimitConfig;
use callqa::report::{self, ReportOptions};
use callqa::worker::WorkerSupervisor;

/// Deterministic invoker: scores derived from the call id, with a
/// transient hiccup for ids listed in `flaky`
struct ScriptedInvoker {
    flaky: tokio::sync::Mutex<BTreeMap<String, u32>>,
}

impl ScriptedInvoker {
    fn new() -> Self {
        Self {
            flaky: tokio::sync::Mutex::new(BTreeMap::new()),
        }
    }

    fn with_flaky(call_id: &str, failures: u32) -> Self {
        let mut flaky = BTreeMap::new();
        flaky.insert(call_id.to_string(), failures);
        Self {
            flaky: tokio::sync::Mutex::new(flaky),
        }
    }
}

#[async_trait]
impl AuditInvoker for ScriptedInvoker {
    async fn run(
        &self,
        payload: &JobPayload,
        _parameter_set_id: Option<&str>,
        _sop_id: Option<&str>,
    ) -> Result<AuditOutcome, InvokerError> {
        let call_id = payload.call_id.clone().unwrap_or_default();

        {
            let mut flaky = self.flaky.lock().await;
            if let Some(remaining) = flaky.get_mut(&call_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(InvokerError::Transient("upstream 503".to_string()));
                }
            }
        }

        // Stable per-call score so report output is reproducible
        let seed = call_id.bytes().map(u64::from).sum::<u64>() % 40;
        let score = 60.0 + seed as f64;

        Ok(AuditOutcome {
            result: JobResult {
                score,
                max_score: 100.0,
                breakdown: vec![
                    ParameterScore {
                        parameter_id: "p-greeting".to_string(),
                        name: "Greeting".to_string(),
                        score: score / 2.0,
                        max_score: 50.0,
                        kind: ParameterKind::Normal,
                        comments: None,
                    },
                    ParameterScore {
                        parameter_id: "p-disclosure".to_string(),
                        name: "Disclosure".to_string(),
                        score: score / 2.0,
                        max_score: 50.0,
                        kind: ParameterKind::Fatal,
                        comments: None,
                    },
                ],
                transcript: Some(format!("transcript for {}", call_id)),
                translation: None,
                token_usage: Some(TokenUsage {
                    input_tokens: 1000,
                    output_tokens: 250,
                }),
                audit_duration_ms: Some(25),
            },
        })
    }
}

async fn setup_db() -> (tempfile::TempDir, SqlitePool) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("callqa-test.db");
    let pool = db::init_database(path.to_str().unwrap()).await.unwrap();
    (dir, pool)
}

fn row(recording: Option<&str>, call_id: &str) -> JobPayload {
    let mut map = BTreeMap::new();
    if let Some(url) = recording {
        map.insert("recording_url".to_string(), url.to_string());
    }
    map.insert("call_id".to_string(), call_id.to_string());
    map.insert("agent_name".to_string(), "Asha".to_string());
    map.insert("team".to_string(), "alpha".to_string());
    JobPayload::from_map(map)
}

async fn seed_campaign(pool: &SqlitePool, payloads: &[JobPayload]) -> String {
    let new = db::NewCampaign {
        name: "integration".to_string(),
        timezone: "UTC".to_string(),
        created_by: Some("qa-lead".to_string()),
        parameter_set_id: Some("ps-1".to_string()),
        sop_id: None,
        project_id: None,
        rate_limit: RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        },
    };
    db::create_campaign_with_jobs(pool, &new, payloads)
        .await
        .unwrap()
        .id
        .to_string()
}

fn worker(pool: SqlitePool, invoker: impl AuditInvoker + 'static) -> WorkerSupervisor {
    let config = WorkerConfig {
        max_retries: 3,
        concurrency: 2,
        job_timeout_secs: 10,
        ..WorkerConfig::default()
    };
    WorkerSupervisor::new(pool, config, EventBus::new(), Arc::new(invoker))
}

#[tokio::test]
async fn mixed_outcome_campaign_finalizes_with_errors() {
    let (_dir, pool) = setup_db().await;
    let rows = vec![
        row(Some("https://cdn.example.com/0.mp3"), "C-0"),
        row(Some("https://cdn.example.com/1.mp3"), "C-1"),
        row(None, "C-2"),
    ];
    let campaign_id = seed_campaign(&pool, &rows).await;

    let stats = worker(pool.clone(), ScriptedInvoker::new()).run_batch().await;
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.failed, 1);

    let campaign = db::get_campaign(&pool, &campaign_id).await.unwrap().unwrap();
    assert_eq!(campaign.status, CampaignStatus::CompletedWithErrors);
    assert_eq!(campaign.completed_jobs, 2);
    assert_eq!(campaign.failed_jobs, 1);
    assert_eq!(campaign.queued_jobs(), 0);
    assert!(campaign.finished_at.is_some());

    // The report carries all three rows, with the failed row's error
    let jobs = db::list_jobs(&pool, &campaign_id, None, 100, 0).await.unwrap();
    let options = ReportOptions {
        include_tokens: false,
        pass_threshold: 80.0,
    };
    let bytes = report::generate(&campaign, &jobs, &options).unwrap();
    let text = String::from_utf8(bytes).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(lines.len(), 4);
    assert!(lines[3].contains("missing recording URL"));
    // Transcripts stay out of the tabular export
    assert!(!lines[1].contains("transcript"));
}

#[tokio::test]
async fn flaky_job_retries_within_one_batch() {
    let (_dir, pool) = setup_db().await;
    let rows = vec![
        row(Some("https://cdn.example.com/0.mp3"), "C-0"),
        row(Some("https://cdn.example.com/1.mp3"), "C-1"),
    ];
    let campaign_id = seed_campaign(&pool, &rows).await;

    let stats = worker(pool.clone(), ScriptedInvoker::with_flaky("C-1", 2))
        .run_batch()
        .await;
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.requeued, 2);

    let jobs = db::list_jobs(&pool, &campaign_id, None, 100, 0).await.unwrap();
    let flaky = jobs.iter().find(|j| j.payload.call_id.as_deref() == Some("C-1")).unwrap();
    assert_eq!(flaky.status, JobStatus::Completed);
    assert_eq!(flaky.retries, 2);

    let campaign = db::get_campaign(&pool, &campaign_id).await.unwrap().unwrap();
    assert_eq!(campaign.status, CampaignStatus::Completed);
    assert_eq!(campaign.failed_jobs, 0);
}

#[tokio::test]
async fn operator_retry_reopens_a_finalized_campaign() {
    let (_dir, pool) = setup_db().await;
    // Every row lacks a recording URL, so the whole batch fails
    let rows: Vec<_> = (0..3).map(|i| row(None, &format!("C-{}", i))).collect();
    let campaign_id = seed_campaign(&pool, &rows).await;

    worker(pool.clone(), ScriptedInvoker::new()).run_batch().await;

    let campaign = db::get_campaign(&pool, &campaign_id).await.unwrap().unwrap();
    assert_eq!(campaign.status, CampaignStatus::CompletedWithErrors);
    assert_eq!(campaign.failed_jobs, 3);

    let retried = db::retry_failed(&pool, &campaign_id).await.unwrap();
    assert_eq!(retried, 3);

    let campaign = db::get_campaign(&pool, &campaign_id).await.unwrap().unwrap();
    assert_eq!(campaign.status, CampaignStatus::Running);
    assert_eq!(campaign.failed_jobs, 0);
    assert_eq!(campaign.queued_jobs(), 3);

    // They fail again (still no URLs), each with one more attempt on record
    worker(pool.clone(), ScriptedInvoker::new()).run_batch().await;
    let jobs = db::list_jobs(&pool, &campaign_id, None, 100, 0).await.unwrap();
    for job in jobs {
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retries, 1);
    }
}

#[tokio::test]
async fn report_is_byte_identical_across_downloads() {
    let (_dir, pool) = setup_db().await;
    let rows: Vec<_> = (0..5)
        .map(|i| row(Some(&format!("https://cdn.example.com/{}.mp3", i)), &format!("C-{}", i)))
        .collect();
    let campaign_id = seed_campaign(&pool, &rows).await;

    worker(pool.clone(), ScriptedInvoker::new()).run_batch().await;

    let campaign = db::get_campaign(&pool, &campaign_id).await.unwrap().unwrap();
    let jobs = db::list_jobs(&pool, &campaign_id, None, 100, 0).await.unwrap();
    let options = ReportOptions {
        include_tokens: true,
        pass_threshold: 80.0,
    };

    let first = report::generate(&campaign, &jobs, &options).unwrap();
    let second = report::generate(&campaign, &jobs, &options).unwrap();
    assert_eq!(first, second);

    // Re-reading from the store changes nothing either
    let jobs_again = db::list_jobs(&pool, &campaign_id, None, 100, 0).await.unwrap();
    let third = report::generate(&campaign, &jobs_again, &options).unwrap();
    assert_eq!(first, third);
}

#[tokio::test]
async fn rate_limited_campaign_still_drains() {
    let (_dir, pool) = setup_db().await;
    let new = db::NewCampaign {
        name: "limited".to_string(),
        timezone: "UTC".to_string(),
        created_by: None,
        parameter_set_id: None,
        sop_id: None,
        project_id: None,
        // Generous enough that the batch is not artificially slow
        rate_limit: RateLimitConfig {
            enabled: true,
            requests_per_minute: 1000,
            requests_per_hour: 10000,
        },
    };
    let rows: Vec<_> = (0..6)
        .map(|i| row(Some(&format!("https://cdn.example.com/{}.mp3", i)), &format!("C-{}", i)))
        .collect();
    let campaign = db::create_campaign_with_jobs(&pool, &new, &rows).await.unwrap();

    let stats = worker(pool.clone(), ScriptedInvoker::new()).run_batch().await;
    assert_eq!(stats.completed, 6);

    let campaign = db::get_campaign(&pool, &campaign.id.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(campaign.status, CampaignStatus::Completed);
}
