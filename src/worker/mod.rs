//! Campaign worker - drains queued audit jobs in the background
//!
//! The supervisor wakes on a jittered poll interval or on a wake event
//! (campaign created, jobs retried, external nudge), claims queued jobs
//! through the store's atomic claim, runs each through the rate limiter
//! and the audit invoker, and persists the outcome. Claims are the only
//! ownership boundary: once a job is claimed here, nothing else touches
//! it, so redundant or concurrent passes are harmless.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use rand::Rng;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio::time::sleep;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::db;
use crate::domain::{Campaign, Job};
use crate::events::{Event, EventBus};
use crate::invoker::{AuditInvoker, InvokerError};
use crate::limiter::RateLimiter;

/// What happened to one claimed job during a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Completed,
    Failed,
    Requeued,
}

/// Counters for one processing pass
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchStats {
    pub completed: u64,
    pub failed: u64,
    pub requeued: u64,
}

impl BatchStats {
    pub fn processed(&self) -> u64 {
        self.completed + self.failed + self.requeued
    }

    fn record(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Completed => self.completed += 1,
            JobOutcome::Failed => self.failed += 1,
            JobOutcome::Requeued => self.requeued += 1,
        }
    }

    fn add(&mut self, other: BatchStats) {
        self.completed += other.completed;
        self.failed += other.failed;
        self.requeued += other.requeued;
    }
}

/// Background supervisor owning the claim/invoke/persist cycle
pub struct WorkerSupervisor {
    pool: SqlitePool,
    config: WorkerConfig,
    event_bus: EventBus,
    invoker: Arc<dyn AuditInvoker>,
    /// One limiter per campaign, built from the campaign's snapshot
    limiters: Mutex<HashMap<Uuid, Arc<RateLimiter>>>,
}

impl WorkerSupervisor {
    pub fn new(
        pool: SqlitePool,
        config: WorkerConfig,
        event_bus: EventBus,
        invoker: Arc<dyn AuditInvoker>,
    ) -> Self {
        Self {
            pool,
            config,
            event_bus,
            invoker,
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Start the polling loop as a background task
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run_loop().await })
    }

    async fn run_loop(&self) {
        tracing::info!(
            poll_interval_secs = self.config.poll_interval_secs,
            concurrency = self.config.concurrency,
            "starting campaign worker"
        );

        let mut events = self.event_bus.subscribe();

        loop {
            let wait = self.jittered_interval();

            tokio::select! {
                _ = sleep(wait) => {}
                event = events.recv() => {
                    use tokio::sync::broadcast::error::RecvError;
                    match event {
                        Ok(ev) if ev.wakes_worker() => {}
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::debug!(skipped, "worker event stream lagged");
                        }
                        Err(RecvError::Closed) => {
                            // No more publishers; fall back to pure polling
                            sleep(wait).await;
                        }
                    }
                }
            }

            let stats = self.run_batch().await;
            if stats.processed() > 0 {
                tracing::info!(
                    completed = stats.completed,
                    failed = stats.failed,
                    requeued = stats.requeued,
                    "processing pass finished"
                );
            }
        }
    }

    /// Poll interval with up to 20% jitter so several deployments don't
    /// hammer the store in lockstep
    fn jittered_interval(&self) -> Duration {
        let base_ms = self.config.poll_interval_secs.max(1) * 1000;
        let jitter = rand::thread_rng().gen_range(0..=base_ms / 5);
        Duration::from_millis(base_ms + jitter)
    }

    /// Process one batch of queued jobs across all active campaigns.
    /// Safe to call redundantly; the atomic claim arbitrates ownership.
    pub async fn run_batch(&self) -> BatchStats {
        let campaigns = match db::list_active_campaigns(&self.pool).await {
            Ok(campaigns) => campaigns,
            Err(e) => {
                tracing::error!("failed to list active campaigns: {}", e);
                return BatchStats::default();
            }
        };

        let mut stats = BatchStats::default();
        for campaign in campaigns {
            let limiter = self.limiter_for(&campaign).await;
            stats.add(self.drain_campaign(&campaign, &limiter).await);

            let campaign_key = campaign.id.to_string();
            match db::try_finalize(&self.pool, &campaign_key).await {
                Ok(Some(status)) => {
                    tracing::info!(campaign = %campaign.id, %status, "campaign finalized");
                    self.limiters.lock().await.remove(&campaign.id);
                    self.event_bus.publish(Event::CampaignFinished {
                        campaign_id: campaign.id,
                        status,
                        timestamp: Utc::now(),
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(campaign = %campaign.id, "finalize check failed: {}", e);
                }
            }
        }
        stats
    }

    async fn limiter_for(&self, campaign: &Campaign) -> Arc<RateLimiter> {
        let mut limiters = self.limiters.lock().await;
        limiters
            .entry(campaign.id)
            .or_insert_with(|| Arc::new(RateLimiter::new(campaign.rate_limit)))
            .clone()
    }

    /// Claim and process this campaign's queued jobs until none remain,
    /// keeping up to `concurrency` audits in flight
    async fn drain_campaign(&self, campaign: &Campaign, limiter: &RateLimiter) -> BatchStats {
        let campaign_key = campaign.id.to_string();
        let mut stats = BatchStats::default();
        let mut in_flight = FuturesUnordered::new();
        let mut queue_empty = false;

        loop {
            while !queue_empty && in_flight.len() < self.config.concurrency.max(1) {
                match db::claim_next_queued(&self.pool, &campaign_key).await {
                    Ok(Some(job)) => {
                        in_flight.push(self.process_job(campaign, job, limiter));
                    }
                    Ok(None) => queue_empty = true,
                    Err(e) => {
                        tracing::warn!(campaign = %campaign.id, "claim failed: {}", e);
                        queue_empty = true;
                    }
                }
            }

            match in_flight.next().await {
                Some(outcome) => {
                    stats.record(outcome);
                    // A requeued job is claimable again on the next lap
                    if outcome == JobOutcome::Requeued {
                        queue_empty = false;
                    }
                }
                None if queue_empty => break,
                None => {}
            }
        }

        stats
    }

    /// Run one claimed job to a terminal write (or a requeue)
    async fn process_job(
        &self,
        campaign: &Campaign,
        job: Job,
        limiter: &RateLimiter,
    ) -> JobOutcome {
        let job_id = job.id.to_string();

        // Unusable rows fail without burning rate-limit budget
        if let Err(message) = job.payload.validate() {
            return self.persist_failure(campaign, &job, &message).await;
        }

        limiter.acquire().await;

        let timeout = Duration::from_secs(self.config.job_timeout_secs);
        let invocation = self.invoker.run(
            &job.payload,
            campaign.parameter_set_id.as_deref(),
            campaign.sop_id.as_deref(),
        );
        let outcome = match tokio::time::timeout(timeout, invocation).await {
            Ok(outcome) => outcome,
            Err(_) => Err(InvokerError::Transient(format!(
                "audit call exceeded {}s timeout",
                self.config.job_timeout_secs
            ))),
        };

        match outcome {
            Ok(audit) => {
                let persisted = self
                    .with_store_retry("complete_job", || {
                        db::complete_job(&self.pool, &job_id, &audit.result)
                    })
                    .await;
                match persisted {
                    Ok(true) => {
                        self.event_bus.publish(Event::JobCompleted {
                            campaign_id: campaign.id,
                            job_id: job.id,
                            score: audit.result.score,
                            timestamp: Utc::now(),
                        });
                        JobOutcome::Completed
                    }
                    Ok(false) => {
                        // Someone else already wrote a terminal state
                        tracing::debug!(job = %job.id, "completion was a no-op");
                        JobOutcome::Completed
                    }
                    Err(e) => {
                        // Leave the claim in place; reset-stuck recovers it
                        tracing::error!(job = %job.id, "could not persist completion: {}", e);
                        JobOutcome::Requeued
                    }
                }
            }
            Err(error) if error.is_retryable() && job.retries < self.config.max_retries => {
                tracing::warn!(
                    job = %job.id,
                    attempt = job.retries + 1,
                    "transient audit failure, requeueing: {}",
                    error
                );
                let message = error.to_string();
                let requeued = self
                    .with_store_retry("requeue_job", || {
                        db::requeue_job(&self.pool, &job_id, &message)
                    })
                    .await;
                match requeued {
                    Ok(_) => JobOutcome::Requeued,
                    Err(e) => {
                        tracing::error!(job = %job.id, "could not requeue: {}", e);
                        JobOutcome::Requeued
                    }
                }
            }
            Err(error) => self.persist_failure(campaign, &job, &error.to_string()).await,
        }
    }

    async fn persist_failure(&self, campaign: &Campaign, job: &Job, message: &str) -> JobOutcome {
        let job_id = job.id.to_string();
        let persisted = self
            .with_store_retry("fail_job", || db::fail_job(&self.pool, &job_id, message))
            .await;

        match persisted {
            Ok(_) => {
                self.event_bus.publish(Event::JobFailed {
                    campaign_id: campaign.id,
                    job_id: job.id,
                    error: message.to_string(),
                    timestamp: Utc::now(),
                });
                JobOutcome::Failed
            }
            Err(e) => {
                tracing::error!(job = %job.id, "could not persist failure: {}", e);
                JobOutcome::Requeued
            }
        }
    }

    /// Retry a store write with backoff. The job's execution outcome is
    /// independent of store reachability, so a store error never turns
    /// into a job failure here.
    async fn with_store_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, sqlx::Error>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
    {
        let mut delay = Duration::from_millis(200);
        for attempt in 1..=3 {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt == 3 => return Err(e),
                Err(e) => {
                    tracing::warn!("{} failed (attempt {}), backing off: {}", what, attempt, e);
                    sleep(delay).await;
                    delay *= 2;
                }
            }
        }
        unreachable!("store retry loop returns from its last attempt")
    }
}
