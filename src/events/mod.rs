//! Event bus for pub/sub communication between components
//!
//! API handlers publish campaign events; the worker supervisor
//! subscribes and treats them as wake signals, so "something changed"
//! is decoupled from "go do the work".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::CampaignStatus;

/// Event types that can be published
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Campaign created with its jobs enqueued
    CampaignCreated {
        campaign_id: Uuid,
        total_jobs: i64,
        timestamp: DateTime<Utc>,
    },

    /// One job finished successfully
    JobCompleted {
        campaign_id: Uuid,
        job_id: Uuid,
        score: f64,
        timestamp: DateTime<Utc>,
    },

    /// One job failed terminally
    JobFailed {
        campaign_id: Uuid,
        job_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Failed jobs were requeued by an operator
    JobsRetried {
        campaign_id: Uuid,
        count: u64,
        timestamp: DateTime<Utc>,
    },

    /// Stuck processing jobs were requeued
    JobsReset {
        campaign_id: Uuid,
        count: u64,
        timestamp: DateTime<Utc>,
    },

    /// Campaign reached a terminal status
    CampaignFinished {
        campaign_id: Uuid,
        status: CampaignStatus,
        timestamp: DateTime<Utc>,
    },

    /// Campaign was canceled by an operator
    CampaignCanceled {
        campaign_id: Uuid,
        canceled_jobs: u64,
        timestamp: DateTime<Utc>,
    },

    /// External scheduler asked for a processing pass
    WorkerNudged { timestamp: DateTime<Utc> },
}

impl Event {
    /// Get the campaign ID associated with this event
    pub fn campaign_id(&self) -> Option<Uuid> {
        match self {
            Event::CampaignCreated { campaign_id, .. } => Some(*campaign_id),
            Event::JobCompleted { campaign_id, .. } => Some(*campaign_id),
            Event::JobFailed { campaign_id, .. } => Some(*campaign_id),
            Event::JobsRetried { campaign_id, .. } => Some(*campaign_id),
            Event::JobsReset { campaign_id, .. } => Some(*campaign_id),
            Event::CampaignFinished { campaign_id, .. } => Some(*campaign_id),
            Event::CampaignCanceled { campaign_id, .. } => Some(*campaign_id),
            Event::WorkerNudged { .. } => None,
        }
    }

    /// Whether this event means there may be new work to claim
    pub fn wakes_worker(&self) -> bool {
        matches!(
            self,
            Event::CampaignCreated { .. }
                | Event::JobsRetried { .. }
                | Event::JobsReset { .. }
                | Event::WorkerNudged { .. }
        )
    }
}

/// Event bus for pub/sub communication
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self { sender }
    }

    /// Publish an event
    pub fn publish(&self, event: Event) {
        // Ignore errors if there are no receivers
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}
