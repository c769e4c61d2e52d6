//! Pipeline event system: observers follow run progress without coupling
//! to the orchestrator.
//!
//! Events are published as stages start, finish, fail, or are skipped.
//! Nothing in the pipeline depends on anyone listening.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Everything the orchestrator announces about a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    /// A run entered (or re-entered) the running state
    RunStarted {
        run_id: String,
        kind: String,
        timestamp: DateTime<Utc>,
    },

    /// A stage claimed the running state
    StageStarted {
        run_id: String,
        stage: String,
        timestamp: DateTime<Utc>,
    },

    /// A stage persisted its artifact
    StageCompleted {
        run_id: String,
        stage: String,
        artifact_id: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A stage was already complete and was not re-executed
    StageSkipped {
        run_id: String,
        stage: String,
        timestamp: DateTime<Utc>,
    },

    /// A stage failed; the run halts
    StageFailed {
        run_id: String,
        stage: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A generation stage planned an exchange
    ChunkPlanned {
        run_id: String,
        stage: String,
        chunk: usize,
        facts: usize,
        chars: usize,
        timestamp: DateTime<Utc>,
    },

    RunCompleted {
        run_id: String,
        timestamp: DateTime<Utc>,
    },

    RunFailed {
        run_id: String,
        stage: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// The run this event belongs to.
    pub fn run_id(&self) -> &str {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::StageStarted { run_id, .. }
            | Self::StageCompleted { run_id, .. }
            | Self::StageSkipped { run_id, .. }
            | Self::StageFailed { run_id, .. }
            | Self::ChunkPlanned { run_id, .. }
            | Self::RunCompleted { run_id, .. }
            | Self::RunFailed { run_id, .. } => run_id,
        }
    }
}

/// A broadcast-based event bus for pipeline events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Slow
/// subscribers lag and lose the oldest events; publishers never block.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<PipelineEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: PipelineEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<PipelineEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}
