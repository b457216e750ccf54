//! Observable run progress.
//!
//! The engine emits one event per completed (or skipped/failed) step on an
//! optional channel, with the final outcome as the terminal event. Consumers
//! may render them, log them, or ignore the stream entirely; the engine never
//! blocks on a slow or dropped receiver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::pipeline::types::{RunId, StepId};
use crate::pipeline::Tier;

/// Kinds of events emitted during a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RunEventKind {
    /// The run was admitted and started.
    RunStarted,
    /// A step finished successfully.
    StepCompleted { step: StepId, tokens_used: u64 },
    /// A step was skipped (budget ceiling, degraded input, or expired deadline).
    StepSkipped { step: StepId, reason: String },
    /// A step failed recoverably and was absorbed.
    StepFailed { step: StepId, error: String },
    /// Terminal event: the run finished.
    RunFinished { success: bool, total_tokens: u64 },
}

/// An event emitted during pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: RunId,
    pub tier: Tier,
    pub kind: RunEventKind,
    pub timestamp: DateTime<Utc>,
}

impl RunEvent {
    pub fn new(run_id: RunId, tier: Tier, kind: RunEventKind) -> Self {
        Self {
            run_id,
            tier,
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Whether this is the terminal event of its run.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, RunEventKind::RunFinished { .. })
    }
}

/// Sending half of a progress stream. Cloneable; sends never block and a
/// closed receiver is silently tolerated.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: mpsc::UnboundedSender<RunEvent>,
}

impl ProgressSink {
    /// Create a sink and its receiving stream.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: RunEvent) {
        // A dropped receiver means nobody is watching; that's fine.
        let _ = self.tx.send(event);
    }
}
