use crate::model::RecordingId;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Work the sync handler knows how to perform.
///
/// Persisted as internally tagged JSON; rows with an unknown `type` are
/// dropped by the runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum JobPayload {
    /// Drive the recording one step further (register or send one block).
    PersistRecording {
        /// Recording to advance.
        recording: RecordingId,
    },
    /// Capture stopped; `last_index` is the final block index.
    CompleteRecording {
        /// Recording that finished capturing.
        recording: RecordingId,
        /// Final block index (inclusive).
        last_index: u64,
    },
}

impl JobPayload {
    /// Recording the job is about.
    pub fn recording(&self) -> &RecordingId {
        match self {
            JobPayload::PersistRecording { recording }
            | JobPayload::CompleteRecording { recording, .. } => recording,
        }
    }
}

/// A persisted work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Unique job identifier.
    pub id: Uuid,
    /// Milliseconds since the Unix epoch when the job was added.
    pub queued_at: i64,
    /// Milliseconds since the Unix epoch when the job becomes eligible.
    pub due_at: i64,
    /// What to do.
    pub payload: JobPayload,
}

/// What the runner should do with a job after its handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Finished; delete the job.
    Done,
    /// Try again after the given delay.
    RetryAfter(Duration),
    /// Handler declined the job; it stays leased until the lease runs out.
    Refuse,
}
