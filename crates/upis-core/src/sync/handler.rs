use crate::{
    CoreResult,
    model::{Job, JobOutcome, JobPayload},
    queue::JobHandler,
    sync::{RecordingLocks, Uploader},
};

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

/// Dispatches sync jobs to the [`Uploader`] under the recording's lock.
pub struct SyncHandler {
    uploader: Arc<Uploader>,
    locks: RecordingLocks,
}

impl SyncHandler {
    /// Handler over an uploader and the lock table it serializes on.
    pub fn new(uploader: Arc<Uploader>, locks: RecordingLocks) -> Self {
        Self { uploader, locks }
    }
}

#[async_trait]
impl JobHandler for SyncHandler {
    #[instrument(skip(self, job), fields(job_id = %job.id, recording = %job.payload.recording()))]
    async fn handle(&self, job: &Job) -> CoreResult<JobOutcome> {
        let recording = job.payload.recording();

        self.locks
            .with_lock(recording, async {
                match &job.payload {
                    JobPayload::PersistRecording { recording } => {
                        self.uploader.persist_recording(recording).await
                    }
                    JobPayload::CompleteRecording {
                        recording,
                        last_index,
                    } => {
                        self.uploader
                            .complete_recording(recording, *last_index)
                            .await
                    }
                }
            })
            .await
    }
}
