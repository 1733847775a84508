//! Upload state machine.
//!
//! Decides the next synchronization step for one recording and persists the
//! resulting [`PersistState`]. Callers must hold the recording's lock.

use crate::{
    CoreResult,
    model::{Cursor, JobOutcome, JobPayload, PersistState, RecordingId, RecordingInfo},
    queue::JobQueue,
    remote::{BlockProposal, RemoteSync, block_digest},
    store::{BlockStore, Ledger},
};

use std::{sync::Arc, time::Duration};

use tracing::{debug, error, info, instrument, warn};

/// Backoff after any failed remote call.
pub const RETRY_DELAY: Duration = Duration::from_secs(10);

/// Advances recordings through `Local -> Uploading -> Uploaded`.
pub struct Uploader {
    ledger: Ledger,
    blocks: BlockStore,
    remote: Arc<dyn RemoteSync>,
    queue: JobQueue,
    retry_delay: Duration,
}

impl Uploader {
    /// Build the state machine over its stores, remote and queue handle.
    pub fn new(
        ledger: Ledger,
        blocks: BlockStore,
        remote: Arc<dyn RemoteSync>,
        queue: JobQueue,
        retry_delay: Duration,
    ) -> Self {
        Self {
            ledger,
            blocks,
            remote,
            queue,
            retry_delay,
        }
    }

    /// Take one step for `id`: register it, or send the block under its cursor.
    ///
    /// # Errors
    ///
    /// Returns error only for local storage failures; remote failures become
    /// [`JobOutcome::RetryAfter`].
    #[instrument(skip(self), fields(recording = %id))]
    pub async fn persist_recording(&self, id: &RecordingId) -> CoreResult<JobOutcome> {
        let Some(stored) = self.ledger.load_recording(id).await? else {
            error!(recording = %id, "Recording missing from ledger, dropping job");
            return Ok(JobOutcome::Done);
        };

        match stored.state {
            PersistState::Local => self.register(&stored.info).await,
            PersistState::Uploading { cursor, last_index } => {
                self.send_next_block(&stored.info, cursor, last_index).await
            }
            PersistState::Uploaded => {
                debug!(recording = %id, "Recording already uploaded");
                Ok(JobOutcome::Done)
            }
        }
    }

    /// Record the final block index reported when capture stopped.
    ///
    /// A completion that finds the recording still `Local` is dropped and its
    /// `last_index` is lost; such a recording never reaches `Uploaded`.
    ///
    /// # Errors
    ///
    /// Returns error if the ledger cannot be read or written.
    #[instrument(skip(self), fields(recording = %id))]
    pub async fn complete_recording(&self, id: &RecordingId, last_index: u64) -> CoreResult<JobOutcome> {
        let Some(stored) = self.ledger.load_recording(id).await? else {
            error!(recording = %id, "Recording missing from ledger, dropping completion");
            return Ok(JobOutcome::Done);
        };

        match stored.state {
            PersistState::Local => {
                warn!(
                    recording = %id,
                    last_index,
                    "Completion arrived before registration, dropping it"
                );
                Ok(JobOutcome::Done)
            }
            PersistState::Uploading {
                last_index: Some(known),
                ..
            } if known != last_index => {
                error!(
                    recording = %id,
                    known,
                    last_index,
                    "Conflicting final block index, dropping completion"
                );
                Ok(JobOutcome::Done)
            }
            PersistState::Uploading { cursor, .. } => {
                let next = PersistState::Uploading {
                    cursor,
                    last_index: Some(last_index),
                };
                let next = self.ledger.save_recording(&stored.info, &next).await?;

                info!(recording = %id, last_index, state = next.name(), "Final block index recorded");
                Ok(JobOutcome::Done)
            }
            PersistState::Uploaded => Ok(JobOutcome::Done),
        }
    }

    async fn register(&self, info: &RecordingInfo) -> CoreResult<JobOutcome> {
        if let Err(e) = self.remote.register_recording(info).await {
            warn!(
                recording = %info.id,
                transient = e.is_transient(),
                error = %e,
                "Register failed, backing off"
            );
            return Ok(JobOutcome::RetryAfter(self.retry_delay));
        }

        self.ledger
            .save_recording(info, &PersistState::uploading_from_start(&info.id))
            .await?;

        self.queue
            .add_job(
                JobPayload::PersistRecording {
                    recording: info.id.clone(),
                },
                None,
            )
            .await?;

        info!(recording = %info.id, "Recording registered, uploading from block 0");

        Ok(JobOutcome::Done)
    }

    async fn send_next_block(
        &self,
        info: &RecordingInfo,
        cursor: Cursor,
        last_index: Option<u64>,
    ) -> CoreResult<JobOutcome> {
        if last_index.is_some_and(|last| cursor.index > last) {
            self.ledger.save_recording(info, &PersistState::Uploaded).await?;
            info!(recording = %info.id, "Recording uploaded");
            return Ok(JobOutcome::Done);
        }

        let Some(bytes) = self.blocks.read_block(&info.id, cursor.index).await? else {
            debug!(recording = %info.id, index = cursor.index, "Block not captured yet");
            return Ok(JobOutcome::Done);
        };

        let digest = block_digest(&bytes);
        let proposal = BlockProposal {
            index: cursor.index,
            size: bytes.len() as u64,
            mime_type: info.mime_type.clone(),
            digest: digest.clone(),
        };

        // A fresh proposal on every attempt: upload targets are single-use.
        let target = match self.remote.propose_block(&info.id, &proposal).await {
            Ok(target) => target,
            Err(e) => {
                warn!(
                    recording = %info.id,
                    index = cursor.index,
                    transient = e.is_transient(),
                    error = %e,
                    "Block proposal failed, backing off"
                );
                return Ok(JobOutcome::RetryAfter(self.retry_delay));
            }
        };

        if let Err(e) = self.remote.upload_block(&target, &digest, bytes).await {
            warn!(
                recording = %info.id,
                index = cursor.index,
                transient = e.is_transient(),
                error = %e,
                "Block upload failed, backing off"
            );
            return Ok(JobOutcome::RetryAfter(self.retry_delay));
        }

        let sent = cursor.index;
        let next = PersistState::Uploading {
            cursor: Cursor {
                stream: cursor.stream,
                index: sent + 1,
            },
            last_index,
        };
        let next = self.ledger.save_recording(info, &next).await?;

        info!(recording = %info.id, index = sent, state = next.name(), "Block uploaded");

        Ok(JobOutcome::Done)
    }
}
