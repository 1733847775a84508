//! Capture-side writer: one task per live recording.
//!
//! Chunks arrive over a channel and are written strictly in arrival order,
//! each at the next contiguous index, so no two writes for a recording ever
//! race.

use crate::{
    CoreResult, SyncError,
    model::{JobPayload, RecordingInfo},
    queue::JobQueue,
    store::BlockStore,
};

use std::panic::Location;

use error_location::ErrorLocation;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, error, info, instrument, warn};

const COMMAND_BUFFER: usize = 32;

/// What a finished capture produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSummary {
    /// The recording.
    pub info: RecordingInfo,
    /// Blocks durably stored (indices `0..block_count`).
    pub block_count: u64,
    /// Chunks that could not be stored and were skipped.
    pub failed_blocks: u64,
}

enum RecorderCommand {
    Block(Vec<u8>),
    Finish(oneshot::Sender<CoreResult<RecordingSummary>>),
}

/// Handle to a live recording's writer task.
pub struct Recorder {
    info: RecordingInfo,
    command_tx: mpsc::Sender<RecorderCommand>,
    task: JoinHandle<()>,
}

impl Recorder {
    pub(crate) fn spawn(info: RecordingInfo, blocks: BlockStore, queue: JobQueue) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let writer = BlockWriter {
            info: info.clone(),
            blocks,
            queue,
            next_index: 0,
            failed_blocks: 0,
            enqueue_error: None,
        };
        let task = tokio::spawn(writer.run(command_rx));

        Self {
            info,
            command_tx,
            task,
        }
    }

    /// The recording being captured.
    pub fn info(&self) -> &RecordingInfo {
        &self.info
    }

    /// Queue one captured chunk for storage.
    ///
    /// # Errors
    ///
    /// Returns error if the writer task is gone.
    pub async fn push_block(&self, bytes: Vec<u8>) -> CoreResult<()> {
        self.command_tx
            .send(RecorderCommand::Block(bytes))
            .await
            .map_err(|e| SyncError::ChannelSendFailed {
                message: format!("Failed to send block: {}", e),
                location: ErrorLocation::from(Location::caller()),
            })
    }

    /// Stop capture: wait for every queued chunk, then report the final index.
    ///
    /// # Errors
    ///
    /// Returns error if the writer task is gone or panicked, or if any upload
    /// step or the completion could not be queued. The recording would then
    /// never finish uploading on its own.
    pub async fn finish(self) -> CoreResult<RecordingSummary> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(RecorderCommand::Finish(reply_tx))
            .await
            .map_err(|e| SyncError::ChannelSendFailed {
                message: format!("Failed to send finish: {}", e),
                location: ErrorLocation::from(Location::caller()),
            })?;

        let reply = reply_rx.await.map_err(|e| SyncError::ChannelSendFailed {
            message: format!("Writer dropped finish reply: {}", e),
            location: ErrorLocation::from(Location::caller()),
        })?;

        self.task.await?;

        reply
    }
}

struct BlockWriter {
    info: RecordingInfo,
    blocks: BlockStore,
    queue: JobQueue,
    next_index: u64,
    failed_blocks: u64,
    /// First job that could not be queued; reported by `finish`.
    enqueue_error: Option<SyncError>,
}

impl BlockWriter {
    #[instrument(skip(self, command_rx), fields(recording = %self.info.id))]
    async fn run(mut self, mut command_rx: mpsc::Receiver<RecorderCommand>) {
        while let Some(command) = command_rx.recv().await {
            match command {
                RecorderCommand::Block(bytes) => self.store(bytes).await,
                RecorderCommand::Finish(reply_tx) => {
                    let reply = self.complete().await;
                    let _ = reply_tx.send(reply);
                    return;
                }
            }
        }

        // Every handle dropped without finish(): capture was abandoned.
        warn!(
            recording = %self.info.id,
            block_count = self.next_index,
            "Recorder dropped without finishing, no completion enqueued"
        );
    }

    async fn store(&mut self, bytes: Vec<u8>) {
        let index = self.next_index;

        if let Err(e) = self.blocks.append_block(&self.info.id, index, bytes).await {
            // The index is reused by the next chunk so indices stay contiguous.
            error!(recording = %self.info.id, index, error = ?e, "Failed to store block, skipping it");
            self.failed_blocks += 1;
            return;
        }
        self.next_index += 1;

        debug!(recording = %self.info.id, index, "Block stored");

        if let Err(e) = self.queue.add_job(self.persist_payload(), None).await {
            error!(recording = %self.info.id, index, error = ?e, "Failed to enqueue block upload");
            self.keep_enqueue_error(e);
        }
    }

    async fn complete(&mut self) -> CoreResult<RecordingSummary> {
        match self.next_index.checked_sub(1) {
            None => {
                warn!(recording = %self.info.id, "Recording finished without blocks, no completion enqueued");
            }
            Some(last_index) => {
                let payload = JobPayload::CompleteRecording {
                    recording: self.info.id.clone(),
                    last_index,
                };

                match self.queue.add_job(payload, None).await {
                    Ok(_) => info!(recording = %self.info.id, last_index, "Capture finished"),
                    Err(e) => {
                        error!(recording = %self.info.id, last_index, error = ?e, "Failed to enqueue completion");
                        self.keep_enqueue_error(e);
                    }
                }
            }
        }

        match self.enqueue_error.take() {
            Some(e) => Err(e),
            None => Ok(self.summary()),
        }
    }

    fn keep_enqueue_error(&mut self, e: SyncError) {
        if self.enqueue_error.is_none() {
            self.enqueue_error = Some(e);
        }
    }

    fn persist_payload(&self) -> JobPayload {
        JobPayload::PersistRecording {
            recording: self.info.id.clone(),
        }
    }

    fn summary(&self) -> RecordingSummary {
        RecordingSummary {
            info: self.info.clone(),
            block_count: self.next_index,
            failed_blocks: self.failed_blocks,
        }
    }
}
