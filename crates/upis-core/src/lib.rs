//! Upis Core Library
//!
//! Durable background synchronization of captured audio blocks: a persisted
//! job queue, a per-recording upload state machine and the local stores it
//! drives.
//!
//! # Example
//!
//! ```no_run
//! use upis_core::{CoreResult, EngineSettings, HttpDirectory, HttpRemote, SyncEngine};
//!
//! use std::sync::Arc;
//!
//! async fn capture(chunks: Vec<Vec<u8>>) -> CoreResult<()> {
//!     let base_url = "https://api.example.com";
//!     let engine = SyncEngine::open(
//!         EngineSettings::new("/var/lib/upis"),
//!         Arc::new(HttpDirectory::new(base_url, None)),
//!         Arc::new(HttpRemote::new(base_url, None)),
//!     )
//!     .await?;
//!     engine.spawn_runner().await;
//!
//!     let recorder = engine.start_recording("band-1", "audio/ogg;codecs=opus").await?;
//!     for chunk in chunks {
//!         recorder.push_block(chunk).await?;
//!     }
//!     recorder.finish().await?;
//!
//!     engine.close().await
//! }
//! ```

mod clock;
mod error;
mod model;
mod queue;
mod remote;
mod store;
mod sync;

pub use {
    clock::{Clock, SystemClock},
    error::{RemoteError, Result as CoreResult, SyncError},
    model::{
        Cursor, ERA_START_MS, Job, JobOutcome, JobPayload, PersistState, RecordingId,
        RecordingInfo, StoredRecording, time_ordered_id,
    },
    queue::{JobHandler, JobQueue, LEASE_TIMEOUT, PARALLELISM, POLL_INTERVAL, QueueSettings},
    remote::{
        BlockProposal, DIGEST_HEADER, Directory, HttpDirectory, HttpRemote, Identity,
        RemoteSync, UploadTarget, block_digest,
    },
    store::{BlockStore, Database, Ledger},
    sync::{
        EngineSettings, RETRY_DELAY, Recorder, RecordingLocks, RecordingSummary, SyncEngine,
        SyncHandler, Uploader,
    },
};

#[cfg(test)]
mod tests;
