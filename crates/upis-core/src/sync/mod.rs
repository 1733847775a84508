mod engine;
mod handler;
mod recorder;
mod recording_lock;
mod uploader;

pub use {
    engine::{EngineSettings, SyncEngine},
    handler::SyncHandler,
    recorder::{Recorder, RecordingSummary},
    recording_lock::RecordingLocks,
    uploader::{RETRY_DELAY, Uploader},
};
