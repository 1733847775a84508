mod job;
mod recording;
mod track_id;

pub use {
    job::{Job, JobOutcome, JobPayload},
    recording::{Cursor, PersistState, RecordingId, RecordingInfo, StoredRecording},
    track_id::{ERA_START_MS, time_ordered_id},
};
