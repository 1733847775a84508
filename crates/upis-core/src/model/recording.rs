use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of one recording within a band.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingId {
    /// Band that owns the recording.
    pub band_id: String,
    /// Time-ordered track identifier, unique within the band.
    pub track_id: String,
}

impl RecordingId {
    /// Create an identifier from its parts.
    pub fn new(band_id: impl Into<String>, track_id: impl Into<String>) -> Self {
        Self {
            band_id: band_id.into(),
            track_id: track_id.into(),
        }
    }

    /// Stable lock name for this recording.
    pub fn lock_name(&self) -> String {
        format!("recording/{}/{}", self.band_id, self.track_id)
    }
}

impl fmt::Display for RecordingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.band_id, self.track_id)
    }
}

/// Immutable description of a recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingInfo {
    /// Recording identity.
    pub id: RecordingId,
    /// Container/codec of every block, e.g. `audio/ogg;codecs=opus`.
    pub mime_type: String,
}

/// Next block index not yet confirmed uploaded for a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Stream the cursor walks.
    pub stream: RecordingId,
    /// Index of the next block to send.
    pub index: u64,
}

/// Synchronization state of one recording.
///
/// Moves `Local -> Uploading -> Uploaded` only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PersistState {
    /// Captured but not yet registered remotely.
    Local,
    /// Registered; blocks are being sent in index order.
    Uploading {
        /// Next block to send.
        cursor: Cursor,
        /// Final block index produced by capture (inclusive), once known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_index: Option<u64>,
    },
    /// Every block through `last_index` is confirmed.
    Uploaded,
}

impl PersistState {
    /// Freshly registered state with the cursor at block 0.
    pub fn uploading_from_start(stream: &RecordingId) -> Self {
        PersistState::Uploading {
            cursor: Cursor {
                stream: stream.clone(),
                index: 0,
            },
            last_index: None,
        }
    }

    /// Short name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            PersistState::Local => "local",
            PersistState::Uploading { .. } => "uploading",
            PersistState::Uploaded => "uploaded",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            PersistState::Local => 0,
            PersistState::Uploading { .. } => 1,
            PersistState::Uploaded => 2,
        }
    }

    /// Whether every block is confirmed: `last_index` known and passed.
    pub fn is_fully_sent(&self) -> bool {
        matches!(
            self,
            PersistState::Uploading { cursor, last_index: Some(last) } if cursor.index > *last
        )
    }

    /// Collapse a fully sent `Uploading` state into `Uploaded`.
    pub fn settled(self) -> Self {
        if self.is_fully_sent() {
            PersistState::Uploaded
        } else {
            self
        }
    }

    /// Whether replacing `self` with `next` keeps the state moving forward.
    ///
    /// Within `Uploading` the cursor may not go back and a known
    /// `last_index` may not change. `Uploaded` is only reachable from a
    /// fully sent state; callers reach it by saving the fully sent
    /// `Uploading` state and letting it settle.
    pub fn permits(&self, next: &PersistState) -> bool {
        match (self, next) {
            (current, PersistState::Uploaded) => {
                matches!(current, PersistState::Uploaded) || current.is_fully_sent()
            }
            (
                PersistState::Uploading {
                    cursor: current,
                    last_index: current_last,
                },
                PersistState::Uploading {
                    cursor: proposed,
                    last_index: proposed_last,
                },
            ) => {
                proposed.index >= current.index
                    && (current_last.is_none() || current_last == proposed_last)
            }
            _ => next.rank() >= self.rank(),
        }
    }
}

/// A recording as persisted in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecording {
    /// Immutable recording description.
    pub info: RecordingInfo,
    /// Current synchronization state.
    pub state: PersistState,
    /// Milliseconds since the Unix epoch of the last save.
    pub saved_at: i64,
}
