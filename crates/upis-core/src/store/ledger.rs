//! Persisted identity and synchronization state of each recording.

use crate::{
    Clock, CoreResult, SyncError,
    model::{PersistState, RecordingId, RecordingInfo, StoredRecording},
    store::Database,
};

use std::{panic::Location, sync::Arc};

use error_location::ErrorLocation;
use rusqlite::{OptionalExtension, Row, TransactionBehavior, params};
use tracing::{debug, instrument};

/// Owner of every recording's [`PersistState`].
#[derive(Clone)]
pub struct Ledger {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl Ledger {
    /// Create a ledger over `db`, stamping saves with `clock`.
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Claim `info.id` for a new `Local` recording.
    ///
    /// Returns `false`, writing nothing, if the id is already taken.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    #[instrument(skip(self, info), fields(recording = %info.id))]
    pub async fn create_recording(&self, info: &RecordingInfo) -> CoreResult<bool> {
        let info = info.clone();
        let saved_at = self.clock.now_ms();
        let encoded = serde_json::to_string(&PersistState::Local)?;

        self.db
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let inserted = tx.execute(
                    "INSERT INTO recordings (band_id, track_id, mime_type, state, saved_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(band_id, track_id) DO NOTHING",
                    params![
                        info.id.band_id,
                        info.id.track_id,
                        info.mime_type,
                        encoded,
                        saved_at
                    ],
                )?;
                tx.commit()?;

                if inserted == 1 {
                    debug!(recording = %info.id, "Recording created");
                }
                Ok(inserted == 1)
            })
            .await
    }

    /// Insert or update a recording's state, returning the state stored.
    ///
    /// A fully sent `Uploading` state is stored as `Uploaded`. The stored
    /// `info` is never changed once the recording exists.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidTransition`] if `state` would move the
    /// recording backwards, or a storage error if the write fails.
    #[instrument(skip(self, info, state), fields(recording = %info.id, state = state.name()))]
    pub async fn save_recording(
        &self,
        info: &RecordingInfo,
        state: &PersistState,
    ) -> CoreResult<PersistState> {
        let info = info.clone();
        let state = state.clone();
        let saved_at = self.clock.now_ms();

        self.db
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

                let existing = tx
                    .query_row(
                        "SELECT state FROM recordings WHERE band_id = ?1 AND track_id = ?2",
                        params![info.id.band_id, info.id.track_id],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;

                if let Some(raw) = existing {
                    let current: PersistState = serde_json::from_str(&raw)?;
                    if !current.permits(&state) {
                        return Err(SyncError::InvalidTransition {
                            recording: info.id.to_string(),
                            from: format!("{:?}", current),
                            to: format!("{:?}", state),
                            location: ErrorLocation::from(Location::caller()),
                        });
                    }
                }

                let state = state.settled();
                let encoded = serde_json::to_string(&state)?;
                tx.execute(
                    "INSERT INTO recordings (band_id, track_id, mime_type, state, saved_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(band_id, track_id) DO UPDATE SET
                        state = excluded.state,
                        saved_at = excluded.saved_at",
                    params![
                        info.id.band_id,
                        info.id.track_id,
                        info.mime_type,
                        encoded,
                        saved_at
                    ],
                )?;
                tx.commit()?;

                debug!(recording = %info.id, state = state.name(), "Recording saved");
                Ok(state)
            })
            .await
    }

    /// Load one recording, `None` if it is not in the ledger.
    pub async fn load_recording(&self, id: &RecordingId) -> CoreResult<Option<StoredRecording>> {
        let id = id.clone();

        self.db
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT band_id, track_id, mime_type, state, saved_at
                         FROM recordings WHERE band_id = ?1 AND track_id = ?2",
                        params![id.band_id, id.track_id],
                        read_row,
                    )
                    .optional()?;

                row.map(decode).transpose()
            })
            .await
    }

    /// All recordings of a band, newest first.
    pub async fn list_recordings(&self, band_id: &str) -> CoreResult<Vec<StoredRecording>> {
        let band_id = band_id.to_string();

        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT band_id, track_id, mime_type, state, saved_at
                     FROM recordings WHERE band_id = ?1 ORDER BY track_id DESC",
                )?;
                let rows = stmt
                    .query_map(params![band_id], read_row)?
                    .collect::<Result<Vec<_>, _>>()?;

                rows.into_iter().map(decode).collect()
            })
            .await
    }
}

struct RawRecording {
    band_id: String,
    track_id: String,
    mime_type: String,
    state: String,
    saved_at: i64,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRecording> {
    Ok(RawRecording {
        band_id: row.get(0)?,
        track_id: row.get(1)?,
        mime_type: row.get(2)?,
        state: row.get(3)?,
        saved_at: row.get(4)?,
    })
}

fn decode(raw: RawRecording) -> CoreResult<StoredRecording> {
    Ok(StoredRecording {
        info: RecordingInfo {
            id: RecordingId::new(raw.band_id, raw.track_id),
            mime_type: raw.mime_type,
        },
        state: serde_json::from_str(&raw.state)?,
        saved_at: raw.saved_at,
    })
}
