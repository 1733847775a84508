//! Append-only storage for captured chunks.

use crate::{CoreResult, model::RecordingId, store::Database, store::sql_index};

use rusqlite::{OptionalExtension, params};
use tracing::{debug, instrument};

/// Raw block bytes keyed by `(stream, index)`.
///
/// Callers append contiguous indices starting at 0; this is not checked.
/// Appending an index twice fails instead of overwriting.
#[derive(Clone)]
pub struct BlockStore {
    db: Database,
}

impl BlockStore {
    /// Create a block store over `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Durably store one block.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails or the index already exists.
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn append_block(
        &self,
        stream: &RecordingId,
        index: u64,
        bytes: Vec<u8>,
    ) -> CoreResult<()> {
        let stream = stream.clone();

        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO blocks (band_id, track_id, idx, bytes) VALUES (?1, ?2, ?3, ?4)",
                    params![stream.band_id, stream.track_id, sql_index(index), bytes],
                )?;
                debug!(stream = %stream, index, "Block appended");
                Ok(())
            })
            .await
    }

    /// Read one block, `None` if it has not been captured (yet).
    pub async fn read_block(&self, stream: &RecordingId, index: u64) -> CoreResult<Option<Vec<u8>>> {
        let stream = stream.clone();

        self.db
            .call(move |conn| {
                let bytes = conn
                    .query_row(
                        "SELECT bytes FROM blocks WHERE band_id = ?1 AND track_id = ?2 AND idx = ?3",
                        params![stream.band_id, stream.track_id, sql_index(index)],
                        |row| row.get::<_, Vec<u8>>(0),
                    )
                    .optional()?;
                Ok(bytes)
            })
            .await
    }

    /// Number of blocks stored for `stream`.
    pub async fn block_count(&self, stream: &RecordingId) -> CoreResult<u64> {
        let stream = stream.clone();

        self.db
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM blocks WHERE band_id = ?1 AND track_id = ?2",
                    params![stream.band_id, stream.track_id],
                    |row| row.get(0),
                )?;
                Ok(u64::try_from(count).unwrap_or(0))
            })
            .await
    }
}
