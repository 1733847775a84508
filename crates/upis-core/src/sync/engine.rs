use crate::{
    Clock, CoreResult, SyncError, SystemClock,
    model::{JobPayload, RecordingId, RecordingInfo, StoredRecording, time_ordered_id},
    queue::{JobHandler, JobQueue, QueueSettings},
    remote::{Directory, Identity, RemoteSync},
    store::{BlockStore, Database, Ledger},
    sync::{RETRY_DELAY, Recorder, RecordingLocks, SyncHandler, Uploader},
};

use std::{panic::Location, path::PathBuf, sync::Arc, time::Duration};

use error_location::ErrorLocation;
use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
};
use tracing::{info, instrument, warn};

/// Everything [`SyncEngine::open`] needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Directory holding one database file per user.
    pub data_dir: PathBuf,
    /// Runner tuning.
    pub queue: QueueSettings,
    /// Backoff after a failed remote call.
    pub retry_delay: Duration,
}

impl EngineSettings {
    /// Default tuning with state kept under `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            queue: QueueSettings::default(),
            retry_delay: RETRY_DELAY,
        }
    }
}

/// Background synchronization engine for one verified user.
///
/// Owns the stores, the job queue and its runner. Dropping the engine
/// without [`close`](Self::close) leaves in-flight jobs leased until their
/// lease expires on the next open.
pub struct SyncEngine {
    identity: Identity,
    directory: Arc<dyn Directory>,
    clock: Arc<dyn Clock>,
    database: Database,
    ledger: Ledger,
    blocks: BlockStore,
    queue: JobQueue,
    handler: Arc<dyn JobHandler>,
    shutdown_tx: watch::Sender<bool>,
    runner: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Verify the caller, open their database and wire the engine together.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::IdentityUnavailable`] if the directory cannot
    /// verify the caller, or a storage error if the database cannot be opened.
    pub async fn open(
        settings: EngineSettings,
        directory: Arc<dyn Directory>,
        remote: Arc<dyn RemoteSync>,
    ) -> CoreResult<Self> {
        Self::open_with_clock(settings, directory, remote, Arc::new(SystemClock)).await
    }

    /// [`open`](Self::open) with an explicit clock.
    #[instrument(skip(directory, remote, clock))]
    pub async fn open_with_clock(
        settings: EngineSettings,
        directory: Arc<dyn Directory>,
        remote: Arc<dyn RemoteSync>,
        clock: Arc<dyn Clock>,
    ) -> CoreResult<Self> {
        let identity = directory
            .verify_identity()
            .await
            .map_err(|source| SyncError::IdentityUnavailable {
                source,
                location: ErrorLocation::from(Location::caller()),
            })?;

        let data_dir = settings.data_dir.clone();
        let db_path = data_dir.join(format!("{}.sqlite3", file_stem(&identity.owner_id)));
        let database = tokio::task::spawn_blocking(move || -> CoreResult<Database> {
            std::fs::create_dir_all(&data_dir)?;
            Database::open(&db_path)
        })
        .await??;

        // Contexts first, then the handler that refers to them: the queue
        // handle never needs the handler to exist.
        let ledger = Ledger::new(database.clone(), Arc::clone(&clock));
        let blocks = BlockStore::new(database.clone());
        let queue = JobQueue::open(database.clone(), settings.queue, Arc::clone(&clock));
        let uploader = Arc::new(Uploader::new(
            ledger.clone(),
            blocks.clone(),
            remote,
            queue.clone(),
            settings.retry_delay,
        ));
        let handler: Arc<dyn JobHandler> =
            Arc::new(SyncHandler::new(uploader, RecordingLocks::new()));

        let (shutdown_tx, _) = watch::channel(false);

        info!(owner_id = %identity.owner_id, path = ?database.path(), "Sync engine opened");

        Ok(Self {
            identity,
            directory,
            clock,
            database,
            ledger,
            blocks,
            queue,
            handler,
            shutdown_tx,
            runner: Mutex::new(None),
        })
    }

    /// The verified caller.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The engine's job queue.
    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// The engine's block store.
    pub fn blocks(&self) -> &BlockStore {
        &self.blocks
    }

    /// Start the background runner. Does nothing if it is already running.
    pub async fn spawn_runner(&self) {
        let mut runner = self.runner.lock().await;
        if runner.is_some() {
            return;
        }

        let queue = self.queue.clone();
        let handler = Arc::clone(&self.handler);
        let shutdown_rx = self.shutdown_tx.subscribe();

        *runner = Some(tokio::spawn(async move {
            queue.run(handler, shutdown_rx).await;
        }));
    }

    /// Run a single runner tick in the caller's task.
    ///
    /// # Errors
    ///
    /// Returns error if due jobs cannot be selected or leased.
    pub async fn run_once(&self) -> CoreResult<usize> {
        self.queue.run_once(&self.handler).await
    }

    /// Begin capturing a new recording for `band_id`.
    ///
    /// Mints a time-ordered track id, saves the recording as `Local`, queues
    /// its registration and returns the writer for its blocks.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotBandMember`] if the caller may not record for
    /// the band, [`SyncError::IdentityUnavailable`] if membership cannot be
    /// checked, or a storage error.
    #[instrument(skip(self))]
    pub async fn start_recording(&self, band_id: &str, mime_type: &str) -> CoreResult<Recorder> {
        let member = self
            .directory
            .is_band_member(band_id)
            .await
            .map_err(|source| SyncError::IdentityUnavailable {
                source,
                location: ErrorLocation::from(Location::caller()),
            })?;

        if !member {
            return Err(SyncError::NotBandMember {
                band_id: band_id.to_string(),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        let info = self.create_recording(band_id, mime_type).await?;
        let id = info.id.clone();

        self.queue
            .add_job(JobPayload::PersistRecording { recording: id.clone() }, None)
            .await?;

        info!(recording = %id, mime_type, "Recording started");

        Ok(Recorder::spawn(info, self.blocks.clone(), self.queue.clone()))
    }

    /// Load one recording's persisted state.
    pub async fn load_recording(&self, id: &RecordingId) -> CoreResult<Option<StoredRecording>> {
        self.ledger.load_recording(id).await
    }

    /// All recordings of a band, newest first.
    pub async fn list_recordings(&self, band_id: &str) -> CoreResult<Vec<StoredRecording>> {
        self.ledger.list_recordings(band_id).await
    }

    /// Stop the runner after its in-flight batch has been settled.
    ///
    /// # Errors
    ///
    /// Returns error if the runner task panicked.
    #[instrument(skip(self))]
    pub async fn close(&self) -> CoreResult<()> {
        let _ = self.shutdown_tx.send(true);

        let handle = self.runner.lock().await.take();
        if let Some(handle) = handle {
            handle.await?;
        }

        info!(path = ?self.database.path(), "Sync engine closed");

        Ok(())
    }

    /// Mint a track id and claim it in the ledger, moving on to the next
    /// millisecond's id while the candidate is taken.
    async fn create_recording(&self, band_id: &str, mime_type: &str) -> CoreResult<RecordingInfo> {
        let mut now = self.clock.now_ms();

        loop {
            let info = RecordingInfo {
                id: RecordingId::new(band_id, time_ordered_id(now)),
                mime_type: mime_type.to_string(),
            };
            if self.ledger.create_recording(&info).await? {
                return Ok(info);
            }
            warn!(recording = %info.id, "Track id already taken, minting another");
            now += 1;
        }
    }
}

/// Owner ids become file names; keep them to a safe alphabet.
fn file_stem(owner_id: &str) -> String {
    owner_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
