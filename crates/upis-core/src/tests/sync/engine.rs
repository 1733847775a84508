use crate::{
    Clock, EngineSettings, PersistState, RemoteSync, SyncEngine, SyncError, time_ordered_id,
    tests::support::{FakeDirectory, FakeRemote, ManualClock, T0},
};

use std::{sync::Arc, time::Duration};

use tempfile::TempDir;

const MIME: &str = "audio/ogg;codecs=opus";

struct Harness {
    dir: TempDir,
    clock: ManualClock,
    remote: Arc<FakeRemote>,
}

impl Harness {
    #[allow(clippy::unwrap_used)]
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            clock: ManualClock::new(T0),
            remote: Arc::new(FakeRemote::default()),
        }
    }

    fn settings(&self) -> EngineSettings {
        let mut settings = EngineSettings::new(self.dir.path().join("data"));
        settings.queue.poll_interval = Duration::from_millis(10);
        settings
    }

    async fn open(&self, directory: FakeDirectory) -> crate::CoreResult<SyncEngine> {
        SyncEngine::open_with_clock(
            self.settings(),
            Arc::new(directory),
            Arc::clone(&self.remote) as Arc<dyn RemoteSync>,
            Arc::new(self.clock.clone()) as Arc<dyn Clock>,
        )
        .await
    }
}

/// WHAT: A captured recording is registered, sent block by block and ends Uploaded
/// WHY: The whole pipeline from capture to remote through the queue
#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn given_captured_recording_when_queue_drained_then_uploaded() {
    // Given: An engine for a member of b1
    let harness = Harness::new();
    let engine = harness
        .open(FakeDirectory::member_of("user-1", &["b1"]))
        .await
        .unwrap();

    // When: Recording starts and the registration tick runs
    let recorder = engine.start_recording("b1", MIME).await.unwrap();
    let id = recorder.info().id.clone();
    engine.run_once().await.unwrap();

    // When: Three chunks are captured and the queue is drained
    for chunk in [vec![0u8; 8], vec![1u8; 8], vec![2u8; 8]] {
        recorder.push_block(chunk).await.unwrap();
    }
    recorder.finish().await.unwrap();
    for _ in 0..20 {
        if engine.queue().pending_jobs().await.unwrap().is_empty() {
            break;
        }
        engine.run_once().await.unwrap();
    }

    // Then: Uploaded, with every block sent once and in order
    let stored = engine.load_recording(&id).await.unwrap().unwrap();
    assert_eq!(stored.state, PersistState::Uploaded);
    assert_eq!(stored.info.mime_type, MIME);
    assert_eq!(
        harness.remote.uploaded_urls(),
        vec![
            format!("mem://{}/0", id),
            format!("mem://{}/1", id),
            format!("mem://{}/2", id),
        ]
    );
    assert_eq!(harness.remote.registrations.lock().unwrap().len(), 1);
}

/// WHAT: Opening fails when the caller cannot be verified
/// WHY: No database is opened for an unknown user
#[tokio::test]
async fn given_unreachable_directory_when_opening_then_identity_unavailable() {
    let harness = Harness::new();

    let result = harness.open(FakeDirectory::unreachable()).await;

    assert!(matches!(result, Err(SyncError::IdentityUnavailable { .. })));
    assert!(!harness.dir.path().join("data").exists());
}

/// WHAT: Recording for a band the caller does not belong to is refused
/// WHY: Track ids are only minted for the caller's own bands
#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn given_foreign_band_when_starting_recording_then_not_band_member() {
    let harness = Harness::new();
    let engine = harness
        .open(FakeDirectory::member_of("user-1", &["b1"]))
        .await
        .unwrap();

    let result = engine.start_recording("b2", MIME).await;

    assert!(matches!(result, Err(SyncError::NotBandMember { .. })));
    assert!(engine.list_recordings("b2").await.unwrap().is_empty());
}

/// WHAT: Recordings started in the same millisecond get distinct ids, listed newest first
/// WHY: Track ids are unique within a band and sort by time
#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn given_two_recordings_same_instant_when_listing_then_distinct_and_newest_first() {
    let harness = Harness::new();
    let engine = harness
        .open(FakeDirectory::member_of("user-1", &["b1"]))
        .await
        .unwrap();

    let first = engine.start_recording("b1", MIME).await.unwrap();
    let second = engine.start_recording("b1", MIME).await.unwrap();
    harness.clock.advance(Duration::from_secs(1));
    let third = engine.start_recording("b1", MIME).await.unwrap();

    assert_eq!(first.info().id.track_id, time_ordered_id(T0));
    assert_eq!(second.info().id.track_id, time_ordered_id(T0 + 1));
    let listed: Vec<_> = engine
        .list_recordings("b1")
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.info.id)
        .collect();
    assert_eq!(
        listed,
        vec![
            third.info().id.clone(),
            second.info().id.clone(),
            first.info().id.clone(),
        ]
    );
}

/// WHAT: The database file is named after the owner with unsafe characters replaced
/// WHY: Each user gets an isolated store
#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn given_owner_with_slash_when_opening_then_sanitized_database_file() {
    let harness = Harness::new();

    let engine = harness
        .open(FakeDirectory::member_of("team/user 1", &[]))
        .await
        .unwrap();

    assert_eq!(engine.identity().owner_id, "team/user 1");
    assert!(harness.dir.path().join("data").join("team_user_1.sqlite3").exists());
}

/// WHAT: The background runner registers new recordings and stops on close
/// WHY: The daemon relies on the runner, and close must not hang
#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn given_running_engine_when_recording_started_then_runner_registers_and_close_returns() {
    // Given: A running engine
    let harness = Harness::new();
    let engine = harness
        .open(FakeDirectory::member_of("user-1", &["b1"]))
        .await
        .unwrap();
    engine.spawn_runner().await;
    engine.spawn_runner().await;

    // When: A recording is started
    let recorder = engine.start_recording("b1", MIME).await.unwrap();
    let id = recorder.info().id.clone();

    // Then: The runner registers it without any manual tick
    let mut state = PersistState::Local;
    for _ in 0..200 {
        state = engine.load_recording(&id).await.unwrap().unwrap().state;
        if state != PersistState::Local {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(state, PersistState::uploading_from_start(&id));

    // Then: Close stops the runner
    drop(recorder);
    tokio::time::timeout(Duration::from_secs(5), engine.close())
        .await
        .unwrap()
        .unwrap();
}

/// WHAT: Concurrent starts in the same millisecond each claim their own track id
/// WHY: Two recorders on one stream would overwrite each other's block indices
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[allow(clippy::unwrap_used)]
async fn given_concurrent_starts_same_instant_when_recording_then_ids_distinct_and_blocks_kept() {
    // Given: An engine whose clock never moves
    let harness = Harness::new();
    let engine = Arc::new(
        harness
            .open(FakeDirectory::member_of("user-1", &["b1"]))
            .await
            .unwrap(),
    );

    // When: Eight recordings start at once, each capturing one chunk
    let mut tasks = Vec::new();
    for n in 0..8u8 {
        let engine = Arc::clone(&engine);
        tasks.push(tokio::spawn(async move {
            let recorder = engine.start_recording("b1", MIME).await.unwrap();
            let id = recorder.info().id.clone();
            recorder.push_block(vec![n; 4]).await.unwrap();
            (id, recorder.finish().await.unwrap())
        }));
    }
    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.unwrap());
    }

    // Then: Eight distinct ids, every chunk stored under its own recording
    let mut ids: Vec<_> = results.iter().map(|(id, _)| id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);
    for (id, summary) in &results {
        assert_eq!(summary.block_count, 1, "recording {}", id);
        assert_eq!(summary.failed_blocks, 0, "recording {}", id);
    }
    assert_eq!(engine.list_recordings("b1").await.unwrap().len(), 8);
}
