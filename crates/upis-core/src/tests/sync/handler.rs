use crate::{
    JobHandler, JobPayload, PersistState, RETRY_DELAY, RecordingId, RecordingInfo,
    RecordingLocks, RemoteError, RemoteSync, SyncHandler, Uploader,
    remote::{BlockProposal, UploadTarget},
    tests::support::{Fixture, recording},
};

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;

/// Remote whose registration takes a while and records how many overlap.
#[derive(Default)]
struct SlowRemote {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    registrations: AtomicUsize,
}

#[async_trait]
impl RemoteSync for SlowRemote {
    async fn register_recording(&self, _info: &RecordingInfo) -> Result<(), RemoteError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn propose_block(
        &self,
        recording: &RecordingId,
        proposal: &BlockProposal,
    ) -> Result<UploadTarget, RemoteError> {
        Ok(UploadTarget {
            upload_url: format!("mem://{}/{}", recording, proposal.index),
        })
    }

    async fn upload_block(
        &self,
        _target: &UploadTarget,
        _digest: &str,
        _bytes: Vec<u8>,
    ) -> Result<(), RemoteError> {
        Ok(())
    }
}

fn slow_handler(fx: &Fixture, remote: &Arc<SlowRemote>) -> Arc<dyn JobHandler> {
    let uploader = Arc::new(Uploader::new(
        fx.ledger.clone(),
        fx.blocks.clone(),
        Arc::clone(remote) as Arc<dyn RemoteSync>,
        fx.queue.clone(),
        RETRY_DELAY,
    ));
    Arc::new(SyncHandler::new(uploader, RecordingLocks::new()))
}

/// WHAT: Two jobs for one recording in the same tick never overlap
/// WHY: The second must observe the first's write, so registration happens once
#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn given_two_jobs_for_same_recording_when_ticking_then_registered_once() {
    // Given: One Local recording with two queued persist jobs
    let fx = Fixture::new();
    let remote = Arc::new(SlowRemote::default());
    let handler = slow_handler(&fx, &remote);
    let info = recording("b1", "t1");
    fx.ledger.save_recording(&info, &PersistState::Local).await.unwrap();
    for _ in 0..2 {
        fx.queue
            .add_job(JobPayload::PersistRecording { recording: info.id.clone() }, None)
            .await
            .unwrap();
    }

    // When: One tick runs both
    let ran = fx.queue.run_once(&handler).await.unwrap();

    // Then: Serialized, registered once, now uploading
    assert_eq!(ran, 2);
    assert_eq!(remote.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(remote.registrations.load(Ordering::SeqCst), 1);
    let stored = fx.ledger.load_recording(&info.id).await.unwrap().unwrap();
    assert_eq!(stored.state, PersistState::uploading_from_start(&info.id));
}

/// WHAT: Jobs for different recordings in the same tick run concurrently
/// WHY: Per-recording locking must not serialize the whole batch
#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn given_jobs_for_different_recordings_when_ticking_then_overlap() {
    let fx = Fixture::new();
    let remote = Arc::new(SlowRemote::default());
    let handler = slow_handler(&fx, &remote);
    for track in ["t1", "t2"] {
        let info = recording("b1", track);
        fx.ledger.save_recording(&info, &PersistState::Local).await.unwrap();
        fx.queue
            .add_job(JobPayload::PersistRecording { recording: info.id.clone() }, None)
            .await
            .unwrap();
    }

    fx.queue.run_once(&handler).await.unwrap();

    assert_eq!(remote.max_in_flight.load(Ordering::SeqCst), 2);
    assert_eq!(remote.registrations.load(Ordering::SeqCst), 2);
}

/// WHAT: The handler routes completion jobs to the state machine
/// WHY: Both payload kinds share one queue
#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn given_completion_job_when_ticking_then_last_index_recorded() {
    let fx = Fixture::new();
    let remote = Arc::new(SlowRemote::default());
    let handler = slow_handler(&fx, &remote);
    let info = recording("b1", "t1");
    fx.ledger
        .save_recording(&info, &PersistState::uploading_from_start(&info.id))
        .await
        .unwrap();
    fx.queue
        .add_job(
            JobPayload::CompleteRecording {
                recording: info.id.clone(),
                last_index: 4,
            },
            None,
        )
        .await
        .unwrap();

    fx.queue.run_once(&handler).await.unwrap();

    let stored = fx.ledger.load_recording(&info.id).await.unwrap().unwrap();
    match stored.state {
        PersistState::Uploading { last_index, .. } => assert_eq!(last_index, Some(4)),
        other => unreachable!("unexpected state {:?}", other),
    }
    assert!(fx.queue.pending_jobs().await.unwrap().is_empty());
}
