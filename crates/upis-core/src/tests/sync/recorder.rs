use crate::{
    JobPayload, Recorder, SyncError,
    tests::support::{Fixture, recording},
};

/// WHAT: Each chunk lands at the next index and queues one upload step; finish queues completion
/// WHY: Capture must hand the uploader contiguous blocks and a known last index
#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn given_three_chunks_when_finished_then_three_persist_jobs_and_completion() {
    // Given: A recorder for b1/t1
    let fx = Fixture::new();
    let info = recording("b1", "t1");
    let recorder = Recorder::spawn(info.clone(), fx.blocks.clone(), fx.queue.clone());

    // When: Three chunks then finish
    for chunk in [b"a".to_vec(), b"bb".to_vec(), b"ccc".to_vec()] {
        recorder.push_block(chunk).await.unwrap();
    }
    let summary = recorder.finish().await.unwrap();

    // Then: Blocks 0..3 stored in arrival order
    assert_eq!(summary.block_count, 3);
    assert_eq!(summary.failed_blocks, 0);
    assert_eq!(fx.blocks.block_count(&info.id).await.unwrap(), 3);
    assert_eq!(
        fx.blocks.read_block(&info.id, 2).await.unwrap(),
        Some(b"ccc".to_vec())
    );

    // Then: Three persist jobs and one completion with last index 2
    let jobs = fx.queue.pending_jobs().await.unwrap();
    let persists = jobs
        .iter()
        .filter(|j| matches!(j.payload, JobPayload::PersistRecording { .. }))
        .count();
    let completions: Vec<_> = jobs
        .iter()
        .filter_map(|j| match &j.payload {
            JobPayload::CompleteRecording { last_index, .. } => Some(*last_index),
            JobPayload::PersistRecording { .. } => None,
        })
        .collect();
    assert_eq!(persists, 3);
    assert_eq!(completions, vec![2]);
}

/// WHAT: Finishing without any chunk queues nothing
/// WHY: There is no last index to report
#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn given_no_chunks_when_finished_then_no_completion() {
    let fx = Fixture::new();
    let recorder = Recorder::spawn(recording("b1", "t1"), fx.blocks.clone(), fx.queue.clone());

    let summary = recorder.finish().await.unwrap();

    assert_eq!(summary.block_count, 0);
    assert!(fx.queue.pending_jobs().await.unwrap().is_empty());
}

/// WHAT: A chunk whose index cannot be written is counted and its index reused
/// WHY: Stored indices stay contiguous even when a write fails
#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn given_index_already_taken_when_pushing_then_chunk_counted_as_failed() {
    // Given: Block 0 of b1/t1 already exists
    let fx = Fixture::new();
    let info = recording("b1", "t1");
    fx.blocks.append_block(&info.id, 0, b"old".to_vec()).await.unwrap();
    let recorder = Recorder::spawn(info.clone(), fx.blocks.clone(), fx.queue.clone());

    // When: One chunk is pushed
    recorder.push_block(b"new".to_vec()).await.unwrap();
    let summary = recorder.finish().await.unwrap();

    // Then: Nothing overwritten, nothing queued
    assert_eq!(summary.failed_blocks, 1);
    assert_eq!(summary.block_count, 0);
    assert_eq!(
        fx.blocks.read_block(&info.id, 0).await.unwrap(),
        Some(b"old".to_vec())
    );
    assert!(fx.queue.pending_jobs().await.unwrap().is_empty());
}

/// WHAT: Finish fails when upload steps or the completion cannot be queued
/// WHY: Without those jobs the recording never finishes uploading, so the caller must know
#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn given_job_table_unavailable_when_finishing_then_error_reported() {
    // Given: The job table is gone
    let fx = Fixture::new();
    fx.db
        .call(|conn| {
            conn.execute_batch("DROP TABLE jobs")?;
            Ok(())
        })
        .await
        .unwrap();
    let info = recording("b1", "t1");
    let recorder = Recorder::spawn(info.clone(), fx.blocks.clone(), fx.queue.clone());

    // When: One chunk is captured and capture stops
    recorder.push_block(b"a".to_vec()).await.unwrap();
    let result = recorder.finish().await;

    // Then: The block is stored but finish reports the lost jobs
    assert!(matches!(result, Err(SyncError::Storage { .. })));
    assert_eq!(fx.blocks.block_count(&info.id).await.unwrap(), 1);
}
