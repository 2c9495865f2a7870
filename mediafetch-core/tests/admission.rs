mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{files_in, harness, reject_file_records, FakeFetcher};
use mediafetch_core::{Degradation, MediaRequest, PipelineError, ProgressSink, TaskStatus};
use tempfile::TempDir;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pool_never_exceeds_capacity() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), FakeFetcher::slow(Duration::from_millis(50)), 3);

    let mut handles = Vec::new();
    for index in 0..12 {
        let request = MediaRequest::new(format!("https://youtu.be/{index}"), "hd720");
        let id = h.store.create_task(&request).unwrap();
        let task = h.store.fetch_by_id(id).unwrap().unwrap();
        let controller = h.controller.clone();
        handles.push(tokio::spawn(async move {
            controller.submit(&task, ProgressSink::none()).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(h.fetcher.call_count(), 12);
    assert!(h.fetcher.peak_in_flight.load(Ordering::SeqCst) <= 3);
    let occupancy = h.controller.occupancy();
    assert_eq!(occupancy.capacity, 3);
    assert_eq!(occupancy.active, 0);
    assert!(occupancy.peak >= 1 && occupancy.peak <= 3);
    assert_eq!(h.controller.peak_occupancy(), occupancy.peak);
    assert_eq!(h.store.summary().unwrap().count(TaskStatus::Completed), 12);
}

#[tokio::test]
async fn success_registers_artifact_then_completes() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), FakeFetcher::with_audio(), 2);
    let id = h
        .store
        .create_task(&MediaRequest::new("https://youtu.be/a", "hd720"))
        .unwrap();
    let task = h.store.fetch_by_id(id).unwrap().unwrap();

    let artifact = h
        .controller
        .submit(&task, ProgressSink::none())
        .await
        .unwrap();

    assert!(artifact.degradation.is_none());
    assert!(artifact.path.to_string_lossy().ends_with("_converted.mp4"));
    assert!(artifact.path.exists());
    let stored = h.store.fetch_by_id(id).unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
    assert_eq!(stored.artifact_path.as_deref(), Some(artifact.path.as_path()));
    let records = h.store.list_file_records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].path, artifact.path);
    // the fetched .webm was replaced by the transcoded output
    assert_eq!(files_in(&h.downloads), vec![artifact.path]);
}

#[tokio::test]
async fn audio_only_task_skips_transcode() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), FakeFetcher::with_audio(), 2);
    let id = h
        .store
        .create_task(&MediaRequest::audio("https://youtu.be/a"))
        .unwrap();
    let task = h.store.fetch_by_id(id).unwrap().unwrap();

    let artifact = h
        .controller
        .submit(&task, ProgressSink::none())
        .await
        .unwrap();

    assert_eq!(
        artifact.path.extension().and_then(|ext| ext.to_str()),
        Some("mp3")
    );
    assert_eq!(h.fetcher.call_count(), 1);
    assert_eq!(h.transcoder.merges.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn pipeline_failure_marks_task_failed() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), FakeFetcher::with_audio(), 2);
    h.fetcher.fail_video.store(true, Ordering::SeqCst);
    let id = h
        .store
        .create_task(&MediaRequest::new("https://youtu.be/a", "hd720"))
        .unwrap();
    let task = h.store.fetch_by_id(id).unwrap().unwrap();

    let err = h
        .controller
        .submit(&task, ProgressSink::none())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Fetch(_)));
    let stored = h.store.fetch_by_id(id).unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert!(stored.artifact_path.is_none());
    assert!(h.store.list_file_records().unwrap().is_empty());
}

#[tokio::test]
async fn transcode_failure_leaves_no_files() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), FakeFetcher::with_audio(), 2);
    h.transcoder.fail_transcode.store(true, Ordering::SeqCst);
    let id = h
        .store
        .create_task(&MediaRequest::new("https://youtu.be/a", "hd720"))
        .unwrap();
    let task = h.store.fetch_by_id(id).unwrap().unwrap();

    let err = h
        .controller
        .submit(&task, ProgressSink::none())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Transcode(_)));
    assert!(files_in(&h.downloads).is_empty());
    assert_eq!(
        h.store.fetch_by_id(id).unwrap().unwrap().status,
        TaskStatus::Failed
    );
}

#[tokio::test]
async fn failed_audio_fetch_keeps_video_only_artifact() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), FakeFetcher::silent_video(), 2);
    h.fetcher.fail_audio.store(true, Ordering::SeqCst);
    let id = h
        .store
        .create_task(&MediaRequest::new("https://youtu.be/a", "hd720"))
        .unwrap();
    let task = h.store.fetch_by_id(id).unwrap().unwrap();

    let artifact = h
        .controller
        .submit(&task, ProgressSink::none())
        .await
        .unwrap();

    assert!(matches!(
        artifact.degradation,
        Some(Degradation::AudioFetchFailed { .. })
    ));
    assert_eq!(h.transcoder.merges.load(Ordering::SeqCst), 0);
    assert_eq!(files_in(&h.downloads), vec![artifact.path.clone()]);
    assert_eq!(
        h.store.fetch_by_id(id).unwrap().unwrap().status,
        TaskStatus::Completed
    );
}

#[tokio::test]
async fn failed_merge_removes_audio_and_keeps_video() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), FakeFetcher::silent_video(), 2);
    h.transcoder.fail_merge.store(true, Ordering::SeqCst);
    let id = h
        .store
        .create_task(&MediaRequest::new("https://youtu.be/a", "hd720"))
        .unwrap();
    let task = h.store.fetch_by_id(id).unwrap().unwrap();

    let artifact = h
        .controller
        .submit(&task, ProgressSink::none())
        .await
        .unwrap();

    assert!(matches!(
        artifact.degradation,
        Some(Degradation::MergeFailed { .. })
    ));
    assert!(artifact.path.to_string_lossy().ends_with("_converted.mp4"));
    // neither the companion .mp3 nor the fetched .webm survive
    assert_eq!(files_in(&h.downloads), vec![artifact.path]);
}

#[tokio::test]
async fn unrecorded_artifact_never_counts_as_completed() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), FakeFetcher::with_audio(), 1);
    let id = h
        .store
        .create_task(&MediaRequest::new("https://youtu.be/a", "hd720"))
        .unwrap();
    let task = h.store.fetch_by_id(id).unwrap().unwrap();
    reject_file_records(dir.path());

    let artifact = h
        .controller
        .submit(&task, ProgressSink::none())
        .await
        .unwrap();

    assert!(artifact.path.exists());
    let stored = h.store.fetch_by_id(id).unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert!(stored.artifact_path.is_none());
    assert!(h.store.list_file_records().unwrap().is_empty());
    assert!(h
        .store
        .lookup_completed("https://youtu.be/a", "hd720")
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn closed_pool_rejects_submissions() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), FakeFetcher::with_audio(), 1);
    let id = h
        .store
        .create_task(&MediaRequest::new("https://youtu.be/a", "hd720"))
        .unwrap();
    let task = h.store.fetch_by_id(id).unwrap().unwrap();

    h.controller.close();
    let err = h
        .controller
        .submit(&task, ProgressSink::none())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::PoolClosed));
    assert_eq!(h.fetcher.call_count(), 0);
    assert_eq!(
        h.store.fetch_by_id(id).unwrap().unwrap().status,
        TaskStatus::Pending
    );
}

#[tokio::test]
async fn progress_reaches_observer() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), FakeFetcher::with_audio(), 1);
    let id = h
        .store
        .create_task(&MediaRequest::new("https://youtu.be/a", "hd720"))
        .unwrap();
    let task = h.store.fetch_by_id(id).unwrap().unwrap();
    let (sink, mut receiver) = ProgressSink::channel(8);

    h.controller.submit(&task, sink).await.unwrap();

    let mut seen = Vec::new();
    while let Some(progress) = receiver.recv().await {
        seen.push(progress);
    }
    assert_eq!(seen, vec!["50".to_string(), "100".to_string()]);
}
