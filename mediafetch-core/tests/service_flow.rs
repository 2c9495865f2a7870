mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{files_in, harness, FakeFetcher};
use mediafetch_core::{
    deliver_download, recover_pending, Degradation, DeliveryKind, MediaRequest, MessageRef,
    Notifier, NotifyResult, ServiceError, StatusChange, Sweeper, TaskStatus,
};
use tempfile::TempDir;

#[tokio::test]
async fn silent_video_is_merged_then_served_from_cache() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), FakeFetcher::silent_video(), 5);
    let request = MediaRequest::new("https://youtu.be/a", "hd720");

    let first = h
        .service
        .fetch(request.clone(), Default::default())
        .await
        .unwrap();
    assert!(!first.cached);
    assert_eq!(first.degradation, Some(Degradation::AudioMerged));
    assert!(first.path.to_string_lossy().ends_with("_merged.mp4"));
    assert_eq!(files_in(&h.downloads), vec![first.path.clone()]);

    let calls = h.fetcher.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 2);
    assert!(!calls[0].audio_only);
    assert!(calls[1].audio_only);
    assert!(calls[1]
        .output_stem
        .to_string_lossy()
        .ends_with("_audio"));

    let second = h.service.fetch(request, Default::default()).await.unwrap();
    assert!(second.cached);
    assert_eq!(second.path, first.path);
    assert_eq!(h.fetcher.call_count(), 2);
    assert_eq!(h.store.summary().unwrap().count(TaskStatus::Completed), 1);
}

#[tokio::test]
async fn failed_attempt_is_not_cached() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), FakeFetcher::with_audio(), 5);
    let request = MediaRequest::new("https://youtu.be/b", "hd720");

    h.fetcher.fail_video.store(true, Ordering::SeqCst);
    let err = h
        .service
        .fetch(request.clone(), Default::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Pipeline(_)));

    h.fetcher.fail_video.store(false, Ordering::SeqCst);
    let retry = h.service.fetch(request, Default::default()).await.unwrap();
    assert!(!retry.cached);

    let summary = h.store.summary().unwrap();
    assert_eq!(summary.count(TaskStatus::Failed), 1);
    assert_eq!(summary.count(TaskStatus::Completed), 1);
    assert_ne!(retry.task_id, None);
    assert_eq!(h.fetcher.video_calls(), 2);
}

#[tokio::test]
async fn swept_artifact_is_fetched_again() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), FakeFetcher::with_audio(), 5);
    let request = MediaRequest::new("https://youtu.be/c", "hd720");

    let first = h
        .service
        .fetch(request.clone(), Default::default())
        .await
        .unwrap();
    // age the record past the retention window
    h.store
        .register_file_at(&first.path, Utc::now() - chrono::Duration::hours(24))
        .unwrap();

    let sweeper = Sweeper::with_defaults(h.store.clone());
    let report = sweeper.run_once().await.unwrap();
    assert_eq!(report.evicted, vec![first.path.clone()]);
    assert_eq!(report.deleted_files, 1);
    assert!(!first.path.exists());
    assert_eq!(
        h.store
            .lookup_completed(&request.source, &request.quality)
            .unwrap(),
        None
    );

    let again = h.service.fetch(request, Default::default()).await.unwrap();
    assert!(!again.cached);
    assert_eq!(h.fetcher.video_calls(), 2);
}

#[tokio::test]
async fn sweeper_tolerates_files_already_gone() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), FakeFetcher::with_audio(), 5);
    let ghost = dir.path().join("ghost.mp4");
    h.store
        .register_file_at(&ghost, Utc::now() - chrono::Duration::hours(30))
        .unwrap();

    let report = Sweeper::with_defaults(h.store.clone()).run_once().await.unwrap();
    assert_eq!(report.already_missing, 1);
    assert_eq!(report.delete_errors, 0);
    assert!(h.store.list_file_records().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_for_one_key_fetch_once() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), FakeFetcher::slow(Duration::from_millis(50)), 5);
    let request = MediaRequest::new("https://youtu.be/d", "hd720");

    let mut handles = Vec::new();
    for _ in 0..6 {
        let service = h.service.clone();
        let request = request.clone();
        handles.push(tokio::spawn(async move {
            service.fetch(request, Default::default()).await
        }));
    }
    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(h.fetcher.call_count(), 1);
    assert_eq!(outcomes.iter().filter(|outcome| !outcome.cached).count(), 1);
    assert!(outcomes.iter().all(|outcome| outcome.path == outcomes[0].path));
    assert_eq!(h.store.summary().unwrap().count(TaskStatus::Completed), 1);
}

#[tokio::test]
async fn dropped_caller_does_not_cancel_the_task() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), FakeFetcher::slow(Duration::from_millis(100)), 5);
    let request = MediaRequest::new("https://youtu.be/e", "hd720");

    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        h.service.fetch(request.clone(), Default::default()),
    )
    .await;
    assert!(abandoned.is_err());

    let outcome = h.service.fetch(request, Default::default()).await.unwrap();
    assert!(outcome.cached);
    assert_eq!(h.fetcher.call_count(), 1);
}

#[tokio::test]
async fn pending_tasks_are_recovered_through_the_pool() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), FakeFetcher::with_audio(), 2);
    let ids: Vec<i64> = (0..3)
        .map(|index| {
            h.store
                .create_task(&MediaRequest::new(format!("https://youtu.be/r{index}"), "hd720"))
                .unwrap()
        })
        .collect();

    let report = recover_pending(&h.service).unwrap();
    assert_eq!(report.task_ids, ids);
    let results = report.join().await;
    assert!(results.iter().all(|result| result.is_ok()));

    assert!(h.store.list_pending().unwrap().is_empty());
    assert_eq!(h.store.summary().unwrap().count(TaskStatus::Completed), 3);
    assert!(h.controller.occupancy().peak <= 2);
    assert!(recover_pending(&h.service).unwrap().is_empty());
}

#[tokio::test]
async fn recovery_racing_a_finished_task_keeps_first_status() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), FakeFetcher::with_audio(), 2);
    let id = h
        .store
        .create_task(&MediaRequest::new("https://youtu.be/f", "hd720"))
        .unwrap();
    let stale = h.store.fetch_by_id(id).unwrap().unwrap();
    let finished = dir.path().join("finished.mp4");
    std::fs::write(&finished, b"media").unwrap();
    h.store.register_file(&finished).unwrap();
    assert_eq!(
        h.store
            .set_status(id, TaskStatus::Completed, Some(&finished))
            .unwrap(),
        StatusChange::Applied
    );

    let rerun = h.service.resume(stale).await.unwrap();

    let stored = h.store.fetch_by_id(id).unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
    assert_eq!(stored.artifact_path.as_deref(), Some(finished.as_path()));
    // the duplicate output is still tracked so the sweeper reclaims it
    let records: Vec<_> = h
        .store
        .list_file_records()
        .unwrap()
        .into_iter()
        .map(|record| record.path)
        .collect();
    assert!(records.contains(&rerun.path));
}

#[derive(Default)]
struct RecordingNotifier {
    texts: Mutex<Vec<String>>,
    edits: Mutex<Vec<String>>,
    files: Mutex<Vec<(i64, DeliveryKind)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, recipient: i64, text: &str) -> NotifyResult<MessageRef> {
        let mut texts = self.texts.lock().unwrap();
        texts.push(text.to_string());
        Ok(MessageRef {
            chat_id: recipient,
            message_id: texts.len() as i64,
        })
    }

    async fn notify_edit(&self, _message: MessageRef, text: &str) -> NotifyResult<()> {
        self.edits.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn deliver_file(
        &self,
        recipient: i64,
        path: &std::path::Path,
        kind: DeliveryKind,
    ) -> NotifyResult<()> {
        assert!(path.exists());
        self.files.lock().unwrap().push((recipient, kind));
        Ok(())
    }
}

#[tokio::test]
async fn chat_download_reports_progress_and_delivers() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), FakeFetcher::with_audio(), 2);
    let notifier = Arc::new(RecordingNotifier::default());

    let outcome = deliver_download(
        &h.service,
        notifier.clone(),
        42,
        MediaRequest::audio("https://youtu.be/g"),
        8,
    )
    .await
    .unwrap();

    assert!(outcome.path.exists());
    let texts = notifier.texts.lock().unwrap().clone();
    assert_eq!(texts.first().map(String::as_str), Some("Downloading 0%"));
    assert_eq!(texts.last().map(String::as_str), Some("File delivered."));
    assert_eq!(
        notifier.files.lock().unwrap().as_slice(),
        &[(42, DeliveryKind::Audio)]
    );
    let edits = notifier.edits.lock().unwrap().clone();
    assert_eq!(edits.first().map(String::as_str), Some("Downloading: 50%"));
    assert_eq!(edits.last().map(String::as_str), Some("Downloading: 100%"));
}

#[tokio::test]
async fn chat_download_reports_errors() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), FakeFetcher::with_audio(), 2);
    h.fetcher.fail_video.store(true, Ordering::SeqCst);
    let notifier = Arc::new(RecordingNotifier::default());

    let result = deliver_download(
        &h.service,
        notifier.clone(),
        7,
        MediaRequest::new("https://youtu.be/h", "hd1080"),
        8,
    )
    .await;

    assert!(result.is_err());
    let texts = notifier.texts.lock().unwrap().clone();
    assert!(texts.last().unwrap().starts_with("Error: "));
    assert!(notifier.files.lock().unwrap().is_empty());
    assert_eq!(
        h.store.summary().unwrap().count(TaskStatus::Failed),
        1
    );
}
