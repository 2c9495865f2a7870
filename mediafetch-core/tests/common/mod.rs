#![allow(dead_code)]

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mediafetch_core::{
    AdmissionController, FetchRequest, FetchService, FetchedMedia, Fetcher, Pipeline,
    PipelineError, PipelineResult, ProgressSink, SqliteTaskStore, Transcoder,
};

pub fn temp_store(dir: &Path) -> SqliteTaskStore {
    let store = SqliteTaskStore::builder()
        .path(dir.join("tasks.sqlite"))
        .create_if_missing(true)
        .build()
        .expect("create store");
    store.initialize().expect("initialize store");
    store
}

/// Makes every insert into `file_records` abort, as a failing disk would.
pub fn reject_file_records(dir: &Path) {
    let conn = rusqlite::Connection::open(dir.join("tasks.sqlite")).expect("open database");
    conn.execute_batch(
        "CREATE TRIGGER reject_file_records BEFORE INSERT ON file_records
         BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
    )
    .expect("create trigger");
}

/// Writes real files under the request's stem and records every call.
#[derive(Default)]
pub struct FakeFetcher {
    pub video_has_audio: AtomicBool,
    pub fail_video: AtomicBool,
    pub fail_audio: AtomicBool,
    pub delay: Mutex<Option<Duration>>,
    pub calls: Mutex<Vec<FetchRequest>>,
    pub in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

impl FakeFetcher {
    pub fn with_audio() -> Self {
        let fetcher = Self::default();
        fetcher.video_has_audio.store(true, Ordering::SeqCst);
        fetcher
    }

    pub fn silent_video() -> Self {
        Self::default()
    }

    pub fn slow(delay: Duration) -> Self {
        let fetcher = Self::with_audio();
        *fetcher.delay.lock().unwrap() = Some(delay);
        fetcher
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn video_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| !call.audio_only)
            .count()
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(
        &self,
        request: &FetchRequest,
        progress: &ProgressSink,
    ) -> PipelineResult<FetchedMedia> {
        self.calls.lock().unwrap().push(request.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        progress.emit("50");

        let result = if request.audio_only {
            if self.fail_audio.load(Ordering::SeqCst) {
                Err(PipelineError::Fetch("audio unavailable".into()))
            } else {
                let path = request.stem_with_extension("mp3");
                write_file(&path).await.map(|_| FetchedMedia::new(path, true))
            }
        } else if self.fail_video.load(Ordering::SeqCst) {
            Err(PipelineError::Fetch("source unavailable".into()))
        } else {
            let path = request.stem_with_extension("webm");
            let has_audio = self.video_has_audio.load(Ordering::SeqCst);
            write_file(&path)
                .await
                .map(|_| FetchedMedia::new(path, has_audio))
        };

        progress.emit("100");
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// `.mp4` inputs pass through; anything else becomes `<stem>_converted.mp4`.
#[derive(Default)]
pub struct FakeTranscoder {
    pub fail_transcode: AtomicBool,
    pub fail_merge: AtomicBool,
    pub merges: AtomicUsize,
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(&self, input: &Path) -> PipelineResult<PathBuf> {
        if self.fail_transcode.load(Ordering::SeqCst) {
            return Err(PipelineError::Transcode("encoder crashed".into()));
        }
        if input.extension().and_then(|ext| ext.to_str()) == Some("mp4") {
            return Ok(input.to_path_buf());
        }
        let output = sibling(input, "_converted.mp4");
        write_file(&output).await?;
        Ok(output)
    }

    async fn merge(&self, video: &Path, _audio: &Path) -> PipelineResult<PathBuf> {
        self.merges.fetch_add(1, Ordering::SeqCst);
        if self.fail_merge.load(Ordering::SeqCst) {
            return Err(PipelineError::Merge("mux failed".into()));
        }
        let output = sibling(video, "_merged.mp4");
        write_file(&output).await?;
        Ok(output)
    }
}

pub fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.file_stem().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

async fn write_file(path: &Path) -> PipelineResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| PipelineError::io(parent, err))?;
    }
    tokio::fs::write(path, b"media")
        .await
        .map_err(|err| PipelineError::io(path, err))
}

pub struct Harness {
    pub store: SqliteTaskStore,
    pub fetcher: Arc<FakeFetcher>,
    pub transcoder: Arc<FakeTranscoder>,
    pub controller: AdmissionController,
    pub service: FetchService,
    pub downloads: PathBuf,
}

pub fn harness(dir: &Path, fetcher: FakeFetcher, capacity: usize) -> Harness {
    let store = temp_store(dir);
    let fetcher = Arc::new(fetcher);
    let transcoder = Arc::new(FakeTranscoder::default());
    let pipeline = Pipeline::new(fetcher.clone(), transcoder.clone());
    let downloads = dir.join("downloads");
    let controller = AdmissionController::new(store.clone(), pipeline, &downloads, capacity);
    let service = FetchService::new(controller.clone());
    Harness {
        store,
        fetcher,
        transcoder,
        controller,
        service,
        downloads,
    }
}

pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .collect(),
        Err(_) => Vec::new(),
    };
    files.sort();
    files
}
