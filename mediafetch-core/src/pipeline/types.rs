use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::AUDIO_QUALITY;
use crate::store::Task;

/// Parameters handed to a [`Fetcher`](super::Fetcher) for one fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub task_id: i64,
    pub source: String,
    pub quality: String,
    pub audio_only: bool,
    /// Output path without extension; the fetcher picks the extension.
    pub output_stem: PathBuf,
}

impl FetchRequest {
    pub fn for_task(task: &Task, output_stem: PathBuf) -> Self {
        Self {
            task_id: task.id,
            source: task.source.clone(),
            quality: task.quality.clone(),
            audio_only: task.audio_only,
            output_stem,
        }
    }

    /// The audio-only fetch used to patch a video that arrived without sound.
    pub fn audio_companion(&self) -> Self {
        let mut stem = self.output_stem.clone().into_os_string();
        stem.push("_audio");
        Self {
            task_id: self.task_id,
            source: self.source.clone(),
            quality: AUDIO_QUALITY.to_string(),
            audio_only: true,
            output_stem: PathBuf::from(stem),
        }
    }

    pub fn stem_with_extension(&self, extension: &str) -> PathBuf {
        let mut path = self.output_stem.clone().into_os_string();
        path.push(".");
        path.push(extension);
        PathBuf::from(path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMedia {
    pub path: PathBuf,
    pub has_audio: bool,
}

impl FetchedMedia {
    pub fn new(path: impl AsRef<Path>, has_audio: bool) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            has_audio,
        }
    }
}

/// A pipeline that succeeded through a known fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    /// The video had no audio track; audio was fetched separately and merged in.
    AudioMerged,
    /// The secondary audio fetch failed; the video-only artifact was kept.
    AudioFetchFailed { reason: String },
    /// Merging failed; the video-only artifact was kept.
    MergeFailed { reason: String },
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degradation::AudioMerged => write!(f, "audio merged from secondary fetch"),
            Degradation::AudioFetchFailed { reason } => {
                write!(f, "audio fetch failed, video-only artifact kept: {reason}")
            }
            Degradation::MergeFailed { reason } => {
                write!(f, "merge failed, video-only artifact kept: {reason}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub degradation: Option<Degradation>,
}

/// Best-effort progress channel from a running pipeline to an observer.
///
/// Events go through `try_send`: a full, closed or absent receiver drops the
/// event instead of stalling the fetch.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    sender: Option<mpsc::Sender<String>>,
}

impl ProgressSink {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    pub fn is_attached(&self) -> bool {
        self.sender
            .as_ref()
            .map(|sender| !sender.is_closed())
            .unwrap_or(false)
    }

    pub fn emit(&self, progress: impl Into<String>) {
        if let Some(sender) = &self.sender {
            let _ = sender.try_send(progress.into());
        }
    }
}
