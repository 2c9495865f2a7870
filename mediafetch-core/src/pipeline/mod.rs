mod error;
mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

pub use error::{PipelineError, PipelineResult};
pub use types::{Artifact, Degradation, FetchRequest, FetchedMedia, ProgressSink};

/// Downloads the requested media to a local file.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        request: &FetchRequest,
        progress: &ProgressSink,
    ) -> PipelineResult<FetchedMedia>;
}

/// Produces the delivered container from a fetched file.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(&self, input: &Path) -> PipelineResult<PathBuf>;

    /// Muxes a separately fetched audio track into a silent video.
    async fn merge(&self, video: &Path, audio: &Path) -> PipelineResult<PathBuf>;
}

/// fetch → (audio repair) → transcode, for a single request.
///
/// Every file the pipeline creates is either the returned artifact or
/// deleted before `run` returns.
#[derive(Clone)]
pub struct Pipeline {
    fetcher: Arc<dyn Fetcher>,
    transcoder: Arc<dyn Transcoder>,
}

impl Pipeline {
    pub fn new(fetcher: Arc<dyn Fetcher>, transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            fetcher,
            transcoder,
        }
    }

    pub async fn run(
        &self,
        request: &FetchRequest,
        progress: &ProgressSink,
    ) -> PipelineResult<Artifact> {
        info!(
            task_id = request.task_id,
            source = %request.source,
            quality = %request.quality,
            audio_only = request.audio_only,
            "pipeline started"
        );
        let fetched = self.fetcher.fetch(request, progress).await?;

        let (mut current, degradation) = if request.audio_only || fetched.has_audio {
            (fetched.path, None)
        } else {
            self.restore_audio(request, fetched.path).await
        };

        if !request.audio_only {
            match self.transcoder.transcode(&current).await {
                Ok(output) => {
                    if output != current {
                        remove_quietly(&current).await;
                    }
                    current = output;
                }
                Err(err) => {
                    remove_quietly(&current).await;
                    return Err(err);
                }
            }
        }

        info!(task_id = request.task_id, path = %current.display(), "pipeline finished");
        Ok(Artifact {
            path: current,
            degradation,
        })
    }

    async fn restore_audio(
        &self,
        request: &FetchRequest,
        video: PathBuf,
    ) -> (PathBuf, Option<Degradation>) {
        warn!(
            task_id = request.task_id,
            path = %video.display(),
            "fetched media has no audio track, fetching audio separately"
        );
        let companion = request.audio_companion();
        let audio = match self.fetcher.fetch(&companion, &ProgressSink::none()).await {
            Ok(audio) => audio.path,
            Err(err) => {
                warn!(
                    task_id = request.task_id,
                    error = %err,
                    "audio fetch failed, keeping video-only artifact"
                );
                return (
                    video,
                    Some(Degradation::AudioFetchFailed {
                        reason: err.to_string(),
                    }),
                );
            }
        };

        match self.transcoder.merge(&video, &audio).await {
            Ok(merged) => {
                if merged != video {
                    remove_quietly(&video).await;
                }
                if merged != audio {
                    remove_quietly(&audio).await;
                }
                (merged, Some(Degradation::AudioMerged))
            }
            Err(err) => {
                remove_quietly(&audio).await;
                warn!(
                    task_id = request.task_id,
                    error = %err,
                    "merge failed, keeping video-only artifact"
                );
                (
                    video,
                    Some(Degradation::MergeFailed {
                        reason: err.to_string(),
                    }),
                )
            }
        }
    }
}

pub(crate) async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed intermediate file"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(
            path = %path.display(),
            error = %err,
            "failed to remove intermediate file"
        ),
    }
}
