use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::ToolsSection;
use crate::pipeline::{remove_quietly, PipelineError, PipelineResult, Transcoder};

use super::{describe_command, CommandExecutor, SystemCommandExecutor};

/// [`Transcoder`] backed by `ffmpeg`: H.264/AAC MP4 output.
pub struct FfmpegTranscoder {
    binary: PathBuf,
    executor: Arc<dyn CommandExecutor>,
}

impl std::fmt::Debug for FfmpegTranscoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfmpegTranscoder")
            .field("binary", &self.binary)
            .finish()
    }
}

impl FfmpegTranscoder {
    pub fn new(tools: &ToolsSection, executor: Option<Arc<dyn CommandExecutor>>) -> Self {
        let executor = executor.unwrap_or_else(|| Arc::new(SystemCommandExecutor));
        Self {
            binary: tools.ffmpeg.clone(),
            executor,
        }
    }

    pub fn transcode_args(input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            output.to_string_lossy().to_string(),
        ]
    }

    pub fn merge_args(video: &Path, audio: &Path, output: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            video.to_string_lossy().to_string(),
            "-i".to_string(),
            audio.to_string_lossy().to_string(),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "1:a:0".to_string(),
            "-c:v".to_string(),
            "copy".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            output.to_string_lossy().to_string(),
        ]
    }

    async fn run_ffmpeg(&self, args: &[String], output: &Path) -> PipelineResult<()> {
        let mut command = Command::new(&self.binary);
        command.args(args);
        debug!(command = %describe_command(&self.binary, args), "running ffmpeg");
        let result = self
            .executor
            .run(&mut command)
            .await
            .map_err(|err| PipelineError::io(&self.binary, err))?;
        if !result.status.success() {
            remove_quietly(output).await;
            return Err(PipelineError::CommandFailure {
                command: describe_command(&self.binary, args),
                status: result.status.code(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, input: &Path) -> PipelineResult<PathBuf> {
        let output = sibling_with_suffix(input, "_converted.mp4");
        let args = Self::transcode_args(input, &output);
        self.run_ffmpeg(&args, &output)
            .await
            .map_err(|err| PipelineError::Transcode(err.to_string()))?;
        Ok(output)
    }

    async fn merge(&self, video: &Path, audio: &Path) -> PipelineResult<PathBuf> {
        let output = sibling_with_suffix(video, "_merged.mp4");
        let args = Self::merge_args(video, audio, &output);
        self.run_ffmpeg(&args, &output)
            .await
            .map_err(|err| PipelineError::Merge(err.to_string()))?;
        Ok(output)
    }
}

/// `dir/name.ext` → `dir/name{suffix}`.
fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.file_stem().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}
