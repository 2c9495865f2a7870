use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::ToolsSection;
use crate::pipeline::{
    remove_quietly, FetchRequest, FetchedMedia, Fetcher, PipelineError, PipelineResult,
    ProgressSink,
};

use super::{describe_command, CommandExecutor, SystemCommandExecutor};

/// [`Fetcher`] backed by the `yt-dlp` command-line tool.
pub struct YtDlpFetcher {
    binary: PathBuf,
    ffprobe: PathBuf,
    executor: Arc<dyn CommandExecutor>,
}

impl std::fmt::Debug for YtDlpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YtDlpFetcher")
            .field("binary", &self.binary)
            .field("ffprobe", &self.ffprobe)
            .finish()
    }
}

impl YtDlpFetcher {
    pub fn new(tools: &ToolsSection, executor: Option<Arc<dyn CommandExecutor>>) -> Self {
        let executor = executor.unwrap_or_else(|| Arc::new(SystemCommandExecutor));
        Self {
            binary: tools.yt_dlp.clone(),
            ffprobe: tools.ffprobe.clone(),
            executor,
        }
    }

    /// Command-line arguments and the expected output file for `request`.
    pub fn build_args(request: &FetchRequest) -> (Vec<String>, PathBuf) {
        if request.audio_only {
            let output = request.stem_with_extension("mp3");
            let args = vec![
                "--newline".to_string(),
                "-x".to_string(),
                "--audio-format".to_string(),
                "mp3".to_string(),
                "-o".to_string(),
                output.to_string_lossy().to_string(),
                request.source.clone(),
            ];
            return (args, output);
        }

        let output = request.stem_with_extension("webm");
        let height = request.quality.trim_start_matches("hd");
        let args = vec![
            "--newline".to_string(),
            "-f".to_string(),
            format!("bestvideo[height<=?{height}]+bestaudio/best"),
            "--merge-output-format".to_string(),
            "webm".to_string(),
            "-o".to_string(),
            output.to_string_lossy().to_string(),
            request.source.clone(),
        ];
        (args, output)
    }

    async fn run_streaming(&self, args: &[String], progress: &ProgressSink) -> PipelineResult<()> {
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = command.spawn().map_err(|err| {
            PipelineError::Fetch(format!("failed to start {}: {err}", self.binary.display()))
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let relay = async {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(percent) = parse_progress_line(&line) {
                        progress.emit(percent);
                    }
                }
            }
        };
        let collect_stderr = async {
            let mut buffer = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut buffer).await;
            }
            buffer
        };
        let ((), stderr_text) = tokio::join!(relay, collect_stderr);

        let status = child
            .wait()
            .await
            .map_err(|err| PipelineError::io(&self.binary, err))?;
        if !status.success() {
            return Err(PipelineError::CommandFailure {
                command: describe_command(&self.binary, args),
                status: status.code(),
                stderr: stderr_text.trim().to_string(),
            });
        }
        Ok(())
    }

    /// `ffprobe` audio-stream check. A probe failure counts as "has audio",
    /// so an unreadable file is passed on instead of triggering a refetch.
    async fn has_audio(&self, path: &Path) -> bool {
        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-select_streams".to_string(),
            "a".to_string(),
            "-show_entries".to_string(),
            "stream=codec_type".to_string(),
            "-of".to_string(),
            "csv=p=0".to_string(),
            path.to_string_lossy().to_string(),
        ];
        let mut command = Command::new(&self.ffprobe);
        command.args(&args);
        match self.executor.run(&mut command).await {
            Ok(output) if output.status.success() => {
                !String::from_utf8_lossy(&output.stdout).trim().is_empty()
            }
            Ok(output) => {
                warn!(
                    path = %path.display(),
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "audio probe failed, assuming audio present"
                );
                true
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "audio probe failed, assuming audio present"
                );
                true
            }
        }
    }
}

#[async_trait]
impl Fetcher for YtDlpFetcher {
    async fn fetch(
        &self,
        request: &FetchRequest,
        progress: &ProgressSink,
    ) -> PipelineResult<FetchedMedia> {
        let (args, output) = Self::build_args(request);
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| PipelineError::io(parent, err))?;
        }
        debug!(
            task_id = request.task_id,
            command = %describe_command(&self.binary, &args),
            "running fetch"
        );

        if let Err(err) = self.run_streaming(&args, progress).await {
            remove_quietly(&output).await;
            let mut partial = output.clone().into_os_string();
            partial.push(".part");
            remove_quietly(Path::new(&partial)).await;
            return Err(err);
        }
        if !output.exists() {
            return Err(PipelineError::Fetch(format!(
                "yt-dlp reported success but {} is missing",
                output.display()
            )));
        }
        progress.emit("100");

        let has_audio = request.audio_only || self.has_audio(&output).await;
        Ok(FetchedMedia::new(output, has_audio))
    }
}

/// Extracts the percentage from a `[download]  42.3% of ...` progress line.
pub fn parse_progress_line(line: &str) -> Option<String> {
    static PROGRESS: OnceLock<Regex> = OnceLock::new();
    let regex = PROGRESS.get_or_init(|| {
        Regex::new(r"^\[download\]\s+(\d{1,3}(?:\.\d+)?)%").expect("valid regex")
    });
    regex
        .captures(line.trim_start())
        .and_then(|captures| captures.get(1))
        .map(|value| value.as_str().to_string())
}
