mod ffmpeg;
mod ytdlp;

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::process::Command;

use crate::config::ToolsSection;

pub use ffmpeg::FfmpegTranscoder;
pub use ytdlp::{parse_progress_line, YtDlpFetcher};

#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait::async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output> {
        command.output().await
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolStatus {
    pub name: &'static str,
    pub path: PathBuf,
    pub available: bool,
    pub detail: String,
}

/// Runs `--version` / `-version` on every external tool the pipeline shells out to.
pub async fn check_tools(executor: &dyn CommandExecutor, tools: &ToolsSection) -> Vec<ToolStatus> {
    let mut statuses = Vec::with_capacity(3);
    statuses.push(probe_tool(executor, "yt-dlp", &tools.yt_dlp, "--version").await);
    statuses.push(probe_tool(executor, "ffmpeg", &tools.ffmpeg, "-version").await);
    statuses.push(probe_tool(executor, "ffprobe", &tools.ffprobe, "-version").await);
    statuses
}

async fn probe_tool(
    executor: &dyn CommandExecutor,
    name: &'static str,
    path: &Path,
    version_flag: &str,
) -> ToolStatus {
    let mut command = Command::new(path);
    command.arg(version_flag);
    match executor.run(&mut command).await {
        Ok(output) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            ToolStatus {
                name,
                path: path.to_path_buf(),
                available: true,
                detail: stdout.lines().next().unwrap_or_default().trim().to_string(),
            }
        }
        Ok(output) => ToolStatus {
            name,
            path: path.to_path_buf(),
            available: false,
            detail: format!("exited with status {:?}", output.status.code()),
        },
        Err(err) => ToolStatus {
            name,
            path: path.to_path_buf(),
            available: false,
            detail: err.to_string(),
        },
    }
}

pub(crate) fn describe_command(program: &Path, args: &[String]) -> String {
    format!("{} {}", program.display(), args.join(" "))
}
