use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

pub const AUDIO_QUALITY: &str = "audio";
pub const DEFAULT_QUALITY: &str = "hd720";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MediafetchConfig {
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub limits: LimitsSection,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub tools: ToolsSection,
    #[serde(default)]
    pub telegram: TelegramSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl MediafetchConfig {
    /// Resolves a configured path against `paths.data_dir` when relative to it.
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() || path.starts_with(&self.paths.data_dir) {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.data_dir).join(path)
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.resolve_path(&self.paths.database)
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.downloads_dir)
    }

    pub fn validate(&self) -> Result<()> {
        if self.limits.max_concurrent_tasks == 0 {
            return Err(ConfigError::Invalid {
                field: "limits.max_concurrent_tasks",
                reason: "must be greater than zero".to_string(),
            });
        }
        retention_from_hours(self.limits.retention_hours)?;
        if self.limits.sweep_interval_minutes == 0 {
            return Err(ConfigError::Invalid {
                field: "limits.sweep_interval_minutes",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.http.default_quality.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "http.default_quality",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub data_dir: String,
    pub downloads_dir: String,
    pub database: String,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            downloads_dir: "downloads".to_string(),
            database: "mediafetch.sqlite".to_string(),
        }
    }
}

/// Upper bound for `limits.retention_hours` (one hundred years).
pub const MAX_RETENTION_HOURS: u64 = 24 * 365 * 100;

/// Converts a retention window in hours, rejecting zero and anything past
/// [`MAX_RETENTION_HOURS`].
pub fn retention_from_hours(hours: u64) -> Result<chrono::Duration> {
    let invalid = || ConfigError::Invalid {
        field: "limits.retention_hours",
        reason: format!("must be between 1 and {MAX_RETENTION_HOURS}, got {hours}"),
    };
    if hours == 0 || hours > MAX_RETENTION_HOURS {
        return Err(invalid());
    }
    i64::try_from(hours)
        .ok()
        .and_then(chrono::Duration::try_hours)
        .ok_or_else(invalid)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    pub max_concurrent_tasks: usize,
    pub retention_hours: u64,
    pub sweep_interval_minutes: u64,
    pub progress_buffer: usize,
}

impl LimitsSection {
    pub fn retention(&self) -> Result<chrono::Duration> {
        retention_from_hours(self.retention_hours)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_minutes * 60)
    }
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 5,
            retention_hours: 24,
            sweep_interval_minutes: 60,
            progress_buffer: 32,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    pub bind: String,
    pub default_quality: String,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            default_quality: DEFAULT_QUALITY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub yt_dlp: PathBuf,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            yt_dlp: PathBuf::from("yt-dlp"),
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramSection {
    pub enabled: bool,
    pub token: Option<String>,
    pub token_env: String,
    pub api_endpoint: String,
    pub poll_timeout_seconds: u64,
    pub qualities: Vec<String>,
}

impl TelegramSection {
    /// Inline `token` wins over the environment variable named by `token_env`.
    pub fn resolve_token(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|token| !token.trim().is_empty())
            .or_else(|| std::env::var(&self.token_env).ok())
            .filter(|token| !token.trim().is_empty())
    }
}

impl Default for TelegramSection {
    fn default() -> Self {
        Self {
            enabled: false,
            token: None,
            token_env: "TELEGRAM_BOT_TOKEN".to_string(),
            api_endpoint: "https://api.telegram.org".to_string(),
            poll_timeout_seconds: 60,
            qualities: vec!["hd720".to_string(), "hd1080".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<MediafetchConfig> {
    let config: MediafetchConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
