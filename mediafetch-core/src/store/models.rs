use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::Row;
use serde::Serialize;

use crate::config::AUDIO_QUALITY;

use super::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::InvalidStatus(other.to_string())),
        }
    }
}

/// What a caller asked for: a source URL and a quality selector.
///
/// The quality `"audio"` is the audio-only sentinel; every other value is a
/// video quality tier such as `hd720`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MediaRequest {
    pub source: String,
    pub quality: String,
    pub audio_only: bool,
}

impl MediaRequest {
    pub fn new(source: impl Into<String>, quality: impl Into<String>) -> Self {
        let quality = quality.into();
        let audio_only = quality.eq_ignore_ascii_case(AUDIO_QUALITY);
        let quality = if audio_only {
            AUDIO_QUALITY.to_string()
        } else {
            quality
        };
        Self {
            source: source.into(),
            quality,
            audio_only,
        }
    }

    pub fn audio(source: impl Into<String>) -> Self {
        Self::new(source, AUDIO_QUALITY)
    }

    pub fn key(&self) -> (String, String) {
        (self.source.clone(), self.quality.clone())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: i64,
    pub source: String,
    pub quality: String,
    pub audio_only: bool,
    pub status: TaskStatus,
    pub artifact_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Task {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let status: String = row.get("status")?;
        let status = status.parse().map_err(|err: StoreError| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })?;
        Ok(Self {
            id: row.get("id")?,
            source: row.get("source")?,
            quality: row.get("quality")?,
            audio_only: row.get::<_, i64>("audio_only")? != 0,
            status,
            artifact_path: row.get::<_, Option<String>>("artifact_path")?.map(PathBuf::from),
            created_at: to_utc(row.get("created_at")?),
            updated_at: row.get::<_, Option<NaiveDateTime>>("updated_at")?.map(to_utc),
        })
    }

    pub fn request(&self) -> MediaRequest {
        MediaRequest {
            source: self.source.clone(),
            quality: self.quality.clone(),
            audio_only: self.audio_only,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            path: PathBuf::from(row.get::<_, String>("path")?),
            created_at: to_utc(row.get("created_at")?),
        })
    }
}

/// Outcome of a terminal status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    Applied,
    /// The task had already reached this terminal status; nothing was written.
    Unchanged(TaskStatus),
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreSummary {
    pub counts: HashMap<TaskStatus, i64>,
    pub file_records: i64,
}

impl StoreSummary {
    pub fn count(&self, status: TaskStatus) -> i64 {
        self.counts.get(&status).copied().unwrap_or(0)
    }
}

pub(crate) fn to_utc(value: NaiveDateTime) -> DateTime<Utc> {
    DateTime::<Utc>::from_naive_utc_and_offset(value, Utc)
}
