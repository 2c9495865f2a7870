use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api rejected request: {0}")]
    Api(String),
    #[error("io error at {path}: {source}")]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type NotifyResult<T> = Result<T, NotifyError>;

/// Handle to a message already posted to a recipient, used for edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryKind {
    Video,
    Audio,
}

impl DeliveryKind {
    pub fn for_audio_only(audio_only: bool) -> Self {
        if audio_only {
            DeliveryKind::Audio
        } else {
            DeliveryKind::Video
        }
    }
}

impl fmt::Display for DeliveryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryKind::Video => write!(f, "video"),
            DeliveryKind::Audio => write!(f, "audio"),
        }
    }
}

/// Outbound channel to the person who asked for a fetch.
///
/// Failures are reported to the caller, who logs them; they never affect
/// task state.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipient: i64, text: &str) -> NotifyResult<MessageRef>;

    async fn notify_edit(&self, message: MessageRef, text: &str) -> NotifyResult<()>;

    async fn deliver_file(
        &self,
        recipient: i64,
        path: &Path,
        kind: DeliveryKind,
    ) -> NotifyResult<()>;
}
