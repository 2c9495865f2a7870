use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("transcode failed: {0}")]
    Transcode(String),
    #[error("merge failed: {0}")]
    Merge(String),
    #[error("command failed ({command}): {stderr}")]
    CommandFailure {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("worker pool is closed")]
    PoolClosed,
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            source,
            path: path.into(),
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(source: std::io::Error) -> Self {
        PipelineError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
