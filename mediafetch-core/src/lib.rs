pub mod admission;
pub mod config;
pub mod error;
pub mod notify;
pub mod pipeline;
pub mod recovery;
pub mod service;
pub mod sqlite;
pub mod store;
pub mod sweeper;
pub mod telegram;
pub mod tools;

pub use admission::{AdmissionController, PoolOccupancy, DEFAULT_CAPACITY};
pub use config::{
    load_config, retention_from_hours, HttpSection, LimitsSection, LoggingSection,
    MediafetchConfig, PathsSection, TelegramSection, ToolsSection, AUDIO_QUALITY,
    DEFAULT_QUALITY, MAX_RETENTION_HOURS,
};
pub use error::{ConfigError, Result};
pub use notify::{DeliveryKind, MessageRef, Notifier, NotifyError, NotifyResult};
pub use pipeline::{
    Artifact, Degradation, FetchRequest, FetchedMedia, Fetcher, Pipeline, PipelineError,
    PipelineResult, ProgressSink, Transcoder,
};
pub use recovery::{recover_pending, RecoveryReport};
pub use service::{FetchOutcome, FetchService, KeyLocks, ServiceError, ServiceResult};
pub use store::{
    FileRecord, MediaRequest, SqliteTaskStore, SqliteTaskStoreBuilder, StatusChange, StoreError,
    StoreResult, StoreSummary, Task, TaskFilter, TaskStatus,
};
pub use sweeper::{SweepReport, Sweeper};
pub use telegram::{deliver_download, TelegramBot, TelegramClient};
pub use tools::{
    check_tools, CommandExecutor, FfmpegTranscoder, SystemCommandExecutor, ToolStatus,
    YtDlpFetcher,
};
