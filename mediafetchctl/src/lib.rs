pub mod http;
mod logging;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use mediafetch_core::{
    check_tools, load_config, recover_pending, retention_from_hours, AdmissionController,
    CommandExecutor, FetchService, FfmpegTranscoder, MediafetchConfig, Pipeline, SqliteTaskStore,
    SweepReport, Sweeper, SystemCommandExecutor, Task, TaskFilter, TaskStatus, TelegramBot,
    TelegramClient, ToolStatus, YtDlpFetcher,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::http::HttpState;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] mediafetch_core::ConfigError),
    #[error("storage error: {0}")]
    Store(#[from] mediafetch_core::StoreError),
    #[error("notifier error: {0}")]
    Notify(#[from] mediafetch_core::NotifyError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("required tools unavailable: {0}")]
    MissingTools(String),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "mediafetch service and control interface", long_about = None)]
pub struct Cli {
    /// Path to mediafetch.toml
    #[arg(long, default_value = "configs/mediafetch.toml")]
    pub config: PathBuf,
    /// Overrides paths.database
    #[arg(long)]
    pub database: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Runs the HTTP front end, the chat bot, recovery and the sweeper
    Serve(ServeArgs),
    /// Task counts and pool settings
    Status,
    /// Task inspection
    #[command(subcommand)]
    Tasks(TaskCommands),
    /// Runs one eviction pass now
    Sweep(SweepArgs),
    /// Copies the task database
    Backup(BackupArgs),
    /// Checks configuration, database and external tools
    Health,
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Overrides http.bind
    #[arg(long)]
    pub bind: Option<String>,
    /// Skips the chat bot even when enabled in config
    #[arg(long, default_value_t = false)]
    pub no_telegram: bool,
}

#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// Lists tasks, oldest first
    List(TaskListArgs),
    /// Shows a single task
    Show(TaskShowArgs),
}

#[derive(Args, Debug)]
pub struct TaskListArgs {
    /// pending, completed or failed
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct TaskShowArgs {
    pub id: i64,
}

#[derive(Args, Debug)]
pub struct SweepArgs {
    /// Overrides limits.retention_hours
    #[arg(long)]
    pub retention_hours: Option<u64>,
}

#[derive(Args, Debug)]
pub struct BackupArgs {
    #[arg(long)]
    pub output: PathBuf,
}

pub async fn run(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli)?;
    context.init_logging(matches!(cli.command, Commands::Serve(_)))?;

    match &cli.command {
        Commands::Serve(args) => serve(&context, args).await?,
        Commands::Status => {
            let status = context.gather_status()?;
            render(&status, cli.format)?;
        }
        Commands::Tasks(TaskCommands::List(args)) => {
            let tasks = context.task_list(args)?;
            render(&tasks, cli.format)?;
        }
        Commands::Tasks(TaskCommands::Show(args)) => {
            let task = context.task_show(args.id)?;
            render(&task, cli.format)?;
        }
        Commands::Sweep(args) => {
            let report = context.sweep(args).await?;
            render(&report, cli.format)?;
        }
        Commands::Backup(args) => {
            let result = context.backup(&args.output)?;
            render(&result, cli.format)?;
        }
        Commands::Health => {
            let report = context.health_check().await;
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::MissingResource(
                    "one or more checks failed".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: MediafetchConfig,
    config_path: PathBuf,
    database: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config_path = cli.config.clone();
        let config = load_config(&config_path)?;
        let database = cli
            .database
            .clone()
            .unwrap_or_else(|| config.database_path());
        Ok(Self {
            config,
            config_path,
            database,
        })
    }

    fn init_logging(&self, to_file: bool) -> Result<()> {
        let file = self
            .config
            .logging
            .file
            .as_ref()
            .filter(|_| to_file)
            .map(|file| self.config.resolve_path(file));
        logging::init(&self.config.logging.level, file.as_deref())?;
        Ok(())
    }

    fn open_store(&self) -> Result<SqliteTaskStore> {
        let store = SqliteTaskStore::builder()
            .path(&self.database)
            .create_if_missing(true)
            .build()?;
        store.initialize()?;
        Ok(store)
    }

    fn open_existing_store(&self) -> Result<SqliteTaskStore> {
        if !self.database.exists() {
            return Err(AppError::MissingResource(format!(
                "database not found at {}",
                self.database.display()
            )));
        }
        Ok(SqliteTaskStore::builder()
            .path(&self.database)
            .create_if_missing(false)
            .build()?)
    }

    fn gather_status(&self) -> Result<StatusReport> {
        let store = self.open_existing_store()?;
        let summary = store.summary()?;
        Ok(StatusReport {
            database: self.database.clone(),
            pending: summary.count(TaskStatus::Pending),
            completed: summary.count(TaskStatus::Completed),
            failed: summary.count(TaskStatus::Failed),
            file_records: summary.file_records,
            max_concurrent_tasks: self.config.limits.max_concurrent_tasks,
            retention_hours: self.config.limits.retention_hours,
        })
    }

    fn task_list(&self, args: &TaskListArgs) -> Result<TaskList> {
        let status = args
            .status
            .as_deref()
            .map(str::parse::<TaskStatus>)
            .transpose()?;
        let store = self.open_existing_store()?;
        let rows = store.list(&TaskFilter {
            status,
            limit: Some(args.limit),
        })?;
        Ok(TaskList { rows })
    }

    fn task_show(&self, id: i64) -> Result<Task> {
        let store = self.open_existing_store()?;
        store
            .fetch_by_id(id)?
            .ok_or_else(|| AppError::MissingResource(format!("task {id} not found")))
    }

    async fn sweep(&self, args: &SweepArgs) -> Result<SweepReport> {
        let store = self.open_store()?;
        let retention = match args.retention_hours {
            Some(hours) => retention_from_hours(hours)?,
            None => self.config.limits.retention()?,
        };
        let sweeper = Sweeper::new(store, retention, self.config.limits.sweep_interval());
        Ok(sweeper.run_once().await?)
    }

    fn backup(&self, output: &Path) -> Result<BackupResult> {
        let store = self.open_existing_store()?;
        store.backup_to(output)?;
        Ok(BackupResult {
            source: self.database.clone(),
            destination: output.to_path_buf(),
        })
    }

    async fn health_check(&self) -> Vec<HealthEntry> {
        let mut results = vec![
            check_path("mediafetch.toml", &self.config_path),
            check_database("database", &self.database),
            check_directory("downloads", &self.config.downloads_dir()),
        ];
        let tools = check_tools(&SystemCommandExecutor, &self.config.tools).await;
        results.extend(tools.iter().map(tool_entry));
        if self.config.telegram.enabled {
            results.push(match self.config.telegram.resolve_token() {
                Some(_) => HealthEntry::ok("telegram", "token configured"),
                None => HealthEntry::error(
                    "telegram",
                    format!(
                        "enabled but neither telegram.token nor ${} is set",
                        self.config.telegram.token_env
                    ),
                ),
            });
        }
        results
    }
}

async fn serve(context: &AppContext, args: &ServeArgs) -> Result<()> {
    let config = &context.config;
    let executor: Arc<dyn CommandExecutor> = Arc::new(SystemCommandExecutor);

    let tools = check_tools(executor.as_ref(), &config.tools).await;
    for tool in &tools {
        if tool.available {
            info!(tool = tool.name, version = %tool.detail, "tool available");
        }
    }
    // ffprobe is optional: without it every fetched video counts as having audio
    let missing: Vec<String> = tools
        .iter()
        .filter(|tool| !tool.available)
        .filter(|tool| {
            if tool.name == "ffprobe" {
                warn!(
                    path = %tool.path.display(),
                    detail = %tool.detail,
                    "ffprobe unavailable, audio detection disabled"
                );
                false
            } else {
                true
            }
        })
        .map(|tool| format!("{} ({}): {}", tool.name, tool.path.display(), tool.detail))
        .collect();
    if !missing.is_empty() {
        return Err(AppError::MissingTools(missing.join("; ")));
    }

    let store = context.open_store()?;
    let downloads = config.downloads_dir();
    tokio::fs::create_dir_all(&downloads).await?;

    let pipeline = Pipeline::new(
        Arc::new(YtDlpFetcher::new(&config.tools, Some(executor.clone()))),
        Arc::new(FfmpegTranscoder::new(&config.tools, Some(executor))),
    );
    let controller = AdmissionController::new(
        store.clone(),
        pipeline,
        &downloads,
        config.limits.max_concurrent_tasks,
    );
    let service = FetchService::new(controller.clone());

    let recovered = recover_pending(&service)?;
    if !recovered.is_empty() {
        info!(count = recovered.len(), "pending tasks resubmitted");
    }

    let sweeper = Sweeper::new(
        store.clone(),
        config.limits.retention()?,
        config.limits.sweep_interval(),
    );
    tokio::spawn(sweeper.run());

    if config.telegram.enabled && !args.no_telegram {
        match config.telegram.resolve_token() {
            Some(token) => {
                let client = TelegramClient::new(&config.telegram.api_endpoint, &token)?;
                let bot = TelegramBot::new(
                    client,
                    service.clone(),
                    &config.telegram,
                    config.limits.progress_buffer,
                );
                tokio::spawn(bot.run());
            }
            None => warn!(
                token_env = %config.telegram.token_env,
                "telegram enabled but no token configured, bot not started"
            ),
        }
    }

    let bind = args
        .bind
        .clone()
        .unwrap_or_else(|| config.http.bind.clone());
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(
        bind = %bind,
        capacity = controller.capacity(),
        database = %store.path().display(),
        "http front end listening"
    );
    let app = http::router(HttpState::new(service, &config.http.default_quality));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    controller.close();
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

fn check_path(name: &str, path: &Path) -> HealthEntry {
    if path.exists() {
        HealthEntry::ok(name, format!("{}", path.display()))
    } else {
        HealthEntry::error(name, format!("{} missing", path.display()))
    }
}

fn check_directory(name: &str, path: &Path) -> HealthEntry {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => HealthEntry::ok(name, format!("{}", path.display())),
        Ok(_) => HealthEntry::warn(name, format!("{} is not a directory", path.display())),
        Err(_) => HealthEntry::warn(
            name,
            format!("{} not found, created on serve", path.display()),
        ),
    }
}

fn check_database(name: &str, path: &Path) -> HealthEntry {
    if !path.exists() {
        return HealthEntry::warn(
            name,
            format!("{} not found, created on serve", path.display()),
        );
    }
    let store = SqliteTaskStore::builder()
        .path(path)
        .read_only(true)
        .build()
        .and_then(|store| store.summary());
    match store {
        Ok(summary) => HealthEntry::ok(
            name,
            format!(
                "{} ({} pending, {} file records)",
                path.display(),
                summary.count(TaskStatus::Pending),
                summary.file_records
            ),
        ),
        Err(err) => HealthEntry::error(name, format!("unreadable: {err}")),
    }
}

fn tool_entry(tool: &ToolStatus) -> HealthEntry {
    match (tool.available, tool.name) {
        (true, _) => HealthEntry::ok(tool.name, tool.detail.clone()),
        (false, "ffprobe") => HealthEntry::warn(tool.name, tool.detail.clone()),
        (false, _) => HealthEntry::error(tool.name, tool.detail.clone()),
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub database: PathBuf,
    pub pending: i64,
    pub completed: i64,
    pub failed: i64,
    pub file_records: i64,
    pub max_concurrent_tasks: usize,
    pub retention_hours: u64,
}

impl DisplayFallback for StatusReport {
    fn display(&self) -> String {
        [
            format!("Database: {}", self.database.display()),
            format!(
                "Tasks: {} pending, {} completed, {} failed",
                self.pending, self.completed, self.failed
            ),
            format!("File records: {}", self.file_records),
            format!(
                "Pool: {} workers, retention {} h",
                self.max_concurrent_tasks, self.retention_hours
            ),
        ]
        .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct TaskList {
    pub rows: Vec<Task>,
}

impl DisplayFallback for TaskList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "No tasks found".to_string();
        }
        self.rows
            .iter()
            .map(|task| task.display())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl DisplayFallback for Task {
    fn display(&self) -> String {
        let artifact = self
            .artifact_path
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        format!(
            "#{id} {status} quality={quality} source={source} artifact={artifact} created={created}",
            id = self.id,
            status = self.status,
            quality = self.quality,
            source = self.source,
            created = self.created_at.format("%Y-%m-%d %H:%M:%S"),
        )
    }
}

impl DisplayFallback for SweepReport {
    fn display(&self) -> String {
        if self.evicted.is_empty() {
            return "Nothing to evict".to_string();
        }
        let mut lines = vec![format!(
            "Evicted {} file(s): {} deleted, {} already gone, {} failed",
            self.evicted.len(),
            self.deleted_files,
            self.already_missing,
            self.delete_errors
        )];
        lines.extend(
            self.evicted
                .iter()
                .map(|path| format!("  - {}", path.display())),
        );
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct BackupResult {
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl DisplayFallback for BackupResult {
    fn display(&self) -> String {
        format!(
            "Backup written: {} -> {}",
            self.source.display(),
            self.destination.display()
        )
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Ok,
    Warn,
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        self.iter()
            .map(|entry| format!("[{}] {}: {}", entry.status, entry.name, entry.detail))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
