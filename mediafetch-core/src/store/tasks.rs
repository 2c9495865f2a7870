use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use rusqlite::backup::Backup;
use rusqlite::types::Value;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::sqlite::configure_connection;

use super::models::{
    FileRecord, MediaRequest, StatusChange, StoreSummary, Task, TaskFilter, TaskStatus,
};
use super::{StoreError, StoreResult};

const TASK_SCHEMA: &str = include_str!("../../../sql/tasks.sql");

#[derive(Debug, Clone)]
pub struct SqliteTaskStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for SqliteTaskStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl SqliteTaskStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> StoreResult<SqliteTaskStore> {
        let path = self.path.ok_or(StoreError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(SqliteTaskStore { path, flags })
    }
}

/// Durable task and file-record tables.
///
/// Every call opens its own connection, so the store is `Clone` and can be
/// shared freely between the admission controller, the sweeper and the
/// request front ends. Multi-statement mutations run inside a single
/// `IMMEDIATE` transaction.
#[derive(Debug, Clone)]
pub struct SqliteTaskStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteTaskStore {
    pub fn builder() -> SqliteTaskStoreBuilder {
        SqliteTaskStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        SqliteTaskStoreBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> StoreResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            StoreError::Open {
                source,
                path: self.path.clone(),
            }
        })?;
        configure_connection(&conn).map_err(|source| StoreError::Open {
            source,
            path: self.path.clone(),
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute_batch(TASK_SCHEMA)?;
        Ok(())
    }

    pub fn create_task(&self, request: &MediaRequest) -> StoreResult<i64> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO tasks (source, quality, audio_only, status, created_at)
             VALUES (?1, ?2, ?3, 'pending', ?4)",
            params![
                &request.source,
                &request.quality,
                request.audio_only as i64,
                Utc::now().naive_utc()
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(task_id = id, source = %request.source, quality = %request.quality, "task created");
        Ok(id)
    }

    pub fn fetch_by_id(&self, id: i64) -> StoreResult<Option<Task>> {
        let conn = self.open()?;
        let task = conn
            .query_row("SELECT * FROM tasks WHERE id = ?1", [id], Task::from_row)
            .optional()?;
        Ok(task)
    }

    /// Moves a pending task to a terminal status.
    ///
    /// `pending` is never accepted as a target. A task that is already
    /// terminal keeps its first terminal status and the call reports
    /// [`StatusChange::Unchanged`]. `completed` requires an artifact path.
    pub fn set_status(
        &self,
        id: i64,
        status: TaskStatus,
        artifact_path: Option<&Path>,
    ) -> StoreResult<StatusChange> {
        let artifact = match (status, artifact_path) {
            (TaskStatus::Pending, _) | (TaskStatus::Completed, None) => {
                return Err(StoreError::InvalidTransition {
                    task_id: id,
                    status,
                });
            }
            (TaskStatus::Completed, Some(path)) => Some(path.to_string_lossy().to_string()),
            (TaskStatus::Failed, _) => None,
        };

        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current: Option<String> = tx
            .query_row("SELECT status FROM tasks WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;
        let current: TaskStatus = current.ok_or(StoreError::NotFound(id))?.parse()?;
        if current.is_terminal() {
            tx.commit()?;
            if current != status {
                warn!(
                    task_id = id,
                    current = %current,
                    requested = %status,
                    "ignoring status write on terminal task"
                );
            }
            return Ok(StatusChange::Unchanged(current));
        }

        tx.execute(
            "UPDATE tasks SET status = ?1, artifact_path = ?2, updated_at = ?3 WHERE id = ?4",
            params![status.as_str(), artifact, Utc::now().naive_utc(), id],
        )?;
        tx.commit()?;
        Ok(StatusChange::Applied)
    }

    /// Registers `path` as a file record and marks the task completed in
    /// one write transaction.
    ///
    /// When the task is already terminal the record is still committed so
    /// the sweeper reclaims the artifact, and the first terminal status is
    /// kept. Any failure rolls back both writes.
    pub fn complete_task(&self, id: i64, path: &Path) -> StoreResult<StatusChange> {
        let artifact = path.to_string_lossy().to_string();
        let now = Utc::now().naive_utc();
        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current: Option<String> = tx
            .query_row("SELECT status FROM tasks WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;
        let current: TaskStatus = current.ok_or(StoreError::NotFound(id))?.parse()?;

        tx.execute(
            "INSERT INTO file_records (path, created_at) VALUES (?1, ?2)
             ON CONFLICT(path) DO UPDATE SET created_at = excluded.created_at",
            params![artifact, now],
        )?;
        if current.is_terminal() {
            tx.commit()?;
            warn!(
                task_id = id,
                current = %current,
                path = %path.display(),
                "task already terminal, artifact kept for eviction only"
            );
            return Ok(StatusChange::Unchanged(current));
        }

        tx.execute(
            "UPDATE tasks SET status = 'completed', artifact_path = ?1, updated_at = ?2
             WHERE id = ?3",
            params![artifact, now, id],
        )?;
        tx.commit()?;
        Ok(StatusChange::Applied)
    }

    /// Returns the newest completed artifact for `(source, quality)`.
    ///
    /// When the artifact is gone from disk, every task row and the file
    /// record pointing at it are deleted and the lookup reports a miss.
    pub fn lookup_completed(&self, source: &str, quality: &str) -> StoreResult<Option<PathBuf>> {
        let conn = self.open()?;
        let path: Option<String> = conn
            .query_row(
                "SELECT artifact_path FROM tasks
                 WHERE source = ?1 AND quality = ?2 AND status = 'completed'
                   AND artifact_path IS NOT NULL
                 ORDER BY id DESC LIMIT 1",
                params![source, quality],
                |row| row.get(0),
            )
            .optional()?;
        drop(conn);

        let Some(path) = path.map(PathBuf::from) else {
            return Ok(None);
        };
        if path.exists() {
            return Ok(Some(path));
        }

        let removed = self.purge_path(&path)?;
        warn!(
            path = %path.display(),
            removed_tasks = removed,
            "cached artifact missing on disk, dropped stale records"
        );
        Ok(None)
    }

    pub fn register_file(&self, path: &Path) -> StoreResult<()> {
        self.register_file_at(path, Utc::now())
    }

    pub fn register_file_at(&self, path: &Path, created_at: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO file_records (path, created_at) VALUES (?1, ?2)
             ON CONFLICT(path) DO UPDATE SET created_at = excluded.created_at",
            params![path.to_string_lossy().to_string(), created_at.naive_utc()],
        )?;
        Ok(())
    }

    pub fn list_pending(&self) -> StoreResult<Vec<Task>> {
        self.list(&TaskFilter {
            status: Some(TaskStatus::Pending),
            limit: None,
        })
    }

    /// Removes every file record older than `age` together with the
    /// completed tasks that reference it and returns the removed paths.
    ///
    /// Selection and deletion share one write transaction, so concurrent
    /// sweeps never hand out the same path twice.
    ///
    /// A negative `age`, or one reaching past the earliest representable
    /// time, is rejected before anything is touched.
    pub fn evict_older_than(&self, age: Duration) -> StoreResult<Vec<PathBuf>> {
        let invalid = || StoreError::InvalidRetention {
            hours: age.num_hours(),
        };
        if age < Duration::zero() {
            return Err(invalid());
        }
        let cutoff = Utc::now()
            .checked_sub_signed(age)
            .ok_or_else(invalid)?
            .naive_utc();
        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let paths = {
            let mut stmt = tx.prepare(
                "SELECT path FROM file_records WHERE created_at <= ?1 ORDER BY created_at ASC",
            )?;
            let rows = stmt.query_map([cutoff], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut removed_tasks = 0;
        for path in &paths {
            tx.execute("DELETE FROM file_records WHERE path = ?1", [path])?;
            removed_tasks += tx.execute(
                "DELETE FROM tasks WHERE artifact_path = ?1 AND status != 'pending'",
                [path],
            )?;
        }
        tx.commit()?;

        if !paths.is_empty() {
            info!(
                files = paths.len(),
                tasks = removed_tasks,
                "evicted expired file records"
            );
        }
        Ok(paths.into_iter().map(PathBuf::from).collect())
    }

    pub fn list(&self, filter: &TaskFilter) -> StoreResult<Vec<Task>> {
        let conn = self.open()?;
        let mut query = String::from("SELECT * FROM tasks");
        let mut params: Vec<Value> = Vec::new();
        if let Some(status) = filter.status {
            query.push_str(" WHERE status = ?");
            params.push(Value::Text(status.as_str().to_string()));
        }
        query.push_str(" ORDER BY id ASC");
        if let Some(limit) = filter.limit {
            query.push_str(" LIMIT ?");
            params.push(Value::Integer(limit as i64));
        }
        let mut stmt = conn.prepare(&query)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(
            params.iter().map(|value| value as &dyn rusqlite::ToSql),
        ))?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next()? {
            tasks.push(Task::from_row(row)?);
        }
        Ok(tasks)
    }

    pub fn list_file_records(&self) -> StoreResult<Vec<FileRecord>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM file_records ORDER BY created_at ASC")?;
        let records = stmt
            .query_map([], FileRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn summary(&self) -> StoreResult<StoreSummary> {
        let conn = self.open()?;
        let mut counts = HashMap::new();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            counts.insert(status.parse()?, count);
        }
        let file_records =
            conn.query_row("SELECT COUNT(*) FROM file_records", [], |row| row.get(0))?;
        Ok(StoreSummary {
            counts,
            file_records,
        })
    }

    pub fn backup_to(&self, destination: impl AsRef<Path>) -> StoreResult<()> {
        let destination_path = destination.as_ref();
        if let Some(parent) = destination_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let source = self.open()?;
        let mut dest = Connection::open(destination_path)?;
        let backup = Backup::new(&source, &mut dest)?;
        backup.run_to_completion(10, StdDuration::from_millis(50), None)?;
        Ok(())
    }

    fn purge_path(&self, path: &Path) -> StoreResult<usize> {
        let path = path.to_string_lossy().to_string();
        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let removed = tx.execute("DELETE FROM tasks WHERE artifact_path = ?1", [&path])?;
        tx.execute("DELETE FROM file_records WHERE path = ?1", [&path])?;
        tx.commit()?;
        Ok(removed)
    }
}
