use std::path::PathBuf;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::Serialize;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::store::{SqliteTaskStore, StoreResult};

pub const DEFAULT_RETENTION_HOURS: i64 = 24;
pub const DEFAULT_INTERVAL: StdDuration = StdDuration::from_secs(60 * 60);

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub evicted: Vec<PathBuf>,
    pub deleted_files: usize,
    pub already_missing: usize,
    pub delete_errors: usize,
}

/// Periodic eviction of artifacts older than the retention window.
#[derive(Debug, Clone)]
pub struct Sweeper {
    store: SqliteTaskStore,
    retention: Duration,
    interval: StdDuration,
}

impl Sweeper {
    pub fn new(store: SqliteTaskStore, retention: Duration, interval: StdDuration) -> Self {
        Self {
            store,
            retention,
            interval,
        }
    }

    pub fn with_defaults(store: SqliteTaskStore) -> Self {
        Self::new(
            store,
            Duration::hours(DEFAULT_RETENTION_HOURS),
            DEFAULT_INTERVAL,
        )
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Evicts expired records and deletes their files. A file that is
    /// already gone counts as deleted.
    pub async fn run_once(&self) -> StoreResult<SweepReport> {
        let evicted = self.store.evict_older_than(self.retention)?;
        let mut report = SweepReport::default();
        for path in &evicted {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {
                    debug!(path = %path.display(), "evicted artifact deleted");
                    report.deleted_files += 1;
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "evicted artifact already gone");
                    report.already_missing += 1;
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to delete evicted artifact"
                    );
                    report.delete_errors += 1;
                }
            }
        }
        report.evicted = evicted;
        if !report.evicted.is_empty() {
            info!(
                evicted = report.evicted.len(),
                deleted = report.deleted_files,
                missing = report.already_missing,
                errors = report.delete_errors,
                "sweep finished"
            );
        }
        Ok(report)
    }

    /// Sweeps every `interval` for the life of the process; the first
    /// sweep happens one interval after start.
    pub async fn run(self) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = self.interval.as_secs(),
            retention_hours = self.retention.num_hours(),
            "file sweeper started"
        );
        loop {
            ticker.tick().await;
            if let Err(err) = self.run_once().await {
                error!(error = %err, "sweep failed");
            }
        }
    }
}
