use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::pipeline::{
    Artifact, FetchRequest, Pipeline, PipelineError, PipelineResult, ProgressSink,
};
use crate::store::{SqliteTaskStore, StatusChange, Task, TaskStatus};

pub const DEFAULT_CAPACITY: usize = 5;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoolOccupancy {
    pub capacity: usize,
    pub active: usize,
    pub peak: usize,
}

/// Bounded worker pool running task pipelines.
///
/// Live requests and recovered tasks share the same semaphore, so no more
/// than `capacity` pipelines run at once whatever their origin. A task that
/// holds a slot runs to completion; there is no cancellation.
#[derive(Clone)]
pub struct AdmissionController {
    inner: Arc<Inner>,
}

struct Inner {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    store: SqliteTaskStore,
    pipeline: Pipeline,
    downloads_dir: PathBuf,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("capacity", &self.inner.capacity)
            .field("downloads_dir", &self.inner.downloads_dir)
            .field("occupancy", &self.occupancy())
            .finish()
    }
}

impl AdmissionController {
    pub fn new(
        store: SqliteTaskStore,
        pipeline: Pipeline,
        downloads_dir: impl AsRef<Path>,
        capacity: usize,
    ) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Inner {
                semaphore: Arc::new(Semaphore::new(capacity)),
                capacity,
                store,
                pipeline,
                downloads_dir: downloads_dir.as_ref().to_path_buf(),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        }
    }

    pub fn store(&self) -> &SqliteTaskStore {
        &self.inner.store
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn occupancy(&self) -> PoolOccupancy {
        PoolOccupancy {
            capacity: self.inner.capacity,
            active: self.inner.active.load(Ordering::SeqCst),
            peak: self.inner.peak.load(Ordering::SeqCst),
        }
    }

    pub fn peak_occupancy(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }

    /// Stops admitting work; queued and future submissions fail with
    /// [`PipelineError::PoolClosed`]. Running pipelines are unaffected.
    pub fn close(&self) {
        self.inner.semaphore.close();
    }

    /// Waits for a slot, runs the pipeline for `task` and records the
    /// terminal status.
    ///
    /// On success the artifact's file record and the completed status are
    /// written together. If that write fails the task is marked failed and
    /// the error logged; the artifact is still returned.
    pub async fn submit(&self, task: &Task, progress: ProgressSink) -> PipelineResult<Artifact> {
        let _permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::PoolClosed)?;
        let _slot = SlotGuard::enter(&self.inner.active, &self.inner.peak);
        debug!(
            task_id = task.id,
            active = self.inner.active.load(Ordering::SeqCst),
            "slot acquired"
        );

        let request = FetchRequest::for_task(task, self.output_stem(task.id));
        match self.inner.pipeline.run(&request, &progress).await {
            Ok(artifact) => {
                self.record_success(task.id, &artifact);
                Ok(artifact)
            }
            Err(err) => {
                self.record_failure(task.id, &err);
                Err(err)
            }
        }
    }

    fn output_stem(&self, task_id: i64) -> PathBuf {
        self.inner
            .downloads_dir
            .join(format!("task-{task_id}-{}", Uuid::new_v4().simple()))
    }

    fn record_success(&self, task_id: i64, artifact: &Artifact) {
        let store = &self.inner.store;
        match store.complete_task(task_id, &artifact.path) {
            Ok(StatusChange::Applied) => {
                info!(
                    task_id,
                    path = %artifact.path.display(),
                    degraded = artifact.degradation.is_some(),
                    "task completed"
                );
            }
            Ok(StatusChange::Unchanged(_)) => {}
            Err(err) => {
                error!(
                    task_id,
                    path = %artifact.path.display(),
                    error = %err,
                    "failed to record completed task"
                );
                if let Err(store_err) = store.set_status(task_id, TaskStatus::Failed, None) {
                    error!(task_id, error = %store_err, "failed to mark task failed");
                }
            }
        }
    }

    fn record_failure(&self, task_id: i64, err: &PipelineError) {
        warn!(task_id, error = %err, "task failed");
        if let Err(store_err) = self.inner.store.set_status(task_id, TaskStatus::Failed, None) {
            error!(task_id, error = %store_err, "failed to mark task failed");
        }
    }
}

struct SlotGuard<'a> {
    active: &'a AtomicUsize,
}

impl<'a> SlotGuard<'a> {
    fn enter(active: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { active }
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
