use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::admission::{AdmissionController, PoolOccupancy};
use crate::pipeline::{Artifact, Degradation, PipelineError, ProgressSink};
use crate::store::{MediaRequest, SqliteTaskStore, StoreError, Task};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("task worker stopped before reporting a result")]
    Interrupted,
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Clone, Serialize)]
pub struct FetchOutcome {
    pub path: PathBuf,
    pub cached: bool,
    pub task_id: Option<i64>,
    pub degradation: Option<Degradation>,
}

impl FetchOutcome {
    fn cached(path: PathBuf) -> Self {
        Self {
            path,
            cached: true,
            task_id: None,
            degradation: None,
        }
    }

    fn produced(task_id: i64, artifact: Artifact) -> Self {
        Self {
            path: artifact.path,
            cached: false,
            task_id: Some(task_id),
            degradation: artifact.degradation,
        }
    }
}

type Key = (String, String);

/// One async mutex per `(source, quality)`; entries are dropped once no
/// request holds or waits on them.
#[derive(Debug, Default, Clone)]
pub struct KeyLocks {
    locks: Arc<Mutex<HashMap<Key, Arc<AsyncMutex<()>>>>>,
}

pub struct KeyGuard {
    key: Key,
    locks: KeyLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLocks {
    pub async fn lock(&self, key: Key) -> KeyGuard {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(|poison| poison.into_inner());
            locks.entry(key.clone()).or_default().clone()
        };
        let guard = mutex.lock_owned().await;
        KeyGuard {
            key,
            locks: self.clone(),
            guard: Some(guard),
        }
    }

    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self
            .locks
            .locks
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        if let Some(mutex) = locks.get(&self.key) {
            // Only the map still references the mutex: nobody holds or waits on it.
            if Arc::strong_count(mutex) == 1 {
                locks.remove(&self.key);
            }
        }
    }
}

/// Entry-point facade shared by the HTTP and chat front ends.
///
/// "Check the cache, else create and submit" runs under a per-key lock, so
/// two concurrent requests for the same `(source, quality)` fetch once; the
/// second one is answered from the cache.
#[derive(Debug, Clone)]
pub struct FetchService {
    store: SqliteTaskStore,
    controller: AdmissionController,
    locks: KeyLocks,
}

impl FetchService {
    pub fn new(controller: AdmissionController) -> Self {
        Self {
            store: controller.store().clone(),
            controller,
            locks: KeyLocks::default(),
        }
    }

    pub fn store(&self) -> &SqliteTaskStore {
        &self.store
    }

    pub fn controller(&self) -> &AdmissionController {
        &self.controller
    }

    pub fn occupancy(&self) -> PoolOccupancy {
        self.controller.occupancy()
    }

    /// Serves `request` from the dedup cache or runs it through the pool.
    ///
    /// The work runs on a spawned task that owns the key lock; dropping the
    /// returned future detaches from it without cancelling the pipeline.
    pub async fn fetch(
        &self,
        request: MediaRequest,
        progress: ProgressSink,
    ) -> ServiceResult<FetchOutcome> {
        let service = self.clone();
        let worker = tokio::spawn(async move { service.fetch_locked(request, progress).await });
        worker.await.map_err(|_| ServiceError::Interrupted)?
    }

    async fn fetch_locked(
        &self,
        request: MediaRequest,
        progress: ProgressSink,
    ) -> ServiceResult<FetchOutcome> {
        let _guard = self.locks.lock(request.key()).await;
        if let Some(path) = self.cached_artifact(&request) {
            info!(
                source = %request.source,
                quality = %request.quality,
                path = %path.display(),
                "serving cached artifact"
            );
            return Ok(FetchOutcome::cached(path));
        }
        let task_id = self.store.create_task(&request)?;
        let task = self
            .store
            .fetch_by_id(task_id)?
            .ok_or(StoreError::NotFound(task_id))?;
        let artifact = self.controller.submit(&task, progress).await?;
        Ok(FetchOutcome::produced(task_id, artifact))
    }

    /// Re-runs a task left pending by a previous process, without a dedup
    /// check or progress observer.
    pub async fn resume(&self, task: Task) -> ServiceResult<FetchOutcome> {
        let _guard = self.locks.lock(task.request().key()).await;
        let artifact = self.controller.submit(&task, ProgressSink::none()).await?;
        Ok(FetchOutcome::produced(task.id, artifact))
    }

    fn cached_artifact(&self, request: &MediaRequest) -> Option<PathBuf> {
        match self.store.lookup_completed(&request.source, &request.quality) {
            Ok(path) => path,
            Err(err) => {
                warn!(
                    source = %request.source,
                    quality = %request.quality,
                    error = %err,
                    "dedup lookup failed, treating as cache miss"
                );
                None
            }
        }
    }
}
