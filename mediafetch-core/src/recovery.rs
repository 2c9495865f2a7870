use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::service::{FetchOutcome, FetchService, ServiceError, ServiceResult};
use crate::store::StoreResult;

/// Tasks handed back to the pool after a restart.
#[derive(Debug, Default)]
pub struct RecoveryReport {
    pub task_ids: Vec<i64>,
    pub handles: Vec<JoinHandle<ServiceResult<FetchOutcome>>>,
}

impl RecoveryReport {
    pub fn len(&self) -> usize {
        self.task_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.task_ids.is_empty()
    }

    /// Waits for every recovered task; used by tests and one-shot runs.
    pub async fn join(self) -> Vec<ServiceResult<FetchOutcome>> {
        join_all(self.handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap_or_else(|_| Err(ServiceError::Interrupted)))
            .collect()
    }
}

/// Resubmits every task a previous run left `pending`.
///
/// Each task is re-run from scratch on a detached tokio task through the
/// same pool as live requests. A crash mid-recovery leaves the rows pending
/// for the next start.
pub fn recover_pending(service: &FetchService) -> StoreResult<RecoveryReport> {
    let pending = service.store().list_pending()?;
    if pending.is_empty() {
        info!("no pending tasks to recover");
        return Ok(RecoveryReport::default());
    }

    info!(count = pending.len(), "recovering pending tasks");
    let mut report = RecoveryReport::default();
    for task in pending {
        let task_id = task.id;
        info!(task_id, source = %task.source, quality = %task.quality, "resubmitting task");
        let service = service.clone();
        let handle = tokio::spawn(async move {
            let result = service.resume(task).await;
            if let Err(err) = &result {
                warn!(task_id, error = %err, "recovered task failed");
            }
            result
        });
        report.task_ids.push(task_id);
        report.handles.push(handle);
    }
    Ok(report)
}
