use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::execution::{ExecutionFuture, ExecutionResult, TaskOutput, execution_failure, ready};
use crate::models::{CoreError, CoreErrorKind, TaskId, TaskSnapshot, WorkerId};

/// Work handed to an externally hosted worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteAssignment {
    pub task: TaskSnapshot,
    pub worker: WorkerId,
}

type PendingResult = oneshot::Sender<ExecutionResult<TaskOutput>>;

/// Hub for workers living outside the process. Assignments go out on a
/// channel; results come back through [`RemoteWorkers::resolve`].
pub struct RemoteWorkers {
    outbound: mpsc::UnboundedSender<RemoteAssignment>,
    pending: Mutex<HashMap<TaskId, PendingResult>>,
}

impl RemoteWorkers {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<RemoteAssignment>) {
        let (outbound, assignments) = mpsc::unbounded_channel();
        let hub = Arc::new(Self {
            outbound,
            pending: Mutex::new(HashMap::new()),
        });
        (hub, assignments)
    }

    pub fn dispatch(&self, task: TaskSnapshot, worker: WorkerId) -> ExecutionFuture {
        let task_id = task.id;
        let (sender, receiver) = oneshot::channel();

        match self.lock_pending() {
            Ok(mut pending) => {
                pending.insert(task_id, sender);
            }
            Err(error) => return ready(Err(error.attributed(&worker, task_id))),
        }

        let assignment = RemoteAssignment {
            task,
            worker: worker.clone(),
        };
        if self.outbound.send(assignment).is_err() {
            self.forget(task_id);
            return ready(Err(execution_failure(
                "remote worker channel is closed; nobody can pick up the assignment",
            )
            .attributed(&worker, task_id)));
        }

        tracing::debug!(worker = %worker, task_id = task_id.0, "sent assignment to remote worker");

        Box::pin(async move {
            receiver.await.unwrap_or_else(|_| {
                Err(execution_failure("remote worker abandoned the assignment")
                    .attributed(&worker, task_id))
            })
        })
    }

    /// Delivers the outcome reported by a remote worker.
    pub fn resolve(
        &self,
        task_id: TaskId,
        outcome: ExecutionResult<TaskOutput>,
    ) -> ExecutionResult<()> {
        let sender = self.lock_pending()?.remove(&task_id).ok_or_else(|| {
            CoreError::new(
                CoreErrorKind::UnknownTask,
                format!("no remote assignment is awaiting a result for '{task_id}'"),
            )
            .with_task(task_id)
        })?;

        if sender.send(outcome).is_err() {
            tracing::debug!(
                task_id = task_id.0,
                "remote result arrived after the execution was dropped"
            );
        }
        Ok(())
    }

    fn forget(&self, task_id: TaskId) {
        if let Ok(mut pending) = self.lock_pending() {
            pending.remove(&task_id);
        }
    }

    fn lock_pending(&self) -> ExecutionResult<MutexGuard<'_, HashMap<TaskId, PendingResult>>> {
        self.pending.lock().map_err(|_| {
            CoreError::new(CoreErrorKind::Internal, "remote worker registry mutex poisoned")
        })
    }
}
