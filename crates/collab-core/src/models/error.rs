use serde::{Deserialize, Serialize};

use crate::models::{TaskId, WorkerId};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreErrorKind {
    NoEligibleWorker,
    UnroutableWorker,
    ExecutionFailure,
    InvalidConfiguration,
    InvalidInput,
    UnknownTask,
    InvalidTransition,
    Timeout,
    Protocol,
    Closed,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub worker: Option<WorkerId>,
    pub task: Option<TaskId>,
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            worker: None,
            task: None,
            kind,
            message: message.into(),
        }
    }

    pub fn with_worker(mut self, worker: &WorkerId) -> Self {
        self.worker = Some(worker.clone());
        self
    }

    pub fn with_task(mut self, task: TaskId) -> Self {
        self.task = Some(task);
        self
    }

    /// Fills in attribution that the error does not already carry.
    pub fn attributed(self, worker: &WorkerId, task: TaskId) -> Self {
        Self {
            worker: self.worker.or_else(|| Some(worker.clone())),
            task: self.task.or(Some(task)),
            kind: self.kind,
            message: self.message,
        }
    }
}
