use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::{TaskId, TaskSnapshot, WorkerSnapshot};

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum LifecycleEvent {
    TaskQueued { task: TaskSnapshot },
    TaskStarted { task: TaskSnapshot },
    TaskCompleted { task: TaskSnapshot },
    TaskFailed { task: TaskSnapshot },
    TaskCancelled { task: TaskSnapshot },
    WorkerRegistered { worker: WorkerSnapshot },
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TaskQueued { .. } => "taskQueued",
            Self::TaskStarted { .. } => "taskStarted",
            Self::TaskCompleted { .. } => "taskCompleted",
            Self::TaskFailed { .. } => "taskFailed",
            Self::TaskCancelled { .. } => "taskCancelled",
            Self::WorkerRegistered { .. } => "workerRegistered",
        }
    }

    pub fn task(&self) -> Option<&TaskSnapshot> {
        match self {
            Self::TaskQueued { task }
            | Self::TaskStarted { task }
            | Self::TaskCompleted { task }
            | Self::TaskFailed { task }
            | Self::TaskCancelled { task } => Some(task),
            Self::WorkerRegistered { .. } => None,
        }
    }

    pub fn task_id(&self) -> Option<TaskId> {
        self.task().map(|task| task.id)
    }
}

/// Fan-out of lifecycle events. Publishing never blocks and never fails.
#[derive(Clone, Debug)]
pub struct LifecycleNotifier {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl LifecycleNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn publish(&self, event: LifecycleEvent) {
        tracing::trace!(
            event = event.name(),
            task_id = event.task_id().map(|id| id.0),
            "publishing lifecycle event"
        );
        // No subscribers is not an error for the scheduler.
        let _ = self.sender.send(event);
    }
}
