use std::collections::{HashMap, HashSet, VecDeque};
use std::time::SystemTime;

use tokio::sync::watch;

use crate::config::DispatcherConfig;
use crate::execution::{ExecutionResult, TaskOutput};
use crate::models::{
    CoreError, CoreErrorKind, TaskId, TaskPlacement, TaskRequest, TaskSnapshot, TaskStatus,
    TaskTerminalState, WorkerDescriptor, WorkerId, WorkerSnapshot,
};
use crate::orchestration::OrchestrationResult;
use crate::orchestration::lifecycle::{LifecycleEvent, LifecycleNotifier};
use crate::orchestration::priority_queue::PriorityQueue;
use crate::registry::WorkerRegistry;

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Assignment {
    pub task: TaskSnapshot,
    pub worker: WorkerId,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum PassOutcome {
    Idle,
    Assigned(Assignment),
    Parked { task: TaskId, worker: WorkerId },
    Rejected(TaskId),
}

/// All mutable scheduling state. Every method is one indivisible step; the
/// owner serializes access.
pub(crate) struct SchedulerState {
    next_task_id: u64,
    queue: PriorityQueue<TaskId>,
    registry: WorkerRegistry,
    tasks: HashMap<TaskId, watch::Sender<TaskSnapshot>>,
    active: HashSet<TaskId>,
    retired: VecDeque<TaskId>,
    terminal_retention: usize,
    notifier: LifecycleNotifier,
    closed: bool,
}

impl SchedulerState {
    pub fn new(config: &DispatcherConfig, notifier: LifecycleNotifier) -> Self {
        Self {
            next_task_id: 0,
            queue: PriorityQueue::new(),
            registry: WorkerRegistry::new(),
            tasks: HashMap::new(),
            active: HashSet::new(),
            retired: VecDeque::new(),
            terminal_retention: config.terminal_retention,
            notifier,
            closed: false,
        }
    }

    /// Registers or reconfigures a worker. Returns the snapshot and how many
    /// overflow tasks were moved back into the global queue because capacity
    /// became available.
    pub fn register_worker(
        &mut self,
        id: WorkerId,
        descriptor: WorkerDescriptor,
    ) -> OrchestrationResult<(WorkerSnapshot, usize)> {
        let reconfigured = self.registry.contains(&id);
        self.registry.register(id.clone(), descriptor)?;
        let requeued = self.requeue_stranded()?;

        let snapshot = self.registry.snapshot(&id)?;
        tracing::info!(
            worker = %id,
            max_concurrent = snapshot.max_concurrent,
            capabilities = ?snapshot.capabilities,
            reconfigured,
            requeued,
            "registered worker"
        );
        self.notifier.publish(LifecycleEvent::WorkerRegistered {
            worker: snapshot.clone(),
        });
        Ok((snapshot, requeued))
    }

    /// Admission control: un-servable work is rejected before it gets an id.
    pub fn admit(&mut self, request: TaskRequest) -> OrchestrationResult<TaskId> {
        if self.closed {
            return Err(CoreError::new(
                CoreErrorKind::Closed,
                "dispatcher is shut down and no longer accepts tasks",
            ));
        }

        if request.task_type.is_empty() {
            return Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                "task type must be a non-empty capability tag",
            ));
        }

        if self.registry.find_eligible(&request.task_type).is_empty() {
            tracing::warn!(
                task_type = %request.task_type,
                "rejected task: no registered worker supports its type"
            );
            return Err(CoreError::new(
                CoreErrorKind::NoEligibleWorker,
                format!(
                    "no registered worker supports task type '{}'",
                    request.task_type
                ),
            ));
        }

        let task_id = TaskId(self.next_task_id);
        self.next_task_id = self.next_task_id.saturating_add(1);

        let snapshot = TaskSnapshot {
            id: task_id,
            task_type: request.task_type,
            payload: request.payload,
            priority: request.priority,
            status: TaskStatus::Queued,
            placement: TaskPlacement::GlobalQueue,
            submitted_at: SystemTime::now(),
            started_at: None,
            completed_at: None,
            assigned_worker: None,
            terminal_state: None,
        };

        tracing::debug!(
            task_id = task_id.0,
            task_type = %snapshot.task_type,
            priority = snapshot.priority.as_str(),
            "queued task"
        );

        self.queue.enqueue(task_id, snapshot.weight());
        let (sender, _) = watch::channel(snapshot.clone());
        self.tasks.insert(task_id, sender);
        self.notifier
            .publish(LifecycleEvent::TaskQueued { task: snapshot });

        Ok(task_id)
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Pops the highest-priority task and either assigns it to the
    /// least-loaded eligible worker with spare capacity or parks it in
    /// exactly one overflow queue.
    pub fn scheduling_pass(&mut self) -> PassOutcome {
        let Some(task_id) = self.queue.dequeue() else {
            return PassOutcome::Idle;
        };

        match self.place(task_id) {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::error!(
                    task_id = task_id.0,
                    kind = ?error.kind,
                    message = %error.message,
                    "failed to place task"
                );
                self.fail_unplaced(task_id, error);
                PassOutcome::Rejected(task_id)
            }
        }
    }

    fn place(&mut self, task_id: TaskId) -> OrchestrationResult<PassOutcome> {
        let task_type = self.sender(task_id)?.borrow().task_type.clone();
        let eligible = self.registry.find_eligible(&task_type);

        let Some(first) = eligible.first().cloned() else {
            let error = CoreError::new(
                CoreErrorKind::NoEligibleWorker,
                format!("no registered worker supports task type '{task_type}' any longer"),
            )
            .with_task(task_id);
            tracing::warn!(task_id = task_id.0, task_type = %task_type, "{}", error.message);
            self.fail_unplaced(task_id, error);
            return Ok(PassOutcome::Rejected(task_id));
        };

        for worker in &eligible {
            if !self.registry.has_capacity(worker)? {
                continue;
            }

            self.registry.reserve(worker)?;
            self.active.insert(task_id);
            let snapshot = self.transition(task_id, |task| {
                task.status = TaskStatus::Processing;
                task.placement = TaskPlacement::Active(worker.clone());
                task.started_at = Some(SystemTime::now());
                task.assigned_worker = Some(worker.clone());
            })?;

            tracing::debug!(task_id = task_id.0, worker = %worker, "assigned task");
            self.notifier.publish(LifecycleEvent::TaskStarted {
                task: snapshot.clone(),
            });
            return Ok(PassOutcome::Assigned(Assignment {
                task: snapshot,
                worker: worker.clone(),
            }));
        }

        self.registry.park(&first, task_id)?;
        self.transition(task_id, |task| {
            task.placement = TaskPlacement::Overflow(first.clone());
        })?;
        Ok(PassOutcome::Parked {
            task: task_id,
            worker: first,
        })
    }

    /// Records the outcome of an execution, frees the worker slot and moves
    /// overflow heads of every worker with a free slot back into the global
    /// queue. Returns whether a task was drained.
    pub fn settle(
        &mut self,
        task_id: TaskId,
        worker: &WorkerId,
        outcome: ExecutionResult<TaskOutput>,
    ) -> OrchestrationResult<bool> {
        let current = self.sender(task_id)?.borrow().clone();
        if current.status != TaskStatus::Processing
            || current.placement != TaskPlacement::Active(worker.clone())
        {
            return Err(CoreError::new(
                CoreErrorKind::InvalidTransition,
                format!(
                    "task '{task_id}' cannot settle on worker '{worker}' from status '{:?}'",
                    current.status
                ),
            )
            .attributed(worker, task_id));
        }

        self.active.remove(&task_id);
        if let Err(error) = self.registry.release(worker) {
            tracing::error!(
                task_id = task_id.0,
                worker = %worker,
                message = %error.message,
                "capacity accounting out of sync while settling task"
            );
        }

        let (status, terminal_state) = match outcome {
            Ok(result) => (TaskStatus::Completed, TaskTerminalState::Succeeded(result)),
            Err(error) => (
                TaskStatus::Failed,
                TaskTerminalState::Failed(error.attributed(worker, task_id)),
            ),
        };

        let snapshot = self.transition(task_id, |task| {
            task.status = status;
            task.placement = TaskPlacement::Settled;
            task.completed_at = Some(SystemTime::now());
            task.terminal_state = Some(terminal_state);
        })?;

        match snapshot.error() {
            None => {
                tracing::info!(task_id = task_id.0, worker = %worker, "task completed");
                self.notifier
                    .publish(LifecycleEvent::TaskCompleted { task: snapshot });
            }
            Some(error) => {
                tracing::warn!(
                    task_id = task_id.0,
                    worker = %worker,
                    kind = ?error.kind,
                    message = %error.message,
                    "task failed"
                );
                self.notifier
                    .publish(LifecycleEvent::TaskFailed { task: snapshot });
            }
        }
        self.retire(task_id);

        Ok(self.requeue_stranded()? > 0)
    }

    /// Moves parked tasks back into the global queue for every worker that
    /// has free slots, at most one task per free slot.
    pub fn requeue_stranded(&mut self) -> OrchestrationResult<usize> {
        let mut requeued = 0;
        for (worker, spare) in self.registry.stranded() {
            for _ in 0..spare {
                let Some(task_id) = self.registry.unpark(&worker)? else {
                    break;
                };
                self.requeue(task_id);
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    /// Withdraws a task that has not been assigned yet.
    pub fn cancel(&mut self, task_id: TaskId) -> OrchestrationResult<TaskSnapshot> {
        let current = self.sender(task_id)?.borrow().clone();
        if current.status.is_terminal() {
            return Ok(current);
        }
        if current.status == TaskStatus::Processing {
            return Err(CoreError::new(
                CoreErrorKind::InvalidTransition,
                format!("task '{task_id}' is already processing and cannot be cancelled"),
            )
            .with_task(task_id));
        }

        let removed = match &current.placement {
            TaskPlacement::GlobalQueue => self.queue.remove_where(|queued| *queued == task_id) == 1,
            TaskPlacement::Overflow(worker) => self.registry.remove_parked(worker, task_id)?,
            TaskPlacement::Active(_) | TaskPlacement::Settled => false,
        };
        if !removed {
            return Err(CoreError::new(
                CoreErrorKind::Internal,
                format!(
                    "queued task '{task_id}' was not found in its container {:?}",
                    current.placement
                ),
            )
            .with_task(task_id));
        }

        let snapshot = self.transition(task_id, |task| {
            task.status = TaskStatus::Cancelled;
            task.placement = TaskPlacement::Settled;
            task.completed_at = Some(SystemTime::now());
            task.terminal_state = Some(TaskTerminalState::Cancelled);
        })?;
        tracing::info!(task_id = task_id.0, "cancelled queued task");
        self.notifier.publish(LifecycleEvent::TaskCancelled {
            task: snapshot.clone(),
        });
        self.retire(task_id);
        Ok(snapshot)
    }

    pub fn evict(&mut self, task_id: TaskId) -> OrchestrationResult<TaskSnapshot> {
        let snapshot = self.task(task_id)?;
        if !snapshot.status.is_terminal() {
            return Err(CoreError::new(
                CoreErrorKind::InvalidTransition,
                format!("task '{task_id}' is still {:?} and cannot be evicted", snapshot.status),
            )
            .with_task(task_id));
        }
        self.tasks.remove(&task_id);
        self.retired.retain(|retired| *retired != task_id);
        Ok(snapshot)
    }

    pub fn task(&self, task_id: TaskId) -> OrchestrationResult<TaskSnapshot> {
        Ok(self.sender(task_id)?.borrow().clone())
    }

    pub fn watch(&self, task_id: TaskId) -> OrchestrationResult<watch::Receiver<TaskSnapshot>> {
        Ok(self.sender(task_id)?.subscribe())
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn requeue(&mut self, task_id: TaskId) {
        let weight = match self.transition(task_id, |task| {
            task.placement = TaskPlacement::GlobalQueue;
        }) {
            Ok(snapshot) => snapshot.weight(),
            Err(error) => {
                tracing::error!(
                    task_id = task_id.0,
                    message = %error.message,
                    "dropped unknown overflow task"
                );
                return;
            }
        };
        tracing::debug!(task_id = task_id.0, "moved overflow task back to the global queue");
        self.queue.enqueue(task_id, weight);
    }

    fn fail_unplaced(&mut self, task_id: TaskId, error: CoreError) {
        let error = error.with_task(task_id);
        match self.transition(task_id, |task| {
            task.status = TaskStatus::Failed;
            task.placement = TaskPlacement::Settled;
            task.completed_at = Some(SystemTime::now());
            task.terminal_state = Some(TaskTerminalState::Failed(error));
        }) {
            Ok(snapshot) => {
                self.notifier
                    .publish(LifecycleEvent::TaskFailed { task: snapshot });
                self.retire(task_id);
            }
            Err(lookup) => {
                tracing::error!(
                    task_id = task_id.0,
                    message = %lookup.message,
                    "cannot fail unknown task"
                );
            }
        }
    }

    fn retire(&mut self, task_id: TaskId) {
        self.retired.push_back(task_id);
        while self.retired.len() > self.terminal_retention {
            if let Some(evicted) = self.retired.pop_front() {
                self.tasks.remove(&evicted);
            }
        }
    }

    fn transition(
        &mut self,
        task_id: TaskId,
        update: impl FnOnce(&mut TaskSnapshot),
    ) -> OrchestrationResult<TaskSnapshot> {
        let sender = self.sender(task_id)?;
        sender.send_modify(update);
        Ok(sender.borrow().clone())
    }

    fn sender(&self, task_id: TaskId) -> OrchestrationResult<&watch::Sender<TaskSnapshot>> {
        self.tasks.get(&task_id).ok_or_else(|| {
            CoreError::new(
                CoreErrorKind::UnknownTask,
                format!("unknown task id '{task_id}'"),
            )
            .with_task(task_id)
        })
    }
}
