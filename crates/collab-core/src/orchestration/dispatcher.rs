use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{Notify, broadcast};
use tokio::time::timeout;

use crate::config::DispatcherConfig;
use crate::execution::{ExecutionAdapter, ExecutionResult, TaskOutput, execution_failure};
use crate::models::{
    CoreError, CoreErrorKind, TaskId, TaskRequest, TaskSnapshot, WorkerDescriptor, WorkerId,
    WorkerSnapshot,
};
use crate::orchestration::OrchestrationResult;
use crate::orchestration::lifecycle::{LifecycleEvent, LifecycleNotifier};
use crate::orchestration::scheduler::{Assignment, PassOutcome, SchedulerState};

struct Shared {
    state: Mutex<SchedulerState>,
    adapter: Arc<dyn ExecutionAdapter>,
    notifier: LifecycleNotifier,
    wake: Arc<Notify>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        // Lets the scheduler loop observe that every handle is gone.
        self.wake.notify_one();
    }
}

/// Handle to a running dispatcher. Clones share the same scheduler.
///
/// `submit` and `register_worker` only record intent and wake the scheduler
/// loop; placement happens on the loop, which drains every pending pass per
/// wake-up so that tasks submitted together compete on priority.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    /// Spawns the scheduler loop on the current tokio runtime.
    pub fn start(
        adapter: Arc<dyn ExecutionAdapter>,
        config: DispatcherConfig,
    ) -> OrchestrationResult<Self> {
        let runtime = Handle::try_current().map_err(|error| {
            CoreError::new(
                CoreErrorKind::Internal,
                format!("dispatcher must be started inside a tokio runtime: {error}"),
            )
        })?;

        let notifier = LifecycleNotifier::new(config.event_capacity);
        let wake = Arc::new(Notify::new());
        let shared = Arc::new(Shared {
            state: Mutex::new(SchedulerState::new(&config, notifier.clone())),
            adapter,
            notifier,
            wake: wake.clone(),
        });

        runtime.spawn(run_scheduler(Arc::downgrade(&shared), wake));
        tracing::debug!(
            event_capacity = config.event_capacity,
            terminal_retention = config.terminal_retention,
            "started dispatcher"
        );
        Ok(Self { shared })
    }

    pub fn register_worker(
        &self,
        id: impl Into<WorkerId>,
        descriptor: WorkerDescriptor,
    ) -> OrchestrationResult<WorkerSnapshot> {
        let id = id.into();
        if !self.shared.adapter.routes(&id) {
            return Err(CoreError::new(
                CoreErrorKind::InvalidConfiguration,
                format!("worker '{id}' has no execution route"),
            )
            .with_worker(&id));
        }

        let (snapshot, requeued) = self.shared.lock_state()?.register_worker(id, descriptor)?;
        if requeued > 0 {
            self.shared.wake.notify_one();
        }
        Ok(snapshot)
    }

    pub fn submit(&self, request: TaskRequest) -> OrchestrationResult<TaskId> {
        let task_id = self.shared.lock_state()?.admit(request)?;
        self.shared.wake.notify_one();
        Ok(task_id)
    }

    /// Cancels a task that is still queued. Terminal tasks are returned as-is.
    pub fn cancel(&self, task_id: TaskId) -> OrchestrationResult<TaskSnapshot> {
        self.shared.lock_state()?.cancel(task_id)
    }

    pub fn task(&self, task_id: TaskId) -> OrchestrationResult<TaskSnapshot> {
        self.shared.lock_state()?.task(task_id)
    }

    /// Drops a terminal task record ahead of the retention limit.
    pub fn evict(&self, task_id: TaskId) -> OrchestrationResult<TaskSnapshot> {
        self.shared.lock_state()?.evict(task_id)
    }

    pub fn worker(&self, id: &WorkerId) -> OrchestrationResult<WorkerSnapshot> {
        self.shared.lock_state()?.registry().snapshot(id)
    }

    pub fn workers(&self) -> OrchestrationResult<Vec<WorkerSnapshot>> {
        Ok(self.shared.lock_state()?.registry().snapshots())
    }

    pub fn queued_len(&self) -> OrchestrationResult<usize> {
        Ok(self.shared.lock_state()?.queued_len())
    }

    pub fn active_len(&self) -> OrchestrationResult<usize> {
        Ok(self.shared.lock_state()?.active_len())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.shared.notifier.subscribe()
    }

    pub async fn wait_for_terminal(
        &self,
        task_id: TaskId,
        timeout_duration: Option<Duration>,
    ) -> OrchestrationResult<TaskSnapshot> {
        let mut receiver = self.shared.lock_state()?.watch(task_id)?;
        let wait = async move {
            receiver
                .wait_for(|task| task.status.is_terminal())
                .await
                .map(|task| (*task).clone())
                .map_err(|_| {
                    CoreError::new(
                        CoreErrorKind::UnknownTask,
                        format!("task '{task_id}' was evicted before it settled"),
                    )
                    .with_task(task_id)
                })
        };

        match timeout_duration {
            Some(duration) => timeout(duration, wait).await.map_err(|_| {
                CoreError::new(
                    CoreErrorKind::Timeout,
                    format!("timed out waiting for task '{task_id}' to complete"),
                )
                .with_task(task_id)
            })?,
            None => wait.await,
        }
    }

    /// Stops admitting new tasks. Queued and running work still settles.
    pub fn shutdown(&self) -> OrchestrationResult<()> {
        let mut state = self.shared.lock_state()?;
        if !state.is_closed() {
            state.close();
            tracing::info!(
                queued = state.queued_len(),
                active = state.active_len(),
                "dispatcher stopped accepting tasks"
            );
        }
        Ok(())
    }

    pub fn is_closed(&self) -> OrchestrationResult<bool> {
        Ok(self.shared.lock_state()?.is_closed())
    }
}

async fn run_scheduler(shared: Weak<Shared>, wake: Arc<Notify>) {
    loop {
        wake.notified().await;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.run_pending_passes();
    }
    tracing::debug!("scheduler loop exited");
}

impl Shared {
    fn run_pending_passes(self: &Arc<Self>) {
        let assignments = {
            let mut state = match self.lock_state() {
                Ok(state) => state,
                Err(error) => {
                    tracing::error!(message = %error.message, "scheduler pass skipped");
                    return;
                }
            };

            let mut assignments = Vec::new();
            loop {
                while state.has_pending() {
                    match state.scheduling_pass() {
                        PassOutcome::Assigned(assignment) => assignments.push(assignment),
                        PassOutcome::Parked { task, worker } => tracing::debug!(
                            task_id = task.0,
                            worker = %worker,
                            "parked task in overflow queue"
                        ),
                        PassOutcome::Rejected(task) => {
                            tracing::debug!(task_id = task.0, "task failed during scheduling")
                        }
                        PassOutcome::Idle => break,
                    }
                }

                // Assignments can leave a worker idle next to its own overflow.
                match state.requeue_stranded() {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(error) => {
                        tracing::error!(message = %error.message, "failed to requeue overflow");
                        break;
                    }
                }
            }
            assignments
        };

        for assignment in assignments {
            self.launch(assignment);
        }
    }

    fn launch(self: &Arc<Self>, assignment: Assignment) {
        let shared = Arc::clone(self);
        let adapter = Arc::clone(&self.adapter);
        let Assignment { task, worker } = assignment;
        let task_id = task.id;

        tokio::spawn(async move {
            let routed_worker = worker.clone();
            // The inner task turns a panicking routine into a join error.
            let outcome =
                match tokio::spawn(async move { adapter.execute(task, routed_worker).await }).await
                {
                    Ok(outcome) => outcome,
                    Err(join_error) => Err(execution_failure(format!(
                        "worker routine aborted: {join_error}"
                    ))),
                };
            shared.settle(task_id, &worker, outcome);
        });
    }

    fn settle(&self, task_id: TaskId, worker: &WorkerId, outcome: ExecutionResult<TaskOutput>) {
        let drained = self
            .lock_state()
            .and_then(|mut state| state.settle(task_id, worker, outcome));

        match drained {
            Ok(true) => self.wake.notify_one(),
            Ok(false) => {}
            Err(error) => tracing::error!(
                task_id = task_id.0,
                worker = %worker,
                kind = ?error.kind,
                message = %error.message,
                "failed to record task outcome"
            ),
        }
    }

    fn lock_state(&self) -> OrchestrationResult<MutexGuard<'_, SchedulerState>> {
        self.state.lock().map_err(|_| {
            CoreError::new(CoreErrorKind::Internal, "dispatcher state mutex poisoned")
        })
    }
}
