use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::execution::{
    ExecutionAdapter, ExecutionFuture, ExecutionResult, RemoteWorkers, WorkerRoutine, ready,
};
use crate::models::{CoreError, CoreErrorKind, TaskSnapshot, WorkerId};

#[derive(Clone)]
enum Route {
    Local(Arc<dyn WorkerRoutine>),
    Remote,
}

/// Worker id to processing routine table. Every worker gets exactly one route.
pub struct RoutingTable {
    routes: RwLock<HashMap<WorkerId, Route>>,
    remote: Option<Arc<RemoteWorkers>>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingTable {
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            remote: None,
        }
    }

    pub fn with_remote(remote: Arc<RemoteWorkers>) -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            remote: Some(remote),
        }
    }

    pub fn remote(&self) -> Option<&Arc<RemoteWorkers>> {
        self.remote.as_ref()
    }

    pub fn register_routine(
        &self,
        worker: impl Into<WorkerId>,
        routine: Arc<dyn WorkerRoutine>,
    ) -> ExecutionResult<()> {
        self.insert(worker.into(), Route::Local(routine))
    }

    /// Routes `worker` to an externally hosted implementation.
    pub fn attach_remote(&self, worker: impl Into<WorkerId>) -> ExecutionResult<()> {
        let worker = worker.into();
        if self.remote.is_none() {
            return Err(CoreError::new(
                CoreErrorKind::InvalidConfiguration,
                format!("worker '{worker}' is remote but no remote hub is configured"),
            )
            .with_worker(&worker));
        }
        self.insert(worker, Route::Remote)
    }

    pub fn is_remote(&self, worker: &WorkerId) -> bool {
        self.read()
            .map(|routes| matches!(routes.get(worker), Some(Route::Remote)))
            .unwrap_or(false)
    }

    pub fn detach(&self, worker: &WorkerId) -> bool {
        self.write()
            .map(|mut routes| routes.remove(worker).is_some())
            .unwrap_or(false)
    }

    fn insert(&self, worker: WorkerId, route: Route) -> ExecutionResult<()> {
        let mut routes = self.write()?;
        if routes.contains_key(&worker) {
            return Err(CoreError::new(
                CoreErrorKind::InvalidConfiguration,
                format!("duplicate route registration for worker '{worker}'"),
            )
            .with_worker(&worker));
        }
        tracing::debug!(
            worker = %worker,
            remote = matches!(route, Route::Remote),
            "registered execution route"
        );
        routes.insert(worker, route);
        Ok(())
    }

    fn read(&self) -> ExecutionResult<RwLockReadGuard<'_, HashMap<WorkerId, Route>>> {
        self.routes.read().map_err(|_| routing_poisoned())
    }

    fn write(&self) -> ExecutionResult<RwLockWriteGuard<'_, HashMap<WorkerId, Route>>> {
        self.routes.write().map_err(|_| routing_poisoned())
    }
}

impl ExecutionAdapter for RoutingTable {
    fn routes(&self, worker: &WorkerId) -> bool {
        self.read()
            .map(|routes| routes.contains_key(worker))
            .unwrap_or(false)
    }

    fn execute(&self, task: TaskSnapshot, worker: WorkerId) -> ExecutionFuture {
        let route = match self.read() {
            Ok(routes) => routes.get(&worker).cloned(),
            Err(error) => return ready(Err(error.attributed(&worker, task.id))),
        };

        match (route, self.remote.as_ref()) {
            (Some(Route::Local(routine)), _) => routine.run(task),
            (Some(Route::Remote), Some(remote)) => remote.dispatch(task, worker),
            (Some(Route::Remote), None) | (None, _) => {
                tracing::error!(
                    worker = %worker,
                    task_id = task.id.0,
                    task_type = %task.task_type,
                    "worker was selected for a task but has no execution route"
                );
                ready(Err(CoreError::new(
                    CoreErrorKind::UnroutableWorker,
                    format!("no processing routine is registered for worker '{worker}'"),
                )
                .attributed(&worker, task.id)))
            }
        }
    }
}

fn routing_poisoned() -> CoreError {
    CoreError::new(CoreErrorKind::Internal, "routing table lock poisoned")
}
