pub mod remote;
pub mod routing;
pub mod simulated;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::models::{CoreError, CoreErrorKind, TaskSnapshot, WorkerId};

pub use remote::{RemoteAssignment, RemoteWorkers};
pub use routing::RoutingTable;
pub use simulated::SimulatedRoutine;

pub type ExecutionResult<T> = Result<T, CoreError>;

pub type TaskOutput = Value;

pub type ExecutionFuture = Pin<Box<dyn Future<Output = ExecutionResult<TaskOutput>> + Send>>;

/// The only seam where work consumes time. It reports an outcome and never
/// touches scheduler state.
pub trait ExecutionAdapter: Send + Sync {
    fn routes(&self, worker: &WorkerId) -> bool;

    fn execute(&self, task: TaskSnapshot, worker: WorkerId) -> ExecutionFuture;
}

/// In-process processing routine for a single worker type.
pub trait WorkerRoutine: Send + Sync {
    fn run(&self, task: TaskSnapshot) -> ExecutionFuture;
}

struct FnRoutine<F> {
    routine: F,
}

impl<F, Fut> WorkerRoutine for FnRoutine<F>
where
    F: Fn(TaskSnapshot) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ExecutionResult<TaskOutput>> + Send + 'static,
{
    fn run(&self, task: TaskSnapshot) -> ExecutionFuture {
        Box::pin((self.routine)(task))
    }
}

pub fn routine_fn<F, Fut>(routine: F) -> Arc<dyn WorkerRoutine>
where
    F: Fn(TaskSnapshot) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ExecutionResult<TaskOutput>> + Send + 'static,
{
    Arc::new(FnRoutine { routine })
}

pub fn execution_failure(message: impl Into<String>) -> CoreError {
    CoreError::new(CoreErrorKind::ExecutionFailure, message)
}

pub(crate) fn ready(outcome: ExecutionResult<TaskOutput>) -> ExecutionFuture {
    Box::pin(async move { outcome })
}
