use std::sync::Arc;

use serde_json::{Value, json};

use crate::config::SimulationConfig;
use crate::execution::{ExecutionFuture, WorkerRoutine, execution_failure};
use crate::models::{TaskSnapshot, WorkerId};

/// Payload key that makes the simulated backend fail with the given message.
pub const SIMULATED_FAILURE_KEY: &str = "simulateFailure";

/// Stand-in for a real backend call: waits a per-task-type latency and
/// echoes the payload back.
#[derive(Clone)]
pub struct SimulatedRoutine {
    worker: WorkerId,
    profile: Arc<SimulationConfig>,
}

impl SimulatedRoutine {
    pub fn new(worker: impl Into<WorkerId>, profile: Arc<SimulationConfig>) -> Self {
        Self {
            worker: worker.into(),
            profile,
        }
    }
}

impl WorkerRoutine for SimulatedRoutine {
    fn run(&self, task: TaskSnapshot) -> ExecutionFuture {
        let latency = self.profile.latency_for(&task.task_type);
        let worker = self.worker.clone();

        Box::pin(async move {
            tokio::time::sleep(latency).await;

            if let Some(Value::String(message)) = task.payload.get(SIMULATED_FAILURE_KEY) {
                return Err(execution_failure(message.clone()).attributed(&worker, task.id));
            }

            Ok(json!({
                "worker": worker,
                "taskType": task.task_type,
                "latencyMs": latency.as_millis() as u64,
                "echo": task.payload,
            }))
        })
    }
}
