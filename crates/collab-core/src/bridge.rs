use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::execution::{ExecutionAdapter, RemoteAssignment, RoutingTable, execution_failure};
use crate::models::{
    Capability, CoreError, CoreErrorKind, TaskId, TaskRequest, WorkerDescriptor, WorkerId,
    WorkerSnapshot,
};
use crate::orchestration::{Dispatcher, OrchestrationResult};

const DEFAULT_REMOTE_MAX_CONCURRENT: usize = 1;

/// Inbound message from an external channel, encoded as `{action, data}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeMessage {
    #[serde(alias = "REGISTER_AI")]
    RegisterWorker(RegisterWorkerData),
    SubmitTask(TaskRequest),
    TaskResult(TaskResultData),
}

impl BridgeMessage {
    pub fn decode(raw: &str) -> OrchestrationResult<Self> {
        serde_json::from_str(raw).map_err(|error| {
            CoreError::new(
                CoreErrorKind::Protocol,
                format!("malformed bridge message: {error}"),
            )
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterWorkerData {
    pub id: WorkerId,
    #[serde(default, alias = "name")]
    pub display_name: Option<String>,
    pub capabilities: Vec<Capability>,
    #[serde(default = "default_remote_max_concurrent")]
    pub max_concurrent: usize,
}

impl RegisterWorkerData {
    pub fn descriptor(&self) -> WorkerDescriptor {
        WorkerDescriptor {
            display_name: self.display_name.clone(),
            capabilities: self.capabilities.clone(),
            max_concurrent: self.max_concurrent,
        }
    }
}

/// Completion report from an externally hosted worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResultData {
    pub task_id: TaskId,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "camelCase")]
pub enum BridgeReply {
    WorkerRegistered {
        worker: WorkerSnapshot,
    },
    TaskAccepted {
        #[serde(rename = "taskId")]
        task_id: TaskId,
    },
    ResultAccepted {
        #[serde(rename = "taskId")]
        task_id: TaskId,
    },
    Error {
        error: CoreError,
    },
}

/// Outbound message telling a remote worker to pick up a task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundMessage {
    AssignTask(RemoteAssignment),
}

#[derive(Clone)]
pub struct MessageBridge {
    dispatcher: Dispatcher,
    routes: Arc<RoutingTable>,
}

impl MessageBridge {
    pub fn new(dispatcher: Dispatcher, routes: Arc<RoutingTable>) -> Self {
        Self { dispatcher, routes }
    }

    pub fn handle(&self, message: BridgeMessage) -> OrchestrationResult<BridgeReply> {
        match message {
            BridgeMessage::RegisterWorker(data) => self.register_worker(data),
            BridgeMessage::SubmitTask(request) => {
                let task_id = self.dispatcher.submit(request)?;
                Ok(BridgeReply::TaskAccepted { task_id })
            }
            BridgeMessage::TaskResult(data) => self.task_result(data),
        }
    }

    /// Decodes and handles one raw message. Failures become `error` replies.
    pub fn handle_json(&self, raw: &str) -> BridgeReply {
        match BridgeMessage::decode(raw).and_then(|message| self.handle(message)) {
            Ok(reply) => reply,
            Err(error) => {
                tracing::warn!(
                    kind = ?error.kind,
                    message = %error.message,
                    "bridge message rejected"
                );
                BridgeReply::Error { error }
            }
        }
    }

    fn register_worker(&self, data: RegisterWorkerData) -> OrchestrationResult<BridgeReply> {
        let id = data.id.clone();
        let attached = if self.routes.routes(&id) {
            false
        } else {
            self.routes.attach_remote(id.clone())?;
            true
        };

        match self.dispatcher.register_worker(id.clone(), data.descriptor()) {
            Ok(worker) => Ok(BridgeReply::WorkerRegistered { worker }),
            Err(error) => {
                if attached {
                    self.routes.detach(&id);
                }
                Err(error)
            }
        }
    }

    fn task_result(&self, data: TaskResultData) -> OrchestrationResult<BridgeReply> {
        let remote = self.routes.remote().ok_or_else(|| {
            CoreError::new(
                CoreErrorKind::Protocol,
                "task results are only accepted when remote workers are enabled",
            )
            .with_task(data.task_id)
        })?;

        let outcome = match (data.result, data.error) {
            (Some(_), Some(_)) => {
                return Err(CoreError::new(
                    CoreErrorKind::Protocol,
                    "task result must carry either a result or an error, not both",
                )
                .with_task(data.task_id));
            }
            (_, Some(message)) => Err(execution_failure(message)),
            (result, None) => Ok(result.unwrap_or(Value::Null)),
        };

        remote.resolve(data.task_id, outcome)?;
        Ok(BridgeReply::ResultAccepted {
            task_id: data.task_id,
        })
    }
}

fn default_remote_max_concurrent() -> usize {
    DEFAULT_REMOTE_MAX_CONCURRENT
}
