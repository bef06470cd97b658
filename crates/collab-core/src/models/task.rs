use std::fmt::{Display, Formatter};
use std::time::SystemTime;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::models::{Capability, CoreError, WorkerId};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum Priority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    pub fn weight(self) -> u32 {
        match self {
            Self::Critical => 100,
            Self::High => 75,
            Self::Normal => 50,
            Self::Low => 25,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }

    /// Unrecognized names fall back to `Normal`.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        Self::ALL
            .into_iter()
            .find(|priority| priority.as_str().eq_ignore_ascii_case(trimmed))
            .unwrap_or_default()
    }
}

impl Serialize for Priority {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<Value>::deserialize(deserializer)?;
        Ok(match raw {
            Some(Value::String(name)) => Self::parse(&name),
            _ => Self::default(),
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// The one container that owns a task at any instant.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(tag = "container", content = "worker", rename_all = "snake_case")]
pub enum TaskPlacement {
    GlobalQueue,
    Overflow(WorkerId),
    Active(WorkerId),
    Settled,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    #[serde(rename = "type")]
    pub task_type: Capability,
    #[serde(default, alias = "data")]
    pub payload: Value,
    #[serde(default)]
    pub priority: Priority,
}

impl TaskRequest {
    pub fn new(task_type: impl Into<Capability>, payload: Value) -> Self {
        Self {
            task_type: task_type.into(),
            payload,
            priority: Priority::Normal,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum TaskTerminalState {
    Succeeded(Value),
    Failed(CoreError),
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: Capability,
    pub payload: Value,
    pub priority: Priority,
    pub status: TaskStatus,
    pub placement: TaskPlacement,
    pub submitted_at: SystemTime,
    pub started_at: Option<SystemTime>,
    pub completed_at: Option<SystemTime>,
    pub assigned_worker: Option<WorkerId>,
    pub terminal_state: Option<TaskTerminalState>,
}

impl TaskSnapshot {
    pub fn weight(&self) -> u32 {
        self.priority.weight()
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.terminal_state {
            Some(TaskTerminalState::Succeeded(value)) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&CoreError> {
        match &self.terminal_state {
            Some(TaskTerminalState::Failed(error)) => Some(error),
            _ => None,
        }
    }
}
