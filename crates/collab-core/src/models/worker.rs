use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::models::TaskId;

#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for WorkerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for WorkerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A tag naming a kind of work; task types and worker capabilities share it.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(pub String);

impl Capability {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl Display for Capability {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Capability {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Capability {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerDescriptor {
    #[serde(default, alias = "name")]
    pub display_name: Option<String>,
    pub capabilities: Vec<Capability>,
    pub max_concurrent: usize,
}

impl WorkerDescriptor {
    pub fn new(
        capabilities: impl IntoIterator<Item = impl Into<Capability>>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            display_name: None,
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            max_concurrent,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn supports(&self, capability: &Capability) -> bool {
        self.capabilities.contains(capability)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub display_name: String,
    pub capabilities: Vec<Capability>,
    pub max_concurrent: usize,
    pub current_active: usize,
    pub overflow: Vec<TaskId>,
}

impl WorkerSnapshot {
    pub fn has_capacity(&self) -> bool {
        self.current_active < self.max_concurrent
    }
}
