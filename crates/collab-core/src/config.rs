use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::{Capability, CoreError, CoreErrorKind, WorkerDescriptor, WorkerId};
use crate::orchestration::OrchestrationResult;
use crate::orchestration::lifecycle::DEFAULT_EVENT_CAPACITY;
use crate::registry::validate_descriptor;

pub const DEFAULT_TERMINAL_RETENTION: usize = 1024;
pub const DEFAULT_LATENCY_MS: u64 = 1000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Terminal tasks kept queryable before the oldest is evicted.
    #[serde(default = "default_terminal_retention")]
    pub terminal_retention: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
            terminal_retention: default_terminal_retention(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    #[default]
    Simulated,
    Remote,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub id: WorkerId,
    #[serde(default)]
    pub display_name: Option<String>,
    pub capabilities: Vec<Capability>,
    pub max_concurrent: usize,
    #[serde(default)]
    pub kind: WorkerKind,
}

impl WorkerConfig {
    pub fn descriptor(&self) -> WorkerDescriptor {
        WorkerDescriptor {
            display_name: self.display_name.clone(),
            capabilities: self.capabilities.clone(),
            max_concurrent: self.max_concurrent,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_latency_ms")]
    pub default_latency_ms: u64,
    #[serde(default)]
    pub latency_ms: BTreeMap<String, u64>,
    #[serde(default = "default_scale")]
    pub scale: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            default_latency_ms: DEFAULT_LATENCY_MS,
            latency_ms: [
                ("code_completion", 500),
                ("bug_detection", 1000),
                ("code_optimization", 1500),
                ("documentation_generation", 2000),
            ]
            .into_iter()
            .map(|(task_type, millis)| (task_type.to_string(), millis))
            .collect(),
            scale: default_scale(),
        }
    }
}

impl SimulationConfig {
    pub fn latency_for(&self, task_type: &Capability) -> Duration {
        let millis = self
            .latency_ms
            .get(task_type.as_str())
            .copied()
            .unwrap_or(self.default_latency_ms);
        Duration::from_millis((millis as f64 * self.scale.max(0.0)).round() as u64)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollabConfig {
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default = "default_workers")]
    pub workers: Vec<WorkerConfig>,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            dispatcher: DispatcherConfig::default(),
            workers: default_workers(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl CollabConfig {
    pub fn from_toml_str(raw: &str) -> OrchestrationResult<Self> {
        let config: Self = toml::from_str(raw).map_err(|error| {
            CoreError::new(
                CoreErrorKind::InvalidConfiguration,
                format!("failed to parse configuration: {error}"),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> OrchestrationResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|error| {
            CoreError::new(
                CoreErrorKind::InvalidConfiguration,
                format!("failed to read configuration '{}': {error}", path.display()),
            )
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> OrchestrationResult<()> {
        let mut seen = HashSet::new();
        for worker in &self.workers {
            validate_descriptor(&worker.id, &worker.descriptor())?;
            if !seen.insert(&worker.id) {
                return Err(CoreError::new(
                    CoreErrorKind::InvalidConfiguration,
                    format!("worker '{}' is configured more than once", worker.id),
                )
                .with_worker(&worker.id));
            }
        }

        if self.dispatcher.terminal_retention == 0 {
            return Err(CoreError::new(
                CoreErrorKind::InvalidConfiguration,
                "terminal_retention must keep at least one settled task",
            ));
        }

        if !self.simulation.scale.is_finite() || self.simulation.scale < 0.0 {
            return Err(CoreError::new(
                CoreErrorKind::InvalidConfiguration,
                "simulation scale must be a finite, non-negative number",
            ));
        }
        Ok(())
    }
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

fn default_terminal_retention() -> usize {
    DEFAULT_TERMINAL_RETENTION
}

fn default_latency_ms() -> u64 {
    DEFAULT_LATENCY_MS
}

fn default_scale() -> f64 {
    1.0
}

fn default_workers() -> Vec<WorkerConfig> {
    let worker = |id: &str, name: &str, capabilities: &[&str], max_concurrent| WorkerConfig {
        id: WorkerId::from(id),
        display_name: Some(name.to_string()),
        capabilities: capabilities.iter().map(|tag| Capability::from(*tag)).collect(),
        max_concurrent,
        kind: WorkerKind::Simulated,
    };

    vec![
        worker(
            "code_assistant",
            "Code Assistant",
            &[
                "code_completion",
                "bug_detection",
                "code_optimization",
                "documentation_generation",
            ],
            3,
        ),
        worker(
            "design_assistant",
            "Design Assistant",
            &[
                "ui_design",
                "color_scheme_generation",
                "asset_creation",
                "animation_design",
            ],
            2,
        ),
        worker(
            "game_designer",
            "Game Design Assistant",
            &["game_mechanics", "level_design", "character_design", "game_balance"],
            2,
        ),
    ]
}
