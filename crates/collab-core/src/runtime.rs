use std::sync::Arc;

use tokio::sync::mpsc;

use crate::bridge::MessageBridge;
use crate::config::{CollabConfig, WorkerKind};
use crate::execution::{RemoteAssignment, RemoteWorkers, RoutingTable, SimulatedRoutine};
use crate::orchestration::{Dispatcher, OrchestrationResult};

/// A dispatcher wired to the configured worker catalog, plus the bridge and
/// outbound assignment stream that external hosts talk to.
pub struct CollabRuntime {
    dispatcher: Dispatcher,
    routes: Arc<RoutingTable>,
    bridge: MessageBridge,
    assignments: Option<mpsc::UnboundedReceiver<RemoteAssignment>>,
}

impl CollabRuntime {
    /// Must be called inside a tokio runtime.
    pub fn start(config: &CollabConfig) -> OrchestrationResult<Self> {
        config.validate()?;

        let (remote, assignments) = RemoteWorkers::new();
        let routes = Arc::new(RoutingTable::with_remote(remote));
        let simulation = Arc::new(config.simulation.clone());

        for worker in &config.workers {
            match worker.kind {
                WorkerKind::Simulated => routes.register_routine(
                    worker.id.clone(),
                    Arc::new(SimulatedRoutine::new(worker.id.clone(), simulation.clone())),
                )?,
                WorkerKind::Remote => routes.attach_remote(worker.id.clone())?,
            }
        }

        let dispatcher = Dispatcher::start(routes.clone(), config.dispatcher.clone())?;
        for worker in &config.workers {
            dispatcher.register_worker(worker.id.clone(), worker.descriptor())?;
        }

        tracing::info!(
            workers = config.workers.len(),
            simulation_scale = config.simulation.scale,
            "collaboration runtime started"
        );

        let bridge = MessageBridge::new(dispatcher.clone(), routes.clone());
        Ok(Self {
            dispatcher,
            routes,
            bridge,
            assignments: Some(assignments),
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn routes(&self) -> &Arc<RoutingTable> {
        &self.routes
    }

    pub fn bridge(&self) -> &MessageBridge {
        &self.bridge
    }

    /// Outbound assignments for remote workers. Can be taken once.
    pub fn take_assignments(&mut self) -> Option<mpsc::UnboundedReceiver<RemoteAssignment>> {
        self.assignments.take()
    }
}
