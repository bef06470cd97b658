pub mod error;
pub mod task;
pub mod worker;

pub use error::{CoreError, CoreErrorKind};
pub use task::{
    Priority, TaskId, TaskPlacement, TaskRequest, TaskSnapshot, TaskStatus, TaskTerminalState,
};
pub use worker::{Capability, WorkerDescriptor, WorkerId, WorkerSnapshot};
