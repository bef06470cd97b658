pub mod dispatcher;
pub mod lifecycle;
pub mod priority_queue;
pub(crate) mod scheduler;

pub use dispatcher::Dispatcher;
pub use lifecycle::{DEFAULT_EVENT_CAPACITY, LifecycleEvent, LifecycleNotifier};
pub use priority_queue::PriorityQueue;

use crate::models::CoreError;

pub type OrchestrationResult<T> = Result<T, CoreError>;
