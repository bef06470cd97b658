pub mod bridge;
pub mod config;
pub mod execution;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod registry;
pub mod runtime;
