//! Lifecycle crate – headless control of the embedded OpenList engine.
//!
//! The engine itself and every OS integration sit behind traits in
//! [`traits`], so host shells (the `listctl` CLI, a desktop wrapper, tests)
//! plug in their own implementations through [`HostContext`].

pub mod assets;
pub mod commands;
pub mod config;
pub mod context;
pub mod credentials;
pub mod host;
pub mod manager;
pub mod platform;
pub mod process_engine;
pub mod scenario;
pub mod traits;
pub mod types;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use commands::{BridgeContext, CommandRegistry};
pub use context::HostContext;
pub use host::ProcessHost;
pub use manager::{EngineState, LifecycleError, LifecycleManager};
pub use process_engine::{ProcessEngine, ProcessEngineOptions};
pub use types::{CommandResult, ErrorCode, ErrorInfo, Status};
