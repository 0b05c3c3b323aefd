//! Thin binary-support library: CLI parsing, config file ownership, the
//! Orchestrator tick loop, and the Unix-socket control surface. Kept as a
//! library (rather than folding everything into `main.rs`) purely so
//! integration tests under `tests/` can drive the same types `main.rs` wires
//! together, the way `wanctl-core`/`wanctl-transport` already separate
//! library code from any binary entry point.

pub mod cli;
pub mod config_handle;
pub mod decision_log;
pub mod ipc;
pub mod orchestrator;

pub use cli::Args;
pub use config_handle::ConfigHandle;
pub use decision_log::DecisionLog;
pub use ipc::IpcServer;
pub use orchestrator::{Orchestrator, OrchestratorCommand};
