//! Retry phase: full dependency installs and one recompile per failed task.

mod installer;
mod orchestrator;

pub use installer::{DependencyInstaller, INSTALL_ARGS, InstallOutcome, retry_manifest};
pub use orchestrator::{RETRY_REASON, RetryOrchestrator, RetryReport};
