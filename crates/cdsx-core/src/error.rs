//! Error types for cdsx-core.

use thiserror::Error;

/// Result type for cdsx-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in cdsx-core.
///
/// Failed compiler attempts are not errors: they are recorded as
/// [`crate::compile::CompileOutcome`] values on the owning task.
#[derive(Debug, Error)]
pub enum Error {
    /// Building the compilation configuration for a project failed.
    #[error("configuration failed for project {project}: {message}")]
    Configuration { project: String, message: String },

    /// Planning tasks for a project failed.
    #[error("planning failed for project {project}: {message}")]
    Planning { project: String, message: String },

    /// The command resolver hit an unexpected internal failure.
    #[error("command resolution error: {0}")]
    CommandResolution(String),

    /// Compilation failed.
    #[error("compilation failed{}: {message}", project.as_ref().map(|p| format!(" for project {}", p)).unwrap_or_default())]
    Compilation {
        project: Option<String>,
        message: String,
    },

    /// Spawning or waiting on a child process failed.
    #[error("process error: {0}")]
    Process(String),

    /// A task status change that the state machine does not allow.
    #[error("invalid task transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Dependency installation failed.
    #[error("dependency installation failed: {0}")]
    Install(String),

    /// Execution error (worker pool, lock poisoning).
    #[error("execution error: {0}")]
    Execution(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Render the error with a short recovery hint, for terminal output.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Error::CommandResolution(_) => {
                Some("check that `cds` or `npx` is on PATH and runnable from the source root")
            }
            Error::Install(_) => Some("verify network access and the project's package.json"),
            Error::Json(_) => Some("the discovery graph must be a JSON object keyed by project"),
            Error::Execution(_) => Some("re-run with -v for worker details"),
            _ => None,
        };

        match hint {
            Some(hint) => format!("{}\n  hint: {}", self, hint),
            None => self.to_string(),
        }
    }
}
