//! Run graph: projects, tasks, and aggregated status.

mod task;
mod types;

pub use task::{
    CompilationAttempt, CompilationTask, RetryInfo, TaskId, TaskKind, TaskStatus,
};
pub use types::{
    DebugInfo, DependencyGraph, DiscoveredProject, DiscoveryInput, ErrorLog, Manifest,
    PhaseDurations, Project, ProjectRetryState, ProjectStatus, ProjectTimestamps, RetryStatus,
    RunError, RunPhase, StatusSummary,
};
