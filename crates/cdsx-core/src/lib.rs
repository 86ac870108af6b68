//! Compilation orchestration for the CDS extractor.
//!
//! This crate provides:
//! - Command resolution with cached environment probes
//! - Per-project compilation configuration and task planning
//! - Task execution with command fallback on a bounded worker pool
//! - Output validation and a single retry with full dependencies
//! - A run summary derived from final task state

pub mod compile;
pub mod diagnostics;
pub mod error;
pub mod execute;
pub mod graph;
pub mod orchestrator;
pub mod paths;
pub mod retry;
pub mod settings;
pub mod validate;

pub use compile::{
    CommandResolver, CompilationConfig, CompilationExecutor, CompileOutcome, CompilerCommand,
    ConfigurationBuilder, ResolvedCommand, VersionCompatibility,
};
pub use diagnostics::{CodeqlDiagnostics, DiagnosticSink, RecordingDiagnostics, ToolContext};
pub use error::{Error, Result};
pub use execute::{ParallelExecutor, TaskPlanner, TaskRunner};
pub use graph::{
    CompilationTask, DependencyGraph, DiscoveredProject, DiscoveryInput, Manifest, Project,
    ProjectStatus, RunPhase, StatusSummary, TaskStatus,
};
pub use orchestrator::Orchestrator;
pub use paths::CacheLayout;
pub use retry::{DependencyInstaller, RetryOrchestrator};
pub use settings::ExtractorSettings;
pub use validate::{identify_retry_candidates, validate_task};
