//! Graph data model: projects, counters, error log, and discovery input.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use super::task::{CompilationTask, TaskId, TaskStatus};
use crate::compile::{CommandAnalysisEntry, CompilationConfig};

/// A project's `package.json`, reduced to the fields the extractor reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub dev_dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_dependencies: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engines: Option<BTreeMap<String, String>>,
}

/// One project as handed over by the discovery collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredProject {
    /// Source files, relative to the source root (absolute paths under the
    /// root are accepted and relativized).
    pub files: Vec<PathBuf>,
    #[serde(default)]
    pub manifest: Option<Manifest>,
    /// Keys of projects this one imports from.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Discovery flagged the project for whole-project compilation.
    #[serde(default)]
    pub unit_compilation: bool,
}

/// The discovery graph consumed by the orchestrator.
///
/// Projects are keyed by their directory relative to the source root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryInput {
    pub source_root: PathBuf,
    pub projects: BTreeMap<String, DiscoveredProject>,
    /// Seeded cache directory assigned to each project, if any.
    #[serde(default)]
    pub cache_dirs: BTreeMap<String, PathBuf>,
}

/// Derived lifecycle status of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Discovered,
    Configured,
    CompilationPlanned,
    Compiling,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectTimestamps {
    pub discovered: Option<SystemTime>,
    pub configured: Option<SystemTime>,
    pub planned: Option<SystemTime>,
    pub compilation_started: Option<SystemTime>,
    pub compilation_finished: Option<SystemTime>,
}

/// Retry bookkeeping for one project.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectRetryState {
    /// A full dependency install completed successfully.
    pub full_dependencies_installed: bool,
    /// Cache directory of the install, set once one was attempted.
    pub retry_cache_dir: Option<PathBuf>,
    pub installation_errors: Vec<String>,
    pub tasks_retried: usize,
}

/// A discovered project and everything computed for it during a run.
#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub key: String,
    /// Project directory, relative to the source root.
    pub dir: PathBuf,
    /// Source files, relative to the source root.
    pub files: Vec<PathBuf>,
    pub manifest: Option<Manifest>,
    pub depends_on: Vec<String>,
    pub unit_requested: bool,
    /// Seeded cache directory assigned by discovery.
    pub cache_dir: Option<PathBuf>,
    /// Compiler targets, relative to the project directory.
    pub targets: Vec<String>,
    /// Outputs of all planned tasks, relative to the source root.
    pub expected_outputs: Vec<PathBuf>,
    pub config: Option<CompilationConfig>,
    pub tasks: Vec<CompilationTask>,
    pub status: ProjectStatus,
    pub timestamps: ProjectTimestamps,
    pub retry: ProjectRetryState,
}

impl Project {
    /// Absolute project directory.
    pub fn base_dir(&self, source_root: &Path) -> PathBuf {
        source_root.join(&self.dir)
    }

    /// Recompute the status from task state.
    ///
    /// Only changes anything once every task is terminal: `Completed` when
    /// no task failed, `Failed` otherwise.
    pub fn derive_status(&mut self) {
        if self.tasks.is_empty() || !self.tasks.iter().all(|t| t.status().is_terminal()) {
            return;
        }
        self.status = if self.tasks.iter().any(|t| t.status() == TaskStatus::Failed) {
            ProjectStatus::Failed
        } else {
            ProjectStatus::Completed
        };
    }

    pub fn task_mut(&mut self, id: TaskId) -> Option<&mut CompilationTask> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }
}

/// Run phase of the whole graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Initializing,
    Configuring,
    CompilationPlanning,
    Compiling,
    Validating,
    Retrying,
    Completed,
    Failed,
}

impl RunPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RunPhase::Initializing => "initializing",
            RunPhase::Configuring => "configuring",
            RunPhase::CompilationPlanning => "compilation_planning",
            RunPhase::Compiling => "compiling",
            RunPhase::Validating => "validating",
            RunPhase::Retrying => "retrying",
            RunPhase::Completed => "completed",
            RunPhase::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PhaseDurations {
    pub configuration: Duration,
    pub compilation: Duration,
    pub retry: Duration,
    pub total: Duration,
}

/// Aggregated counters. Always derived from task state.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub overall_success: bool,
    pub total_projects: usize,
    pub total_source_files: usize,
    pub total_compilation_tasks: usize,
    pub successful_compilations: usize,
    pub failed_compilations: usize,
    pub skipped_compilations: usize,
    pub retried_compilations: usize,
    pub json_files_generated: usize,
    pub critical_errors: usize,
    pub warnings: usize,
    pub durations: PhaseDurations,
}

/// An error or warning attributed to a run phase.
#[derive(Debug, Clone, Serialize)]
pub struct RunError {
    pub phase: RunPhase,
    pub message: String,
    pub timestamp: SystemTime,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorLog {
    pub critical: Vec<RunError>,
    pub warnings: Vec<RunError>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryStatus {
    pub total_tasks_requiring_retry: usize,
    pub total_tasks_successfully_retried: usize,
    pub total_retry_attempts: usize,
    pub projects_requiring_full_dependencies: BTreeSet<String>,
    pub projects_with_full_dependencies: BTreeSet<String>,
}

/// Environment facts gathered for troubleshooting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DebugInfo {
    pub global_command: Option<String>,
    pub discovered_cache_dirs: Vec<PathBuf>,
    pub command_analysis: Vec<CommandAnalysisEntry>,
}

/// Aggregate root for one extraction run.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyGraph {
    pub source_root: PathBuf,
    pub projects: BTreeMap<String, Project>,
    pub phase: RunPhase,
    pub summary: StatusSummary,
    pub errors: ErrorLog,
    pub retry_status: RetryStatus,
    pub debug: DebugInfo,
}

impl DependencyGraph {
    /// Build the run graph from discovery output.
    pub fn from_discovery(input: DiscoveryInput) -> Self {
        let source_root = input.source_root;
        let now = SystemTime::now();

        let projects = input
            .projects
            .into_iter()
            .map(|(key, discovered)| {
                let files = discovered
                    .files
                    .into_iter()
                    .map(|f| relativize(&source_root, f))
                    .collect();
                let cache_dir = input
                    .cache_dirs
                    .get(&key)
                    .map(|dir| source_root.join(dir));
                let dir = if key == "." {
                    PathBuf::new()
                } else {
                    PathBuf::from(&key)
                };
                let project = Project {
                    dir,
                    key: key.clone(),
                    files,
                    manifest: discovered.manifest,
                    depends_on: discovered.depends_on,
                    unit_requested: discovered.unit_compilation,
                    cache_dir,
                    targets: Vec::new(),
                    expected_outputs: Vec::new(),
                    config: None,
                    tasks: Vec::new(),
                    status: ProjectStatus::Discovered,
                    timestamps: ProjectTimestamps {
                        discovered: Some(now),
                        ..Default::default()
                    },
                    retry: ProjectRetryState::default(),
                };
                (key, project)
            })
            .collect();

        let mut graph = Self {
            source_root,
            projects,
            phase: RunPhase::Initializing,
            summary: StatusSummary::default(),
            errors: ErrorLog::default(),
            retry_status: RetryStatus::default(),
            debug: DebugInfo::default(),
        };
        graph.recompute_summary();
        graph
    }

    pub fn tasks(&self) -> impl Iterator<Item = &CompilationTask> {
        self.projects.values().flat_map(|p| p.tasks.iter())
    }

    pub fn task(&self, project: &str, id: TaskId) -> Option<&CompilationTask> {
        self.projects
            .get(project)
            .and_then(|p| p.tasks.iter().find(|t| t.id == id))
    }

    pub fn record_critical(&mut self, message: impl Into<String>, context: Option<String>) {
        let message = message.into();
        tracing::error!("[{}] {}", self.phase.as_str(), message);
        self.errors.critical.push(RunError {
            phase: self.phase,
            message,
            timestamp: SystemTime::now(),
            context,
        });
    }

    pub fn record_warning(&mut self, message: impl Into<String>, context: Option<String>) {
        let message = message.into();
        tracing::warn!("[{}] {}", self.phase.as_str(), message);
        self.errors.warnings.push(RunError {
            phase: self.phase,
            message,
            timestamp: SystemTime::now(),
            context,
        });
    }

    /// Recompute every counter in [`StatusSummary`] from current task state.
    ///
    /// Durations are left untouched; they are measured by the orchestrator.
    pub fn recompute_summary(&mut self) {
        let mut summary = StatusSummary {
            durations: self.summary.durations.clone(),
            total_projects: self.projects.len(),
            total_source_files: self.projects.values().map(|p| p.files.len()).sum(),
            ..Default::default()
        };

        for task in self.tasks() {
            summary.total_compilation_tasks += 1;
            match task.status() {
                TaskStatus::Success => {
                    summary.successful_compilations += 1;
                    summary.json_files_generated += task.expected_outputs.len();
                }
                TaskStatus::Failed => summary.failed_compilations += 1,
                TaskStatus::Skipped => summary.skipped_compilations += 1,
                _ => {}
            }
            if task.has_been_retried() {
                summary.retried_compilations += 1;
            }
        }

        summary.critical_errors = self.errors.critical.len();
        summary.warnings = self.errors.warnings.len();
        summary.overall_success = summary.failed_compilations == 0
            && summary.critical_errors == 0
            && !self
                .projects
                .values()
                .any(|p| p.status == ProjectStatus::Failed);

        self.summary = summary;
    }
}

fn relativize(source_root: &Path, file: PathBuf) -> PathBuf {
    match file.strip_prefix(source_root) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => file,
    }
}
