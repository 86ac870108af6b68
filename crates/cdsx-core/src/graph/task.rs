//! Compilation tasks, attempts, and the task status state machine.

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use uuid::Uuid;

use crate::compile::CompileOutcome;
use crate::error::{Error, Result};

/// Unique identifier for a compilation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a task compiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// The whole project in one invocation.
    Project,
    /// A single source file.
    File,
}

/// Status of a compilation task.
///
/// `Success` only means "the compiler exited zero" until output validation
/// has run over the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    /// Between a failed attempt and the next alternative command.
    Retry,
    Success,
    Failed,
    Skipped,
}

impl TaskStatus {
    /// Whether `self -> next` is a legal move.
    ///
    /// `Success -> Failed` is the validation downgrade. `Failed -> InProgress`
    /// is only taken by the retry phase, which gates it on retry metadata
    /// (see [`CompilationTask::reopen_for_retry`]).
    pub fn can_transition(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress | Skipped | Failed | Success)
                | (InProgress, Success | Retry | Failed | Skipped)
                | (Retry, InProgress | Failed)
                | (Success, Failed)
                | (Failed, InProgress)
        )
    }

    /// Whether no further work is scheduled for a task in this status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Skipped
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Retry => "retry",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata stamped on a task before its one cross-phase retry.
#[derive(Debug, Clone, Serialize)]
pub struct RetryInfo {
    pub reason: String,
    pub full_dependencies_installed: bool,
    pub retried_at: SystemTime,
}

/// One concrete compiler invocation for one task.
#[derive(Debug, Clone, Serialize)]
pub struct CompilationAttempt {
    pub id: Uuid,
    /// Display form of the command used.
    pub command: String,
    pub cache_dir: Option<PathBuf>,
    pub started_at: SystemTime,
    pub duration: Duration,
    pub result: CompileOutcome,
    pub error: Option<String>,
}

/// A unit of compilation work owned by one project.
#[derive(Debug, Clone, Serialize)]
pub struct CompilationTask {
    pub id: TaskId,
    pub kind: TaskKind,
    status: TaskStatus,
    /// Source files, relative to the source root.
    pub source_files: Vec<PathBuf>,
    /// Output files, relative to the source root.
    pub expected_outputs: Vec<PathBuf>,
    /// Key of the owning project.
    pub project: String,
    attempts: Vec<CompilationAttempt>,
    pub priority: u32,
    pub retry_info: Option<RetryInfo>,
    /// Last failure message, kept for diagnostics.
    pub error_summary: Option<String>,
    /// Set once diagnostics were emitted for this task. Each failed task
    /// reports once per run, however many phases it fails in.
    pub diagnostics_reported: bool,
}

impl CompilationTask {
    pub fn new(
        kind: TaskKind,
        project: impl Into<String>,
        source_files: Vec<PathBuf>,
        expected_outputs: Vec<PathBuf>,
        priority: u32,
    ) -> Self {
        Self {
            id: TaskId::new(),
            kind,
            status: TaskStatus::Pending,
            source_files,
            expected_outputs,
            project: project.into(),
            attempts: Vec::new(),
            priority,
            retry_info: None,
            error_summary: None,
            diagnostics_reported: false,
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Attempt history, oldest first.
    pub fn attempts(&self) -> &[CompilationAttempt] {
        &self.attempts
    }

    /// Move to `next`, rejecting transitions the state machine forbids.
    pub fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition(next) {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        tracing::debug!("Task {} ({}): {} -> {}", self.id, self.project, self.status, next);
        self.status = next;
        Ok(())
    }

    /// Append an attempt. Attempts are never edited once recorded.
    pub fn record_attempt(&mut self, attempt: CompilationAttempt) {
        if let Some(error) = &attempt.error {
            self.error_summary = Some(error.clone());
        }
        self.attempts.push(attempt);
    }

    /// Mark a failed task for its single retry and put it back in progress.
    ///
    /// Fails if the task already carries retry metadata.
    pub fn reopen_for_retry(&mut self, info: RetryInfo) -> Result<()> {
        if self.retry_info.is_some() {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: "in_progress (second retry)".to_string(),
            });
        }
        if self.status != TaskStatus::Failed {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: TaskStatus::InProgress.to_string(),
            });
        }
        self.retry_info = Some(info);
        self.transition(TaskStatus::InProgress)
    }

    pub fn has_been_retried(&self) -> bool {
        self.retry_info.is_some()
    }
}
