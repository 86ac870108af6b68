//! Executes one task: primary command first, then alternatives.

use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};

use uuid::Uuid;

use crate::compile::{CompilationConfig, CompilationExecutor, CompileRequest};
use crate::diagnostics::{DiagnosticSink, ToolContext};
use crate::error::Result;
use crate::graph::{CompilationAttempt, CompilationTask, TaskKind, TaskStatus};

/// Project facts a task needs to run, detached from the graph.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub project_key: String,
    /// Project directory, relative to the source root.
    pub project_dir: PathBuf,
    pub config: CompilationConfig,
}

/// Runs tasks through a [`CompilationExecutor`].
pub struct TaskRunner<'a> {
    executor: &'a CompilationExecutor,
}

impl<'a> TaskRunner<'a> {
    pub fn new(executor: &'a CompilationExecutor) -> Self {
        Self { executor }
    }

    pub fn source_root(&self) -> &Path {
        self.executor.source_root()
    }

    /// Run `task` until one command succeeds or the attempt plan is used up.
    ///
    /// Every invocation is appended to the task's attempt history. A task
    /// that exhausts its plan ends `Failed`; diagnostics for it are left to
    /// [`report_failure`] once no retry can change the outcome.
    pub fn run(&self, ctx: &TaskContext, task: &mut CompilationTask, targets: &[String]) -> Result<()> {
        let source_root = self.executor.source_root();
        if task.kind == TaskKind::File
            && task.source_files.iter().all(|f| !source_root.join(f).exists())
        {
            tracing::warn!(
                "Skipping task {}: source file(s) no longer exist in project {}",
                task.id,
                ctx.project_key
            );
            return task.transition(TaskStatus::Skipped);
        }

        if task.status() != TaskStatus::InProgress {
            task.transition(TaskStatus::InProgress)?;
        }

        let unit = ctx.config.use_unit_compilation;
        let output = task.expected_outputs.first().cloned().unwrap_or_default();

        for (index, command) in ctx.config.attempt_plan().enumerate() {
            if index > 0 {
                task.transition(TaskStatus::Retry)?;
                tracing::info!(
                    "Retrying task {} with alternative command {}",
                    task.id,
                    command
                );
                task.transition(TaskStatus::InProgress)?;
            }

            let started_at = SystemTime::now();
            let clock = Instant::now();
            let outcome = self.executor.compile(&CompileRequest {
                project_key: &ctx.project_key,
                project_dir: &ctx.project_dir,
                targets,
                output: &output,
                unit,
                command,
                cache_dir: ctx.config.cache_dir.as_deref(),
            });
            let success = outcome.success;

            task.record_attempt(CompilationAttempt {
                id: Uuid::new_v4(),
                command: command.display.clone(),
                cache_dir: ctx.config.cache_dir.clone(),
                started_at,
                duration: clock.elapsed(),
                error: (!success).then(|| outcome.message.clone()),
                result: outcome,
            });

            if success {
                return task.transition(TaskStatus::Success);
            }
        }

        task.transition(TaskStatus::Failed)?;
        tracing::error!(
            "Compilation failed for task {} after {} attempt(s): {}",
            task.id,
            task.attempts().len(),
            task.error_summary.as_deref().unwrap_or("unknown error")
        );
        Ok(())
    }
}

/// Emit one diagnostic per source file of a failed task, once per run.
pub fn report_failure(
    task: &mut CompilationTask,
    source_root: &Path,
    sink: &dyn DiagnosticSink,
    tool: &ToolContext,
) {
    if task.diagnostics_reported || task.status() != TaskStatus::Failed {
        return;
    }
    let message = task
        .error_summary
        .clone()
        .unwrap_or_else(|| "Compilation failed".to_string());
    for file in &task.source_files {
        sink.add_diagnostic(&source_root.join(file), &message, tool);
    }
    task.diagnostics_reported = true;
}
