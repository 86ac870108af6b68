//! Bounded worker pool over a priority-ordered list of project jobs.
//!
//! Projects never share an output path or cache directory, so each project
//! is one job and jobs run concurrently. Tasks inside a job run in order.
//! Workers own their task copies and hand them back; only the calling
//! thread touches the graph.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::SystemTime;

use rayon::prelude::*;

use super::planner::task_targets;
use super::runner::{TaskContext, TaskRunner};
use crate::error::{Error, Result};
use crate::graph::{CompilationTask, DependencyGraph, ProjectStatus, TaskId, TaskStatus};

/// Work for one project: its context and the tasks to run, in order.
#[derive(Debug, Clone)]
pub struct ProjectJob {
    pub ctx: TaskContext,
    pub tasks: Vec<(CompilationTask, Vec<String>)>,
}

impl ProjectJob {
    /// Highest task priority in the job.
    pub fn priority(&self) -> u32 {
        self.tasks.iter().map(|(t, _)| t.priority).max().unwrap_or(0)
    }
}

/// What a worker sends back for one job.
#[derive(Debug)]
pub struct JobResult {
    pub project_key: String,
    pub tasks: Vec<CompilationTask>,
    pub errors: Vec<String>,
}

/// Order jobs by descending priority, keeping discovery order among equals.
pub fn order_jobs(jobs: &mut [ProjectJob]) {
    for job in jobs.iter_mut() {
        job.tasks.sort_by(|a, b| b.0.priority.cmp(&a.0.priority));
    }
    jobs.sort_by(|a, b| b.priority().cmp(&a.priority()));
}

/// Run `work` over `jobs` on a pool of `workers` threads.
///
/// Results come back in job order. With one worker jobs also run in order.
pub fn drain_in_pool<J, R, F>(workers: usize, jobs: Vec<J>, work: F) -> Result<Vec<R>>
where
    J: Send,
    R: Send,
    F: Fn(J) -> R + Sync + Send,
{
    if jobs.is_empty() {
        return Ok(Vec::new());
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.clamp(1, jobs.len()))
        .thread_name(|i| format!("cdsx-worker-{}", i))
        .build()
        .map_err(|e| Error::Execution(format!("Failed to build worker pool: {}", e)))?;

    Ok(pool.install(|| jobs.into_par_iter().map(work).collect()))
}

/// Runs every planned task of the graph on a bounded pool.
pub struct ParallelExecutor {
    workers: usize,
}

impl ParallelExecutor {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Build jobs for every planned project that still has pending tasks.
    pub fn collect_jobs(graph: &DependencyGraph) -> Vec<ProjectJob> {
        graph
            .projects
            .values()
            .filter(|p| p.status == ProjectStatus::CompilationPlanned)
            .filter_map(|project| {
                let config = project.config.clone()?;
                let tasks: Vec<_> = project
                    .tasks
                    .iter()
                    .filter(|t| t.status() == TaskStatus::Pending)
                    .map(|t| (t.clone(), task_targets(project, t)))
                    .collect();
                if tasks.is_empty() {
                    return None;
                }
                Some(ProjectJob {
                    ctx: TaskContext {
                        project_key: project.key.clone(),
                        project_dir: project.dir.clone(),
                        config,
                    },
                    tasks,
                })
            })
            .collect()
    }

    /// Execute all pending tasks and fold results back into the graph.
    pub fn execute(&self, graph: &mut DependencyGraph, runner: &TaskRunner<'_>) -> Result<()> {
        let mut jobs = Self::collect_jobs(graph);
        order_jobs(&mut jobs);
        tracing::info!(
            "Executing {} project job(s) on up to {} worker(s)",
            jobs.len(),
            self.workers
        );

        let now = SystemTime::now();
        for job in &jobs {
            if let Some(project) = graph.projects.get_mut(&job.ctx.project_key) {
                project.status = ProjectStatus::Compiling;
                project.timestamps.compilation_started = Some(now);
            }
        }

        let results = drain_in_pool(self.workers, jobs, |job| run_job(runner, job))?;
        apply_results(graph, results);
        Ok(())
    }
}

/// Run a job's tasks in order on the current thread.
pub fn run_job(runner: &TaskRunner<'_>, job: ProjectJob) -> JobResult {
    run_job_with(job, |ctx, task, targets| runner.run(ctx, task, targets))
}

/// Run a job's tasks with `run`. A panicking task is failed and recorded as
/// a job error; the remaining tasks still run.
pub fn run_job_with<F>(job: ProjectJob, run: F) -> JobResult
where
    F: Fn(&TaskContext, &mut CompilationTask, &[String]) -> Result<()>,
{
    let mut errors = Vec::new();
    let mut tasks = Vec::with_capacity(job.tasks.len());
    for (mut task, targets) in job.tasks {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| run(&job.ctx, &mut task, &targets)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                errors.push(format!("Failed to execute compilation task {}: {}", task.id, e));
            }
            Err(payload) => {
                let message = format!(
                    "Compilation task {} panicked: {}",
                    task.id,
                    panic_message(payload.as_ref())
                );
                tracing::error!("{}", message);
                fail_task(&mut task, &message);
                errors.push(message);
            }
        }
        tasks.push(task);
    }
    JobResult {
        project_key: job.ctx.project_key,
        tasks,
        errors,
    }
}

fn fail_task(task: &mut CompilationTask, message: &str) {
    task.error_summary = Some(message.to_string());
    if matches!(task.status(), TaskStatus::Failed | TaskStatus::Skipped) {
        return;
    }
    if let Err(e) = task.transition(TaskStatus::Failed) {
        tracing::warn!("Could not fail task {}: {}", task.id, e);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

/// Replace graph tasks with worker copies and re-derive project status.
pub fn apply_results(graph: &mut DependencyGraph, results: Vec<JobResult>) {
    for result in results {
        let mut errors = result.errors;
        match graph.projects.get_mut(&result.project_key) {
            Some(project) => {
                for task in result.tasks {
                    let id: TaskId = task.id;
                    if let Some(slot) = project.task_mut(id) {
                        *slot = task;
                    }
                }
                project.derive_status();
                if !errors.is_empty() {
                    project.status = ProjectStatus::Failed;
                }
                project.timestamps.compilation_finished = Some(SystemTime::now());
            }
            None => errors.push(format!("Unknown project {} in job result", result.project_key)),
        }
        for error in errors {
            graph.record_critical(error, Some(result.project_key.clone()));
        }
    }
}
