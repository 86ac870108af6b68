//! The one cross-phase retry of failed tasks.
//!
//! Projects with retry candidates get a full dependency install into their
//! own retry cache, then each candidate task is recompiled once with a
//! command resolved against that cache. An install failure only produces a
//! warning; the recompile is attempted regardless.

use std::collections::BTreeMap;
use std::time::{Duration, Instant, SystemTime};

use super::installer::DependencyInstaller;
use crate::compile::ConfigurationBuilder;
use crate::execute::{
    ProjectJob, TaskContext, TaskRunner, apply_results, drain_in_pool, run_job, task_targets,
};
use crate::graph::{DependencyGraph, ProjectStatus, RetryInfo, TaskId, TaskStatus};
use crate::validate::revalidate_graph;

/// Reason stamped on every retried task.
pub const RETRY_REASON: &str = "Output validation failed";

/// Counters and timings of one retry phase.
#[derive(Debug, Clone, Default)]
pub struct RetryReport {
    pub tasks_requiring_retry: usize,
    pub tasks_retried: usize,
    pub successful_retries: usize,
    pub failed_retries: usize,
    pub install_duration: Duration,
    pub compile_duration: Duration,
}

/// Drives dependency installs and retry compilations.
pub struct RetryOrchestrator<'a> {
    builder: &'a ConfigurationBuilder<'a>,
    installer: DependencyInstaller<'a>,
    runner: &'a TaskRunner<'a>,
    workers: usize,
}

impl<'a> RetryOrchestrator<'a> {
    pub fn new(
        builder: &'a ConfigurationBuilder<'a>,
        installer: DependencyInstaller<'a>,
        runner: &'a TaskRunner<'a>,
        workers: usize,
    ) -> Self {
        Self {
            builder,
            installer,
            runner,
            workers: workers.max(1),
        }
    }

    /// Retry every candidate task once and update the graph's bookkeeping.
    pub fn run(
        &self,
        graph: &mut DependencyGraph,
        candidates: &BTreeMap<String, Vec<TaskId>>,
    ) -> RetryReport {
        let mut report = RetryReport {
            tasks_requiring_retry: candidates.values().map(Vec::len).sum(),
            ..Default::default()
        };
        if report.tasks_requiring_retry == 0 {
            tracing::info!("No tasks require retry - all compilations successful");
            return report;
        }
        graph.retry_status.total_tasks_requiring_retry = report.tasks_requiring_retry;

        tracing::info!("Installing full dependencies for projects requiring retry...");
        let clock = Instant::now();
        self.install_dependencies(graph, candidates);
        report.install_duration = clock.elapsed();

        tracing::info!("Executing retry compilation attempts...");
        let clock = Instant::now();
        let jobs = self.prepare_jobs(graph, candidates);
        let retried: Vec<(String, TaskId)> = jobs
            .iter()
            .flat_map(|job| {
                job.tasks
                    .iter()
                    .map(|(task, _)| (job.ctx.project_key.clone(), task.id))
            })
            .collect();

        match drain_in_pool(self.workers, jobs, |job| run_job(self.runner, job)) {
            Ok(results) => apply_results(graph, results),
            Err(e) => graph.record_critical(format!("Retry orchestration failed: {}", e), None),
        }
        revalidate_graph(graph);
        report.compile_duration = clock.elapsed();

        for (project_key, id) in &retried {
            report.tasks_retried += 1;
            match graph.task(project_key, *id).map(|t| t.status()) {
                Some(TaskStatus::Success) => report.successful_retries += 1,
                _ => report.failed_retries += 1,
            }
            if let Some(project) = graph.projects.get_mut(project_key) {
                project.retry.tasks_retried += 1;
            }
        }

        graph.retry_status.total_tasks_successfully_retried = report.successful_retries;
        graph.retry_status.total_retry_attempts = report.tasks_retried;
        tracing::info!(
            "Retry completed: {} successful, {} failed",
            report.successful_retries,
            report.failed_retries
        );
        report
    }

    fn install_dependencies(
        &self,
        graph: &mut DependencyGraph,
        candidates: &BTreeMap<String, Vec<TaskId>>,
    ) {
        for key in candidates.keys() {
            graph
                .retry_status
                .projects_requiring_full_dependencies
                .insert(key.clone());

            let Some(project) = graph.projects.get_mut(key) else {
                continue;
            };
            if project.manifest.is_none()
                || project.retry.full_dependencies_installed
                || project.retry.retry_cache_dir.is_some()
            {
                continue;
            }

            let failure = match self.installer.install(project) {
                Ok(outcome) => {
                    project.retry.retry_cache_dir = Some(outcome.cache_dir);
                    project.retry.full_dependencies_installed = outcome.success;
                    outcome.error
                }
                Err(e) => Some(e.to_string()),
            };

            match failure {
                None => {
                    graph
                        .retry_status
                        .projects_with_full_dependencies
                        .insert(key.clone());
                }
                Some(error) => {
                    project.retry.installation_errors.push(error.clone());
                    graph.record_warning(
                        format!(
                            "Dependency installation failed but will still attempt retry compilation: {}",
                            error
                        ),
                        Some(key.clone()),
                    );
                }
            }
        }
    }

    /// Reopen candidate tasks and bundle them into one job per project.
    fn prepare_jobs(
        &self,
        graph: &mut DependencyGraph,
        candidates: &BTreeMap<String, Vec<TaskId>>,
    ) -> Vec<ProjectJob> {
        let mut jobs = Vec::new();
        let mut problems: Vec<(String, String)> = Vec::new();

        for (key, ids) in candidates {
            let Some(project) = graph.projects.get_mut(key) else {
                continue;
            };
            let Some(base) = project.config.clone() else {
                continue;
            };

            let cache_dir = if project.retry.full_dependencies_installed {
                project.retry.retry_cache_dir.clone()
            } else {
                base.cache_dir.clone()
            };
            let config = match self.builder.retry_config(project, &base, cache_dir.as_deref()) {
                Ok(config) => config,
                Err(e) => {
                    problems.push((key.clone(), e.to_string()));
                    continue;
                }
            };

            let info = RetryInfo {
                reason: RETRY_REASON.to_string(),
                full_dependencies_installed: project.retry.full_dependencies_installed,
                retried_at: SystemTime::now(),
            };
            let mut reopened = Vec::new();
            for id in ids {
                let Some(task) = project.task_mut(*id) else {
                    continue;
                };
                match task.reopen_for_retry(info.clone()) {
                    Ok(()) => reopened.push(*id),
                    Err(e) => problems.push((key.clone(), format!("Cannot retry task {}: {}", id, e))),
                }
            }
            if reopened.is_empty() {
                continue;
            }

            tracing::info!(
                "Retrying {} task(s) for project {} using {} dependencies",
                reopened.len(),
                key,
                if info.full_dependencies_installed { "full" } else { "minimal" }
            );
            let tasks = project
                .tasks
                .iter()
                .filter(|t| reopened.contains(&t.id))
                .map(|t| (t.clone(), task_targets(project, t)))
                .collect();
            project.status = ProjectStatus::Compiling;

            jobs.push(ProjectJob {
                ctx: TaskContext {
                    project_key: key.clone(),
                    project_dir: project.dir.clone(),
                    config,
                },
                tasks,
            });
        }

        for (key, message) in problems {
            graph.record_warning(message, Some(key));
        }
        jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{
        CommandProbe, CommandResolver, CompilationExecutor, CompilerCommand, ProbeOutcome,
    };
    use crate::execute::TaskPlanner;
    use crate::graph::{DiscoveredProject, DiscoveryInput, Manifest};
    use crate::settings::ExtractorSettings;
    use std::path::{Path, PathBuf};

    struct NothingWorks;

    impl CommandProbe for NothingWorks {
        fn probe(&self, _command: &CompilerCommand, _source_root: &Path) -> ProbeOutcome {
            ProbeOutcome::Broken {
                error: "not installed".to_string(),
            }
        }
    }

    fn settings() -> ExtractorSettings {
        ExtractorSettings {
            global_commands: Vec::new(),
            fallback_commands: Vec::new(),
            default_command: "/missing/cds".to_string(),
            package_manager: "/missing/npm".to_string(),
            workers: 2,
            ..Default::default()
        }
    }

    fn failed_graph(root: &Path, resolver: &CommandResolver, settings: &ExtractorSettings) -> DependencyGraph {
        std::fs::create_dir_all(root.join("shop/srv")).unwrap();
        std::fs::write(root.join("shop/srv/service.cds"), "service S {}").unwrap();
        let mut input = DiscoveryInput {
            source_root: root.to_path_buf(),
            ..Default::default()
        };
        input.projects.insert(
            "shop".to_string(),
            DiscoveredProject {
                files: vec![PathBuf::from("shop/srv/service.cds")],
                manifest: Some(Manifest::default()),
                ..Default::default()
            },
        );
        let mut graph = DependencyGraph::from_discovery(input);
        let builder = ConfigurationBuilder::new(resolver, settings);
        let project = graph.projects.get_mut("shop").unwrap();
        project.config = Some(builder.configure(project).unwrap());
        TaskPlanner::new(root).plan(project).unwrap();
        let task = &mut project.tasks[0];
        task.transition(TaskStatus::InProgress).unwrap();
        task.transition(TaskStatus::Failed).unwrap();
        graph
    }

    #[test]
    fn test_failed_install_still_retries_once() {
        let temp = tempfile::TempDir::new().unwrap();
        let settings = settings();
        let resolver = CommandResolver::with_probe(temp.path(), settings.clone(), NothingWorks);
        let builder = ConfigurationBuilder::new(&resolver, &settings);
        let executor = CompilationExecutor::new(temp.path(), &settings);
        let runner = TaskRunner::new(&executor);
        let retry = RetryOrchestrator::new(
            &builder,
            DependencyInstaller::new(temp.path(), &settings),
            &runner,
            settings.workers,
        );

        let mut graph = failed_graph(temp.path(), &resolver, &settings);
        let id = graph.projects["shop"].tasks[0].id;
        let candidates = BTreeMap::from([("shop".to_string(), vec![id])]);

        let report = retry.run(&mut graph, &candidates);

        assert_eq!(report.tasks_requiring_retry, 1);
        assert_eq!(report.tasks_retried, 1);
        assert_eq!(report.failed_retries, 1);

        let project = &graph.projects["shop"];
        let task = &project.tasks[0];
        assert_eq!(task.status(), TaskStatus::Failed);
        assert!(task.has_been_retried());
        assert_eq!(task.attempts().len(), 1);
        assert_eq!(project.retry.installation_errors.len(), 1);
        assert!(!project.retry.full_dependencies_installed);
        assert_eq!(project.status, ProjectStatus::Failed);

        assert!(
            graph
                .errors
                .warnings
                .iter()
                .any(|w| w.message.starts_with("Dependency installation failed but will still attempt"))
        );
        assert!(graph.retry_status.projects_requiring_full_dependencies.contains("shop"));
        assert!(graph.retry_status.projects_with_full_dependencies.is_empty());
        assert_eq!(graph.retry_status.total_retry_attempts, 1);
    }

    #[test]
    fn test_no_candidates_is_a_no_op() {
        let temp = tempfile::TempDir::new().unwrap();
        let settings = settings();
        let resolver = CommandResolver::with_probe(temp.path(), settings.clone(), NothingWorks);
        let builder = ConfigurationBuilder::new(&resolver, &settings);
        let executor = CompilationExecutor::new(temp.path(), &settings);
        let runner = TaskRunner::new(&executor);
        let retry = RetryOrchestrator::new(
            &builder,
            DependencyInstaller::new(temp.path(), &settings),
            &runner,
            1,
        );

        let mut graph = failed_graph(temp.path(), &resolver, &settings);
        let report = retry.run(&mut graph, &BTreeMap::new());

        assert_eq!(report.tasks_retried, 0);
        assert!(!graph.projects["shop"].tasks[0].has_been_retried());
        assert!(!temp.path().join(".cds-extractor-cache").exists());
    }
}
