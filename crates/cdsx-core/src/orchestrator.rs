//! Whole-run driver.
//!
//! Phases run in a fixed order over one [`DependencyGraph`]:
//!
//! 1. configure every project (command, cache, compile mode)
//! 2. plan tasks
//! 3. compile on the worker pool
//! 4. validate outputs and pick retry candidates
//! 5. retry candidates once with full dependencies
//! 6. report definitive failures and recompute the summary
//!
//! A failure inside one project never stops the others; it becomes a
//! critical entry in the graph's error log and a `failed` project.

use std::time::{Instant, SystemTime};

use crate::compile::{CommandResolver, CompilationExecutor, ConfigurationBuilder};
use crate::diagnostics::{DiagnosticSink, ToolContext};
use crate::error::{Error, Result};
use crate::execute::{ParallelExecutor, TaskPlanner, TaskRunner, report_failure};
use crate::graph::{DependencyGraph, DiscoveryInput, ProjectStatus, RunPhase, TaskStatus};
use crate::retry::{DependencyInstaller, RetryOrchestrator};
use crate::settings::ExtractorSettings;
use crate::validate::identify_retry_candidates;

/// Runs the compilation phases for a discovery graph.
pub struct Orchestrator<'a> {
    settings: ExtractorSettings,
    diagnostics: &'a dyn DiagnosticSink,
    tool: ToolContext,
    analyze_commands: bool,
}

impl<'a> Orchestrator<'a> {
    pub fn new(settings: ExtractorSettings, diagnostics: &'a dyn DiagnosticSink) -> Self {
        Self {
            settings,
            diagnostics,
            tool: ToolContext::default(),
            analyze_commands: false,
        }
    }

    /// Tooling handed to the diagnostics sink.
    pub fn with_tool(mut self, tool: ToolContext) -> Self {
        self.tool = tool;
        self
    }

    /// Probe every command strategy up front and keep the results in the
    /// graph's debug info. Costs one probe per candidate.
    pub fn with_command_analysis(mut self, enabled: bool) -> Self {
        self.analyze_commands = enabled;
        self
    }

    pub fn settings(&self) -> &ExtractorSettings {
        &self.settings
    }

    /// Run all phases with a process-probing resolver.
    pub fn run(&self, input: DiscoveryInput) -> Result<DependencyGraph> {
        let resolver = CommandResolver::new(&input.source_root, self.settings.clone());
        self.run_with_resolver(input, &resolver)
    }

    /// Run all phases with a caller-supplied resolver.
    ///
    /// Only an unusable source root is an error; everything else ends up in
    /// the returned graph.
    pub fn run_with_resolver(
        &self,
        input: DiscoveryInput,
        resolver: &CommandResolver,
    ) -> Result<DependencyGraph> {
        let started = Instant::now();
        let source_root = input.source_root.clone();
        let mut graph = DependencyGraph::from_discovery(input);
        tracing::info!(
            "Starting CDS compilation for {} project(s) under {}",
            graph.projects.len(),
            graph.source_root.display()
        );

        if !source_root.is_dir() {
            let err = Error::CommandResolution(format!(
                "source root {} is not a directory",
                source_root.display()
            ));
            tracing::error!("{}", err);
            return Err(err);
        }

        self.collect_debug_info(&mut graph, resolver);

        let builder = ConfigurationBuilder::new(resolver, &self.settings);
        let clock = Instant::now();
        self.configure(&mut graph, &builder);
        graph.summary.durations.configuration = clock.elapsed();

        self.plan(&mut graph);

        let executor = CompilationExecutor::new(source_root.as_path(), &self.settings);
        let runner = TaskRunner::new(&executor);
        let clock = Instant::now();
        graph.phase = RunPhase::Compiling;
        if let Err(e) = ParallelExecutor::new(self.settings.workers).execute(&mut graph, &runner) {
            graph.record_critical(format!("Compilation phase failed: {}", e), None);
        }
        graph.summary.durations.compilation = clock.elapsed();

        graph.phase = RunPhase::Validating;
        let candidates = identify_retry_candidates(&mut graph);
        graph.recompute_summary();
        tracing::info!(
            "Initial compilation: {} succeeded, {} failed, {} task(s) to retry",
            graph.summary.successful_compilations,
            graph.summary.failed_compilations,
            candidates.values().map(Vec::len).sum::<usize>()
        );

        graph.phase = RunPhase::Retrying;
        let clock = Instant::now();
        let installer = DependencyInstaller::new(&source_root, &self.settings);
        let retry = RetryOrchestrator::new(&builder, installer, &runner, self.settings.workers);
        retry.run(&mut graph, &candidates);
        graph.summary.durations.retry = clock.elapsed();

        self.report_failures(&mut graph);
        self.finish(&mut graph, started);
        Ok(graph)
    }

    fn collect_debug_info(&self, graph: &mut DependencyGraph, resolver: &CommandResolver) {
        graph.phase = RunPhase::Initializing;
        graph.debug.global_command = resolver.global_command().map(|c| c.display.clone());
        graph.debug.discovered_cache_dirs = resolver.discovered_cache_dirs().to_vec();
        if self.analyze_commands {
            graph.debug.command_analysis = resolver.analysis(None);
            tracing::debug!(
                "Command analysis: {} strategies probed",
                graph.debug.command_analysis.len()
            );
        }
    }

    fn configure(&self, graph: &mut DependencyGraph, builder: &ConfigurationBuilder<'_>) {
        graph.phase = RunPhase::Configuring;
        let keys: Vec<String> = graph.projects.keys().cloned().collect();

        for key in keys {
            let Some(project) = graph.projects.get(&key) else {
                continue;
            };
            let result = builder.configure(project);

            match result {
                Ok(config) => {
                    let compat = &config.version_compatibility;
                    let warning = match compat.message() {
                        Some(message) if compat.is_compatible() => {
                            tracing::warn!("{}: {}", key, message);
                            None
                        }
                        other => other,
                    };
                    if let Some(project) = graph.projects.get_mut(&key) {
                        project.config = Some(config);
                        project.status = ProjectStatus::Configured;
                        project.timestamps.configured = Some(SystemTime::now());
                    }
                    if let Some(message) = warning {
                        graph.record_warning(message, Some(key.clone()));
                    }
                }
                Err(e) => {
                    if let Some(project) = graph.projects.get_mut(&key) {
                        project.status = ProjectStatus::Failed;
                    }
                    graph.record_critical(e.to_string(), Some(key.clone()));
                }
            }
        }
    }

    fn plan(&self, graph: &mut DependencyGraph) {
        graph.phase = RunPhase::CompilationPlanning;
        let planner = TaskPlanner::new(&graph.source_root);
        let mut failures = Vec::new();

        for (key, project) in graph.projects.iter_mut() {
            if project.status != ProjectStatus::Configured {
                continue;
            }
            if let Err(e) = planner.plan(project) {
                project.status = ProjectStatus::Failed;
                failures.push((key.clone(), e.to_string()));
            }
        }

        for (key, message) in failures {
            graph.record_critical(message, Some(key));
        }
    }

    /// Emit diagnostics for every task still failed that was not yet reported.
    fn report_failures(&self, graph: &mut DependencyGraph) {
        let source_root = graph.source_root.clone();
        for task in graph.projects.values_mut().flat_map(|p| p.tasks.iter_mut()) {
            if task.status() == TaskStatus::Failed {
                report_failure(task, &source_root, self.diagnostics, &self.tool);
            }
        }
    }

    fn finish(&self, graph: &mut DependencyGraph, started: Instant) {
        for project in graph.projects.values_mut() {
            project.derive_status();
        }
        graph.summary.durations.total = started.elapsed();
        graph.recompute_summary();
        graph.phase = if graph.errors.critical.is_empty() {
            RunPhase::Completed
        } else {
            RunPhase::Failed
        };

        let summary = &graph.summary;
        tracing::info!(
            "CDS compilation finished: {} project(s), {} task(s), {} succeeded, {} failed, {} skipped, {} retried",
            summary.total_projects,
            summary.total_compilation_tasks,
            summary.successful_compilations,
            summary.failed_compilations,
            summary.skipped_compilations,
            summary.retried_compilations
        );
    }
}
