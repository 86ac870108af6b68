//! Compile command implementation.
//!
//! Loads a discovery graph, runs the orchestration and prints the summary.

use std::path::PathBuf;

use anyhow::Context;
use cdsx_core::{
    CodeqlDiagnostics, DependencyGraph, DiagnosticSink, DiscoveryInput, ExtractorSettings,
    Orchestrator, RecordingDiagnostics, ToolContext,
};
use serde_json::json;

pub struct CompileOptions {
    pub graph: PathBuf,
    pub source_root: Option<PathBuf>,
    pub workers: Option<usize>,
    pub dry_run: bool,
    pub analyze_commands: bool,
    pub summary: Option<PathBuf>,
}

/// Run the orchestration. Returns the run's overall success.
pub fn execute(options: &CompileOptions) -> anyhow::Result<bool> {
    let raw = std::fs::read_to_string(&options.graph)
        .with_context(|| format!("failed to read discovery graph {}", options.graph.display()))?;
    let mut input: DiscoveryInput =
        serde_json::from_str(&raw).map_err(cdsx_core::Error::from)?;
    if let Some(root) = &options.source_root {
        input.source_root = root.clone();
    }

    let mut settings = ExtractorSettings::from_env();
    if let Some(workers) = options.workers {
        settings.workers = workers.max(1);
    }

    let recorder = RecordingDiagnostics::new();
    let codeql = CodeqlDiagnostics;
    let sink: &dyn DiagnosticSink = if options.dry_run { &recorder } else { &codeql };

    let graph = Orchestrator::new(settings, sink)
        .with_tool(ToolContext::from_env())
        .with_command_analysis(options.analyze_commands)
        .run(input)?;

    let mut report = summary_json(&graph);
    if options.dry_run {
        report["diagnostics"] = recorder
            .recorded()
            .into_iter()
            .map(|d| json!({ "sourceFile": d.source_file, "message": d.message }))
            .collect();
    }

    let rendered = serde_json::to_string_pretty(&report)?;
    match &options.summary {
        Some(path) => std::fs::write(path, rendered)
            .with_context(|| format!("failed to write summary {}", path.display()))?,
        None => println!("{}", rendered),
    }

    Ok(graph.summary.overall_success)
}

fn summary_json(graph: &DependencyGraph) -> serde_json::Value {
    json!({
        "phase": graph.phase.as_str(),
        "summary": graph.summary,
        "retryStatus": graph.retry_status,
        "errors": graph.errors,
        "debug": graph.debug,
    })
}
