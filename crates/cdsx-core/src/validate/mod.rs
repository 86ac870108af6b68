//! Output validation.
//!
//! A zero exit code is not proof of a usable artifact. Every expected output
//! is checked on disk, and tasks that claimed success without a valid
//! artifact are downgraded to `Failed` here. This is the only place that
//! happens.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use crate::graph::{CompilationTask, DependencyGraph, TaskId, TaskStatus};

/// Result of checking one expected output path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutputStatus {
    Valid,
    Missing,
    Empty,
    InvalidJson { error: String },
    /// Parsed, but the top-level value is not an object.
    NotAnObject { found: &'static str },
    /// A directory output holding no JSON artifact.
    EmptyDirectory,
    /// A directory output with at least one bad artifact.
    InvalidArtifact { path: PathBuf, reason: Box<OutputStatus> },
}

impl OutputStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, OutputStatus::Valid)
    }

    /// Human-readable reason, for logs.
    pub fn describe(&self) -> String {
        match self {
            OutputStatus::Valid => "valid".to_string(),
            OutputStatus::Missing => "output file does not exist".to_string(),
            OutputStatus::Empty => "output file is empty".to_string(),
            OutputStatus::InvalidJson { error } => format!("output is not valid JSON: {}", error),
            OutputStatus::NotAnObject { found } => {
                format!("output JSON is a {}, expected an object", found)
            }
            OutputStatus::EmptyDirectory => "output directory contains no JSON files".to_string(),
            OutputStatus::InvalidArtifact { path, reason } => {
                format!("{}: {}", path.display(), reason.describe())
            }
        }
    }
}

/// Validation result for one expected output.
#[derive(Debug, Clone, Serialize)]
pub struct FileValidation {
    /// Path relative to the source root.
    pub path: PathBuf,
    pub status: OutputStatus,
}

/// Validation result for a whole task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskValidation {
    pub is_valid: bool,
    pub per_file: Vec<FileValidation>,
}

impl TaskValidation {
    /// First failing check, for log messages.
    pub fn first_problem(&self) -> Option<String> {
        self.per_file
            .iter()
            .find(|f| !f.status.is_valid())
            .map(|f| format!("{}: {}", f.path.display(), f.status.describe()))
    }
}

fn is_json_artifact(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

/// Check a single output path on disk.
///
/// Non-JSON names only need to exist. JSON artifacts must be non-empty,
/// parse, and hold an object at the top level. A directory is valid when it
/// holds at least one JSON artifact and all of them are valid.
pub fn validate_output(path: &Path) -> OutputStatus {
    if path.is_dir() {
        return validate_output_dir(path);
    }
    if !path.exists() {
        return OutputStatus::Missing;
    }
    if !is_json_artifact(path) {
        return OutputStatus::Valid;
    }
    validate_json_file(path)
}

fn validate_json_file(path: &Path) -> OutputStatus {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            return OutputStatus::InvalidJson {
                error: e.to_string(),
            };
        }
    };
    if content.trim().is_empty() {
        return OutputStatus::Empty;
    }
    match serde_json::from_str::<serde_json::Value>(&content) {
        Ok(serde_json::Value::Object(_)) => OutputStatus::Valid,
        Ok(value) => OutputStatus::NotAnObject {
            found: json_kind(&value),
        },
        Err(e) => OutputStatus::InvalidJson {
            error: e.to_string(),
        },
    }
}

fn validate_output_dir(dir: &Path) -> OutputStatus {
    let mut seen = 0;
    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() || !is_json_artifact(entry.path()) {
            continue;
        }
        seen += 1;
        let status = validate_json_file(entry.path());
        if !status.is_valid() {
            return OutputStatus::InvalidArtifact {
                path: entry.into_path(),
                reason: Box::new(status),
            };
        }
    }
    if seen == 0 {
        OutputStatus::EmptyDirectory
    } else {
        OutputStatus::Valid
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Check every expected output of `task`.
pub fn validate_task(task: &CompilationTask, source_root: &Path) -> TaskValidation {
    let per_file: Vec<FileValidation> = task
        .expected_outputs
        .iter()
        .map(|path| FileValidation {
            path: path.clone(),
            status: validate_output(&source_root.join(path)),
        })
        .collect();
    TaskValidation {
        is_valid: !per_file.is_empty() && per_file.iter().all(|f| f.status.is_valid()),
        per_file,
    }
}

/// Downgrade `task` to `Failed` if it claims success without valid outputs.
///
/// Returns true when the task was downgraded.
pub fn downgrade_if_invalid(task: &mut CompilationTask, source_root: &Path) -> bool {
    if task.status() != TaskStatus::Success {
        return false;
    }
    let validation = validate_task(task, source_root);
    if validation.is_valid {
        return false;
    }
    let problem = validation
        .first_problem()
        .unwrap_or_else(|| "no expected outputs".to_string());
    tracing::warn!(
        "Task {} ({}) reported success but output validation failed: {}",
        task.id,
        task.project,
        problem
    );
    task.error_summary = Some(format!("Output validation failed: {}", problem));
    // Success -> Failed is always legal.
    task.transition(TaskStatus::Failed).is_ok()
}

/// Validate every successful task in the graph, retried ones included.
///
/// Returns the number of tasks downgraded. Project statuses are re-derived.
pub fn revalidate_graph(graph: &mut DependencyGraph) -> usize {
    let source_root = graph.source_root.clone();
    let mut downgraded = 0;
    for project in graph.projects.values_mut() {
        let before = downgraded;
        for task in &mut project.tasks {
            if downgrade_if_invalid(task, &source_root) {
                downgraded += 1;
            }
        }
        if downgraded > before {
            project.derive_status();
        }
    }
    downgraded
}

/// Tasks eligible for the retry phase, per project.
///
/// Outputs are checked whatever the recorded status: successful tasks are
/// downgraded if their outputs are invalid, and failed tasks are returned
/// only while their outputs are invalid. Tasks already carrying retry
/// metadata and skipped tasks are never returned. Projects without
/// candidates are left out of the map.
pub fn identify_retry_candidates(graph: &mut DependencyGraph) -> BTreeMap<String, Vec<TaskId>> {
    let source_root = graph.source_root.clone();
    let mut candidates = BTreeMap::new();

    for (key, project) in graph.projects.iter_mut() {
        let mut ids = Vec::new();
        for task in &mut project.tasks {
            if task.has_been_retried() {
                continue;
            }
            match task.status() {
                TaskStatus::Success => {
                    if downgrade_if_invalid(task, &source_root) {
                        ids.push(task.id);
                    }
                }
                TaskStatus::Failed => {
                    if validate_task(task, &source_root).is_valid {
                        tracing::info!(
                            "Task {} ({}) failed but its outputs are valid, not retrying",
                            task.id,
                            task.project
                        );
                    } else {
                        ids.push(task.id);
                    }
                }
                _ => {}
            }
        }
        project.derive_status();
        if !ids.is_empty() {
            tracing::info!("Project {} has {} task(s) needing retry", key, ids.len());
            candidates.insert(key.clone(), ids);
        }
    }

    candidates
}
