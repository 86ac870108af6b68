//! Diagnostics reported against source files of failed tasks.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

/// Tooling needed to attach a diagnostic to the analysis database.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Path to the `codeql` executable, when known.
    pub codeql_exe: Option<PathBuf>,
    /// Database being extracted into, when known.
    pub wip_database: Option<PathBuf>,
}

impl ToolContext {
    /// Build a context from `CODEQL_DIST` and `CODEQL_EXTRACTOR_CDS_WIP_DATABASE`.
    pub fn from_env() -> Self {
        let codeql_exe = std::env::var_os("CODEQL_DIST")
            .map(|dist| PathBuf::from(dist).join("codeql"))
            .or_else(|| which::which("codeql").ok());
        let wip_database = std::env::var_os("CODEQL_EXTRACTOR_CDS_WIP_DATABASE").map(PathBuf::from);

        Self {
            codeql_exe,
            wip_database,
        }
    }
}

/// Receiver of per-file compilation failure diagnostics.
///
/// Called once per source file of a definitively failed task. Sinks must not
/// fail the run: delivery problems are logged and swallowed.
pub trait DiagnosticSink: Send + Sync {
    fn add_diagnostic(&self, source_file: &Path, message: &str, tool: &ToolContext);
}

/// Sink that shells out to `codeql database add-diagnostic`.
#[derive(Debug, Default)]
pub struct CodeqlDiagnostics;

impl DiagnosticSink for CodeqlDiagnostics {
    fn add_diagnostic(&self, source_file: &Path, message: &str, tool: &ToolContext) {
        let (Some(codeql), Some(database)) = (&tool.codeql_exe, &tool.wip_database) else {
            tracing::warn!(
                "No CodeQL database available, dropping diagnostic for {}: {}",
                source_file.display(),
                message
            );
            return;
        };

        let output = Command::new(codeql)
            .args([
                "database",
                "add-diagnostic",
                "--extractor-name=cds",
                "--ready-for-status-page",
                "--source-id=cds/compilation-failure",
                "--source-name=Failure to compile one or more SAP CAP CDS files",
                "--severity=error",
            ])
            .arg(format!("--markdown-message={}", message))
            .arg(format!("--file-path={}", source_file.display()))
            .arg("--")
            .arg(database)
            .output();

        match output {
            Ok(out) if out.status.success() => {
                tracing::debug!("Added diagnostic for {}", source_file.display());
            }
            Ok(out) => {
                tracing::error!(
                    "codeql add-diagnostic failed for {}: {}",
                    source_file.display(),
                    String::from_utf8_lossy(&out.stderr).trim()
                );
            }
            Err(e) => {
                tracing::error!("Failed to run {}: {}", codeql.display(), e);
            }
        }
    }
}

/// A diagnostic captured in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedDiagnostic {
    pub source_file: PathBuf,
    pub message: String,
}

/// Sink that keeps diagnostics in memory (dry runs and tests).
#[derive(Debug, Default)]
pub struct RecordingDiagnostics {
    recorded: Mutex<Vec<RecordedDiagnostic>>,
}

impl RecordingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn recorded(&self) -> Vec<RecordedDiagnostic> {
        match self.recorded.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl DiagnosticSink for RecordingDiagnostics {
    fn add_diagnostic(&self, source_file: &Path, message: &str, _tool: &ToolContext) {
        let entry = RecordedDiagnostic {
            source_file: source_file.to_path_buf(),
            message: message.to_string(),
        };
        match self.recorded.lock() {
            Ok(mut guard) => guard.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink() {
        let sink = RecordingDiagnostics::new();
        let tool = ToolContext::default();
        sink.add_diagnostic(Path::new("/src/a.cds"), "broken", &tool);
        sink.add_diagnostic(Path::new("/src/b.cds"), "broken", &tool);

        let recorded = sink.recorded();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[1].source_file, PathBuf::from("/src/b.cds"));
    }

    #[test]
    fn test_codeql_sink_without_database_is_silent() {
        CodeqlDiagnostics.add_diagnostic(Path::new("/src/a.cds"), "broken", &ToolContext::default());
    }
}
