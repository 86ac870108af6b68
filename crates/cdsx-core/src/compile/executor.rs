//! Runs the external compiler for one project or file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use super::command::CompilerCommand;
use super::output::normalize_output_dir;
use super::process::{ProcessOutcome, SpawnRequest, compiler_env, run_with_timeout};
use super::targets::relative_to;
use crate::settings::ExtractorSettings;

/// Result of one compiler invocation, after post-checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompileOutcome {
    pub success: bool,
    /// Output file or directory, when the compiler produced one.
    pub output_path: Option<PathBuf>,
    pub message: String,
    pub compiled_as_unit: bool,
}

impl CompileOutcome {
    fn failed(message: String, compiled_as_unit: bool) -> Self {
        Self {
            success: false,
            output_path: None,
            message,
            compiled_as_unit,
        }
    }
}

/// What to compile. Paths are relative to the source root unless noted.
#[derive(Debug, Clone)]
pub struct CompileRequest<'a> {
    pub project_key: &'a str,
    pub project_dir: &'a Path,
    /// Targets, relative to the project directory.
    pub targets: &'a [String],
    pub output: &'a Path,
    pub unit: bool,
    pub command: &'a CompilerCommand,
    pub cache_dir: Option<&'a Path>,
}

/// Spawns the compiler with the project directory as working directory.
#[derive(Debug, Clone)]
pub struct CompilationExecutor {
    source_root: PathBuf,
    timeout: Duration,
    stripped_env_vars: Vec<String>,
}

impl CompilationExecutor {
    pub fn new(source_root: impl Into<PathBuf>, settings: &ExtractorSettings) -> Self {
        Self {
            source_root: source_root.into(),
            timeout: settings.compile_timeout,
            stripped_env_vars: settings.stripped_env_vars.clone(),
        }
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// Compiler arguments after the command itself.
    pub fn compile_args(targets: &[String], dest: &str) -> Vec<String> {
        let mut args = vec!["compile".to_string()];
        args.extend(targets.iter().cloned());
        args.extend(
            ["--to", "json", "--dest", dest, "--locations", "--log-level", "warn"]
                .into_iter()
                .map(str::to_string),
        );
        args
    }

    /// Run the compiler and check its output.
    ///
    /// Never returns an error: spawn failures, non-zero exits, timeouts and
    /// missing output all come back as a failed [`CompileOutcome`].
    pub fn compile(&self, request: &CompileRequest<'_>) -> CompileOutcome {
        let base = self.source_root.join(request.project_dir);
        let dest = relative_to(request.output, request.project_dir);
        let args = Self::compile_args(request.targets, &dest);
        let env = compiler_env(request.command, request.cache_dir, &self.stripped_env_vars);
        let subject = if request.unit {
            format!("the CAP project {}", request.project_key)
        } else {
            request
                .targets
                .first()
                .map(|t| format!("{} in project {}", t, request.project_key))
                .unwrap_or_else(|| request.project_key.to_string())
        };

        tracing::info!(
            "Executing CDS command in {}: {} {}",
            base.display(),
            request.command,
            args.join(" ")
        );

        let spawn = SpawnRequest::for_command(request.command, &args, &base, env, self.timeout);
        let output = match run_with_timeout(spawn) {
            Ok(ProcessOutcome::Exited(output)) => output,
            Ok(ProcessOutcome::TimedOut) => {
                return CompileOutcome::failed(
                    format!(
                        "CDS compiler timed out after {:?} while compiling {}",
                        self.timeout, subject
                    ),
                    request.unit,
                );
            }
            Err(e) => {
                tracing::error!("Spawn error: {}", e);
                return CompileOutcome::failed(
                    format!("Error executing CDS compiler: {}", e),
                    request.unit,
                );
            }
        };

        let stderr = output.stderr.trim();
        if !stderr.is_empty() {
            tracing::warn!("CDS stderr output: {}", stderr);
        }

        if !output.success() {
            tracing::error!("CDS command failed with {}", output.status);
            let reported = if stderr.is_empty() { "Unknown error" } else { stderr };
            return CompileOutcome::failed(
                format!(
                    "Could not compile {}.\nReported error(s):\n```\n{}\n```",
                    subject, reported
                ),
                request.unit,
            );
        }

        let output_abs = self.source_root.join(request.output);
        if output_abs.is_dir() {
            tracing::info!("CDS compiler generated JSON to output directory: {}", output_abs.display());
            if let Err(e) = normalize_output_dir(&output_abs) {
                return CompileOutcome::failed(
                    format!("Failed to normalize output directory {}: {}", output_abs.display(), e),
                    request.unit,
                );
            }
        } else if output_abs.is_file() {
            tracing::info!("CDS compiler generated JSON to file: {}", output_abs.display());
        } else {
            return CompileOutcome::failed(
                format!(
                    "{} was not compiled to JSON. This is likely because the project structure is invalid.",
                    capitalize(&subject)
                ),
                request.unit,
            );
        }

        CompileOutcome {
            success: true,
            output_path: Some(request.output.to_path_buf()),
            message: format!("Compiled {}", subject),
            compiled_as_unit: request.unit,
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
