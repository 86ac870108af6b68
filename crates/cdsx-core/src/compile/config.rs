//! Per-project compilation configuration.

use std::path::{Path, PathBuf};

use serde::Serialize;

use super::command::CompilerCommand;
use super::resolver::{CommandResolver, CommandSource, ResolvedCommand};
use super::targets::has_layered_layout;
use super::version::{VersionCompatibility, expected_version};
use crate::error::{Error, Result};
use crate::graph::Project;
use crate::settings::ExtractorSettings;

/// The command, cache and compilation mode chosen for one project.
#[derive(Debug, Clone, Serialize)]
pub struct CompilationConfig {
    pub command: CompilerCommand,
    pub command_source: CommandSource,
    /// Cache directory the compiler environment is pinned to.
    pub cache_dir: Option<PathBuf>,
    pub use_unit_compilation: bool,
    /// `@sap/cds` version declared by the project, range operators stripped.
    pub expected_version: Option<String>,
    pub version_compatibility: VersionCompatibility,
    /// Commands tried in order after the primary fails.
    pub alternatives: Vec<CompilerCommand>,
    /// Upper bound on attempts per task, primary included.
    pub max_attempts: usize,
}

impl CompilationConfig {
    /// Primary command followed by alternatives, capped at `max_attempts`.
    pub fn attempt_plan(&self) -> impl Iterator<Item = &CompilerCommand> {
        std::iter::once(&self.command)
            .chain(self.alternatives.iter())
            .take(self.max_attempts.max(1))
    }
}

/// Builds a [`CompilationConfig`] per project.
pub struct ConfigurationBuilder<'a> {
    resolver: &'a CommandResolver,
    settings: &'a ExtractorSettings,
}

impl<'a> ConfigurationBuilder<'a> {
    pub fn new(resolver: &'a CommandResolver, settings: &'a ExtractorSettings) -> Self {
        Self { resolver, settings }
    }

    /// Choose a command for `project`.
    ///
    /// The project's assigned cache is tried first. If the command found
    /// through it has an incompatible or unknown version, resolution is
    /// repeated without a cache and that result is kept. If resolution
    /// itself fails, one more attempt without a cache is made before the
    /// project is given up.
    pub fn configure(&self, project: &Project) -> Result<CompilationConfig> {
        let source_root = self.resolver.source_root();
        let base = project.base_dir(source_root);
        let cache_dir = project.cache_dir.as_deref();
        let expected = expected_version(project.manifest.as_ref());
        let use_unit_compilation = has_layered_layout(&base) || project.unit_requested;

        tracing::info!(
            "Determining compilation config for project {}: cache={}, expectedVersion={}, unit={}",
            project.key,
            cache_dir.map(|d| d.display().to_string()).unwrap_or_else(|| "none".to_string()),
            expected.as_deref().unwrap_or("none"),
            use_unit_compilation
        );

        let (resolved, pinned_cache) = match self.resolver.resolve(cache_dir) {
            Ok(resolved) => {
                let compat = compatibility(&resolved, expected.as_deref());
                if !compat.is_compatible() && cache_dir.is_some() {
                    tracing::warn!(
                        "Cache-based CDS command has version issues for project {}: {}",
                        project.key,
                        compat.message().unwrap_or_default()
                    );
                    tracing::info!("Trying fallback CDS command without cache...");
                    let fallback = self.resolve_without_cache(project)?;
                    tracing::info!(
                        "Using fallback CDS command for project {}: {}",
                        project.key,
                        fallback.command
                    );
                    (fallback, None)
                } else {
                    (resolved, cache_dir)
                }
            }
            Err(e) => {
                tracing::warn!(
                    "CDS command resolution failed for project {}: {}; retrying without cache",
                    project.key,
                    e
                );
                (self.resolve_without_cache(project)?, None)
            }
        };

        let version_compatibility = compatibility(&resolved, expected.as_deref());
        let max_attempts = self.settings.max_attempts.max(1);
        let mut alternatives = self.resolver.alternatives_for(&resolved.command);
        alternatives.truncate(max_attempts - 1);

        tracing::info!(
            "Compilation config for {}: command={}, compatible={}",
            project.key,
            resolved.command,
            version_compatibility.is_compatible()
        );

        Ok(CompilationConfig {
            cache_dir: resolved
                .cache_dir
                .clone()
                .or_else(|| pinned_cache.map(Path::to_path_buf)),
            command: resolved.command,
            command_source: resolved.source,
            use_unit_compilation,
            expected_version: expected,
            version_compatibility,
            alternatives,
            max_attempts,
        })
    }

    /// Configuration for the single retry attempt of a project's tasks.
    ///
    /// Keeps the compile mode of `base` and re-resolves the command against
    /// `cache_dir`. The retry runs exactly one command, no alternatives.
    pub fn retry_config(
        &self,
        project: &Project,
        base: &CompilationConfig,
        cache_dir: Option<&Path>,
    ) -> Result<CompilationConfig> {
        let resolved = self.resolver.resolve(cache_dir).map_err(|e| Error::Configuration {
            project: project.key.clone(),
            message: format!("No CDS command available for retry: {}", e),
        })?;
        tracing::info!(
            "Retry command for project {}: {} ({:?})",
            project.key,
            resolved.command,
            resolved.source
        );

        Ok(CompilationConfig {
            version_compatibility: compatibility(&resolved, base.expected_version.as_deref()),
            cache_dir: resolved
                .cache_dir
                .clone()
                .or_else(|| cache_dir.map(Path::to_path_buf)),
            command: resolved.command,
            command_source: resolved.source,
            use_unit_compilation: base.use_unit_compilation,
            expected_version: base.expected_version.clone(),
            alternatives: Vec::new(),
            max_attempts: 1,
        })
    }

    fn resolve_without_cache(&self, project: &Project) -> Result<ResolvedCommand> {
        self.resolver
            .resolve(None)
            .map_err(|e| Error::Configuration {
                project: project.key.clone(),
                message: format!("No CDS command available: {}", e),
            })
    }
}

fn compatibility(resolved: &ResolvedCommand, expected: Option<&str>) -> VersionCompatibility {
    VersionCompatibility::check(resolved.version.as_deref(), expected)
}
