//! Full dependency installs into per-project retry caches.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde_json::{Map, Value, json};

use crate::compile::CompilerCommand;
use crate::compile::process::{ProcessOutcome, SpawnRequest, run_with_timeout, sanitized_env};
use crate::error::{Error, Result};
use crate::graph::{Manifest, Project};
use crate::paths::CacheLayout;
use crate::settings::ExtractorSettings;

const LOCKFILE: &str = "package-lock.json";

/// Arguments passed to the package manager after `install`.
pub const INSTALL_ARGS: &[&str] = &["install", "--quiet", "--no-audit", "--no-fund"];

/// Result of one install run.
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    /// The retry cache directory, created even if the install failed.
    pub cache_dir: PathBuf,
    pub success: bool,
    pub timed_out: bool,
    pub error: Option<String>,
    pub duration: Duration,
}

/// Installs a project's declared dependencies into a fresh cache directory.
pub struct DependencyInstaller<'a> {
    source_root: &'a Path,
    settings: &'a ExtractorSettings,
}

impl<'a> DependencyInstaller<'a> {
    pub fn new(source_root: &'a Path, settings: &'a ExtractorSettings) -> Self {
        Self {
            source_root,
            settings,
        }
    }

    /// Install everything `project` declares into a new retry cache.
    ///
    /// A failing or timed-out package manager is reported in the outcome.
    /// Only setup problems (no manifest, unwritable cache root) are errors.
    pub fn install(&self, project: &Project) -> Result<InstallOutcome> {
        let start = Instant::now();
        let manifest = project.manifest.as_ref().ok_or_else(|| {
            Error::Install(format!("no package.json for project {}", project.key))
        })?;

        let layout = CacheLayout::new(self.source_root, &self.settings.cache_root_name);
        let cache_dir = layout.create_retry_dir(&project.key)?;
        tracing::info!(
            "Created retry cache directory {} for project {}",
            cache_dir.display(),
            project.key
        );

        let package_json = serde_json::to_string_pretty(&retry_manifest(manifest))?;
        fs::write(cache_dir.join("package.json"), package_json)?;
        self.copy_lockfile(project, &cache_dir);

        tracing::info!(
            "Installing full dependencies for project {} in retry cache directory",
            project.key
        );
        let (success, timed_out, error) = self.run_package_manager(&cache_dir);
        match &error {
            None => tracing::info!(
                "Successfully installed full dependencies for project {}",
                project.key
            ),
            Some(e) => tracing::warn!("Dependency install for project {} failed: {}", project.key, e),
        }

        Ok(InstallOutcome {
            cache_dir,
            success,
            timed_out,
            error,
            duration: start.elapsed(),
        })
    }

    fn copy_lockfile(&self, project: &Project, cache_dir: &Path) {
        let lockfile = project.base_dir(self.source_root).join(LOCKFILE);
        if !lockfile.is_file() {
            return;
        }
        match fs::copy(&lockfile, cache_dir.join(LOCKFILE)) {
            Ok(_) => tracing::debug!("Copied {} for project {}", LOCKFILE, project.key),
            Err(e) => tracing::warn!(
                "Failed to copy {} for project {}: {}",
                LOCKFILE,
                project.key,
                e
            ),
        }
    }

    fn run_package_manager(&self, cache_dir: &Path) -> (bool, bool, Option<String>) {
        let Some(pm) = CompilerCommand::parse(&self.settings.package_manager) else {
            return (false, false, Some("no package manager configured".to_string()));
        };
        let env = sanitized_env(&self.settings.stripped_env_vars);
        let request =
            SpawnRequest::for_command(&pm, INSTALL_ARGS, cache_dir, env, self.settings.install_timeout);

        match run_with_timeout(request) {
            Ok(ProcessOutcome::Exited(out)) if out.success() => (true, false, None),
            Ok(ProcessOutcome::Exited(out)) => {
                let stderr = out.stderr.trim();
                let detail = if stderr.is_empty() {
                    out.status.to_string()
                } else {
                    stderr.to_string()
                };
                (false, false, Some(format!("{} install failed: {}", pm, detail)))
            }
            Ok(ProcessOutcome::TimedOut) => {
                (false, true, Some("Dependency installation timed out".to_string()))
            }
            Err(e) => (false, false, Some(format!("{} install failed: {}", pm, e))),
        }
    }
}

/// Manifest written into a retry cache.
///
/// Development dependencies are installed as runtime dependencies, since
/// the compiler may need them; on a name clash the development range wins.
pub fn retry_manifest(manifest: &Manifest) -> Value {
    let dependencies: Map<String, Value> = manifest
        .dependencies
        .iter()
        .chain(manifest.dev_dependencies.iter())
        .map(|(name, range)| (name.clone(), Value::String(range.clone())))
        .collect();

    let mut out = json!({
        "name": format!("{}-retry", manifest.name.as_deref().unwrap_or("unknown")),
        "version": manifest.version.as_deref().unwrap_or("1.0.0"),
        "private": true,
        "dependencies": dependencies,
    });
    if let Some(engines) = &manifest.engines {
        out["engines"] = json!(engines);
    }
    if let Some(peers) = &manifest.peer_dependencies {
        out["peerDependencies"] = json!(peers);
    }
    out
}
