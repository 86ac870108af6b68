//! Compiler command resolution.
//!
//! A [`CommandResolver`] is built once per run and shared by reference. It
//! owns the probe cache: every exact command string is checked at most once
//! for the resolver's lifetime, and the environment scan (global command,
//! seeded cache directories) runs exactly once however many threads ask.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use rustc_hash::FxHashMap;
use serde::Serialize;

use super::command::CompilerCommand;
use super::process::{ProcessOutcome, SpawnRequest, run_with_timeout, sanitized_env};
use super::version::extract_version;
use crate::error::{Error, Result};
use crate::paths::CacheLayout;
use crate::settings::ExtractorSettings;

/// Result of checking whether a command runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// The command ran. `version: None` means it ran but printed no
    /// recognizable version.
    Works { version: Option<String> },
    Broken { error: String },
}

impl ProbeOutcome {
    pub fn works(&self) -> bool {
        matches!(self, ProbeOutcome::Works { .. })
    }

    pub fn version(&self) -> Option<&str> {
        match self {
            ProbeOutcome::Works { version } => version.as_deref(),
            ProbeOutcome::Broken { .. } => None,
        }
    }
}

/// Checks whether a command works. The seam tests use to count probes.
pub trait CommandProbe: Send + Sync {
    fn probe(&self, command: &CompilerCommand, source_root: &Path) -> ProbeOutcome;
}

/// Probes by running `<command> --version` with a short timeout.
#[derive(Debug, Clone)]
pub struct ProcessProbe {
    settings: ExtractorSettings,
}

impl ProcessProbe {
    pub fn new(settings: ExtractorSettings) -> Self {
        Self { settings }
    }
}

impl CommandProbe for ProcessProbe {
    fn probe(&self, command: &CompilerCommand, source_root: &Path) -> ProbeOutcome {
        if command.is_bare_name() {
            if let Err(e) = which::which(&command.program) {
                return ProbeOutcome::Broken {
                    error: format!("{} not found on PATH: {}", command.program.display(), e),
                };
            }
        } else if !command.program.exists() {
            return ProbeOutcome::Broken {
                error: format!("{} does not exist", command.program.display()),
            };
        }

        let request = SpawnRequest::for_command(
            command,
            ["--version"],
            source_root,
            sanitized_env(&self.settings.stripped_env_vars),
            self.settings.probe_timeout,
        );

        match run_with_timeout(request) {
            Ok(ProcessOutcome::Exited(out)) if out.success() => {
                let combined = format!("{}\n{}", out.stdout, out.stderr);
                ProbeOutcome::Works {
                    version: extract_version(&combined),
                }
            }
            Ok(ProcessOutcome::Exited(out)) => ProbeOutcome::Broken {
                error: format!(
                    "exited with {}: {}",
                    out.status,
                    out.stderr.trim()
                ),
            },
            Ok(ProcessOutcome::TimedOut) => ProbeOutcome::Broken {
                error: format!("timed out after {:?}", self.settings.probe_timeout),
            },
            Err(e) => ProbeOutcome::Broken {
                error: e.to_string(),
            },
        }
    }
}

/// Where a resolved command came from, in resolution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandSource {
    ProvidedCache,
    DiscoveredCache,
    Global,
    Fallback,
    /// Nothing worked; the canonical fallback string, never probed.
    Untested,
}

/// A command chosen by [`CommandResolver::resolve`].
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedCommand {
    pub command: CompilerCommand,
    pub source: CommandSource,
    /// Cache directory the command lives in, for cache-based sources.
    pub cache_dir: Option<PathBuf>,
    /// Version reported by the probe, if any.
    pub version: Option<String>,
}

impl ResolvedCommand {
    pub fn is_tested(&self) -> bool {
        self.source != CommandSource::Untested
    }
}

/// One line of the troubleshooting analysis.
#[derive(Debug, Clone, Serialize)]
pub struct CommandAnalysisEntry {
    pub strategy: CommandSource,
    pub command: String,
    pub outcome: ProbeOutcome,
}

/// State computed once per resolver.
#[derive(Debug, Clone, Default)]
struct Environment {
    global: Option<(CompilerCommand, Option<String>)>,
    cache_dirs: Vec<PathBuf>,
}

/// Finds a working compiler invocation and caches every probe.
pub struct CommandResolver {
    source_root: PathBuf,
    settings: ExtractorSettings,
    probe: Box<dyn CommandProbe>,
    memo: Mutex<FxHashMap<String, Arc<OnceLock<ProbeOutcome>>>>,
    environment: OnceLock<Environment>,
}

impl CommandResolver {
    /// Resolver that probes by spawning processes.
    pub fn new(source_root: impl Into<PathBuf>, settings: ExtractorSettings) -> Self {
        let probe = ProcessProbe::new(settings.clone());
        Self::with_probe(source_root, settings, probe)
    }

    /// Resolver with a custom probe.
    pub fn with_probe(
        source_root: impl Into<PathBuf>,
        settings: ExtractorSettings,
        probe: impl CommandProbe + 'static,
    ) -> Self {
        Self {
            source_root: source_root.into(),
            settings,
            probe: Box::new(probe),
            memo: Mutex::new(FxHashMap::default()),
            environment: OnceLock::new(),
        }
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// Check a command, probing it only if this exact string was never seen.
    ///
    /// Concurrent callers asking about the same string wait for the single
    /// in-flight probe instead of starting their own.
    pub fn check(&self, command: &CompilerCommand) -> ProbeOutcome {
        let cell = {
            let mut memo = self.lock_memo();
            Arc::clone(memo.entry(command.display.clone()).or_default())
        };

        cell.get_or_init(|| {
            tracing::debug!("Probing CDS command: {}", command);
            let outcome = self.probe.probe(command, &self.source_root);
            match &outcome {
                ProbeOutcome::Works { version } => tracing::debug!(
                    "CDS command works: {} (version {})",
                    command,
                    version.as_deref().unwrap_or("unknown")
                ),
                ProbeOutcome::Broken { error } => {
                    tracing::debug!("CDS command failed: {}: {}", command, error)
                }
            }
            outcome
        })
        .clone()
    }

    /// Whether this exact command string has been probed.
    pub fn is_cached(&self, command: &str) -> bool {
        self.lock_memo()
            .get(command)
            .map(|cell| cell.get().is_some())
            .unwrap_or(false)
    }

    fn lock_memo(&self) -> MutexGuard<'_, FxHashMap<String, Arc<OnceLock<ProbeOutcome>>>> {
        // The map only ever gains entries, so a poisoned guard is still consistent.
        self.memo.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn environment(&self) -> &Environment {
        self.environment.get_or_init(|| {
            tracing::info!("Initializing CDS command cache...");

            let global = self
                .settings
                .global_commands
                .iter()
                .filter_map(|c| CompilerCommand::parse(c))
                .find_map(|cmd| match self.check(&cmd) {
                    ProbeOutcome::Works { version } => Some((cmd, version)),
                    ProbeOutcome::Broken { .. } => None,
                });
            match &global {
                Some((cmd, version)) => tracing::info!(
                    "Found global CDS command: {} (version {})",
                    cmd,
                    version.as_deref().unwrap_or("unknown")
                ),
                None => tracing::info!("No working global CDS command found"),
            }

            let cache_dirs = CacheLayout::new(&self.source_root, &self.settings.cache_root_name)
                .discover_cache_dirs();
            tracing::info!("Discovered {} CDS cache directories", cache_dirs.len());

            Environment { global, cache_dirs }
        })
    }

    /// The remembered global command, if one works.
    pub fn global_command(&self) -> Option<&CompilerCommand> {
        self.environment().global.as_ref().map(|(cmd, _)| cmd)
    }

    /// Seeded cache directories found under the cache root.
    pub fn discovered_cache_dirs(&self) -> &[PathBuf] {
        &self.environment().cache_dirs
    }

    /// Resolve a compiler command, preferring `cache_dir`.
    ///
    /// Order: the given cache's local binary, the first discovered cache
    /// whose binary works, the global command, the package-runner
    /// fallbacks, and finally the untested canonical fallback. "Nothing
    /// works" is not an error; only a broken setup is.
    pub fn resolve(&self, cache_dir: Option<&Path>) -> Result<ResolvedCommand> {
        if !self.source_root.is_dir() {
            let err = Error::CommandResolution(format!(
                "source root {} is not a directory",
                self.source_root.display()
            ));
            tracing::error!("{}", err);
            return Err(err);
        }

        if let Some(dir) = cache_dir {
            if let Some(resolved) = self.try_cache_dir(dir, CommandSource::ProvidedCache) {
                return Ok(resolved);
            }
        }

        let env = self.environment();
        for dir in &env.cache_dirs {
            if let Some(resolved) = self.try_cache_dir(dir, CommandSource::DiscoveredCache) {
                return Ok(resolved);
            }
        }

        if let Some((cmd, version)) = &env.global {
            tracing::debug!("Using global CDS command: {}", cmd);
            return Ok(ResolvedCommand {
                command: cmd.clone(),
                source: CommandSource::Global,
                cache_dir: None,
                version: version.clone(),
            });
        }

        for cmd in self.fallbacks() {
            if let ProbeOutcome::Works { version } = self.check(&cmd) {
                tracing::info!("Using fallback CDS command: {}", cmd);
                return Ok(ResolvedCommand {
                    command: cmd,
                    source: CommandSource::Fallback,
                    cache_dir: None,
                    version,
                });
            }
        }

        let command = CompilerCommand::parse(&self.settings.default_command).ok_or_else(|| {
            Error::CommandResolution("no default CDS command configured".to_string())
        })?;
        tracing::warn!("No working CDS command found, falling back to untested {}", command);
        Ok(ResolvedCommand {
            command,
            source: CommandSource::Untested,
            cache_dir: None,
            version: None,
        })
    }

    fn try_cache_dir(&self, dir: &Path, source: CommandSource) -> Option<ResolvedCommand> {
        let cmd = CompilerCommand::local(&CacheLayout::local_binary(dir));
        match self.check(&cmd) {
            ProbeOutcome::Works { version } => {
                tracing::debug!("Using CDS from cache {}", dir.display());
                Some(ResolvedCommand {
                    command: cmd,
                    source,
                    cache_dir: Some(dir.to_path_buf()),
                    version,
                })
            }
            ProbeOutcome::Broken { .. } => None,
        }
    }

    fn fallbacks(&self) -> impl Iterator<Item = CompilerCommand> + '_ {
        self.settings
            .fallback_commands
            .iter()
            .filter_map(|c| CompilerCommand::parse(c))
    }

    /// Commands to try after `primary` fails, in order, without duplicates.
    ///
    /// The global command first, then the package-runner fallbacks.
    pub fn alternatives_for(&self, primary: &CompilerCommand) -> Vec<CompilerCommand> {
        let mut alternatives: Vec<CompilerCommand> = Vec::new();
        let candidates = self.global_command().cloned().into_iter().chain(self.fallbacks());
        for cmd in candidates {
            if cmd.display != primary.display
                && !alternatives.iter().any(|a| a.display == cmd.display)
            {
                alternatives.push(cmd);
            }
        }
        alternatives
    }

    /// Probe every strategy and report what each one yields.
    pub fn analysis(&self, cache_dir: Option<&Path>) -> Vec<CommandAnalysisEntry> {
        let mut entries = Vec::new();
        let mut record = |strategy: CommandSource, cmd: CompilerCommand| {
            let outcome = self.check(&cmd);
            entries.push(CommandAnalysisEntry {
                strategy,
                command: cmd.display,
                outcome,
            });
        };

        if let Some(dir) = cache_dir {
            record(
                CommandSource::ProvidedCache,
                CompilerCommand::local(&CacheLayout::local_binary(dir)),
            );
        }
        for dir in self.discovered_cache_dirs() {
            record(
                CommandSource::DiscoveredCache,
                CompilerCommand::local(&CacheLayout::local_binary(dir)),
            );
        }
        for cmd in self
            .settings
            .global_commands
            .iter()
            .filter_map(|c| CompilerCommand::parse(c))
        {
            record(CommandSource::Global, cmd);
        }
        for cmd in self.fallbacks() {
            record(CommandSource::Fallback, cmd);
        }

        entries
    }

    /// Forget every probe result and the environment scan.
    pub fn reset(&mut self) {
        self.memo
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        self.environment.take();
    }
}
