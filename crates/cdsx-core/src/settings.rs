//! Runtime settings for the extractor.

use std::time::Duration;

/// Name of the shared cache root created under the source root.
pub const CACHE_ROOT_NAME: &str = ".cds-extractor-cache";

/// Environment variables owned by the extractor that must never reach a child.
pub const INTERNAL_ENV_VARS: &[&str] = &["CODEQL_EXTRACTOR_CDS_WIP_DATABASE", "CODEQL_RUNNER"];

/// Settings shared by every component of a run.
#[derive(Debug, Clone)]
pub struct ExtractorSettings {
    /// Cache root directory name, relative to the source root.
    pub cache_root_name: String,

    /// Timeout for `--version` environment probes.
    pub probe_timeout: Duration,

    /// Timeout for a single compiler invocation.
    pub compile_timeout: Duration,

    /// Timeout for a retry dependency install.
    pub install_timeout: Duration,

    /// Maximum compiler attempts per task (primary + alternatives).
    pub max_attempts: usize,

    /// Worker threads used to compile independent projects.
    pub workers: usize,

    /// Global invocations probed once at initialization, in order.
    pub global_commands: Vec<String>,

    /// Package-runner invocations tried when nothing else works.
    pub fallback_commands: Vec<String>,

    /// Returned untested when every strategy fails.
    pub default_command: String,

    /// Package manager used for retry installs.
    pub package_manager: String,

    /// Variables removed from every child environment.
    pub stripped_env_vars: Vec<String>,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            cache_root_name: CACHE_ROOT_NAME.to_string(),
            probe_timeout: Duration::from_secs(5),
            compile_timeout: Duration::from_secs(300),
            install_timeout: Duration::from_secs(120),
            max_attempts: 3,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            global_commands: vec![
                "cds".to_string(),
                "npx -y --package @sap/cds-dk cds".to_string(),
            ],
            fallback_commands: vec![
                "npx -y --package @sap/cds cds".to_string(),
                "npx --yes @sap/cds-dk cds".to_string(),
            ],
            default_command: "npx -y --package @sap/cds-dk cds".to_string(),
            package_manager: "npm".to_string(),
            stripped_env_vars: INTERNAL_ENV_VARS.iter().map(|v| v.to_string()).collect(),
        }
    }
}

impl ExtractorSettings {
    /// Single-worker settings: one spawn at a time across the whole graph.
    pub fn sequential() -> Self {
        Self {
            workers: 1,
            ..Default::default()
        }
    }

    /// Default settings overlaid with `CDSX_*` environment overrides.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Malformed values are ignored with a warning.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(secs) = parse_var::<u64>(&lookup, "CDSX_PROBE_TIMEOUT_SECS") {
            self.probe_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "CDSX_COMPILE_TIMEOUT_SECS") {
            self.compile_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "CDSX_INSTALL_TIMEOUT_SECS") {
            self.install_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = parse_var::<usize>(&lookup, "CDSX_MAX_ATTEMPTS") {
            self.max_attempts = n.max(1);
        }
        if let Some(n) = parse_var::<usize>(&lookup, "CDSX_WORKERS") {
            self.workers = n.max(1);
        }
        if let Some(cmd) = lookup("CDSX_CDS_COMMAND") {
            if !cmd.trim().is_empty() {
                self.global_commands = vec![cmd.trim().to_string()];
            }
        }
        if let Some(pm) = lookup("CDSX_PACKAGE_MANAGER") {
            if !pm.trim().is_empty() {
                self.package_manager = pm.trim().to_string();
            }
        }
        self
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring malformed {}={:?}", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ExtractorSettings::default();
        assert_eq!(settings.cache_root_name, ".cds-extractor-cache");
        assert_eq!(settings.probe_timeout, Duration::from_secs(5));
        assert_eq!(settings.install_timeout, Duration::from_secs(120));
        assert_eq!(settings.max_attempts, 3);
        assert!(settings.workers >= 1);
        assert_eq!(settings.global_commands[0], "cds");
    }

    #[test]
    fn test_sequential() {
        assert_eq!(ExtractorSettings::sequential().workers, 1);
    }

    #[test]
    fn test_overrides() {
        let settings = ExtractorSettings::default().with_overrides(|key| match key {
            "CDSX_WORKERS" => Some("4".to_string()),
            "CDSX_MAX_ATTEMPTS" => Some("0".to_string()),
            "CDSX_INSTALL_TIMEOUT_SECS" => Some("not-a-number".to_string()),
            "CDSX_PACKAGE_MANAGER" => Some(" pnpm ".to_string()),
            "CDSX_CDS_COMMAND" => Some("/opt/cds/bin/cds".to_string()),
            _ => None,
        });

        assert_eq!(settings.workers, 4);
        assert_eq!(settings.max_attempts, 1);
        assert_eq!(settings.install_timeout, Duration::from_secs(120));
        assert_eq!(settings.package_manager, "pnpm");
        assert_eq!(settings.global_commands, vec!["/opt/cds/bin/cds".to_string()]);
    }
}
