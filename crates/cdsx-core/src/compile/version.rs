//! Compiler version extraction and compatibility.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::graph::Manifest;

/// Runtime package whose version a project pins.
pub const CDS_PACKAGE: &str = "@sap/cds";

static CDS_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@sap/cds[^0-9\n]*(\d+\.\d+\.\d+)").expect("valid regex")
});
static ANY_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+\.\d+\.\d+)").expect("valid regex"));
static RANGE_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\^~>=<]+").expect("valid regex"));

/// Extract a `major.minor.patch` version from `--version` output.
///
/// The `@sap/cds` line wins over other packages listed by the dev kit.
pub fn extract_version(output: &str) -> Option<String> {
    CDS_VERSION
        .captures(output)
        .or_else(|| ANY_VERSION.captures(output))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// The `@sap/cds` version a project declares, with range operators stripped.
///
/// Runtime dependencies are checked before development dependencies.
pub fn expected_version(manifest: Option<&Manifest>) -> Option<String> {
    let manifest = manifest?;
    let declared = manifest
        .dependencies
        .get(CDS_PACKAGE)
        .or_else(|| manifest.dev_dependencies.get(CDS_PACKAGE))?;
    let stripped = RANGE_PREFIX.replace(declared.trim(), "").trim().to_string();
    (!stripped.is_empty()).then_some(stripped)
}

fn major(version: &str) -> Option<u64> {
    version.split('.').next()?.trim().parse().ok()
}

/// Outcome of comparing the resolved compiler against the declared version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VersionCompatibility {
    /// Same major version, or nothing declared (`expected: None`).
    Compatible {
        actual: String,
        expected: Option<String>,
    },
    /// Major versions differ.
    Incompatible { actual: String, expected: String },
    /// The compiler version could not be determined. Treated as incompatible.
    Unknown,
}

impl VersionCompatibility {
    /// Compare by major version only.
    pub fn check(actual: Option<&str>, expected: Option<&str>) -> Self {
        let Some(actual) = actual else {
            return VersionCompatibility::Unknown;
        };
        let Some(expected) = expected else {
            return VersionCompatibility::Compatible {
                actual: actual.to_string(),
                expected: None,
            };
        };

        match (major(actual), major(expected)) {
            (Some(a), Some(e)) if a == e => VersionCompatibility::Compatible {
                actual: actual.to_string(),
                expected: Some(expected.to_string()),
            },
            _ => VersionCompatibility::Incompatible {
                actual: actual.to_string(),
                expected: expected.to_string(),
            },
        }
    }

    pub fn is_compatible(&self) -> bool {
        matches!(self, VersionCompatibility::Compatible { .. })
    }

    /// Human-readable reason for an incompatible or unverified result.
    pub fn message(&self) -> Option<String> {
        match self {
            VersionCompatibility::Compatible {
                actual,
                expected: None,
            } => Some(format!(
                "No expected CDS version found in project, using available version {}",
                actual
            )),
            VersionCompatibility::Compatible { .. } => None,
            VersionCompatibility::Incompatible { actual, expected } => Some(format!(
                "Version mismatch: project expects {} v{} but available CDS command provides v{}",
                CDS_PACKAGE, expected, actual
            )),
            VersionCompatibility::Unknown => Some("Could not determine CDS version".to_string()),
        }
    }
}
