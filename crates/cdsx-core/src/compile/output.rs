//! Output naming and directory-output normalization.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::Result;

/// Artifact written for a whole-project compilation.
pub const MODEL_FILE: &str = "model.cds.json";

/// Canonical suffix of compiled artifacts.
pub const ARTIFACT_SUFFIX: &str = ".cds.json";

/// Sibling artifact for an individually compiled file: `x.cds` -> `x.cds.json`.
pub fn file_artifact(source: &Path) -> PathBuf {
    let mut name = source.as_os_str().to_os_string();
    name.push(".json");
    PathBuf::from(name)
}

/// Rename every `*.json` under `dir` to the canonical `*.cds.json` suffix.
///
/// The compiler writes a directory instead of the requested file when given
/// several targets. Files that already carry the suffix are left alone.
/// Returns the number of files renamed.
pub fn normalize_output_dir(dir: &Path) -> Result<usize> {
    let pending: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| needs_rename(path))
        .collect();

    for path in &pending {
        let target = canonical_name(path);
        tracing::debug!("Renaming {} -> {}", path.display(), target.display());
        fs::rename(path, &target)?;
    }

    Ok(pending.len())
}

fn needs_rename(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    name.ends_with(".json") && !name.ends_with(ARTIFACT_SUFFIX)
}

fn canonical_name(path: &Path) -> PathBuf {
    path.with_extension("cds.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_artifact() {
        assert_eq!(
            file_artifact(Path::new("shop/srv/service.cds")),
            PathBuf::from("shop/srv/service.cds.json")
        );
    }

    #[test]
    fn test_normalize_output_dir() {
        let temp = tempfile::TempDir::new().unwrap();
        let out = temp.path().join("model.cds.json");
        fs::create_dir_all(out.join("srv")).unwrap();
        fs::write(out.join("schema.json"), "{}").unwrap();
        fs::write(out.join("srv/service.json"), "{}").unwrap();
        fs::write(out.join("done.cds.json"), "{}").unwrap();
        fs::write(out.join("notes.txt"), "x").unwrap();

        let renamed = normalize_output_dir(&out).unwrap();

        assert_eq!(renamed, 2);
        assert!(out.join("schema.cds.json").is_file());
        assert!(out.join("srv/service.cds.json").is_file());
        assert!(out.join("done.cds.json").is_file());
        assert!(!out.join("schema.json").exists());
        assert!(out.join("notes.txt").is_file());
    }
}
