//! Cache directory layout.
//!
//! All compiler installs live under a single cache root in the source tree:
//!
//! ```text
//! <source-root>/
//! └── .cds-extractor-cache/
//!     ├── cds-<hash>/            # Seeded installs, shared by projects
//!     │   └── node_modules/.bin/cds
//!     └── retry-<enc>-<millis>/  # Full installs for one project's retry
//!         ├── package.json
//!         └── package-lock.json
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::Result;

/// Name of the compiler binary inside `node_modules/.bin`.
pub const COMPILER_BINARY: &str = "cds";

/// Prefix of seeded cache directories that may be shared across projects.
pub const SHARED_CACHE_PREFIX: &str = "cds-";

/// Prefix of per-project retry cache directories.
pub const RETRY_CACHE_PREFIX: &str = "retry-";

/// Paths of the cache root for one source tree.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    /// The cache root (`<source-root>/.cds-extractor-cache`).
    pub cache_root: PathBuf,
}

impl CacheLayout {
    /// Layout for a source root. Nothing is created on disk.
    pub fn new(source_root: &Path, cache_root_name: &str) -> Self {
        Self {
            cache_root: source_root.join(cache_root_name),
        }
    }

    /// Path of the local compiler binary inside a cache directory.
    pub fn local_binary(cache_dir: &Path) -> PathBuf {
        cache_dir
            .join("node_modules")
            .join(".bin")
            .join(COMPILER_BINARY)
    }

    /// Seeded cache directories that contain a local compiler binary.
    ///
    /// The result is sorted so resolution order does not depend on
    /// directory iteration order. A missing cache root yields an empty list.
    pub fn discover_cache_dirs(&self) -> Vec<PathBuf> {
        let entries = match fs::read_dir(&self.cache_root) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with(SHARED_CACHE_PREFIX)
            })
            .map(|entry| entry.path())
            .filter(|path| Self::local_binary(path).exists())
            .collect();

        dirs.sort();
        dirs
    }

    /// Create a fresh retry cache directory for a project.
    ///
    /// The name encodes the project path and the current time in
    /// milliseconds; on a name collision the timestamp is bumped until a
    /// free name is found, so concurrent or stale runs never share one.
    pub fn create_retry_dir(&self, project_key: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.cache_root)?;

        let encoded = encode_project_key(project_key);
        let mut stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        loop {
            let dir = self
                .cache_root
                .join(format!("{}{}-{}", RETRY_CACHE_PREFIX, encoded, stamp));
            match fs::create_dir(&dir) {
                Ok(()) => return Ok(dir),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => stamp += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Filesystem-safe encoding of a project key.
fn encode_project_key(project_key: &str) -> String {
    STANDARD
        .encode(project_key.as_bytes())
        .replace(['/', '+', '='], "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::CACHE_ROOT_NAME as CACHE_ROOT;

    #[test]
    fn test_local_binary_path() {
        let bin = CacheLayout::local_binary(Path::new("/cache/cds-abc"));
        assert_eq!(bin, PathBuf::from("/cache/cds-abc/node_modules/.bin/cds"));
    }

    #[test]
    fn test_discover_only_shared_dirs_with_binary() {
        let temp = tempfile::TempDir::new().unwrap();
        let layout = CacheLayout::new(temp.path(), CACHE_ROOT);

        for name in ["cds-b", "cds-a", "retry-xyz-1", "other"] {
            let bin = CacheLayout::local_binary(&layout.cache_root.join(name));
            fs::create_dir_all(bin.parent().unwrap()).unwrap();
            fs::write(&bin, "").unwrap();
        }
        fs::create_dir_all(layout.cache_root.join("cds-empty")).unwrap();

        let dirs = layout.discover_cache_dirs();
        assert_eq!(
            dirs,
            vec![layout.cache_root.join("cds-a"), layout.cache_root.join("cds-b")]
        );
    }

    #[test]
    fn test_discover_without_cache_root() {
        let temp = tempfile::TempDir::new().unwrap();
        let layout = CacheLayout::new(temp.path(), CACHE_ROOT);
        assert!(layout.discover_cache_dirs().is_empty());
    }

    #[test]
    fn test_retry_dirs_are_unique() {
        let temp = tempfile::TempDir::new().unwrap();
        let layout = CacheLayout::new(temp.path(), CACHE_ROOT);

        let first = layout.create_retry_dir("apps/bookshop").unwrap();
        let second = layout.create_retry_dir("apps/bookshop").unwrap();

        assert_ne!(first, second);
        assert!(first.is_dir() && second.is_dir());
        let name = first.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("retry-"));
        assert!(!name.contains('/') && !name.contains('+') && !name.contains('='));
    }

    #[test]
    fn test_encoding_is_deterministic() {
        assert_eq!(encode_project_key("a/b"), encode_project_key("a/b"));
        assert_ne!(encode_project_key("a/b"), encode_project_key("a/c"));
    }
}
