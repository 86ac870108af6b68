//! Compilation target selection for a project.

use std::path::{Path, PathBuf};

/// Conventional layered sub-directories, in compile order.
pub const LAYERED_DIRS: [&str; 3] = ["db", "srv", "app"];

/// Entry-point file that stands for the whole project when present.
pub const ENTRY_POINT: &str = "index.cds";

/// Layered directories that exist under `project_base`, in order.
pub fn layered_dirs(project_base: &Path) -> Vec<&'static str> {
    LAYERED_DIRS
        .into_iter()
        .filter(|dir| project_base.join(dir).is_dir())
        .collect()
}

/// Whether the project follows the layered-directory convention.
pub fn has_layered_layout(project_base: &Path) -> bool {
    !layered_dirs(project_base).is_empty()
}

/// Choose the compiler targets for a project, relative to its directory.
///
/// `files` are relative to `source_root`. In order of preference:
/// the entry-point file, the layered directories (compiled together so
/// cross-layer references resolve), root-level files, then every file.
pub fn select_targets(source_root: &Path, project_dir: &Path, files: &[PathBuf]) -> Vec<String> {
    let base = source_root.join(project_dir);

    if base.join(ENTRY_POINT).is_file() {
        return vec![ENTRY_POINT.to_string()];
    }

    let layered = layered_dirs(&base);
    if !layered.is_empty() {
        return layered.into_iter().map(str::to_string).collect();
    }

    let root_level: Vec<String> = files
        .iter()
        .filter(|file| file.parent() == Some(project_dir))
        .filter_map(|file| file.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .collect();
    if !root_level.is_empty() {
        return root_level;
    }

    files
        .iter()
        .map(|file| relative_to(file, project_dir))
        .collect()
}

/// Render `file` (relative to the source root) relative to `project_dir`.
pub fn relative_to(file: &Path, project_dir: &Path) -> String {
    file.strip_prefix(project_dir)
        .unwrap_or(file)
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "namespace x;").unwrap();
    }

    #[test]
    fn test_entry_point_wins_over_layers() {
        let temp = tempfile::TempDir::new().unwrap();
        let root = temp.path();
        touch(&root.join("shop/srv/service.cds"));
        touch(&root.join("shop/db/schema.cds"));
        touch(&root.join("shop/index.cds"));

        let files = vec![
            PathBuf::from("shop/srv/service.cds"),
            PathBuf::from("shop/db/schema.cds"),
            PathBuf::from("shop/index.cds"),
        ];
        let targets = select_targets(root, Path::new("shop"), &files);
        assert_eq!(targets, vec!["index.cds"]);
        assert!(has_layered_layout(&root.join("shop")));
    }

    #[test]
    fn test_layered_dirs_without_entry_point() {
        let temp = tempfile::TempDir::new().unwrap();
        let root = temp.path();
        touch(&root.join("shop/srv/service.cds"));
        touch(&root.join("shop/db/schema.cds"));
        touch(&root.join("shop/readme.cds"));

        let files = vec![
            PathBuf::from("shop/srv/service.cds"),
            PathBuf::from("shop/db/schema.cds"),
            PathBuf::from("shop/readme.cds"),
        ];
        assert_eq!(select_targets(root, Path::new("shop"), &files), vec!["db", "srv"]);
    }

    #[test]
    fn test_entry_point() {
        let temp = tempfile::TempDir::new().unwrap();
        let root = temp.path();
        touch(&root.join("lib/index.cds"));
        touch(&root.join("lib/other.cds"));

        let files = vec![PathBuf::from("lib/index.cds"), PathBuf::from("lib/other.cds")];
        assert_eq!(select_targets(root, Path::new("lib"), &files), vec!["index.cds"]);
    }

    #[test]
    fn test_root_level_files() {
        let temp = tempfile::TempDir::new().unwrap();
        let root = temp.path();
        touch(&root.join("lib/a.cds"));
        touch(&root.join("lib/nested/b.cds"));

        let files = vec![PathBuf::from("lib/a.cds"), PathBuf::from("lib/nested/b.cds")];
        assert_eq!(select_targets(root, Path::new("lib"), &files), vec!["a.cds"]);
    }

    #[test]
    fn test_all_files_relative_to_project() {
        let temp = tempfile::TempDir::new().unwrap();
        let root = temp.path();
        touch(&root.join("lib/model/a.cds"));
        touch(&root.join("lib/views/b.cds"));

        let files = vec![PathBuf::from("lib/model/a.cds"), PathBuf::from("lib/views/b.cds")];
        assert_eq!(
            select_targets(root, Path::new("lib"), &files),
            vec!["model/a.cds", "views/b.cds"]
        );
        assert!(!has_layered_layout(&root.join("lib")));
    }
}
