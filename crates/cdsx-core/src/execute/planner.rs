//! Task planning.

use std::path::Path;
use std::time::SystemTime;

use crate::compile::{MODEL_FILE, file_artifact, relative_to, select_targets};
use crate::error::{Error, Result};
use crate::graph::{CompilationTask, Project, ProjectStatus, TaskKind};

/// Priority of whole-project tasks.
pub const UNIT_TASK_PRIORITY: u32 = 10;

/// Priority of single-file tasks.
pub const FILE_TASK_PRIORITY: u32 = 5;

/// Turns a configured project into compilation tasks.
pub struct TaskPlanner<'a> {
    source_root: &'a Path,
}

impl<'a> TaskPlanner<'a> {
    pub fn new(source_root: &'a Path) -> Self {
        Self { source_root }
    }

    /// Plan tasks for `project`, replacing any existing plan.
    ///
    /// Unit compilation yields one task over all files writing
    /// `model.cds.json`; otherwise each file gets its own task writing a
    /// sibling `.json` artifact.
    pub fn plan(&self, project: &mut Project) -> Result<()> {
        let unit = project
            .config
            .as_ref()
            .map(|c| c.use_unit_compilation)
            .ok_or_else(|| Error::Planning {
                project: project.key.clone(),
                message: "no compilation configuration".to_string(),
            })?;

        if project.files.is_empty() {
            return Err(Error::Planning {
                project: project.key.clone(),
                message: format!(
                    "project directory '{}' does not contain any CDS files and cannot be compiled",
                    project.dir.display()
                ),
            });
        }

        let tasks = if unit {
            project.targets = select_targets(self.source_root, &project.dir, &project.files);
            let output = project.dir.join(MODEL_FILE);
            vec![CompilationTask::new(
                TaskKind::Project,
                project.key.clone(),
                project.files.clone(),
                vec![output],
                UNIT_TASK_PRIORITY,
            )]
        } else {
            project.targets = project
                .files
                .iter()
                .map(|f| relative_to(f, &project.dir))
                .collect();
            project
                .files
                .iter()
                .map(|file| {
                    CompilationTask::new(
                        TaskKind::File,
                        project.key.clone(),
                        vec![file.clone()],
                        vec![file_artifact(file)],
                        FILE_TASK_PRIORITY,
                    )
                })
                .collect()
        };

        project.expected_outputs = tasks
            .iter()
            .flat_map(|t| t.expected_outputs.iter().cloned())
            .collect();
        tracing::info!(
            "Planned {} task(s) for project {} (targets: {})",
            tasks.len(),
            project.key,
            project.targets.join(", ")
        );
        project.tasks = tasks;
        project.status = ProjectStatus::CompilationPlanned;
        project.timestamps.planned = Some(SystemTime::now());
        Ok(())
    }
}

/// Compiler targets for one task of `project`, relative to its directory.
pub fn task_targets(project: &Project, task: &CompilationTask) -> Vec<String> {
    match task.kind {
        TaskKind::Project => project.targets.clone(),
        TaskKind::File => task
            .source_files
            .iter()
            .map(|f| relative_to(f, &project.dir))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{
        CommandSource, CompilationConfig, CompilerCommand, VersionCompatibility,
    };
    use crate::graph::{DependencyGraph, DiscoveredProject, DiscoveryInput, TaskStatus};
    use std::path::PathBuf;

    fn config(unit: bool) -> CompilationConfig {
        CompilationConfig {
            command: CompilerCommand::parse("cds").unwrap(),
            command_source: CommandSource::Global,
            cache_dir: None,
            use_unit_compilation: unit,
            expected_version: None,
            version_compatibility: VersionCompatibility::Unknown,
            alternatives: Vec::new(),
            max_attempts: 3,
        }
    }

    fn project(root: &Path, files: &[&str]) -> Project {
        for f in files {
            let path = root.join(f);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, "").unwrap();
        }
        let mut input = DiscoveryInput {
            source_root: root.to_path_buf(),
            ..Default::default()
        };
        input.projects.insert(
            "shop".to_string(),
            DiscoveredProject {
                files: files.iter().map(PathBuf::from).collect(),
                ..Default::default()
            },
        );
        DependencyGraph::from_discovery(input)
            .projects
            .remove("shop")
            .unwrap()
    }

    #[test]
    fn test_unit_plan() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut project = project(temp.path(), &["shop/srv/service.cds", "shop/db/schema.cds"]);
        project.config = Some(config(true));

        TaskPlanner::new(temp.path()).plan(&mut project).unwrap();

        assert_eq!(project.tasks.len(), 1);
        let task = &project.tasks[0];
        assert_eq!(task.kind, TaskKind::Project);
        assert_eq!(task.priority, UNIT_TASK_PRIORITY);
        assert_eq!(task.source_files.len(), 2);
        assert_eq!(task.expected_outputs, vec![PathBuf::from("shop/model.cds.json")]);
        assert_eq!(task.status(), TaskStatus::Pending);
        assert!(task.attempts().is_empty());
        assert_eq!(project.targets, vec!["db", "srv"]);
        assert_eq!(task_targets(&project, &project.tasks[0]), vec!["db", "srv"]);
        assert_eq!(project.status, ProjectStatus::CompilationPlanned);
    }

    #[test]
    fn test_file_plan() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut project = project(temp.path(), &["shop/a.cds", "shop/model/b.cds"]);
        project.config = Some(config(false));

        TaskPlanner::new(temp.path()).plan(&mut project).unwrap();

        assert_eq!(project.tasks.len(), 2);
        assert!(project.tasks.iter().all(|t| t.priority == FILE_TASK_PRIORITY));
        assert_eq!(
            project.tasks[1].expected_outputs,
            vec![PathBuf::from("shop/model/b.cds.json")]
        );
        assert_eq!(task_targets(&project, &project.tasks[1]), vec!["model/b.cds"]);
        assert_eq!(project.expected_outputs.len(), 2);
    }

    #[test]
    fn test_plan_requires_config_and_files() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut project = project(temp.path(), &[]);
        assert!(TaskPlanner::new(temp.path()).plan(&mut project).is_err());

        project.config = Some(config(true));
        let err = TaskPlanner::new(temp.path()).plan(&mut project).unwrap_err();
        assert!(err.to_string().contains("does not contain any CDS files"));
    }
}
