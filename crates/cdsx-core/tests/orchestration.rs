//! Integration tests for full orchestration runs.
//!
//! The compiler and package manager are small shell scripts written into a
//! temp directory, so every test drives the real spawn path.

#![cfg(unix)]

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use cdsx_core::graph::{
    DependencyGraph, DiscoveredProject, DiscoveryInput, Manifest, ProjectStatus, RunPhase,
    TaskKind, TaskStatus,
};
use cdsx_core::{ExtractorSettings, Orchestrator, RecordingDiagnostics, validate_task};
use tempfile::TempDir;

// Tests write executables and then spawn them; running them one at a time
// keeps another test's fork from holding a script open for writing.
static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Test Helpers
// =============================================================================

/// What a fake compiler does when asked to compile.
#[derive(Clone, Copy)]
enum Mode {
    /// Writes a JSON object naming its targets.
    Ok,
    /// Exits zero after writing an empty file.
    Empty,
    /// Exits non-zero with a compile error.
    Fail,
    /// Exits non-zero complaining about a missing module.
    MissingDependency,
}

fn write_script(path: &Path, body: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

/// Write a fake `cds` that logs `<cwd>|<args>` to `log` on every compile.
fn fake_cds(path: &Path, log: &Path, mode: Mode) {
    let action = match mode {
        Mode::Ok => r#"printf '{"definitions":{},"targets":[%s]}' "$targets" > "$dest""#,
        Mode::Empty => r#": > "$dest""#,
        Mode::Fail => "echo \"[ERROR] srv/service.cds:1:9: No artifact has been found\" >&2; exit 1",
        Mode::MissingDependency => {
            "echo \"[ERROR] Cannot find module '@sap/cds-hana'\" >&2; exit 1"
        }
    };
    let body = format!(
        r#"#!/bin/sh
if [ "$1" = "--version" ]; then
  echo "@sap/cds: 7.9.2"
  echo "@sap/cds-compiler: 4.9.4"
  exit 0
fi
echo "$(pwd -P)|$*" >> "{log}"
shift
targets=""
dest=""
while [ $# -gt 0 ]; do
  case "$1" in
    --dest) dest="$2"; shift 2 ;;
    --to|--log-level) shift 2 ;;
    --*) shift ;;
    *) if [ -n "$targets" ]; then targets="$targets,"; fi
       targets="$targets\"$1\""; shift ;;
  esac
done
{action}
"#,
        log = log.display(),
        action = action
    );
    write_script(path, &body);
}

/// Write a fake package manager that installs `compiler` as the local binary.
fn fake_npm(path: &Path, compiler: &Path) {
    let body = format!(
        "#!/bin/sh\nmkdir -p node_modules/.bin\ncp \"{}\" node_modules/.bin/cds\nchmod +x node_modules/.bin/cds\n",
        compiler.display()
    );
    write_script(path, &body);
}

struct Workspace {
    temp: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp directory");
        fs::create_dir_all(temp.path().join("src")).unwrap();
        Self { temp }
    }

    fn root(&self) -> PathBuf {
        self.temp.path().join("src")
    }

    fn tool(&self, name: &str) -> PathBuf {
        self.temp.path().join("tools").join(name)
    }

    fn log(&self) -> PathBuf {
        self.temp.path().join("cds.log")
    }

    fn invocations(&self) -> Vec<String> {
        fs::read_to_string(self.log())
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// A bookshop project with `db/` and `srv/` layers.
    fn bookshop(&self, root: &Path, manifest: Option<Manifest>) -> DiscoveryInput {
        for (rel, content) in [
            ("bookshop/db/schema.cds", "namespace shop; entity Books { key ID: Integer; }"),
            ("bookshop/srv/service.cds", "using shop from '../db/schema'; service Catalog {}"),
        ] {
            let path = root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }

        let mut input = DiscoveryInput {
            source_root: root.to_path_buf(),
            ..Default::default()
        };
        input.projects.insert(
            "bookshop".to_string(),
            DiscoveredProject {
                files: vec![
                    PathBuf::from("bookshop/srv/service.cds"),
                    PathBuf::from("bookshop/db/schema.cds"),
                ],
                manifest,
                ..Default::default()
            },
        );
        input
    }

    fn settings(&self, globals: &[&PathBuf], fallbacks: &[&PathBuf]) -> ExtractorSettings {
        ExtractorSettings {
            global_commands: globals.iter().map(|p| p.display().to_string()).collect(),
            fallback_commands: fallbacks.iter().map(|p| p.display().to_string()).collect(),
            default_command: self.tool("nonexistent-cds").display().to_string(),
            package_manager: self.tool("npm").display().to_string(),
            probe_timeout: Duration::from_secs(10),
            compile_timeout: Duration::from_secs(30),
            install_timeout: Duration::from_secs(30),
            workers: 2,
            ..Default::default()
        }
    }
}

fn cds_manifest() -> Manifest {
    Manifest {
        name: Some("bookshop".to_string()),
        dependencies: BTreeMap::from([("@sap/cds".to_string(), "^7.9.0".to_string())]),
        ..Default::default()
    }
}

fn run(
    settings: ExtractorSettings,
    input: DiscoveryInput,
    sink: &RecordingDiagnostics,
) -> DependencyGraph {
    Orchestrator::new(settings, sink)
        .run(input)
        .expect("orchestration should not fail")
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_clean_success_compiles_layered_project_as_unit() {
    let _guard = serial();
    let ws = Workspace::new();
    let cds = ws.tool("cds");
    fake_cds(&cds, &ws.log(), Mode::Ok);
    let sink = RecordingDiagnostics::new();

    let graph = run(
        ws.settings(&[&cds], &[]),
        ws.bookshop(&ws.root(), Some(cds_manifest())),
        &sink,
    );

    let project = &graph.projects["bookshop"];
    assert_eq!(project.tasks.len(), 1);
    let task = &project.tasks[0];
    assert_eq!(task.kind, TaskKind::Project);
    assert_eq!(task.status(), TaskStatus::Success);
    assert_eq!(task.attempts().len(), 1);
    assert_eq!(project.targets, vec!["db", "srv"]);
    assert_eq!(project.status, ProjectStatus::Completed);

    let config = project.config.as_ref().unwrap();
    assert!(config.use_unit_compilation);
    assert!(config.version_compatibility.is_compatible());

    let project_dir = fs::canonicalize(ws.root().join("bookshop")).unwrap();
    assert_eq!(
        ws.invocations(),
        vec![format!(
            "{}|compile db srv --to json --dest model.cds.json --locations --log-level warn",
            project_dir.display()
        )]
    );

    let output = ws.root().join("bookshop/model.cds.json");
    let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(output).unwrap()).unwrap();
    assert!(value.is_object());
    assert!(validate_task(task, &graph.source_root).is_valid);

    assert!(graph.summary.overall_success);
    assert_eq!(graph.summary.successful_compilations, 1);
    assert_eq!(graph.summary.json_files_generated, 1);
    assert_eq!(graph.phase, RunPhase::Completed);
    assert!(sink.recorded().is_empty());
}

#[test]
fn test_silent_empty_output_is_downgraded_and_retried() {
    let _guard = serial();
    let ws = Workspace::new();
    let cds = ws.tool("cds");
    fake_cds(&cds, &ws.log(), Mode::Empty);
    let sink = RecordingDiagnostics::new();

    let graph = run(
        ws.settings(&[&cds], &[]),
        ws.bookshop(&ws.root(), None),
        &sink,
    );

    let task = &graph.projects["bookshop"].tasks[0];
    // The compiler claimed success on the first attempt.
    assert!(task.attempts()[0].result.success);
    assert_eq!(task.status(), TaskStatus::Failed);
    assert!(task.has_been_retried());
    assert!(task.error_summary.as_deref().unwrap().contains("Output validation failed"));

    assert_eq!(graph.retry_status.total_tasks_requiring_retry, 1);
    assert_eq!(graph.projects["bookshop"].status, ProjectStatus::Failed);
    assert_eq!(sink.recorded().len(), 2);
    assert!(!graph.summary.overall_success);
}

#[test]
fn test_command_exhaustion_tries_every_alternative() {
    let _guard = serial();
    let ws = Workspace::new();
    let primary = ws.tool("cds");
    let alt_a = ws.tool("cds-a");
    let alt_b = ws.tool("cds-b");
    for path in [&primary, &alt_a, &alt_b] {
        fake_cds(path, &ws.log(), Mode::Fail);
    }
    let sink = RecordingDiagnostics::new();

    let graph = run(
        ws.settings(&[&primary], &[&alt_a, &alt_b]),
        ws.bookshop(&ws.root(), None),
        &sink,
    );

    let project = &graph.projects["bookshop"];
    let config = project.config.as_ref().unwrap();
    assert_eq!(config.alternatives.len(), 2);

    let task = &project.tasks[0];
    assert_eq!(task.status(), TaskStatus::Failed);

    // The compilation phase tried the primary and each alternative once;
    // the retry phase added one more attempt with the re-resolved command.
    let attempts = task.attempts();
    assert_eq!(attempts.len(), 1 + config.alternatives.len() + 1);
    let commands: Vec<&str> = attempts[..3].iter().map(|a| a.command.as_str()).collect();
    assert_eq!(
        commands,
        vec![
            primary.display().to_string(),
            alt_a.display().to_string(),
            alt_b.display().to_string()
        ]
    );
    assert!(
        attempts
            .iter()
            .all(|a| a.error.as_deref().unwrap().contains("No artifact has been found"))
    );

    // One diagnostic per source file, reported once.
    let mut reported: Vec<PathBuf> = sink.recorded().into_iter().map(|d| d.source_file).collect();
    reported.sort();
    assert_eq!(
        reported,
        vec![
            ws.root().join("bookshop/db/schema.cds"),
            ws.root().join("bookshop/srv/service.cds")
        ]
    );
    assert_eq!(graph.summary.failed_compilations, 1);
}

#[test]
fn test_missing_dependency_succeeds_after_full_install() {
    let _guard = serial();
    let ws = Workspace::new();
    let broken = ws.tool("cds");
    let working = ws.tool("cds-full");
    fake_cds(&broken, &ws.log(), Mode::MissingDependency);
    fake_cds(&working, &ws.log(), Mode::Ok);
    fake_npm(&ws.tool("npm"), &working);
    let sink = RecordingDiagnostics::new();

    let lockfile = ws.root().join("bookshop/package-lock.json");
    let input = ws.bookshop(&ws.root(), Some(cds_manifest()));
    fs::write(&lockfile, r#"{"lockfileVersion": 3}"#).unwrap();

    let graph = run(ws.settings(&[&broken], &[]), input, &sink);

    let project = &graph.projects["bookshop"];
    let task = &project.tasks[0];
    assert_eq!(task.status(), TaskStatus::Success);
    assert!(task.has_been_retried());
    assert!(task.retry_info.as_ref().unwrap().full_dependencies_installed);
    assert_eq!(task.attempts().len(), 2);
    assert!(!task.attempts()[0].result.success);
    assert!(task.attempts()[1].result.success);

    let retry_cache = project.retry.retry_cache_dir.as_ref().unwrap();
    assert!(project.retry.full_dependencies_installed);
    assert!(retry_cache.join("package.json").is_file());
    assert!(retry_cache.join("package-lock.json").is_file());
    assert_eq!(task.attempts()[1].cache_dir.as_ref(), Some(retry_cache));
    let name = retry_cache.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("retry-"));

    // Before the retry the task counted as failed; afterwards as successful.
    assert_eq!(graph.summary.successful_compilations, 1);
    assert_eq!(graph.summary.failed_compilations, 0);
    assert_eq!(graph.summary.retried_compilations, 1);
    assert_eq!(graph.retry_status.total_tasks_requiring_retry, 1);
    assert_eq!(graph.retry_status.total_tasks_successfully_retried, 1);
    assert!(graph.retry_status.projects_with_full_dependencies.contains("bookshop"));
    assert_eq!(project.status, ProjectStatus::Completed);
    assert!(graph.summary.overall_success);
    assert!(sink.recorded().is_empty());
}

#[test]
fn test_output_is_independent_of_source_root_location() {
    let _guard = serial();
    let ws = Workspace::new();
    let cds = ws.tool("cds");
    fake_cds(&cds, &ws.log(), Mode::Ok);
    let sink = RecordingDiagnostics::new();

    let first = ws.root();
    let second = ws.temp.path().join("elsewhere/checkout");
    fs::create_dir_all(&second).unwrap();

    run(ws.settings(&[&cds], &[]), ws.bookshop(&first, None), &sink);
    run(ws.settings(&[&cds], &[]), ws.bookshop(&second, None), &sink);

    let a = fs::read_to_string(first.join("bookshop/model.cds.json")).unwrap();
    let b = fs::read_to_string(second.join("bookshop/model.cds.json")).unwrap();
    assert_eq!(a, b);
    assert!(!a.contains(&first.display().to_string()));
}

#[test]
fn test_individual_files_without_layers() {
    let _guard = serial();
    let ws = Workspace::new();
    let cds = ws.tool("cds");
    fake_cds(&cds, &ws.log(), Mode::Ok);
    let sink = RecordingDiagnostics::new();

    let root = ws.root();
    for rel in ["flat/a.cds", "flat/model/b.cds"] {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "entity X {}").unwrap();
    }
    let mut input = DiscoveryInput {
        source_root: root.clone(),
        ..Default::default()
    };
    input.projects.insert(
        "flat".to_string(),
        DiscoveredProject {
            files: vec![PathBuf::from("flat/a.cds"), PathBuf::from("flat/model/b.cds")],
            ..Default::default()
        },
    );

    let graph = run(ws.settings(&[&cds], &[]), input, &sink);

    let project = &graph.projects["flat"];
    assert_eq!(project.tasks.len(), 2);
    assert!(project.tasks.iter().all(|t| t.kind == TaskKind::File));
    assert!(project.tasks.iter().all(|t| t.status() == TaskStatus::Success));
    assert!(root.join("flat/a.cds.json").is_file());
    assert!(root.join("flat/model/b.cds.json").is_file());
    assert_eq!(graph.summary.json_files_generated, 2);
}
