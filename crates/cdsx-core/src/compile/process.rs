//! Child process spawning with timeouts and environment shaping.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::command::CompilerCommand;
use crate::error::{Error, Result};

/// A full child environment. Children never inherit anything not in here.
pub type EnvMap = BTreeMap<OsString, OsString>;

/// Variables that could make a local binary resolve modules from another install.
const RESOLUTION_VARS: &[&str] = &["NODE_PATH", "npm_config_prefix", "npm_config_global", "CDS_HOME"];

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Captured output of a child that exited on its own.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// How a bounded child process run ended.
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    Exited(ProcessOutput),
    /// The child overran its timeout and was killed and reaped.
    TimedOut,
}

/// Parameters of one bounded child process run.
#[derive(Debug, Clone)]
pub struct SpawnRequest<'a> {
    pub program: &'a Path,
    pub args: Vec<OsString>,
    pub cwd: &'a Path,
    pub env: EnvMap,
    pub timeout: Duration,
}

impl<'a> SpawnRequest<'a> {
    /// Request running `command` followed by `extra` arguments.
    pub fn for_command<I, S>(
        command: &'a CompilerCommand,
        extra: I,
        cwd: &'a Path,
        env: EnvMap,
        timeout: Duration,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args = command
            .args
            .iter()
            .map(OsString::from)
            .chain(extra.into_iter().map(|a| a.as_ref().to_os_string()))
            .collect();
        Self {
            program: &command.program,
            args,
            cwd,
            env,
            timeout,
        }
    }
}

/// Run a child to completion or until its timeout elapses.
///
/// Returns `Err(Error::Process)` only when the child could not be spawned.
/// On unix the child leads its own process group; a timeout kills the whole
/// group and reaps the child, so nothing it started outlives the call.
pub fn run_with_timeout(request: SpawnRequest<'_>) -> Result<ProcessOutcome> {
    let mut command = Command::new(request.program);
    command
        .args(&request.args)
        .current_dir(request.cwd)
        .env_clear()
        .envs(&request.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = command
        .spawn()
        .map_err(|e| {
            Error::Process(format!(
                "Failed to spawn '{}': {}",
                request.program.display(),
                e
            ))
        })?;

    let stdout = capture(child.stdout.take());
    let stderr = capture(child.stderr.take());

    match wait_with_deadline(&mut child, request.timeout)? {
        Some(status) => Ok(ProcessOutcome::Exited(ProcessOutput {
            status,
            stdout: join_capture(stdout),
            stderr: join_capture(stderr),
        })),
        None => {
            tracing::warn!(
                "'{}' timed out after {:?} and was killed",
                request.program.display(),
                request.timeout
            );
            // The group is gone, but a descendant that left it may still
            // hold the pipes; the reader threads finish on their own.
            Ok(ProcessOutcome::TimedOut)
        }
    }
}

/// Poll the child until it exits or `timeout` elapses. `None` means killed.
fn wait_with_deadline(child: &mut Child, timeout: Duration) -> Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            kill_process_tree(child);
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// SIGKILL the child's process group, falling back to the child alone.
#[cfg(unix)]
fn kill_process_tree(child: &mut Child) {
    // Safety: killpg only sends a signal; the group id is the child's pid
    // because it was spawned with process_group(0) and is not yet reaped.
    let rc = unsafe { libc::killpg(child.id() as libc::pid_t, libc::SIGKILL) };
    if rc == 0 {
        return;
    }
    tracing::debug!(
        "killpg failed for {}: {}",
        child.id(),
        std::io::Error::last_os_error()
    );
    if let Err(e) = child.kill() {
        tracing::warn!("Failed to kill timed out child: {}", e);
    }
}

#[cfg(not(unix))]
fn kill_process_tree(child: &mut Child) {
    if let Err(e) = child.kill() {
        tracing::warn!("Failed to kill timed out child: {}", e);
    }
}

fn capture<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join_capture(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

/// The current process environment minus extractor-internal variables.
pub fn sanitized_env(stripped: &[String]) -> EnvMap {
    let mut env: EnvMap = std::env::vars_os().collect();
    for var in stripped {
        env.remove(OsStr::new(var));
    }
    env
}

/// Remove inherited module-resolution variables for a direct local binary.
pub fn scrub_for_direct_binary(env: &mut EnvMap) {
    for var in RESOLUTION_VARS {
        env.remove(OsStr::new(var));
    }
}

/// Point module resolution and executable search at `cache_dir`, with
/// global-module fallback disabled.
pub fn point_at_cache(env: &mut EnvMap, cache_dir: &Path) {
    let modules = cache_dir.join("node_modules");
    let bin = modules.join(".bin");

    let node_path = prepend_path(&modules, env.get(OsStr::new("NODE_PATH")));
    let path = prepend_path(&bin, env.get(OsStr::new("PATH")));

    env.insert("NODE_PATH".into(), node_path);
    env.insert("PATH".into(), path);
    env.insert("npm_config_prefix".into(), cache_dir.as_os_str().to_os_string());
    env.insert("npm_config_global".into(), "false".into());
    env.insert("CDS_HOME".into(), cache_dir.as_os_str().to_os_string());
}

/// Build the environment for running `command`, optionally pinned to a cache.
pub fn compiler_env(command: &CompilerCommand, cache_dir: Option<&Path>, stripped: &[String]) -> EnvMap {
    let mut env = sanitized_env(stripped);
    if command.is_direct_binary() {
        scrub_for_direct_binary(&mut env);
    } else if let Some(cache_dir) = cache_dir {
        point_at_cache(&mut env, cache_dir);
    }
    env
}

fn prepend_path(first: &Path, existing: Option<&OsString>) -> OsString {
    let mut entries: Vec<PathBuf> = vec![first.to_path_buf()];
    if let Some(existing) = existing {
        entries.extend(std::env::split_paths(existing));
    }
    std::env::join_paths(entries).unwrap_or_else(|_| first.as_os_str().to_os_string())
}
