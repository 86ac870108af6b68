//! Compiler invocation: command resolution, configuration, and execution.
//!
//! The pipeline per project:
//! 1. [`CommandResolver`] finds a working compiler command (probes are cached)
//! 2. [`ConfigurationBuilder`] pins command, cache directory and compile mode
//! 3. [`CompilationExecutor`] spawns the compiler and checks its output

mod command;
mod config;
mod executor;
mod output;
pub mod process;
mod resolver;
mod targets;
mod version;

pub use command::CompilerCommand;
pub use config::{CompilationConfig, ConfigurationBuilder};
pub use executor::{CompilationExecutor, CompileOutcome, CompileRequest};
pub use output::{ARTIFACT_SUFFIX, MODEL_FILE, file_artifact, normalize_output_dir};
pub use resolver::{
    CommandAnalysisEntry, CommandProbe, CommandResolver, CommandSource, ProbeOutcome,
    ProcessProbe, ResolvedCommand,
};
pub use targets::{ENTRY_POINT, LAYERED_DIRS, has_layered_layout, layered_dirs, relative_to, select_targets};
pub use version::{CDS_PACKAGE, VersionCompatibility, expected_version, extract_version};
