//! Compiler command values.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// A compiler invocation: program plus prefix arguments.
///
/// Commands are never run through a shell. `display` is the string the
/// command was created from and is the memoization key of the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CompilerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub display: String,
}

impl CompilerCommand {
    /// Parse a whitespace-separated invocation such as
    /// `npx -y --package @sap/cds-dk cds`.
    ///
    /// Returns `None` for an empty string.
    pub fn parse(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace();
        let program = parts.next()?;
        Some(Self {
            program: PathBuf::from(program),
            args: parts.map(str::to_string).collect(),
            display: command.trim().to_string(),
        })
    }

    /// A direct path to a local compiler binary.
    pub fn local(binary: &Path) -> Self {
        Self {
            program: binary.to_path_buf(),
            args: Vec::new(),
            display: binary.display().to_string(),
        }
    }

    /// Whether this is a binary inside a `node_modules/.bin` directory.
    ///
    /// Such binaries run with a scrubbed environment; anything else is an
    /// indirect command that gets pointed at a cache directory.
    pub fn is_direct_binary(&self) -> bool {
        let mut components = self.program.components().rev();
        let _binary = components.next();
        let bin = components.next().map(|c| c.as_os_str() == ".bin");
        let modules = components.next().map(|c| c.as_os_str() == "node_modules");
        bin == Some(true) && modules == Some(true)
    }

    /// Whether the program is a bare name to be looked up on `PATH`.
    pub fn is_bare_name(&self) -> bool {
        self.program.components().count() == 1 && !self.program.is_absolute()
    }
}

impl fmt::Display for CompilerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}
