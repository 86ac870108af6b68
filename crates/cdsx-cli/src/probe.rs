//! Probe command implementation.

use std::path::Path;

use cdsx_core::{CommandResolver, ExtractorSettings};
use serde_json::json;

/// Resolve a command for `source_root` and print every strategy's outcome.
pub fn execute(source_root: &Path, cache_dir: Option<&Path>) -> anyhow::Result<()> {
    if !source_root.is_dir() {
        return Err(cdsx_core::Error::CommandResolution(format!(
            "source root {} is not a directory",
            source_root.display()
        ))
        .into());
    }

    let resolver = CommandResolver::new(source_root, ExtractorSettings::from_env());
    let resolved = resolver.resolve(cache_dir)?;
    let report = json!({
        "resolved": resolved,
        "analysis": resolver.analysis(cache_dir),
    });

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
