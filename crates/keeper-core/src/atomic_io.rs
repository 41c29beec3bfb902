use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::time_utils::current_unix_timestamp_ms;

/// Writes a state document using a temp file + rename so a concurrent
/// reader of the ledger (or any other whole-document store) never observes
/// partial JSON.
pub fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    if path.as_os_str().is_empty() {
        bail!("state file path cannot be empty");
    }
    if path.exists() && path.is_dir() {
        bail!("state file path '{}' is a directory", path.display());
    }

    let parent_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent_dir)
        .with_context(|| format!("creating state directory {}", parent_dir.display()))?;

    // Pid + timestamp keeps concurrent writers off each other's temp files.
    let temp_name = format!(
        ".{}.tmp-{}-{}",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("keeper-state"),
        std::process::id(),
        current_unix_timestamp_ms()
    );
    let temp_path = parent_dir.join(temp_name);
    std::fs::write(&temp_path, content)
        .with_context(|| format!("staging state to {}", temp_path.display()))?;
    std::fs::rename(&temp_path, path).with_context(|| {
        format!(
            "promoting staged state {} to {}",
            temp_path.display(),
            path.display()
        )
    })?;
    Ok(())
}
