use anyhow::{Context as AnyhowContext, Result};
use std::fs;
use std::path::Path;

use crate::batch::{Batch, Task};

/// Load a task batch from a JSON file. Relative `bodyFile` and
/// `multipartFiles` paths are rebased onto the batch file's directory.
pub fn load_batch_from_file(file_path: &Path) -> Result<Vec<Task>> {
    let content = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read batch file from {}", file_path.display()))?;

    let batch: Batch = serde_json::from_str(&content)
        .with_context(|| format!("Failed to deserialize batch file {}", file_path.display()))?;

    let base_dir = file_path.parent().unwrap_or_else(|| Path::new("."));
    let mut tasks = batch.tasks;
    for task in &mut tasks {
        task.anchor_paths(base_dir);
    }

    Ok(tasks)
}

/// Parse a batch from an in-memory JSON string. No path rebasing is done;
/// callers own the meaning of relative paths here.
pub fn parse_batch(content: &str) -> Result<Vec<Task>> {
    let batch: Batch =
        serde_json::from_str(content).context("Failed to deserialize batch content")?;
    Ok(batch.tasks)
}
