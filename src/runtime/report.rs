use anyhow::{Context as AnyhowContext, Result};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::runtime::context::TaskResult;

/// Bodies longer than this are cut in the text report; the JSON report
/// always carries them in full.
const TEXT_BODY_LIMIT: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunStatus {
    /// Every task was attempted.
    #[default]
    Completed,
    /// Stop-on-error fired; remaining tasks were never attempted.
    Halted,
}

/// Aggregate outcome of one run. `total` counts attempted tasks, not the
/// length of the original batch when the run halted early.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub total: usize,
    pub successful: usize,
    pub results: Vec<TaskResult>,
    #[serde(skip)]
    pub status: RunStatus,
}

impl RunReport {
    pub(crate) fn new(results: Vec<TaskResult>, status: RunStatus) -> Self {
        let successful = results.iter().filter(|result| result.success).count();
        Self {
            total: results.len(),
            successful,
            results,
            status,
        }
    }

    pub fn failed(&self) -> usize {
        self.total - self.successful
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize run report")
    }

    /// Write the report to disk: `.txt` gets the text rendering, anything
    /// else the JSON form.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = if path.extension().and_then(|ext| ext.to_str()) == Some("txt") {
            self.render_text()
        } else {
            self.to_json()?
        };
        fs::write(path, content)
            .with_context(|| format!("Failed to write report to {}", path.display()))
    }

    /// Human-readable report: one block per task with method, path,
    /// status, body and error.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== Execution Report ===");
        let _ = writeln!(out, "Total tasks: {}", self.total);
        let _ = writeln!(out, "Successful: {}", self.successful);
        let _ = writeln!(out, "Failed: {}", self.failed());
        if self.status == RunStatus::Halted {
            let _ = writeln!(out, "Run halted on first error.");
        }

        for (index, result) in self.results.iter().enumerate() {
            let task = &result.task;
            let _ = writeln!(
                out,
                "\n--- Task {}: {} {} ({}) ---",
                index + 1,
                task.method,
                task.path,
                task.config_name
            );
            let _ = writeln!(out, "Executed at: {}", result.timestamp.to_rfc3339());

            if let Some(response) = &result.response {
                let _ = writeln!(out, "Status: {}", response.status_code);
                let _ = writeln!(out, "URL: {}", response.url);
                let body = render_body(response.json.as_ref(), &response.body);
                if !body.is_empty() {
                    let _ = writeln!(out, "Body:\n{}", body);
                }
            }
            if let Some(error) = &result.error {
                let _ = writeln!(out, "Error: {}", error.message);
            }
            for warning in &result.warnings {
                let _ = writeln!(out, "Warning: {}", warning);
            }
        }
        out
    }
}

fn render_body(json: Option<&serde_json::Value>, raw: &str) -> String {
    let text = match json {
        Some(value) => serde_json::to_string_pretty(value).unwrap_or_else(|_| raw.to_string()),
        None => raw.to_string(),
    };
    if text.len() > TEXT_BODY_LIMIT {
        let cut: String = text.chars().take(TEXT_BODY_LIMIT).collect();
        format!("{}... ({} bytes total)", cut, text.len())
    } else {
        text
    }
}
