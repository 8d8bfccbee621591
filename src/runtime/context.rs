use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::batch::Task;
use crate::error::ErrorInfo;
use crate::transport::ResponseData;

/// 执行上下文 (Execution Context)
/// All mutable state of one batch run: the ordered result history and the
/// variable table. Owned exclusively by a single engine run; never shared,
/// never a global.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    history: Vec<TaskResult>,
    variables: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Results in execution order. `history[i]` is the i-th task actually
    /// attempted, which is what `{{i.response...}}` templates reference.
    pub fn history(&self) -> &[TaskResult] {
        &self.history
    }

    pub fn response_at(&self, index: usize) -> Option<&ResponseData> {
        self.history
            .get(index)
            .and_then(|result| result.response.as_ref())
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Later writes of the same name overwrite; entries are never removed
    /// during a run.
    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn variables(&self) -> &HashMap<String, Value> {
        &self.variables
    }

    /// Append a result. History is append-only; there is no way to remove
    /// or reorder entries.
    pub fn record(&mut self, result: TaskResult) {
        self.history.push(result);
    }

    pub fn into_results(self) -> Vec<TaskResult> {
        self.history
    }
}

/// Outcome of one attempted task. Created once, in execution order, and
/// never mutated after it is recorded.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    /// The resolved, post-substitution copy actually sent.
    pub task: Task,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Extraction failures; informational, never a task failure.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl TaskResult {
    pub fn succeeded(task: Task, response: ResponseData) -> Self {
        Self {
            task,
            success: true,
            response: Some(response),
            error: None,
            warnings: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn failed(task: Task, error: ErrorInfo) -> Self {
        Self {
            task,
            success: false,
            response: None,
            error: Some(error),
            warnings: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}
