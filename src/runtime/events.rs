use crate::batch::Task;
use crate::error::ErrorInfo;
use crate::runtime::context::TaskResult;

/// Progress events emitted over the engine's channel while a run is in
/// flight. Consumers (CLI, tests) decide what to render; the engine stays
/// free of any UI dependency.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// Human-readable status line, at least one per task.
    Progress(String),
    /// Emitted once per recorded result, success or failure.
    TaskCompleted(TaskResult),
    /// Emitted once per errored task, in addition to `TaskCompleted`.
    TaskFailed { task: Task, error: ErrorInfo },
    /// Terminal event carrying every recorded result.
    RunCompleted(Vec<TaskResult>),
}
