use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::batch::Task;
use crate::config::ConfigRegistry;
use crate::error::{ErrorInfo, TaskError};
use crate::extract;
use crate::runtime::context::{ExecutionContext, TaskResult};
use crate::runtime::events::RunEvent;
use crate::runtime::report::{RunReport, RunStatus};
use crate::template;
use crate::transport::{MultipartFile, RequestPayload, RequestSpec, ResponseData};

/// 任务引擎 (Task Engine)
/// Sequential driver over an ordered task list: resolves templates, builds
/// the request payload, sends through the configured transport, records
/// the result, runs extraction, and enforces the stop policy.
pub struct TaskEngine {
    registry: Arc<ConfigRegistry>,
    stop_on_error: bool,
    events: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl TaskEngine {
    pub fn new(registry: Arc<ConfigRegistry>) -> Self {
        Self {
            registry,
            stop_on_error: false,
            events: None,
        }
    }

    /// Halt the run after the first failed task instead of continuing.
    pub fn stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    /// Subscribe to run events. Call before `execute`; the previous
    /// receiver, if any, is replaced.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<RunEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.events {
            // A dropped receiver is not an engine concern.
            let _ = tx.send(event);
        }
    }

    /// Execute the batch from start to finish (or until stop-on-error
    /// fires). Failures stay local to their task; this never errors.
    pub async fn execute(&self, tasks: Vec<Task>) -> RunReport {
        let run_id = Uuid::new_v4();
        let total = tasks.len();
        let mut ctx = ExecutionContext::new();
        let mut status = RunStatus::Completed;

        info!(run_id = %run_id, total, "starting batch run");

        for (index, task) in tasks.into_iter().enumerate() {
            self.emit(RunEvent::Progress(format!(
                "Executing task {}/{}: {} {} ({})",
                index + 1,
                total,
                task.method,
                task.path,
                task.config_name
            )));

            if task.delay_before > 0.0 {
                tokio::time::sleep(Duration::from_secs_f64(task.delay_before)).await;
            }

            let mut failure: Option<ErrorInfo> = None;
            let result = match self.run_task(&task, &ctx).await {
                Ok((resolved, response)) => {
                    let mut result = TaskResult::succeeded(resolved, response);
                    if let Some(extract_vars) = &task.extract_vars {
                        apply_extractions(&mut result, extract_vars, &mut ctx);
                    }
                    result
                }
                Err((resolved, err)) => {
                    warn!(run_id = %run_id, index, error = %err, "task failed");
                    let error = ErrorInfo::from(&err);
                    failure = Some(error.clone());
                    TaskResult::failed(resolved, error)
                }
            };

            let recorded = result.clone();
            ctx.record(result);
            self.emit(RunEvent::TaskCompleted(recorded.clone()));
            if let Some(error) = failure {
                self.emit(RunEvent::TaskFailed {
                    task: recorded.task.clone(),
                    error,
                });
            }

            if task.delay_after > 0.0 {
                tokio::time::sleep(Duration::from_secs_f64(task.delay_after)).await;
            }

            if !recorded.success && self.stop_on_error {
                status = RunStatus::Halted;
                let message = recorded
                    .error
                    .as_ref()
                    .map(|error| error.message.clone())
                    .unwrap_or_else(|| "unknown error".to_string());
                self.emit(RunEvent::Progress(format!("Stopped due to error: {}", message)));
                break;
            }
        }

        let results = ctx.into_results();
        info!(run_id = %run_id, attempted = results.len(), "batch run finished");
        self.emit(RunEvent::Progress(format!(
            "Completed {} task(s)",
            results.len()
        )));
        self.emit(RunEvent::RunCompleted(results.clone()));

        RunReport::new(results, status)
    }

    /// One task attempt. On failure the best-effort resolved copy comes
    /// back with the error so the recorded result shows what was tried.
    async fn run_task(
        &self,
        task: &Task,
        ctx: &ExecutionContext,
    ) -> Result<(Task, ResponseData), (Task, TaskError)> {
        // 1. Resolve templated fields.
        let mut resolved = match resolve_task(task, ctx) {
            Ok(resolved) => resolved,
            Err(err) => return Err((task.clone(), err)),
        };

        // 2. Materialize the request payload.
        let payload = match materialize_payload(&mut resolved, ctx).await {
            Ok(payload) => payload,
            Err(err) => return Err((resolved, err)),
        };

        // 3. Look up the transport before any network attempt.
        let transport = match self.registry.transport(&resolved.config_name) {
            Ok(transport) => transport,
            Err(err) => return Err((resolved, err)),
        };

        // 4. Send. The transport's own retries are opaque here.
        let request = build_request(&resolved, payload);
        match transport.send(request).await {
            Ok(response) => Ok((resolved, response)),
            Err(err) => Err((resolved, TaskError::Transport(err))),
        }
    }
}

fn resolve_task(task: &Task, ctx: &ExecutionContext) -> Result<Task, TaskError> {
    let mut resolved = task.clone();
    resolved.path = template::resolve_to_string(&task.path, ctx, "path")?;
    resolved.params = resolve_map(&task.params, ctx, "params")?;
    resolved.headers = resolve_map(&task.headers, ctx, "headers")?;
    if let Some(body) = &task.body {
        resolved.body = Some(template::resolve_to_string(body, ctx, "body")?);
    }
    if let Some(data) = &task.multipart_data {
        resolved.multipart_data = Some(resolve_map(data, ctx, "multipartData")?);
    }
    Ok(resolved)
}

fn resolve_map(
    map: &Map<String, Value>,
    ctx: &ExecutionContext,
    field: &str,
) -> Result<Map<String, Value>, TaskError> {
    let mut out = Map::new();
    for (key, value) in map {
        out.insert(key.clone(), template::resolve_value(value, ctx, field)?);
    }
    Ok(out)
}

/// Choose the payload once: body file over inline body, any text body
/// over multipart, multipart over empty. The resolved task's `body` is
/// updated to the text actually sent.
async fn materialize_payload(
    resolved: &mut Task,
    ctx: &ExecutionContext,
) -> Result<RequestPayload, TaskError> {
    if let Some(path) = resolved.body_file.clone() {
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| TaskError::File {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        let text = template::resolve_to_string(&raw, ctx, "bodyFile")?;
        resolved.body = Some(text.clone());
        return Ok(RequestPayload::Text(text));
    }

    if let Some(body) = &resolved.body {
        return Ok(RequestPayload::Text(body.clone()));
    }

    if resolved.multipart_data.is_some() || resolved.multipart_files.is_some() {
        let mut fields = Vec::new();
        if let Some(data) = &resolved.multipart_data {
            for (name, value) in data {
                fields.push((name.clone(), template::stringify(value)));
            }
        }

        let mut files = Vec::new();
        if let Some(specs) = &resolved.multipart_files {
            for (field, spec) in specs {
                let bytes = tokio::fs::read(spec.path())
                    .await
                    .map_err(|e| TaskError::File {
                        path: spec.path().display().to_string(),
                        reason: format!("multipart field '{}': {}", field, e),
                    })?;
                let filename = spec
                    .filename()
                    .map(str::to_string)
                    .or_else(|| {
                        spec.path()
                            .file_name()
                            .map(|name| name.to_string_lossy().into_owned())
                    })
                    .unwrap_or_else(|| "file".to_string());
                files.push(MultipartFile {
                    field: field.clone(),
                    filename,
                    content_type: spec.content_type().map(str::to_string),
                    bytes,
                });
            }
        }
        return Ok(RequestPayload::Multipart { fields, files });
    }

    Ok(RequestPayload::Empty)
}

fn build_request(task: &Task, payload: RequestPayload) -> RequestSpec {
    let params = task
        .params
        .iter()
        .map(|(name, value)| (name.clone(), template::stringify(value)))
        .collect();
    let headers = task
        .headers
        .iter()
        .map(|(name, value)| (name.clone(), template::stringify(value)))
        .collect();
    RequestSpec {
        method: task.method,
        path: task.path.clone(),
        params,
        headers,
        payload,
    }
}

/// Run every `extractVars` entry against the response; failures become
/// warnings on the result, successes land in the variable table for the
/// tasks that follow.
fn apply_extractions(
    result: &mut TaskResult,
    extract_vars: &Map<String, Value>,
    ctx: &mut ExecutionContext,
) {
    let Some(response) = &result.response else {
        return;
    };
    for (name, expr) in extract_vars {
        let Some(path_expr) = expr.as_str() else {
            result.warnings.push(format!(
                "extraction '{}' skipped: path expression must be a string",
                name
            ));
            continue;
        };
        match extract::extract(response, path_expr) {
            Ok(value) => ctx.set_variable(name.clone(), value),
            Err(err) => result
                .warnings
                .push(format!("extraction '{}' failed: {}", name, err)),
        }
    }
}
