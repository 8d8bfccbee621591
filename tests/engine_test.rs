use async_trait::async_trait;
use restload::batch::{FileSpec, HttpMethod, Task};
use restload::config::ConfigRegistry;
use restload::error::{ErrorKind, TransportError};
use restload::runtime::engine::TaskEngine;
use restload::runtime::events::RunEvent;
use restload::runtime::report::RunStatus;
use restload::transport::{RequestPayload, RequestSpec, ResponseData, Transport};
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::io::Write as _;
use std::sync::{Arc, Mutex};

/// Scripted transport: pops one canned outcome per call and records every
/// request it saw.
struct MockTransport {
    outcomes: Mutex<VecDeque<Result<ResponseData, TransportError>>>,
    requests: Mutex<Vec<RequestSpec>>,
}

impl MockTransport {
    fn new(outcomes: Vec<Result<ResponseData, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<RequestSpec> {
        self.requests.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: RequestSpec) -> Result<ResponseData, TransportError> {
        self.requests.lock().expect("lock poisoned").push(request);
        self.outcomes
            .lock()
            .expect("lock poisoned")
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Request("no scripted outcome".to_string())))
    }
}

fn ok_json(body: Value) -> Result<ResponseData, TransportError> {
    Ok(ResponseData {
        status_code: 200,
        headers: HashMap::from([("content-type".to_string(), "application/json".to_string())]),
        url: "http://localhost:8000/mock".to_string(),
        method: "GET".to_string(),
        body: body.to_string(),
        json: Some(body),
    })
}

fn failed() -> Result<ResponseData, TransportError> {
    Err(TransportError::Connect {
        url: "http://localhost:8000/mock".to_string(),
        message: "connection refused".to_string(),
    })
}

fn registry_with(name: &str, transport: Arc<MockTransport>) -> Arc<ConfigRegistry> {
    let registry = ConfigRegistry::new();
    registry.register(name, transport);
    Arc::new(registry)
}

#[tokio::test]
async fn test_engine_chains_extracted_variable_into_next_task() {
    // 1. Task 0 returns {"id": 42} and extracts it as `uid`.
    let transport = MockTransport::new(vec![ok_json(json!({"id": 42})), ok_json(json!({}))]);
    let registry = registry_with("api1", transport.clone());

    let tasks = vec![
        Task::new("api1", HttpMethod::Post, "/users").extract("uid", "json.id"),
        Task::new("api1", HttpMethod::Get, "/users/{{uid}}"),
    ];

    // 2. Run
    let engine = TaskEngine::new(registry);
    let report = engine.execute(tasks).await;

    // 3. Task 1's path carries the extracted value.
    assert_eq!(report.total, 2);
    assert_eq!(report.successful, 2);
    let requests = transport.requests();
    assert_eq!(requests[1].path, "/users/42");
}

#[tokio::test]
async fn test_engine_history_reference_reaches_earlier_response() {
    let transport = MockTransport::new(vec![
        ok_json(json!({"token": "abc123"})),
        ok_json(json!({})),
    ]);
    let registry = registry_with("api1", transport.clone());

    let tasks = vec![
        Task::new("api1", HttpMethod::Post, "/login"),
        Task::new("api1", HttpMethod::Get, "/profile")
            .header("Authorization", "Bearer {{0.response.json.token}}"),
    ];

    let engine = TaskEngine::new(registry);
    let report = engine.execute(tasks).await;

    assert_eq!(report.successful, 2);
    let requests = transport.requests();
    let auth = requests[1]
        .headers
        .iter()
        .find(|(name, _)| name == "Authorization")
        .map(|(_, value)| value.clone());
    assert_eq!(auth.as_deref(), Some("Bearer abc123"));
}

#[tokio::test]
async fn test_engine_stop_on_error_halts_remaining_tasks() {
    // 5 tasks; task 2 (index) fails.
    let transport = MockTransport::new(vec![
        ok_json(json!({})),
        ok_json(json!({})),
        failed(),
        ok_json(json!({})),
        ok_json(json!({})),
    ]);
    let registry = registry_with("api1", transport.clone());
    let tasks: Vec<Task> = (0..5)
        .map(|i| Task::new("api1", HttpMethod::Get, format!("/step/{i}")))
        .collect();

    let engine = TaskEngine::new(registry).stop_on_error(true);
    let report = engine.execute(tasks).await;

    assert_eq!(report.status, RunStatus::Halted);
    assert_eq!(report.total, 3, "tasks after the failure are not attempted");
    assert_eq!(report.successful, 2);
    assert_eq!(transport.requests().len(), 3);
}

#[tokio::test]
async fn test_engine_continues_past_failures_by_default() {
    let transport = MockTransport::new(vec![
        ok_json(json!({})),
        ok_json(json!({})),
        failed(),
        ok_json(json!({})),
        ok_json(json!({})),
    ]);
    let registry = registry_with("api1", transport.clone());
    let tasks: Vec<Task> = (0..5)
        .map(|i| Task::new("api1", HttpMethod::Get, format!("/step/{i}")))
        .collect();

    let engine = TaskEngine::new(registry);
    let report = engine.execute(tasks).await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.total, 5);
    assert_eq!(report.successful, 4);
    let failed_result = &report.results[2];
    assert!(!failed_result.success);
    assert_eq!(
        failed_result.error.as_ref().expect("should carry error").kind,
        ErrorKind::Transport
    );
}

#[tokio::test]
async fn test_engine_unknown_config_fails_before_network() {
    let transport = MockTransport::new(vec![ok_json(json!({}))]);
    let registry = registry_with("api1", transport.clone());

    let tasks = vec![Task::new("nope", HttpMethod::Get, "/ping")];
    let engine = TaskEngine::new(registry);
    let report = engine.execute(tasks).await;

    assert_eq!(report.successful, 0);
    assert_eq!(
        report.results[0].error.as_ref().expect("should carry error").kind,
        ErrorKind::ConfigNotFound
    );
    assert!(transport.requests().is_empty(), "no network attempt");
}

#[tokio::test]
async fn test_engine_unresolved_placeholder_aborts_task() {
    let transport = MockTransport::new(vec![ok_json(json!({}))]);
    let registry = registry_with("api1", transport.clone());

    let tasks = vec![Task::new("api1", HttpMethod::Get, "/users/{{doesNotExist}}")];
    let engine = TaskEngine::new(registry);
    let report = engine.execute(tasks).await;

    let result = &report.results[0];
    assert!(!result.success);
    assert_eq!(
        result.error.as_ref().expect("should carry error").kind,
        ErrorKind::VariableResolution
    );
    assert!(
        result.error.as_ref().expect("should carry error").message.contains("{{doesNotExist}}"),
        "error names the raw placeholder"
    );
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn test_engine_extraction_failure_is_warning_not_failure() {
    let transport = MockTransport::new(vec![ok_json(json!({"items": []})), ok_json(json!({}))]);
    let registry = registry_with("api1", transport.clone());

    let tasks = vec![
        Task::new("api1", HttpMethod::Get, "/items").extract("first", "json.items.0.name"),
        Task::new("api1", HttpMethod::Get, "/after"),
    ];

    let engine = TaskEngine::new(registry);
    let report = engine.execute(tasks).await;

    // The bad extraction does not fail the task, and the run continues.
    assert_eq!(report.total, 2);
    assert_eq!(report.successful, 2);
    let first = &report.results[0];
    assert!(first.success);
    assert_eq!(first.warnings.len(), 1);
    assert!(first.warnings[0].contains("first"));
}

#[tokio::test]
async fn test_engine_body_file_is_read_and_templated() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let body_path = dir.path().join("body.json");
    let mut file = std::fs::File::create(&body_path).expect("Failed to create body file");
    write!(file, r#"{{"name": "{{{{label}}}}"}}"#).expect("Failed to write body file");

    let transport = MockTransport::new(vec![ok_json(json!({"seed": "widget"})), ok_json(json!({}))]);
    let registry = registry_with("api1", transport.clone());

    let tasks = vec![
        Task::new("api1", HttpMethod::Get, "/seed").extract("label", "json.seed"),
        Task::new("api1", HttpMethod::Post, "/things")
            .body("ignored when bodyFile is set")
            .body_file(&body_path),
    ];

    let engine = TaskEngine::new(registry);
    let report = engine.execute(tasks).await;

    assert_eq!(report.successful, 2);
    let requests = transport.requests();
    match &requests[1].payload {
        RequestPayload::Text(body) => assert_eq!(body, r#"{"name": "widget"}"#),
        other => panic!("expected text payload, got {other:?}"),
    }
    // The recorded copy carries the body actually sent.
    assert_eq!(
        report.results[1].task.body.as_deref(),
        Some(r#"{"name": "widget"}"#)
    );
}

#[tokio::test]
async fn test_engine_missing_body_file_is_file_error() {
    let transport = MockTransport::new(vec![ok_json(json!({}))]);
    let registry = registry_with("api1", transport.clone());

    let tasks =
        vec![Task::new("api1", HttpMethod::Post, "/things").body_file("/no/such/file.json")];
    let engine = TaskEngine::new(registry);
    let report = engine.execute(tasks).await;

    assert_eq!(
        report.results[0].error.as_ref().expect("should carry error").kind,
        ErrorKind::File
    );
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn test_engine_text_body_takes_precedence_over_multipart() {
    let transport = MockTransport::new(vec![ok_json(json!({}))]);
    let registry = registry_with("api1", transport.clone());

    let tasks = vec![
        Task::new("api1", HttpMethod::Post, "/upload")
            .body(r#"{"inline": true}"#)
            .multipart_field("note", "ignored"),
    ];
    let engine = TaskEngine::new(registry);
    let report = engine.execute(tasks).await;

    assert_eq!(report.successful, 1);
    match &transport.requests()[0].payload {
        RequestPayload::Text(body) => assert_eq!(body, r#"{"inline": true}"#),
        other => panic!("expected text payload, got {other:?}"),
    }
}

#[tokio::test]
async fn test_engine_multipart_payload_reads_files_and_resolves_fields() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let file_path = dir.path().join("upload.bin");
    std::fs::write(&file_path, b"payload-bytes").expect("Failed to write upload file");

    let transport = MockTransport::new(vec![ok_json(json!({"seed": "v1"})), ok_json(json!({}))]);
    let registry = registry_with("api1", transport.clone());

    let tasks = vec![
        Task::new("api1", HttpMethod::Get, "/seed").extract("version", "json.seed"),
        Task::new("api1", HttpMethod::Post, "/upload")
            .multipart_field("version", "{{version}}")
            .multipart_file(
                "attachment",
                FileSpec::Full(
                    file_path.clone(),
                    "application/octet-stream".to_string(),
                    "data.bin".to_string(),
                ),
            ),
    ];

    let engine = TaskEngine::new(registry);
    let report = engine.execute(tasks).await;

    assert_eq!(report.successful, 2);
    match &transport.requests()[1].payload {
        RequestPayload::Multipart { fields, files } => {
            assert_eq!(fields, &[("version".to_string(), "v1".to_string())]);
            assert_eq!(files.len(), 1);
            assert_eq!(files[0].field, "attachment");
            assert_eq!(files[0].filename, "data.bin");
            assert_eq!(files[0].content_type.as_deref(), Some("application/octet-stream"));
            assert_eq!(files[0].bytes, b"payload-bytes");
        }
        other => panic!("expected multipart payload, got {other:?}"),
    }
}

#[tokio::test]
async fn test_engine_missing_multipart_file_names_field() {
    let transport = MockTransport::new(vec![ok_json(json!({}))]);
    let registry = registry_with("api1", transport.clone());

    let tasks = vec![
        Task::new("api1", HttpMethod::Post, "/upload")
            .multipart_file("avatar", FileSpec::Path("/no/such/avatar.png".into())),
    ];
    let engine = TaskEngine::new(registry);
    let report = engine.execute(tasks).await;

    let error = report.results[0].error.as_ref().expect("should carry error");
    assert_eq!(error.kind, ErrorKind::File);
    assert!(error.message.contains("avatar"), "error names the field");
}

#[tokio::test]
async fn test_engine_emits_event_stream() {
    let transport = MockTransport::new(vec![ok_json(json!({})), failed()]);
    let registry = registry_with("api1", transport.clone());

    let tasks = vec![
        Task::new("api1", HttpMethod::Get, "/ok"),
        Task::new("api1", HttpMethod::Get, "/bad"),
    ];

    let mut engine = TaskEngine::new(registry);
    let mut events = engine.subscribe();
    let report = engine.execute(tasks).await;
    drop(engine);

    let mut progress = 0;
    let mut completed = 0;
    let mut task_failed = 0;
    let mut run_completed = 0;
    while let Some(event) = events.recv().await {
        match event {
            RunEvent::Progress(_) => progress += 1,
            RunEvent::TaskCompleted(_) => completed += 1,
            RunEvent::TaskFailed { task, .. } => {
                task_failed += 1;
                assert_eq!(task.path, "/bad");
            }
            RunEvent::RunCompleted(results) => {
                run_completed += 1;
                assert_eq!(results.len(), 2);
            }
        }
    }

    assert!(progress >= 2, "at least one progress line per task");
    assert_eq!(completed, 2, "one completion event per recorded result");
    assert_eq!(task_failed, 1, "failure event only for the errored task");
    assert_eq!(run_completed, 1);
    assert_eq!(report.total, 2);
}

#[tokio::test]
async fn test_engine_later_extraction_overwrites_variable() {
    let transport = MockTransport::new(vec![
        ok_json(json!({"id": 1})),
        ok_json(json!({"id": 2})),
        ok_json(json!({})),
    ]);
    let registry = registry_with("api1", transport.clone());

    let tasks = vec![
        Task::new("api1", HttpMethod::Get, "/a").extract("id", "json.id"),
        Task::new("api1", HttpMethod::Get, "/b").extract("id", "json.id"),
        Task::new("api1", HttpMethod::Get, "/use/{{id}}"),
    ];

    let engine = TaskEngine::new(registry);
    let report = engine.execute(tasks).await;

    assert_eq!(report.successful, 3);
    assert_eq!(transport.requests()[2].path, "/use/2");
}

#[tokio::test]
async fn test_engine_history_is_causal() {
    // A task cannot reference its own (not yet recorded) response.
    let transport = MockTransport::new(vec![ok_json(json!({"id": 1}))]);
    let registry = registry_with("api1", transport.clone());

    let tasks = vec![Task::new("api1", HttpMethod::Get, "/self/{{0.response.json.id}}")];
    let engine = TaskEngine::new(registry);
    let report = engine.execute(tasks).await;

    assert_eq!(report.successful, 0);
    assert_eq!(
        report.results[0].error.as_ref().expect("should carry error").kind,
        ErrorKind::VariableResolution
    );
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn test_engine_applies_task_delays() {
    let transport = MockTransport::new(vec![ok_json(json!({}))]);
    let registry = registry_with("api1", transport);

    let tasks = vec![
        Task::new("api1", HttpMethod::Get, "/slow")
            .delay_before(0.05)
            .delay_after(0.05),
    ];

    let engine = TaskEngine::new(registry);
    let started = std::time::Instant::now();
    let report = engine.execute(tasks).await;

    assert_eq!(report.successful, 1);
    assert!(
        started.elapsed() >= std::time::Duration::from_millis(100),
        "both delays must be honored"
    );
}

#[tokio::test]
async fn test_report_serializes_contract_fields() {
    let transport = MockTransport::new(vec![ok_json(json!({"id": 7}))]);
    let registry = registry_with("api1", transport);

    let tasks = vec![Task::new("api1", HttpMethod::Get, "/one")];
    let engine = TaskEngine::new(registry);
    let report = engine.execute(tasks).await;

    let value: Value =
        serde_json::from_str(&report.to_json().expect("serialization failed")).expect("valid JSON");
    assert_eq!(value["total"], json!(1));
    assert_eq!(value["successful"], json!(1));
    assert_eq!(value["results"][0]["success"], json!(true));
    assert_eq!(value["results"][0]["response"]["statusCode"], json!(200));
    assert_eq!(value["results"][0]["task"]["configName"], json!("api1"));
}
