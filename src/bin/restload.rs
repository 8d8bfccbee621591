use anyhow::{Context as AnyhowContext, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use restload::batch::{HttpMethod, loader};
use restload::config::{self, ApiConfig, ConfigRegistry, DEFAULT_TIMEOUT_SECS};
use restload::runtime::engine::TaskEngine;
use restload::runtime::events::RunEvent;
use restload::transport::http::HttpTransport;
use restload::transport::{RequestPayload, RequestSpec, ResponseData, Transport};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Make a single API request
    Request(RequestArgs),
    /// Execute a batch of tasks from a JSON file
    Run(RunArgs),
    /// Manage endpoint configurations
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args)]
struct RequestArgs {
    /// HTTP method (GET, POST, PUT, PATCH, DELETE, ...)
    method: String,
    /// Endpoint path, e.g. /api/users
    path: String,
    /// Base URL for the API
    #[arg(long)]
    base_url: String,
    /// Bearer token
    #[arg(long)]
    token: Option<String>,
    /// Query parameters as a JSON object
    #[arg(long)]
    params: Option<String>,
    /// Additional headers as a JSON object
    #[arg(long)]
    headers: Option<String>,
    /// Request body (JSON string)
    #[arg(long)]
    body: Option<String>,
    /// Read the request body from a file instead
    #[arg(long)]
    body_file: Option<PathBuf>,
    /// Request timeout in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: u64,
}

#[derive(Args)]
struct RunArgs {
    /// Path to the batch JSON file
    file: PathBuf,
    /// Endpoint configuration file (JSON or YAML)
    #[arg(long, default_value = "api_configs.json")]
    configs: PathBuf,
    /// Save the report here (.txt for text, anything else JSON)
    #[arg(long)]
    output: Option<PathBuf>,
    /// Stop at the first failed task
    #[arg(long)]
    stop_on_error: bool,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// List configured endpoints
    List {
        #[arg(long, default_value = "api_configs.json")]
        file: PathBuf,
    },
    /// Add an endpoint configuration
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        base_url: String,
        #[arg(long)]
        token: Option<String>,
        #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
        timeout: u64,
        #[arg(long, default_value = "api_configs.json")]
        file: PathBuf,
    },
    /// Remove an endpoint configuration
    Remove {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "api_configs.json")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Request(args) => cmd_request(args).await,
        Commands::Run(args) => cmd_run(args).await,
        Commands::Config { action } => cmd_config(action),
    }
}

async fn cmd_request(args: RequestArgs) -> Result<()> {
    let method = HttpMethod::try_from(args.method).map_err(|e| anyhow!(e))?;

    let mut transport = HttpTransport::new(&args.base_url, Duration::from_secs(args.timeout))?;
    if let Some(token) = &args.token {
        transport = transport.with_auth_token(token);
    }

    let body_text = match (&args.body_file, &args.body) {
        (Some(file), _) => Some(
            std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read body file from {}", file.display()))?,
        ),
        (None, Some(inline)) => Some(inline.clone()),
        (None, None) => None,
    };

    let request = RequestSpec {
        method,
        path: args.path,
        params: parse_json_pairs(args.params.as_deref(), "--params")?,
        headers: parse_json_pairs(args.headers.as_deref(), "--headers")?,
        payload: body_text.map(RequestPayload::Text).unwrap_or_default(),
    };

    let response = transport.send(request).await?;
    print_response(&response);

    if !response.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_run(args: RunArgs) -> Result<()> {
    let endpoint_configs = config::load_configs(&args.configs)?;
    let registry = Arc::new(ConfigRegistry::from_configs(&endpoint_configs)?);
    info!(
        configs = endpoint_configs.len(),
        "loaded endpoint configurations"
    );

    let tasks = loader::load_batch_from_file(&args.file)?;
    println!("Loaded {} task(s)\n", tasks.len());

    let mut engine = TaskEngine::new(registry).stop_on_error(args.stop_on_error);
    let mut events = engine.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                RunEvent::Progress(message) => println!("{}", message),
                RunEvent::TaskFailed { task, error } => eprintln!(
                    "ERROR: {} - {} {}: {}",
                    task.config_name, task.method, task.path, error.message
                ),
                _ => {}
            }
        }
    });

    let report = engine.execute(tasks).await;
    drop(engine);
    printer.await.context("event printer task failed")?;

    println!("\n=== Execution Complete ===");
    println!("Total tasks: {}", report.total);
    println!("Successful: {}", report.successful);
    println!("Failed: {}", report.failed());

    if let Some(path) = &args.output {
        report.save(path)?;
        println!("\nResults saved to: {}", path.display());
    }
    Ok(())
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::List { file } => {
            let configs = load_or_empty(&file)?;
            if configs.is_empty() {
                println!("No configurations found.");
                return Ok(());
            }
            println!("\nAPI Configurations:");
            for config in &configs {
                println!("  {}", config.name);
                println!("    URL: {}", config.base_url);
                println!("    Timeout: {}s", config.timeout_secs);
            }
            Ok(())
        }
        ConfigAction::Add {
            name,
            base_url,
            token,
            timeout,
            file,
        } => {
            let mut configs = load_or_empty(&file)?;
            if configs.iter().any(|c| c.name == name) {
                bail!("configuration '{}' already exists", name);
            }
            let mut config = ApiConfig::new(name.as_str(), base_url);
            config.auth_token = token;
            config.timeout_secs = timeout;
            configs.push(config);
            config::save_configs(&file, &configs)?;
            println!("Configuration '{}' added successfully.", name);
            Ok(())
        }
        ConfigAction::Remove { name, file } => {
            let mut configs = load_or_empty(&file)?;
            let before = configs.len();
            configs.retain(|c| c.name != name);
            if configs.len() == before {
                bail!("configuration '{}' not found", name);
            }
            config::save_configs(&file, &configs)?;
            println!("Configuration '{}' removed successfully.", name);
            Ok(())
        }
    }
}

fn load_or_empty(path: &Path) -> Result<Vec<ApiConfig>> {
    if path.exists() {
        config::load_configs(path)
    } else {
        Ok(Vec::new())
    }
}

/// Parse a `{"key": value}` CLI argument into string pairs.
fn parse_json_pairs(input: Option<&str>, flag: &str) -> Result<Vec<(String, String)>> {
    let Some(input) = input else {
        return Ok(Vec::new());
    };
    let value: Value =
        serde_json::from_str(input).with_context(|| format!("{} is not valid JSON", flag))?;
    let Value::Object(map) = value else {
        bail!("{} must be a JSON object", flag);
    };
    Ok(map
        .into_iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(text) => text,
                other => other.to_string(),
            };
            (key, text)
        })
        .collect())
}

fn print_response(response: &ResponseData) {
    println!("\nStatus: {}", response.status_code);
    println!("URL: {}", response.url);
    println!("Method: {}", response.method);
    println!("\nResponse Body:");
    match &response.json {
        Some(json) => match serde_json::to_string_pretty(json) {
            Ok(pretty) => println!("{}", pretty),
            Err(_) => println!("{}", response.body),
        },
        None => println!("{}", response.body),
    }
}
