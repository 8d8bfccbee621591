use anyhow::{Context as AnyhowContext, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::TaskError;
use crate::transport::Transport;
use crate::transport::http::HttpTransport;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// One named REST endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    pub name: String,
    #[serde(alias = "base_url")]
    pub base_url: String,
    #[serde(default, alias = "auth_token", skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default = "default_timeout", alias = "timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl ApiConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            auth_token: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    configs: Vec<ApiConfig>,
}

/// Load endpoint configurations from a JSON or YAML file (by extension).
pub fn load_configs(path: &Path) -> Result<Vec<ApiConfig>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file from {}", path.display()))?;

    let file: ConfigFile = if is_yaml(path) {
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to deserialize YAML config {}", path.display()))?
    } else {
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to deserialize JSON config {}", path.display()))?
    };

    Ok(file.configs)
}

/// Save endpoint configurations, format chosen by extension.
pub fn save_configs(path: &Path, configs: &[ApiConfig]) -> Result<()> {
    let file = ConfigFile {
        configs: configs.to_vec(),
    };
    let content = if is_yaml(path) {
        serde_yaml::to_string(&file)
            .with_context(|| format!("Failed to serialize YAML config {}", path.display()))?
    } else {
        serde_json::to_string_pretty(&file)
            .with_context(|| format!("Failed to serialize JSON config {}", path.display()))?
    };
    fs::write(path, content)
        .with_context(|| format!("Failed to write config file {}", path.display()))
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// 配置注册表 (Config Registry)
/// Maps configuration names to ready transports; the factory the engine
/// consults for each task's `configName`.
#[derive(Default)]
pub struct ConfigRegistry {
    transports: DashMap<String, Arc<dyn Transport>>,
}

impl ConfigRegistry {
    pub fn new() -> Self {
        Self {
            transports: DashMap::new(),
        }
    }

    /// Build a registry of HTTP transports, one per configuration.
    pub fn from_configs(configs: &[ApiConfig]) -> Result<Self> {
        let registry = Self::new();
        for config in configs {
            let mut transport =
                HttpTransport::new(&config.base_url, Duration::from_secs(config.timeout_secs))
                    .with_context(|| {
                        format!("Failed to build transport for config '{}'", config.name)
                    })?;
            if let Some(token) = &config.auth_token {
                transport = transport.with_auth_token(token);
            }
            registry.register(config.name.clone(), Arc::new(transport));
        }
        Ok(registry)
    }

    pub fn register(&self, name: impl Into<String>, transport: Arc<dyn Transport>) {
        self.transports.insert(name.into(), transport);
    }

    pub fn transport(&self, name: &str) -> Result<Arc<dyn Transport>, TaskError> {
        self.transports
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TaskError::ConfigNotFound {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.transports.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.transports
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }
}
