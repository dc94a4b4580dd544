/*
[INPUT]:  YAML configuration file
[OUTPUT]: Parsed and validated taskwatch configuration
[POS]:    Configuration layer - API endpoints and reconciliation settings
[UPDATE]: When adding new configuration options
*/

use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use serde::{Deserialize, Serialize};
use taskwatch_adapter::{ClientConfig, TaskType, TaskwatchClient};
use url::Url;

use crate::reconciler::ReconcilerSettings;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TaskwatchConfig {
    /// Remote platform endpoints
    #[serde(default)]
    pub api: ApiConfig,
    /// Reconciliation behavior
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

/// Remote platform endpoints and credentials
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    /// Base URL of the REST API
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// URL of the WebSocket event stream
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// Optional bearer token
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ws_url: default_ws_url(),
            token: None,
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Reconciliation settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconcileConfig {
    /// Seconds between two pull reconciliations
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Task kinds that block a study
    #[serde(default = "default_blocking_types")]
    pub blocking_types: Vec<TaskType>,
    /// Also subscribe to the per-study generation stream
    #[serde(default)]
    pub follow_study_stream: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            blocking_types: default_blocking_types(),
            follow_study_stream: false,
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_ws_url() -> String {
    "ws://localhost:8080/v1/ws".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_interval_secs() -> u64 {
    15
}

fn default_blocking_types() -> Vec<TaskType> {
    vec![
        TaskType::UpgradeStudy,
        TaskType::ThermalClusterSeriesGeneration,
    ]
}

impl TaskwatchConfig {
    /// Load configuration from YAML file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.api.base_url).context("api.base_url is not a valid URL")?;
        let ws_url = Url::parse(&self.api.ws_url).context("api.ws_url is not a valid URL")?;
        if !matches!(ws_url.scheme(), "ws" | "wss") {
            bail!("api.ws_url must use ws:// or wss://, got {}", ws_url.scheme());
        }
        if self.reconcile.interval_secs == 0 {
            bail!("reconcile.interval_secs must be greater than zero");
        }
        if self.reconcile.blocking_types.is_empty() {
            bail!("reconcile.blocking_types must not be empty");
        }
        Ok(())
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(self.api.timeout_secs),
            connect_timeout: Duration::from_secs(self.api.connect_timeout_secs),
        }
    }

    /// Build the HTTP client for the task service
    pub fn build_client(&self) -> Result<TaskwatchClient> {
        let mut client =
            TaskwatchClient::with_config_and_base_url(self.client_config(), &self.api.base_url)
                .context("build task service client")?;
        if let Some(token) = &self.api.token {
            client.set_token(token.clone());
        }
        Ok(client)
    }

    pub fn reconciler_settings(&self) -> ReconcilerSettings {
        ReconcilerSettings {
            interval: Duration::from_secs(self.reconcile.interval_secs),
            blocking_types: self.reconcile.blocking_types.clone(),
            follow_study_stream: self.reconcile.follow_study_stream,
        }
    }
}
