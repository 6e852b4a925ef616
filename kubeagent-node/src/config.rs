//! Node collector configuration
//!
//! Handles:
//! - TOML file at `KUBEAGENT_NODE_CONFIG` (missing file = defaults)
//! - Pod environment overrides injected by the DaemonSet
//! - Derived settings: cluster collector URL, TLS policy, retry policy

use kubeagent_common::{HttpSettings, TlsVerification, SERVICE_ACCOUNT_TOKEN_PATH};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const CONFIG_ENV: &str = "KUBEAGENT_NODE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "/etc/kubeagent/node-collector.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("{0} is required")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    pub cluster_host: String,
    pub cluster_port: u16,
    pub secure_protocol: bool,
    pub verify_tls: bool,
    pub ca_cert: PathBuf,
    pub max_retries: u32,
    pub backoff_factor: f64,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub polling_interval_secs: u64,
    pub agent_timeout_secs: u64,
    pub agent_path: PathBuf,
    pub cadvisor_url: String,
    pub token_path: PathBuf,
    pub node_name: Option<String>,
    pub agent_version: Option<String>,
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            cluster_host: "127.0.0.1".to_string(),
            cluster_port: 10050,
            secure_protocol: false,
            verify_tls: false,
            ca_cert: PathBuf::from("/etc/ca-certificates/checkmk-ca-cert.pem"),
            max_retries: 10,
            backoff_factor: 0.1,
            connect_timeout_secs: 10,
            read_timeout_secs: 12,
            polling_interval_secs: 60,
            agent_timeout_secs: 5,
            agent_path: PathBuf::from("/usr/local/bin/check_mk_agent"),
            cadvisor_url: "http://localhost:8080".to_string(),
            token_path: PathBuf::from(SERVICE_ACCOUNT_TOKEN_PATH),
            node_name: None,
            agent_version: None,
            log_level: "warn".to_string(),
        }
    }
}

impl NodeConfig {
    /// Load from `KUBEAGENT_NODE_CONFIG` then apply environment overrides
    pub async fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::load_from(Path::new(&path)).await?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        debug!("Node collector config: {:?}", config);
        Ok(config)
    }

    pub async fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Ok(toml::from_str(&content)?)
    }

    /// Apply the variables Kubernetes injects into the collector pods
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(host) = lookup("CLUSTER_COLLECTOR_SERVICE_HOST") {
            self.cluster_host = host;
        }
        if let Some(port) = lookup("CLUSTER_COLLECTOR_SERVICE_PORT_API") {
            self.cluster_port = port.parse().map_err(|_| ConfigError::Invalid {
                field: "CLUSTER_COLLECTOR_SERVICE_PORT_API",
                reason: format!("{port:?} is not a port number"),
            })?;
        }
        if let Some(node) = lookup("NODE_NAME") {
            self.node_name = Some(node);
        }
        if let Some(version) = lookup("CHECKMK_AGENT_VERSION") {
            self.agent_version = Some(version);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.polling_interval_secs < 1 {
            return Err(ConfigError::Invalid {
                field: "polling_interval_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 0.0 {
            return Err(ConfigError::Invalid {
                field: "backoff_factor",
                reason: format!("{} is not a non-negative number", self.backoff_factor),
            });
        }
        Ok(())
    }

    pub fn node_name(&self) -> Result<&str, ConfigError> {
        self.node_name.as_deref().ok_or(ConfigError::Missing("NODE_NAME"))
    }

    pub fn agent_version(&self) -> Result<&str, ConfigError> {
        self.agent_version.as_deref().ok_or(ConfigError::Missing("CHECKMK_AGENT_VERSION"))
    }

    pub fn cluster_base_url(&self) -> String {
        let protocol = if self.secure_protocol { "https" } else { "http" };
        let host = if self.cluster_host.contains(':') {
            format!("[{}]", self.cluster_host)
        } else {
            self.cluster_host.clone()
        };
        format!("{}://{}:{}", protocol, host, self.cluster_port)
    }

    pub fn tls_verification(&self) -> TlsVerification {
        if self.verify_tls {
            TlsVerification::Verify { ca_path: Some(self.ca_cert.clone()) }
        } else {
            TlsVerification::Insecure
        }
    }

    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            max_retries: self.max_retries,
            backoff_factor: self.backoff_factor,
        }
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }
}
