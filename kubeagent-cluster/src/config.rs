/**
 * CONFIGURATION CLUSTER COLLECTOR - Chargement YAML + variables d'environnement
 *
 * RÔLE : Lit cluster-collector.yaml (ou KUBEAGENT_CLUSTER_CONFIG), applique
 * les valeurs par défaut et complète l'adresse de l'API Kubernetes depuis
 * l'environnement du pod.
 *
 * UTILITÉ : Une config invalide est fatale au démarrage, jamais par requête.
 */

use kubeagent_common::{HttpSettings, SERVICE_ACCOUNT_CA_PATH, SERVICE_ACCOUNT_TOKEN_PATH};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

const CONFIG_ENV: &str = "KUBEAGENT_CLUSTER_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "cluster-collector.yaml";
// un nœud chargé pousse plusieurs Mo de séries cAdvisor par cycle
const DEFAULT_INGEST_BODY_LIMIT: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid allow-list entry {0:?}, expected namespace:serviceaccount")]
    AllowListEntry(String),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TlsConf {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterConfig {
    pub address: String,
    pub port: u16,
    pub cache_maxsize: usize,
    pub cache_ttl_secs: u64,
    pub identity_cache_maxsize: usize,
    /// Taille maximale d'un corps de requête sur /ingest/*, en octets
    pub ingest_body_limit: usize,
    pub reader_allowlist: Vec<String>,
    pub writer_allowlist: Vec<String>,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_factor: f64,
    pub token_path: PathBuf,
    pub ca_path: PathBuf,
    pub authority_host: Option<String>,
    pub authority_port: Option<u16>,
    pub tls: Option<TlsConf>,
    pub log_level: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".into(),
            port: 10050,
            cache_maxsize: 10000,
            cache_ttl_secs: 120,
            identity_cache_maxsize: 10000,
            ingest_body_limit: DEFAULT_INGEST_BODY_LIMIT,
            reader_allowlist: vec!["checkmk-monitoring:checkmk".into()],
            writer_allowlist: vec!["checkmk-monitoring:node-collector".into()],
            connect_timeout_secs: 10,
            read_timeout_secs: 12,
            max_retries: 3,
            backoff_factor: 1.0,
            token_path: SERVICE_ACCOUNT_TOKEN_PATH.into(),
            ca_path: SERVICE_ACCOUNT_CA_PATH.into(),
            authority_host: None,
            authority_port: None,
            tls: None,
            log_level: "error".into(),
        }
    }
}

impl ClusterConfig {
    /// Parse un document YAML ; un document vide donne la config par défaut
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let cfg = if text.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(text)?
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_ttl_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "cache_ttl_secs",
                reason: "must be strictly positive".into(),
            });
        }
        if self.ingest_body_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "ingest_body_limit",
                reason: "must be strictly positive".into(),
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

    /// Complète l'adresse de l'API Kubernetes depuis les variables injectées dans le pod
    pub fn apply_service_env(
        &mut self,
        host: Option<String>,
        port: Option<String>,
    ) -> Result<(), ConfigError> {
        if self.authority_host.is_none() {
            self.authority_host = host.filter(|h| !h.is_empty());
        }
        if self.authority_port.is_none() {
            if let Some(port) = port.filter(|p| !p.is_empty()) {
                let parsed = port.parse().map_err(|_| ConfigError::Invalid {
                    field: "KUBERNETES_SERVICE_PORT_HTTPS",
                    reason: format!("{port:?} is not a port number"),
                })?;
                self.authority_port = Some(parsed);
            }
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            max_retries: self.max_retries,
            backoff_factor: self.backoff_factor,
        }
    }

    pub fn listen_addr(&self) -> String {
        join_host_port(&self.address, self.port)
    }

    /// URL TokenReview, None si l'hôte ou le port de l'API est inconnu
    pub fn authority_url(&self) -> Option<String> {
        match (&self.authority_host, self.authority_port) {
            (Some(host), Some(port)) => Some(format!(
                "https://{}/apis/authentication.k8s.io/v1/tokenreviews",
                join_host_port(host, port)
            )),
            _ => None,
        }
    }
}

// IPv6 entre crochets
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

pub async fn load_config() -> Result<ClusterConfig, ConfigError> {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let mut cfg = load_from(Path::new(&path)).await?;
    cfg.apply_service_env(
        std::env::var("KUBERNETES_SERVICE_HOST").ok(),
        std::env::var("KUBERNETES_SERVICE_PORT_HTTPS").ok(),
    )?;
    Ok(cfg)
}

pub async fn load_from(path: &Path) -> Result<ClusterConfig, ConfigError> {
    if !path.exists() {
        info!("No config at {:?}, using defaults", path);
        return Ok(ClusterConfig::default());
    }
    let text = fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
    let cfg = ClusterConfig::from_yaml(&text)?;
    if cfg.tls.is_none() {
        warn!("No TLS material configured, serving plain HTTP");
    }
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_gives_defaults() {
        let cfg = ClusterConfig::from_yaml("  \n").unwrap();
        assert_eq!(cfg, ClusterConfig::default());
        assert_eq!(cfg.listen_addr(), "127.0.0.1:10050");
    }

    #[test]
    fn test_partial_document_keeps_other_defaults() {
        let cfg = ClusterConfig::from_yaml(
            "port: 8443\ncache_ttl_secs: 30\nreader_allowlist: [\"ns:reader\", \"ops:grafana\"]\n",
        )
        .unwrap();
        assert_eq!(cfg.port, 8443);
        assert_eq!(cfg.cache_ttl(), Duration::from_secs(30));
        assert_eq!(cfg.reader_allowlist.len(), 2);
        assert_eq!(cfg.writer_allowlist, vec!["checkmk-monitoring:node-collector".to_string()]);
    }

    #[test]
    fn test_negative_maxsize_is_rejected() {
        let err = ClusterConfig::from_yaml("cache_maxsize: -1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_zero_ttl_is_rejected() {
        let err = ClusterConfig::from_yaml("cache_ttl_secs: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "cache_ttl_secs", .. }));
    }

    #[test]
    fn test_ingest_body_limit() {
        assert_eq!(ClusterConfig::default().ingest_body_limit, 64 * 1024 * 1024);
        let cfg = ClusterConfig::from_yaml("ingest_body_limit: 1048576\n").unwrap();
        assert_eq!(cfg.ingest_body_limit, 1024 * 1024);

        let err = ClusterConfig::from_yaml("ingest_body_limit: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "ingest_body_limit", .. }));
    }

    #[test]
    fn test_huge_ttl_is_accepted() {
        let cfg = ClusterConfig::from_yaml("cache_ttl_secs: 18446744073709551615\n").unwrap();
        assert_eq!(cfg.cache_ttl(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        assert!(ClusterConfig::from_yaml("cache_size: 3\n").is_err());
    }

    #[test]
    fn test_authority_url_from_service_env() {
        let mut cfg = ClusterConfig::default();
        assert_eq!(cfg.authority_url(), None);

        cfg.apply_service_env(Some("10.96.0.1".into()), Some("443".into())).unwrap();
        assert_eq!(
            cfg.authority_url().as_deref(),
            Some("https://10.96.0.1:443/apis/authentication.k8s.io/v1/tokenreviews")
        );
    }

    #[test]
    fn test_authority_url_brackets_ipv6() {
        let mut cfg = ClusterConfig::default();
        cfg.apply_service_env(Some("fd00::1".into()), Some("6443".into())).unwrap();
        assert_eq!(
            cfg.authority_url().as_deref(),
            Some("https://[fd00::1]:6443/apis/authentication.k8s.io/v1/tokenreviews")
        );
    }

    #[test]
    fn test_configured_authority_wins_over_env() {
        let mut cfg = ClusterConfig::from_yaml("authority_host: api.local\nauthority_port: 6443\n").unwrap();
        cfg.apply_service_env(Some("10.96.0.1".into()), Some("443".into())).unwrap();
        assert_eq!(cfg.authority_host.as_deref(), Some("api.local"));
        assert_eq!(cfg.authority_port, Some(6443));
    }

    #[test]
    fn test_bad_service_port_is_config_error() {
        let mut cfg = ClusterConfig::default();
        let err = cfg.apply_service_env(Some("10.96.0.1".into()), Some("https".into())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[tokio::test]
    async fn test_load_from_missing_file_gives_defaults() {
        let cfg = load_from(Path::new("/nonexistent/cluster-collector.yaml")).await.unwrap();
        assert_eq!(cfg, ClusterConfig::default());
    }

    #[tokio::test]
    async fn test_load_from_invalid_file_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port: [not, a, port]").unwrap();
        assert!(load_from(file.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_load_from_file_with_tls() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "tls:\n  cert_path: /certs/tls.crt\n  key_path: /certs/tls.key").unwrap();
        let cfg = load_from(file.path()).await.unwrap();
        assert_eq!(
            cfg.tls,
            Some(TlsConf {
                cert_path: "/certs/tls.crt".into(),
                key_path: "/certs/tls.key".into()
            })
        );
    }
}
