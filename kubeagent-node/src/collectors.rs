//! Collection strategies
//!
//! Provides:
//! - [`ContainerMetricsSource`]: scrapes the local cAdvisor
//! - [`MachineSectionsSource`]: runs the Checkmk agent with a timeout
//!
//! Both return a ready-to-push [`Payload`] carrying the collector identity,
//! which the cluster collector records as a heartbeat.

use async_trait::async_trait;
use kubeagent_common::{
    CollectorIdentity, CollectorMetadata, Components, HttpSettings, MetricsIngest, SectionBundle, SectionsIngest,
};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info};

use crate::client::Payload;
use crate::exposition::parse_exposition;
use crate::worker::IterationError;

#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &'static str;

    async fn collect(&self) -> Result<Payload, IterationError>;
}

/// Seconds since the epoch, millisecond precision
fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

pub struct ContainerMetricsSource {
    client: reqwest::Client,
    settings: HttpSettings,
    cadvisor_url: String,
    metadata: CollectorMetadata,
}

impl ContainerMetricsSource {
    pub fn new(
        client: reqwest::Client,
        settings: HttpSettings,
        cadvisor_url: impl Into<String>,
        metadata: CollectorMetadata,
    ) -> Self {
        let cadvisor_url = cadvisor_url.into().trim_end_matches('/').to_string();
        Self { client, settings, cadvisor_url, metadata }
    }

    async fn fetch(&self, path: &str) -> Result<Vec<u8>, IterationError> {
        let url = format!("{}{}", self.cadvisor_url, path);
        let response = self.settings.send_with_retry(|| self.client.get(&url)).await?;
        if !response.is_success() {
            return Err(IterationError::Source { url, status: response.status });
        }
        Ok(response.body)
    }
}

#[async_trait]
impl Collector for ContainerMetricsSource {
    fn name(&self) -> &'static str {
        "container-metrics"
    }

    async fn collect(&self) -> Result<Payload, IterationError> {
        info!("Querying cadvisor version");
        let raw_version = self.fetch("/api/v2.0/version").await?;
        let cadvisor_version: String =
            serde_json::from_slice(&raw_version).map_err(|e| IterationError::SourceOutput(e.to_string()))?;
        debug!("cadvisor version {}", cadvisor_version);

        info!("Querying container metrics");
        let raw_metrics = self.fetch("/metrics").await?;
        let text = String::from_utf8(raw_metrics).map_err(|e| IterationError::SourceOutput(e.to_string()))?;
        let metrics = parse_exposition(&text, now_seconds());

        Ok(Payload::Metrics(MetricsIngest {
            metrics,
            metadata: CollectorIdentity::new(self.metadata.clone(), Components::ContainerMetrics { cadvisor_version }),
        }))
    }
}

pub struct MachineSectionsSource {
    agent_path: PathBuf,
    timeout: Duration,
    agent_version: String,
    metadata: CollectorMetadata,
}

impl MachineSectionsSource {
    pub fn new(
        agent_path: impl Into<PathBuf>,
        timeout: Duration,
        agent_version: impl Into<String>,
        metadata: CollectorMetadata,
    ) -> Self {
        Self {
            agent_path: agent_path.into(),
            timeout,
            agent_version: agent_version.into(),
            metadata,
        }
    }

    /// Run the agent and return its stdout; stderr is inherited
    pub async fn run_agent(&self) -> Result<String, IterationError> {
        let output = tokio::time::timeout(
            self.timeout,
            AsyncCommand::new(&self.agent_path)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| IterationError::AgentTimeout(self.timeout))?
        .map_err(|source| IterationError::AgentSpawn { path: self.agent_path.clone(), source })?;

        if !output.status.success() {
            return Err(IterationError::AgentFailed(output.status.code()));
        }
        String::from_utf8(output.stdout).map_err(|_| IterationError::AgentOutput)
    }
}

#[async_trait]
impl Collector for MachineSectionsSource {
    fn name(&self) -> &'static str {
        "machine-sections"
    }

    async fn collect(&self) -> Result<Payload, IterationError> {
        info!("Querying Checkmk Agent for node data");
        let sections = self.run_agent().await?;

        Ok(Payload::Sections(SectionsIngest {
            section: SectionBundle { node_name: self.metadata.node.clone(), sections },
            metadata: CollectorIdentity::new(
                self.metadata.clone(),
                Components::MachineSections { checkmk_agent_version: self.agent_version.clone() },
            ),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;
    use kubeagent_common::{fixtures, CollectorType, TlsVerification};
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("check_mk_agent");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn sections_source(path: PathBuf, timeout: Duration) -> MachineSectionsSource {
        MachineSectionsSource::new(path, timeout, "2.1.0i1", fixtures::cluster_identity("node-a"))
    }

    #[tokio::test]
    async fn test_agent_output_becomes_section_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let source = sections_source(script(&dir, "printf '<<<check_mk>>>\\nVersion: 2.1.0i1\\n'"), Duration::from_secs(5));

        let Payload::Sections(ingest) = source.collect().await.unwrap() else {
            panic!("expected sections payload");
        };
        assert_eq!(ingest.section.node_name, "node-a");
        assert_eq!(ingest.section.sections, "<<<check_mk>>>\nVersion: 2.1.0i1\n");
        assert_eq!(ingest.metadata, fixtures::machine_sections_identity("node-a"));
    }

    #[tokio::test]
    async fn test_agent_non_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let source = sections_source(script(&dir, "echo partial; exit 3"), Duration::from_secs(5));

        assert!(matches!(source.run_agent().await, Err(IterationError::AgentFailed(Some(3)))));
    }

    #[tokio::test]
    async fn test_agent_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let source = sections_source(script(&dir, "sleep 5"), Duration::from_millis(200));

        assert!(matches!(source.run_agent().await, Err(IterationError::AgentTimeout(_))));
    }

    #[tokio::test]
    async fn test_agent_non_utf8_output() {
        let dir = tempfile::tempdir().unwrap();
        let source = sections_source(script(&dir, "printf '\\377\\376'"), Duration::from_secs(5));

        assert!(matches!(source.run_agent().await, Err(IterationError::AgentOutput)));
    }

    #[tokio::test]
    async fn test_missing_agent_binary() {
        let source = sections_source(PathBuf::from("/nonexistent/check_mk_agent"), Duration::from_secs(1));
        assert!(matches!(source.run_agent().await, Err(IterationError::AgentSpawn { .. })));
    }

    const SCRAPE: &str = concat!(
        "# TYPE container_cpu_cfs_periods_total counter\n",
        "container_cpu_cfs_periods_total{container_label_io_kubernetes_pod_namespace=\"ns\",",
        "container_label_io_kubernetes_pod_name=\"p\",container_label_io_kubernetes_pod_uid=\"123\",",
        "name=\"k8s_POD_p_ns_123_0\"} 422 1638960636719\n",
        "machine_memory_bytes 1.6595398656e+10\n",
    );

    async fn spawn_cadvisor(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn metrics_source(url: String) -> ContainerMetricsSource {
        let settings = HttpSettings { max_retries: 0, ..HttpSettings::default() };
        let client = settings.build_client(&TlsVerification::Insecure).unwrap();
        ContainerMetricsSource::new(client, settings, url, fixtures::cluster_identity("node-a"))
    }

    #[tokio::test]
    async fn test_cadvisor_scrape() {
        let app = Router::new()
            .route("/api/v2.0/version", get(|| async { "\"v0.43.0\"" }))
            .route("/metrics", get(|| async { SCRAPE }));
        let source = metrics_source(spawn_cadvisor(app).await);

        let Payload::Metrics(ingest) = source.collect().await.unwrap() else {
            panic!("expected metrics payload");
        };
        assert_eq!(ingest.metrics.len(), 1);
        assert_eq!(ingest.metrics[0].timestamp, 1638960636.719);
        assert_eq!(ingest.metadata.collector_type(), CollectorType::ContainerMetrics);
        assert_eq!(
            ingest.metadata.components,
            Components::ContainerMetrics { cadvisor_version: "v0.43.0".into() }
        );
    }

    #[tokio::test]
    async fn test_cadvisor_error_status() {
        let app = Router::new().route(
            "/api/v2.0/version",
            get(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let source = metrics_source(spawn_cadvisor(app).await);

        assert!(matches!(source.collect().await, Err(IterationError::Source { status: 500, .. })));
    }
}
