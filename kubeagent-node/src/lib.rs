//! KubeAgent node collectors
//!
//! Two DaemonSet workers share this library:
//! - `container-metrics-collector`: cAdvisor scrape -> `/ingest/metrics`
//! - `machine-sections-collector`: Checkmk agent output -> `/ingest/sections`
//!
//! Both run the same [`worker::Worker`] loop and differ only by their
//! [`collectors::Collector`] strategy.

pub mod client;
pub mod collectors;
pub mod config;
pub mod exposition;
pub mod worker;

use anyhow::{Context, Result};
use kubeagent_common::{telemetry, CollectorMetadata};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

pub use client::{ClusterClient, Payload};
pub use collectors::{Collector, ContainerMetricsSource, MachineSectionsSource};
pub use config::{ConfigError, NodeConfig};
pub use worker::{IterationError, Worker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorKind {
    ContainerMetrics,
    MachineSections,
}

/// Build the collector described by `config`
pub fn build_collector(kind: CollectorKind, config: &NodeConfig) -> Result<Arc<dyn Collector>> {
    let metadata = CollectorMetadata::for_node(config.node_name()?);

    let collector: Arc<dyn Collector> = match kind {
        CollectorKind::ContainerMetrics => {
            let settings = config.http_settings();
            let client = settings
                .build_client(&kubeagent_common::TlsVerification::Insecure)
                .context("Failed to build cAdvisor client")?;
            Arc::new(ContainerMetricsSource::new(client, settings, &config.cadvisor_url, metadata))
        }
        CollectorKind::MachineSections => Arc::new(MachineSectionsSource::new(
            &config.agent_path,
            config.agent_timeout(),
            config.agent_version()?,
            metadata,
        )),
    };
    Ok(collector)
}

/// Entry point of both collector binaries
pub async fn run(kind: CollectorKind) -> Result<()> {
    let config = NodeConfig::load().await.context("Failed to load node collector configuration")?;
    telemetry::init_logging(&config.log_level);
    info!("Starting KubeAgent {:?} collector v{}", kind, env!("CARGO_PKG_VERSION"));

    let collector = build_collector(kind, &config)?;
    let client = ClusterClient::new(config.cluster_base_url(), config.http_settings(), &config.tls_verification())
        .context("Failed to build cluster collector client")?;
    let worker = Worker::new(collector, client, &config.token_path, config.polling_interval());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    worker::spawn_signal_handler(shutdown_tx);

    worker.run(shutdown_rx).await;
    Ok(())
}
