//! Push side of the node collectors
//!
//! One POST per iteration to the cluster collector ingest API, authenticated
//! with the service account token read for that iteration.

use kubeagent_common::{HttpSettings, MetricsIngest, SectionsIngest, TlsVerification, TransportError};
use serde::Serialize;
use tracing::{error, info};

use crate::worker::IterationError;

/// Data produced by one collection
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Metrics(MetricsIngest),
    Sections(SectionsIngest),
}

impl Payload {
    pub fn endpoint(&self) -> &'static str {
        match self {
            Payload::Metrics(_) => "/ingest/metrics",
            Payload::Sections(_) => "/ingest/sections",
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Payload::Metrics(_) => "container metrics",
            Payload::Sections(_) => "machine sections",
        }
    }
}

pub struct ClusterClient {
    client: reqwest::Client,
    settings: HttpSettings,
    base_url: String,
}

impl ClusterClient {
    pub fn new(base_url: impl Into<String>, settings: HttpSettings, tls: &TlsVerification) -> Result<Self, TransportError> {
        let client = settings.build_client(tls)?;
        Ok(Self { client, settings, base_url: base_url.into() })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn push(&self, payload: &Payload, token: &str) -> Result<(), IterationError> {
        match payload {
            Payload::Metrics(body) => self.post(payload, body, token).await,
            Payload::Sections(body) => self.post(payload, body, token).await,
        }
    }

    async fn post<B: Serialize>(&self, payload: &Payload, body: &B, token: &str) -> Result<(), IterationError> {
        let url = format!("{}{}", self.base_url, payload.endpoint());
        let response = self
            .settings
            .send_with_retry(|| self.client.post(&url).bearer_auth(token).json(body))
            .await?;

        if !response.is_success() {
            let body = response.text();
            error!("Failed to send {} to cluster collector: {}", payload.describe(), body);
            return Err(IterationError::Rejected { status: response.status, body });
        }
        info!("Successfully sent {} to cluster collector", payload.describe());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreadable_ca_fails_at_construction() {
        let tls = TlsVerification::Verify { ca_path: Some("/nonexistent/ca.crt".into()) };
        let result = ClusterClient::new("https://cluster-collector:10050", HttpSettings::default(), &tls);
        assert!(matches!(result, Err(TransportError::Certificate { .. })));
    }

    #[test]
    fn test_payload_endpoints() {
        let metrics = Payload::Metrics(MetricsIngest {
            metrics: vec![],
            metadata: kubeagent_common::fixtures::container_metrics_identity("node-a"),
        });
        assert_eq!(metrics.endpoint(), "/ingest/metrics");
        assert_eq!(metrics.describe(), "container metrics");
    }
}
