//! KubeAgent common - wire model and plumbing shared by the collectors
//!
//! This crate holds everything both sides of the ingest protocol agree on:
//! - Data records pushed by node collectors (metrics, sections)
//! - Collector identities used as liveness heartbeats
//! - Retrying HTTP client settings and token file reading
//! - Logging bootstrap

pub mod http;
pub mod identity;
pub mod models;
pub mod telemetry;
pub mod token;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub use http::{HttpSettings, RawResponse, TlsVerification, TransportError};
pub use identity::{CollectorMetadata, IdentityError, PlatformInfo, ProjectInfo};
pub use models::{
    ClusterIdentity, CollectorIdentity, CollectorType, Components, FleetMetadata, MetricSample,
    MetricsIngest, SectionBundle, SectionsIngest,
};

/// Token mounted into every pod by Kubernetes
pub const SERVICE_ACCOUNT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Cluster CA used to verify the Kubernetes API
pub const SERVICE_ACCOUNT_CA_PATH: &str = "/run/secrets/kubernetes.io/serviceaccount/ca.crt";
