//! Records exchanged between node collectors, the cluster collector and the poller.
//!
//! Every payload is a plain serde struct; validation happens once, when the
//! JSON body is deserialized at the HTTP boundary.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::identity::{CollectorMetadata, PlatformInfo, ProjectInfo};

/// One sample of one container metric series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub container_name: String,
    pub namespace: String,
    pub pod_uid: String,
    pub pod_name: String,
    pub metric_name: String,
    pub value_string: String,
    /// Seconds since the epoch
    pub timestamp: f64,
}

/// Opaque agent output of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionBundle {
    pub node_name: String,
    pub sections: String,
}

/// Which kind of data a node collector produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectorType {
    #[serde(rename = "Container Metrics")]
    ContainerMetrics,
    #[serde(rename = "Machine Sections")]
    MachineSections,
}

impl fmt::Display for CollectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectorType::ContainerMetrics => f.write_str("Container Metrics"),
            CollectorType::MachineSections => f.write_str("Machine Sections"),
        }
    }
}

/// External component versions, tagged by collector type.
///
/// Each variant carries exactly the version its collector depends on, so a
/// container metrics heartbeat without a cAdvisor version cannot be built
/// nor deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "collector_type")]
pub enum Components {
    #[serde(rename = "Container Metrics")]
    ContainerMetrics { cadvisor_version: String },
    #[serde(rename = "Machine Sections")]
    MachineSections { checkmk_agent_version: String },
}

impl Components {
    pub fn collector_type(&self) -> CollectorType {
        match self {
            Components::ContainerMetrics { .. } => CollectorType::ContainerMetrics,
            Components::MachineSections { .. } => CollectorType::MachineSections,
        }
    }
}

/// Identity of the cluster collector itself
pub type ClusterIdentity = CollectorMetadata;

/// Heartbeat sent by a node collector with every push
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorIdentity {
    pub node: String,
    pub host_name: String,
    pub container_platform: PlatformInfo,
    pub kubeagent: ProjectInfo,
    pub components: Components,
}

impl CollectorIdentity {
    pub fn new(metadata: CollectorMetadata, components: Components) -> Self {
        Self {
            node: metadata.node,
            host_name: metadata.host_name,
            container_platform: metadata.container_platform,
            kubeagent: metadata.kubeagent,
            components,
        }
    }

    pub fn collector_type(&self) -> CollectorType {
        self.components.collector_type()
    }
}

/// Body of `POST /ingest/metrics`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsIngest {
    pub metrics: Vec<MetricSample>,
    pub metadata: CollectorIdentity,
}

/// Body of `POST /ingest/sections`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionsIngest {
    pub section: SectionBundle,
    pub metadata: CollectorIdentity,
}

/// Body of `GET /metadata`, used to spot version drift across the fleet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetMetadata {
    pub cluster_identity: ClusterIdentity,
    pub node_identities: Vec<CollectorIdentity>,
}
