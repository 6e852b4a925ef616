//! Collector identification
//!
//! Builds the metadata every collector attaches to its pushes:
//! - Node name, injected by Kubernetes through `NODE_NAME`
//! - Host name of the container (not necessarily the pod name)
//! - Platform of the running container image
//! - KubeAgent project version

use serde::{Deserialize, Serialize};
use sysinfo::System;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),
}

/// Platform of the container the collector runs in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub os_name: String,
    pub os_version: String,
    pub architecture: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub project_version: String,
}

/// Metadata shared by cluster and node collectors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorMetadata {
    pub node: String,
    pub host_name: String,
    pub container_platform: PlatformInfo,
    pub kubeagent: ProjectInfo,
}

impl PlatformInfo {
    /// Read the distribution of the running container (os-release based)
    pub fn discover() -> Self {
        Self {
            os_name: System::distribution_id(),
            os_version: System::os_version().unwrap_or_default(),
            architecture: std::env::consts::ARCH.to_string(),
        }
    }
}

impl ProjectInfo {
    pub fn current() -> Self {
        Self { project_version: env!("CARGO_PKG_VERSION").to_string() }
    }
}

impl CollectorMetadata {
    /// Discover the metadata of the current container.
    ///
    /// `NODE_NAME` is mandatory: without it heartbeats of different nodes
    /// would collapse onto one key.
    pub fn discover() -> Result<Self, IdentityError> {
        let node = std::env::var("NODE_NAME").map_err(|_| IdentityError::MissingEnv("NODE_NAME"))?;
        Ok(Self::for_node(node))
    }

    /// Discover host and platform for an already known node name
    pub fn for_node(node: impl Into<String>) -> Self {
        let host_name = std::env::var("HOSTNAME")
            .ok()
            .filter(|h| !h.is_empty())
            .or_else(System::host_name)
            .unwrap_or_default();

        let metadata = Self::from_parts(node, host_name, PlatformInfo::discover());
        debug!("Collector metadata: {:?}", metadata);
        metadata
    }

    pub fn from_parts(node: impl Into<String>, host_name: impl Into<String>, platform: PlatformInfo) -> Self {
        Self {
            node: node.into(),
            host_name: host_name.into(),
            container_platform: platform,
            kubeagent: ProjectInfo::current(),
        }
    }
}
