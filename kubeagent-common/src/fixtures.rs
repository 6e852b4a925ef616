//! Sample payloads for tests
//!
//! Enabled with the `fixtures` feature so the cluster and node crates can
//! share one set of realistic records in their dev-dependencies.

use crate::identity::{CollectorMetadata, PlatformInfo, ProjectInfo};
use crate::models::{CollectorIdentity, Components, MetricSample, SectionBundle};

pub fn platform() -> PlatformInfo {
    PlatformInfo {
        os_name: "alpine".into(),
        os_version: "3.15".into(),
        architecture: "x86_64".into(),
    }
}

/// Identity of a cluster collector running on `node`
pub fn cluster_identity(node: &str) -> CollectorMetadata {
    CollectorMetadata {
        node: node.into(),
        host_name: "morpheus".into(),
        container_platform: platform(),
        kubeagent: ProjectInfo { project_version: "1.0.0".into() },
    }
}

pub fn container_metrics_identity(node: &str) -> CollectorIdentity {
    CollectorIdentity::new(
        cluster_identity(node),
        Components::ContainerMetrics { cadvisor_version: "v0.43.0".into() },
    )
}

pub fn machine_sections_identity(node: &str) -> CollectorIdentity {
    CollectorIdentity::new(
        cluster_identity(node),
        Components::MachineSections { checkmk_agent_version: "2.1.0i1".into() },
    )
}

pub fn metric_sample(container_name: &str, metric_name: &str, value: &str) -> MetricSample {
    MetricSample {
        container_name: container_name.into(),
        namespace: "checkmk-monitoring".into(),
        pod_uid: "cf703718-71a1-41de-8026-b52d3195229b".into(),
        pod_name: "checkmk-cluster-agent-5c645c445f-tp44q".into(),
        metric_name: metric_name.into(),
        value_string: value.into(),
        timestamp: 1638960637.145,
    }
}

/// A small batch as produced by one cAdvisor scrape
pub fn metric_batch() -> Vec<MetricSample> {
    vec![
        metric_sample(
            "k8s_checkmk-cluster-agent_checkmk-cluster-agent-5c645c445f-tp44q_checkmk-monitoring_cf703718-71a1-41de-8026-b52d3195229b_0",
            "container_cpu_cfs_periods_total",
            "4783",
        ),
        metric_sample(
            "k8s_POD_checkmk-worker-agent-8x8bt_checkmk-monitoring_f560ac4c-2dd6-4d2e-8044-caaf6873ce93_0",
            "container_memory_cache",
            "0",
        ),
        metric_sample(
            "k8s_kube-scheduler_kube-scheduler-k8_kube-system_b58645c4b948b3629f3b7cc9f5fdde56_0",
            "container_cpu_load_average_10s",
            "0",
        ),
    ]
}

pub fn section_bundle(node: &str) -> SectionBundle {
    SectionBundle {
        node_name: node.into(),
        sections: "<<<section_name>>>\nsection_data 1".into(),
    }
}
