//! Pushes cAdvisor container metrics of this node to the cluster collector

use kubeagent_node::CollectorKind;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    kubeagent_node::run(CollectorKind::ContainerMetrics).await
}
