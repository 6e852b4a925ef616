//! Collection loop shared by both node collectors
//!
//! Each iteration re-reads the service account token, collects one payload
//! and pushes it. A failed iteration is logged and the loop goes on; only the
//! shutdown flag ends it, and never in the middle of an iteration.

use kubeagent_common::{token, TransportError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info};

use crate::client::ClusterClient;
use crate::collectors::Collector;

/// Failure of one collect + push cycle
#[derive(Debug, Error)]
pub enum IterationError {
    #[error("cannot read token {path:?}: {source}")]
    Token {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("cluster collector rejected push with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("{url} answered HTTP {status}")]
    Source { url: String, status: u16 },
    #[error("unexpected source output: {0}")]
    SourceOutput(String),
    #[error("cannot start agent {path:?}: {source}")]
    AgentSpawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("agent did not finish within {0:?}")]
    AgentTimeout(Duration),
    #[error("agent execution failed (exit code {0:?})")]
    AgentFailed(Option<i32>),
    #[error("could not read agent output")]
    AgentOutput,
}

pub struct Worker {
    collector: Arc<dyn Collector>,
    client: ClusterClient,
    token_path: PathBuf,
    interval: Duration,
}

impl Worker {
    pub fn new(
        collector: Arc<dyn Collector>,
        client: ClusterClient,
        token_path: impl Into<PathBuf>,
        interval: Duration,
    ) -> Self {
        Self { collector, client, token_path: token_path.into(), interval }
    }

    /// One collect + push cycle
    pub async fn run_iteration(&self) -> Result<(), IterationError> {
        // projected token, rotated by the kubelet
        let token = token::read_token(&self.token_path)
            .await
            .map_err(|source| IterationError::Token { path: self.token_path.clone(), source })?;

        let payload = self.collector.collect().await?;
        self.client.push(&payload, &token).await
    }

    /// Loop until the shutdown flag turns true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting {} worker, pushing to {} every {:?}",
            self.collector.name(),
            self.client.base_url(),
            self.interval
        );

        while !*shutdown.borrow() {
            let started = Instant::now();
            if let Err(e) = self.run_iteration().await {
                error!("{} iteration failed: {}", self.collector.name(), e);
            }
            let elapsed = started.elapsed();
            info!("Worker finished in {:.2} seconds", elapsed.as_secs_f64());

            tokio::select! {
                _ = tokio::time::sleep(self.interval.saturating_sub(elapsed)) => {}
                changed = shutdown.changed() => {
                    // sender dropped, nobody can request shutdown anymore
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Shut down gracefully");
    }
}

/// Flip `shutdown` on SIGTERM or Ctrl-C
pub fn spawn_signal_handler(shutdown: watch::Sender<bool>) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Termination requested, finishing current iteration");
        let _ = shutdown.send(true);
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        Err(e) => {
            error!("Cannot install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
