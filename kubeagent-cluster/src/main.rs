/**
 * KUBEAGENT CLUSTER COLLECTOR - Point d'entrée du service
 *
 * RÔLE : Bootstrap complet : .env, config YAML, logging, identité, passerelle
 * TokenReview, caches, puis écoute HTTP ou HTTPS.
 *
 * UTILITÉ : Toute erreur de configuration ou de credential arrête le process
 * au démarrage ; plus aucune erreur fatale ensuite.
 */

use anyhow::{Context, Result};
use kubeagent_cluster::auth::{AllowList, HttpReviewTransport, ServiceCredential, TokenReviewGateway};
use kubeagent_cluster::config::load_config;
use kubeagent_cluster::state::AppState;
use kubeagent_cluster::{http, tls};
use kubeagent_common::{telemetry, CollectorMetadata};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    let cfg = load_config().await.context("Failed to load cluster collector configuration")?;
    telemetry::init_logging(&cfg.log_level);
    info!("Starting kubeagent-cluster v{}", env!("CARGO_PKG_VERSION"));

    let identity = CollectorMetadata::discover().context("Failed to identify cluster collector")?;

    // allow-lists figées au démarrage
    let readers = AllowList::parse(cfg.reader_allowlist.as_slice()).context("Invalid reader allow-list")?;
    let writers = AllowList::parse(cfg.writer_allowlist.as_slice()).context("Invalid writer allow-list")?;

    let credential = ServiceCredential::load(&cfg.token_path).context("Failed to read service account token")?;
    let transport = HttpReviewTransport::new(cfg.http_settings(), &cfg.ca_path)
        .context("Failed to build TokenReview client")?;

    let authority_url = cfg.authority_url();
    if authority_url.is_none() {
        warn!("KUBERNETES_SERVICE_HOST/PORT unknown, every protected request will get 503");
    }
    let gateway = TokenReviewGateway::new(Arc::new(transport), authority_url, credential, readers, writers);

    let state = AppState::new(&cfg, identity, Arc::new(gateway))
        .context("Invalid cache settings")?
        .shared();
    let app = http::build_router(state);

    let addr = cfg.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    match &cfg.tls {
        Some(tls_conf) => {
            let server_config = tls::load_server_config(tls_conf).context("Failed to load TLS material")?;
            tls::serve_tls(listener, app, server_config).await.context("HTTPS listener failed")?;
        }
        None => {
            info!("HTTP listening on {}", addr);
            axum::serve(listener, app).await.context("HTTP listener failed")?;
        }
    }
    Ok(())
}
