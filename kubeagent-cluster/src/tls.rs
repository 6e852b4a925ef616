/**
 * LISTENER TLS - Terminaison HTTPS du cluster collector
 *
 * RÔLE : Charge certificat + clé PEM (rustls, provider ring) puis sert le
 * routeur axum connexion par connexion via tokio-rustls et hyper.
 * Sans section `tls` dans la config, main.rs utilise axum::serve en clair.
 */

use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info};

use crate::config::TlsConf;

// pause après un accept() en échec (EMFILE...), comme axum::serve
const ACCEPT_ERROR_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("cannot load PEM {path:?}: {reason}")]
    Pem { path: PathBuf, reason: String },
    #[error("no certificate found in {0:?}")]
    NoCertificate(PathBuf),
    #[error("invalid TLS material: {0}")]
    Rustls(#[from] rustls::Error),
}

fn pem_error(path: &Path, err: impl std::fmt::Debug) -> TlsError {
    TlsError::Pem { path: path.to_path_buf(), reason: format!("{err:?}") }
}

pub fn load_server_config(tls: &TlsConf) -> Result<Arc<ServerConfig>, TlsError> {
    // provider ring installé une seule fois pour le process
    let _ = rustls::crypto::ring::default_provider().install_default();

    let certs = CertificateDer::pem_file_iter(&tls.cert_path)
        .map_err(|e| pem_error(&tls.cert_path, e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| pem_error(&tls.cert_path, e))?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificate(tls.cert_path.clone()));
    }
    let key = PrivateKeyDer::from_pem_file(&tls.key_path).map_err(|e| pem_error(&tls.key_path, e))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(Arc::new(config))
}

/// Boucle d'acceptation HTTPS ; une erreur d'accept() est journalisée puis ignorée
pub async fn serve_tls(listener: TcpListener, router: Router, config: Arc<ServerConfig>) -> std::io::Result<()> {
    let acceptor = TlsAcceptor::from(config);
    info!("HTTPS listening on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Accept error: {}", e);
                tokio::time::sleep(ACCEPT_ERROR_DELAY).await;
                continue;
            }
        };
        let acceptor = acceptor.clone();
        let service = TowerToHyperService::new(router.clone());

        tokio::spawn(async move {
            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(e) => {
                    debug!("TLS handshake with {} failed: {}", peer, e);
                    return;
                }
            };
            if let Err(err) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                error!("Error serving connection from {}: {}", peer, err);
            }
        });
    }
}
