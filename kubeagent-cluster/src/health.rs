/**
 * HEALTH - Endpoints publics du cluster collector
 *
 * RÔLE : / et /health ne passent pas par l'autorisation (aucun contenu sensible).
 * UTILITÉ : Probes liveness/readiness Kubernetes, version du service déployé.
 */

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;

use crate::state::SharedState;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct HealthStatus {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ServiceInfo {
    pub service: String,
    pub version: String,
    pub started_at: String, // RFC3339
}

pub async fn health() -> Json<HealthStatus> {
    Json(HealthStatus { status: "available".into() })
}

pub async fn root(State(state): State<SharedState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: "kubeagent-cluster".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        started_at: state.started_at.format(&Rfc3339).unwrap_or_default(),
    })
}
