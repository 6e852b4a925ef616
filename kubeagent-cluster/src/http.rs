/**
 * API REST CLUSTER COLLECTOR - Ingest des node collectors, lecture par le poller
 *
 * RÔLE :
 * Expose les caches d'agrégation derrière une autorisation par Service Account.
 *
 * FONCTIONNEMENT :
 * - POST /ingest/metrics, /ingest/sections : écriture (allow-list writer)
 * - GET /metrics, /sections, /metadata : lecture (allow-list reader)
 * - GET /, /health : publics
 * - Chaque ingest met aussi à jour le cache des identités (heartbeat)
 * - Corps d'ingest bornés par `ingest_body_limit` et non par la limite axum de 2 Mo
 *
 * SÉCURITÉ :
 * - Header `Authorization: Bearer <token>` obligatoire hors routes publiques
 * - Absent ou autre schéma -> 403, refusé -> 401, API Kubernetes indisponible -> 503
 */

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use kubeagent_common::{CollectorIdentity, FleetMetadata, MetricSample, MetricsIngest, SectionBundle, SectionsIngest};
use tracing::debug;

use crate::auth::{AuthError, Operation};
use crate::health;
use crate::state::SharedState;

pub fn build_router(state: SharedState) -> Router {
    let readers = Router::new()
        .route("/metrics", get(get_metrics))
        .route("/sections", get(get_sections))
        .route("/metadata", get(get_metadata))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_reader));

    let writers = Router::new()
        .route("/ingest/metrics", post(ingest_metrics))
        .route("/ingest/sections", post(ingest_sections))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_writer))
        .layer(DefaultBodyLimit::max(state.ingest_body_limit));

    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health))
        .merge(readers)
        .merge(writers)
        .with_state(state)
}

/// Token du header Authorization, None si absent ou schéma autre que Bearer
fn bearer_token(req: &Request) -> Option<&str> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return None;
    }
    Some(token)
}

async fn authorize(state: &SharedState, req: Request, next: Next, operation: Operation) -> Result<Response, AuthError> {
    let token = bearer_token(&req)
        .map(str::to_owned)
        .ok_or_else(AuthError::not_authenticated)?;
    state.authorizer.authorize(&token, operation).await?;
    Ok(next.run(req).await)
}

async fn require_reader(State(state): State<SharedState>, req: Request, next: Next) -> Result<Response, AuthError> {
    authorize(&state, req, next, Operation::Read).await
}

async fn require_writer(State(state): State<SharedState>, req: Request, next: Next) -> Result<Response, AuthError> {
    authorize(&state, req, next, Operation::Write).await
}

// ============================================================================
// Ingest
// ============================================================================

async fn ingest_metrics(State(state): State<SharedState>, Json(body): Json<MetricsIngest>) -> StatusCode {
    debug!(
        "Ingest of {} metrics from {} ({})",
        body.metrics.len(),
        body.metadata.node,
        body.metadata.collector_type()
    );
    state.identities.put(body.metadata);
    for sample in body.metrics {
        state.metrics.put(sample);
    }
    StatusCode::OK
}

async fn ingest_sections(State(state): State<SharedState>, Json(body): Json<SectionsIngest>) -> StatusCode {
    debug!("Ingest of sections from node {}", body.section.node_name);
    state.identities.put(body.metadata);
    state.sections.put(body.section);
    StatusCode::OK
}

// ============================================================================
// Lecture
// ============================================================================

async fn get_metrics(State(state): State<SharedState>) -> Json<Vec<MetricSample>> {
    Json(state.metrics.get_all())
}

async fn get_sections(State(state): State<SharedState>) -> Json<Vec<SectionBundle>> {
    Json(state.sections.get_all())
}

async fn get_metadata(State(state): State<SharedState>) -> Json<FleetMetadata> {
    let node_identities: Vec<CollectorIdentity> = state.identities.get_all();
    Json(FleetMetadata {
        cluster_identity: state.cluster_identity.clone(),
        node_identities,
    })
}
