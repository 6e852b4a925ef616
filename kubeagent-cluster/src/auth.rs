/**
 * PASSERELLE D'AUTORISATION - Validation des bearer tokens par TokenReview
 *
 * RÔLE :
 * Chaque requête protégée présente un token de Service Account. On le fait
 * valider par l'API Kubernetes (TokenReview) puis on vérifie que le couple
 * namespace:serviceaccount figure dans la liste autorisée pour l'opération.
 *
 * FONCTIONNEMENT :
 * - ServiceCredential : token propre du service, chargé au démarrage, relu à chaque revue
 * - ReviewTransport : POST TokenReview (reqwest + retry en production)
 * - TokenReviewGateway : traduit la réponse en exactement une issue (succès ou AuthError)
 * - Authorizer : trait consommé par la couche HTTP, remplaçable en test
 *
 * SÉCURITÉ :
 * - Le token de l'appelant est masqué (***token***) avant tout log de réponse brute
 * - Les réponses mal formées donnent 501, distinct de 401 (refus réel)
 */

use async_trait::async_trait;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use kubeagent_common::{token, HttpSettings, RawResponse, TlsVerification, TransportError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::ConfigError;

const REDACTED: &str = "***token***";

/// Classe d'opération contrôlée par une allow-list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
}

// ============================================================================
// Erreurs
// ============================================================================

/// Erreur par requête, traduite en réponse HTTP
#[derive(Debug, Clone, PartialEq)]
pub struct AuthError {
    pub status: StatusCode,
    pub detail: String,
    challenge: bool,
}

impl AuthError {
    pub(crate) fn review(status: StatusCode, message: &str) -> Self {
        Self { status, detail: format!("{message} See logs for TokenReview."), challenge: true }
    }

    pub fn unconfigured() -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            detail: "Unable to verify authentication credentials: cannot read Kubernetes API hostname and port."
                .into(),
            challenge: true,
        }
    }

    pub fn unreachable() -> Self {
        Self::review(
            StatusCode::SERVICE_UNAVAILABLE,
            "Unable to verify authentication credentials: Kubernetes API unreachable.",
        )
    }

    pub fn not_authenticated() -> Self {
        Self { status: StatusCode::FORBIDDEN, detail: "Not authenticated".into(), challenge: false }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.status.as_u16(), self.detail)
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(serde_json::json!({ "detail": self.detail }))).into_response();
        // header Authorization absent : pas de challenge
        if self.challenge {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("cannot read service account token {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ============================================================================
// Allow-lists
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AllowList {
    entries: HashSet<String>,
}

impl AllowList {
    /// Chaque entrée doit être exactement `namespace:serviceaccount`
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self, ConfigError> {
        let mut set = HashSet::new();
        for entry in entries {
            let entry = entry.as_ref().trim();
            match entry.split_once(':') {
                Some((ns, sa)) if !ns.is_empty() && !sa.is_empty() && !sa.contains(':') => {
                    set.insert(entry.to_string());
                }
                _ => return Err(ConfigError::AllowListEntry(entry.to_string())),
            }
        }
        Ok(Self { entries: set })
    }

    pub fn contains(&self, namespace: &str, serviceaccount: &str) -> bool {
        self.entries.contains(&format!("{namespace}:{serviceaccount}"))
    }

    pub fn overlap<'a>(&'a self, other: &'a AllowList) -> Vec<&'a str> {
        let mut shared: Vec<&str> = self.entries.intersection(&other.entries).map(String::as_str).collect();
        shared.sort_unstable();
        shared
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Token du service
// ============================================================================

/// Token propre du cluster collector, utilisé pour appeler l'API TokenReview
pub struct ServiceCredential {
    path: PathBuf,
    last_good: RwLock<String>,
}

impl ServiceCredential {
    /// Échec = erreur de démarrage fatale
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, CredentialError> {
        let path = path.into();
        let value = token::read_token_blocking(&path)
            .map_err(|source| CredentialError::Unreadable { path: path.clone(), source })?;
        Ok(Self { path, last_good: RwLock::new(value) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Relit le fichier (rotation) ; garde la dernière valeur valide si la lecture échoue
    pub async fn current(&self) -> String {
        match token::read_token(&self.path).await {
            Ok(value) if !value.is_empty() => {
                *self.last_good.write() = value.clone();
                value
            }
            Ok(_) => {
                warn!("Service account token {:?} is empty, keeping previous value", self.path);
                self.last_good.read().clone()
            }
            Err(e) => {
                warn!("Cannot re-read service account token {:?}: {}, keeping previous value", self.path, e);
                self.last_good.read().clone()
            }
        }
    }
}

// ============================================================================
// Schéma TokenReview
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenReviewRequest<'a> {
    kind: &'static str,
    api_version: &'static str,
    spec: TokenReviewSpec<'a>,
}

#[derive(Debug, Serialize)]
struct TokenReviewSpec<'a> {
    token: &'a str,
}

impl<'a> TokenReviewRequest<'a> {
    pub fn new(token: &'a str) -> Self {
        Self {
            kind: "TokenReview",
            api_version: "authentication.k8s.io/v1",
            spec: TokenReviewSpec { token },
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenReview {
    status: TokenReviewStatus,
}

#[derive(Debug, Deserialize)]
struct TokenReviewStatus {
    #[serde(default)]
    authenticated: bool,
    user: Option<UserInfo>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    username: String,
}

// ============================================================================
// Transport
// ============================================================================

#[async_trait]
pub trait ReviewTransport: Send + Sync {
    async fn post_review(
        &self,
        url: &str,
        credential: &str,
        review: &TokenReviewRequest<'_>,
    ) -> Result<RawResponse, TransportError>;
}

/// Transport de production : reqwest, CA du cluster, retry borné
pub struct HttpReviewTransport {
    client: reqwest::Client,
    settings: HttpSettings,
}

impl HttpReviewTransport {
    pub fn new(settings: HttpSettings, ca_path: &Path) -> Result<Self, TransportError> {
        let tls = TlsVerification::Verify { ca_path: Some(ca_path.to_path_buf()) };
        let client = settings.build_client(&tls)?;
        Ok(Self { client, settings })
    }
}

#[async_trait]
impl ReviewTransport for HttpReviewTransport {
    async fn post_review(
        &self,
        url: &str,
        credential: &str,
        review: &TokenReviewRequest<'_>,
    ) -> Result<RawResponse, TransportError> {
        self.settings
            .send_with_retry(|| self.client.post(url).bearer_auth(credential).json(review))
            .await
    }
}

// ============================================================================
// Passerelle
// ============================================================================

#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Renvoie le token inchangé si l'appelant est autorisé pour `operation`
    async fn authorize(&self, token: &str, operation: Operation) -> Result<String, AuthError>;
}

pub struct TokenReviewGateway {
    transport: Arc<dyn ReviewTransport>,
    authority_url: Option<String>,
    credential: ServiceCredential,
    readers: AllowList,
    writers: AllowList,
}

impl TokenReviewGateway {
    pub fn new(
        transport: Arc<dyn ReviewTransport>,
        authority_url: Option<String>,
        credential: ServiceCredential,
        readers: AllowList,
        writers: AllowList,
    ) -> Self {
        for shared in readers.overlap(&writers) {
            warn!("Service account {} is allowed to both read and write", shared);
        }
        Self { transport, authority_url, credential, readers, writers }
    }

    fn allowlist(&self, operation: Operation) -> &AllowList {
        match operation {
            Operation::Read => &self.readers,
            Operation::Write => &self.writers,
        }
    }
}

#[async_trait]
impl Authorizer for TokenReviewGateway {
    async fn authorize(&self, token: &str, operation: Operation) -> Result<String, AuthError> {
        let Some(url) = self.authority_url.as_deref() else {
            error!("Kubernetes API host/port unknown, cannot review tokens");
            return Err(AuthError::unconfigured());
        };

        let credential = self.credential.current().await;
        let response = match self
            .transport
            .post_review(url, &credential, &TokenReviewRequest::new(token))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!("TokenReview request failed: {}", e);
                return Err(AuthError::unreachable());
            }
        };

        match check_review(&response, self.allowlist(operation)) {
            Ok(identity) => {
                debug!("TokenReview accepted {:?} access for {}", operation, identity.username);
                Ok(token.to_string())
            }
            Err(err) => {
                error!("TokenReview rejected: {}", redact(&response.text(), token));
                Err(err)
            }
        }
    }
}

/// Interprète la réponse brute de l'API TokenReview
fn check_review(response: &RawResponse, allowlist: &AllowList) -> Result<TokenIdentity, AuthError> {
    if !response.is_success() {
        let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
        return Err(AuthError::review(status, "HTTP status code indicates error."));
    }

    let review: TokenReview = serde_json::from_slice(&response.body)
        .map_err(|_| AuthError::review(StatusCode::NOT_IMPLEMENTED, "Error while parsing TokenReview!"))?;

    if !review.status.authenticated {
        return Err(AuthError::review(StatusCode::UNAUTHORIZED, "Invalid authentication credentials!"));
    }

    let user = review
        .status
        .user
        .ok_or_else(|| AuthError::review(StatusCode::NOT_IMPLEMENTED, "No user in token_review_response!"))?;

    let identity = TokenIdentity::from_username(&user.username)
        .ok_or_else(|| AuthError::review(StatusCode::NOT_IMPLEMENTED, "Username has unexpected format!"))?;

    if !allowlist.contains(&identity.namespace, &identity.serviceaccount) {
        return Err(AuthError::review(
            StatusCode::UNAUTHORIZED,
            &format!(
                "Access denied for Service Account {} in Namespace {}!",
                identity.serviceaccount, identity.namespace
            ),
        ));
    }
    Ok(identity)
}

/// Identité extraite d'une TokenReview : `system:serviceaccount:ns:sa` -> (ns, sa)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenIdentity {
    pub namespace: String,
    pub serviceaccount: String,
    pub username: String,
}

impl TokenIdentity {
    /// Les deux derniers segments séparés par `:`, tous deux non vides
    pub fn from_username(username: &str) -> Option<Self> {
        let mut parts = username.rsplitn(3, ':');
        let serviceaccount = parts.next()?;
        let namespace = parts.next()?;
        if namespace.is_empty() || serviceaccount.is_empty() {
            return None;
        }
        Some(Self {
            namespace: namespace.to_string(),
            serviceaccount: serviceaccount.to_string(),
            username: username.to_string(),
        })
    }
}

/// Masque le token de l'appelant dans un texte destiné aux logs
pub fn redact(text: &str, token: &str) -> String {
    if token.is_empty() {
        return text.to_string();
    }
    text.replace(token, REDACTED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::io::Write;

    /// Double de transport : réponse fixe, enregistre les appels
    struct StubTransport {
        response: Result<RawResponse, ()>,
        calls: Mutex<Vec<(String, String, serde_json::Value)>>,
    }

    impl StubTransport {
        fn replying(status: u16, body: serde_json::Value) -> Arc<Self> {
            Arc::new(Self {
                response: Ok(RawResponse { status, body: body.to_string().into_bytes() }),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn raw(status: u16, body: &str) -> Arc<Self> {
            Arc::new(Self {
                response: Ok(RawResponse { status, body: body.as_bytes().to_vec() }),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self { response: Err(()), calls: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl ReviewTransport for StubTransport {
        async fn post_review(
            &self,
            url: &str,
            credential: &str,
            review: &TokenReviewRequest<'_>,
        ) -> Result<RawResponse, TransportError> {
            self.calls.lock().push((url.into(), credential.into(), serde_json::to_value(review).unwrap()));
            match &self.response {
                Ok(response) => Ok(response.clone()),
                Err(()) => {
                    let client = reqwest::Client::new();
                    let err = client.get("http://[::1").build().unwrap_err();
                    Err(TransportError::Request(err))
                }
            }
        }
    }

    const URL: &str = "https://10.96.0.1:443/apis/authentication.k8s.io/v1/tokenreviews";

    fn credential_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{content}").unwrap();
        file
    }

    fn gateway(transport: Arc<StubTransport>, file: &tempfile::NamedTempFile) -> TokenReviewGateway {
        TokenReviewGateway::new(
            transport,
            Some(URL.into()),
            ServiceCredential::load(file.path()).unwrap(),
            AllowList::parse(&["checkmk-monitoring:checkmk"]).unwrap(),
            AllowList::parse(&["ns:sa"]).unwrap(),
        )
    }

    fn review(authenticated: bool, username: Option<&str>) -> serde_json::Value {
        match username {
            Some(name) => json!({"status": {"authenticated": authenticated, "user": {"username": name}}}),
            None => json!({"status": {"authenticated": authenticated}}),
        }
    }

    #[tokio::test]
    async fn test_allowed_service_account_returns_token_unchanged() {
        let file = credential_file("service-token\n");
        let transport = StubTransport::replying(201, review(true, Some("system:serviceaccount:ns:sa")));
        let gw = gateway(transport.clone(), &file);

        let token = gw.authorize("caller-token", Operation::Write).await.unwrap();
        assert_eq!(token, "caller-token");

        let calls = transport.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, URL);
        assert_eq!(calls[0].1, "service-token");
        assert_eq!(
            calls[0].2,
            json!({"kind": "TokenReview", "apiVersion": "authentication.k8s.io/v1", "spec": {"token": "caller-token"}})
        );
    }

    #[tokio::test]
    async fn test_operation_selects_allowlist() {
        let file = credential_file("service-token");
        let gw = gateway(StubTransport::replying(200, review(true, Some("system:serviceaccount:ns:sa"))), &file);

        let err = gw.authorize("caller-token", Operation::Read).await.unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            err.detail,
            "Access denied for Service Account sa in Namespace ns! See logs for TokenReview."
        );
    }

    #[tokio::test]
    async fn test_unexpected_username_format_is_not_implemented() {
        let file = credential_file("service-token");
        let gw = gateway(StubTransport::replying(200, review(true, Some("unknown"))), &file);

        let err = gw.authorize("caller-token", Operation::Write).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(err.detail, "Username has unexpected format! See logs for TokenReview.");
    }

    #[tokio::test]
    async fn test_unauthenticated_token_is_rejected() {
        let file = credential_file("service-token");
        let gw = gateway(StubTransport::replying(200, review(false, None)), &file);

        let err = gw.authorize("caller-token", Operation::Write).await.unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.detail, "Invalid authentication credentials! See logs for TokenReview.");
    }

    #[tokio::test]
    async fn test_missing_user_is_not_implemented() {
        let file = credential_file("service-token");
        let gw = gateway(StubTransport::replying(200, review(true, None)), &file);

        let err = gw.authorize("caller-token", Operation::Write).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(err.detail, "No user in token_review_response! See logs for TokenReview.");
    }

    #[tokio::test]
    async fn test_unparsable_review_is_not_implemented() {
        let file = credential_file("service-token");
        let gw = gateway(StubTransport::raw(200, "<html>proxy error</html>"), &file);

        let err = gw.authorize("caller-token", Operation::Write).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(err.detail, "Error while parsing TokenReview! See logs for TokenReview.");
    }

    #[tokio::test]
    async fn test_error_status_is_propagated() {
        let file = credential_file("service-token");
        let gw = gateway(StubTransport::replying(403, json!({"kind": "Status", "code": 403})), &file);

        let err = gw.authorize("caller-token", Operation::Write).await.unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert_eq!(err.detail, "HTTP status code indicates error. See logs for TokenReview.");
    }

    #[tokio::test]
    async fn test_invalid_status_code_maps_to_bad_gateway() {
        let file = credential_file("service-token");
        let gw = gateway(StubTransport::raw(1000, ""), &file);

        let err = gw.authorize("caller-token", Operation::Write).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_unconfigured_authority_is_unavailable() {
        let file = credential_file("service-token");
        let transport = StubTransport::replying(200, review(true, Some("system:serviceaccount:ns:sa")));
        let gw = TokenReviewGateway::new(
            transport.clone(),
            None,
            ServiceCredential::load(file.path()).unwrap(),
            AllowList::default(),
            AllowList::parse(&["ns:sa"]).unwrap(),
        );

        let err = gw.authorize("caller-token", Operation::Write).await.unwrap_err();
        assert_eq!(err, AuthError::unconfigured());
        assert!(transport.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_is_unavailable() {
        let file = credential_file("service-token");
        let gw = gateway(StubTransport::failing(), &file);

        let err = gw.authorize("caller-token", Operation::Write).await.unwrap_err();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_rotated_credential_is_picked_up() {
        let file = credential_file("first");
        let transport = StubTransport::replying(200, review(true, Some("system:serviceaccount:ns:sa")));
        let gw = gateway(transport.clone(), &file);

        std::fs::write(file.path(), "second").unwrap();
        gw.authorize("caller-token", Operation::Write).await.unwrap();

        assert_eq!(transport.calls.lock()[0].1, "second");
    }

    #[tokio::test]
    async fn test_vanished_credential_keeps_last_good_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "kept").unwrap();
        let credential = ServiceCredential::load(&path).unwrap();

        std::fs::remove_file(&path).unwrap();
        assert_eq!(credential.current().await, "kept");
    }

    #[test]
    fn test_missing_credential_is_fatal() {
        let err = ServiceCredential::load("/nonexistent/token").err().unwrap();
        assert!(matches!(err, CredentialError::Unreadable { .. }));
    }

    #[test]
    fn test_redact_masks_every_occurrence() {
        let body = r#"{"spec":{"token":"s3cr3t"},"status":{"error":"s3cr3t expired"}}"#;
        let redacted = redact(body, "s3cr3t");
        assert!(!redacted.contains("s3cr3t"));
        assert_eq!(redacted.matches(REDACTED).count(), 2);
        assert_eq!(redact(body, ""), body);
    }

    #[test]
    fn test_token_identity_from_username() {
        let identity = TokenIdentity::from_username("system:serviceaccount:ns:sa").unwrap();
        assert_eq!(identity.namespace, "ns");
        assert_eq!(identity.serviceaccount, "sa");
        assert_eq!(identity.username, "system:serviceaccount:ns:sa");

        assert!(TokenIdentity::from_username("ns:sa").is_some());
        for bad in ["unknown", "system:serviceaccount::sa", "ns:", ""] {
            assert_eq!(TokenIdentity::from_username(bad), None, "{bad:?}");
        }
    }

    #[test]
    fn test_allowlist_validation() {
        assert!(AllowList::parse(&["ns:sa", "other:reader"]).is_ok());
        for bad in ["nocolon", ":sa", "ns:", "a:b:c", ""] {
            let err = AllowList::parse(&[bad]).unwrap_err();
            assert!(matches!(err, ConfigError::AllowListEntry(_)), "{bad:?} accepted");
        }
    }

    #[test]
    fn test_allowlist_overlap() {
        let readers = AllowList::parse(&["ns:sa", "ns:reader"]).unwrap();
        let writers = AllowList::parse(&["ns:sa"]).unwrap();
        assert_eq!(readers.overlap(&writers), vec!["ns:sa"]);
        assert!(writers.contains("ns", "sa"));
        assert!(!writers.contains("ns", "reader"));
    }

    #[tokio::test]
    async fn test_error_response_shape() {
        let response = AuthError::review(StatusCode::UNAUTHORIZED, "Invalid authentication credentials!")
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
    }
}
