/**
 * KUBEAGENT CLUSTER COLLECTOR - Bibliothèque du service d'agrégation
 *
 * RÔLE : Point central du cluster : reçoit les pushes des node collectors,
 * garde la dernière valeur par série dans des caches bornés à TTL et les
 * sert au poller Checkmk, le tout derrière une autorisation TokenReview.
 */

pub mod auth;
pub mod cache;
pub mod config;
pub mod health;
pub mod http;
pub mod state;
pub mod tls;

pub use auth::{AllowList, AuthError, Authorizer, CredentialError, Operation, TokenIdentity, TokenReviewGateway};
pub use cache::{AggregationCache, CacheError, Expiry};
pub use config::{ClusterConfig, ConfigError};
pub use state::{AppState, SharedState};
