/**
 * ÉTAT APPLICATIF - Instance unique partagée par tous les handlers
 *
 * RÔLE : Regroupe les trois caches d'agrégation, l'identité du cluster
 * collector et la passerelle d'autorisation. Construit une fois au
 * démarrage puis partagé via Arc ; chaque cache porte son propre verrou.
 */

use kubeagent_common::{ClusterIdentity, CollectorIdentity, MetricSample, SectionBundle};
use std::sync::Arc;
use time::OffsetDateTime;

use crate::auth::Authorizer;
use crate::cache::{AggregationCache, CacheError, Expiry};
use crate::config::ClusterConfig;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub metrics: AggregationCache<String, MetricSample>,
    pub sections: AggregationCache<String, SectionBundle>,
    /// Heartbeats : deux entrées par nœud (une par type de collector)
    pub identities: AggregationCache<String, CollectorIdentity>,
    pub cluster_identity: ClusterIdentity,
    pub authorizer: Arc<dyn Authorizer>,
    pub ingest_body_limit: usize,
    pub started_at: OffsetDateTime,
}

pub fn metric_key(sample: &MetricSample) -> String {
    format!("{}:{}", sample.container_name, sample.metric_name)
}

pub fn section_key(bundle: &SectionBundle) -> String {
    bundle.node_name.clone()
}

pub fn identity_key(identity: &CollectorIdentity) -> String {
    format!("{}:{}", identity.node, identity.collector_type())
}

impl AppState {
    pub fn new(
        cfg: &ClusterConfig,
        cluster_identity: ClusterIdentity,
        authorizer: Arc<dyn Authorizer>,
    ) -> Result<Self, CacheError> {
        let expiry = Expiry::After(cfg.cache_ttl());
        Ok(Self {
            metrics: AggregationCache::new(metric_key, cfg.cache_maxsize, expiry)?,
            sections: AggregationCache::new(section_key, cfg.cache_maxsize, expiry)?,
            identities: AggregationCache::new(identity_key, cfg.identity_cache_maxsize, expiry)?,
            cluster_identity,
            authorizer,
            ingest_body_limit: cfg.ingest_body_limit,
            started_at: OffsetDateTime::now_utc(),
        })
    }

    pub fn shared(self) -> SharedState {
        Arc::new(self)
    }
}
