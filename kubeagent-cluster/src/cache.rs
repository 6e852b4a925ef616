/**
 * CACHE D'AGRÉGATION - Dernière valeur connue par clé, bornée en taille
 *
 * RÔLE :
 * Conserve les données poussées par les node collectors jusqu'à ce qu'un
 * poller les lise. Une clé dérivée de la valeur garantit qu'une même série
 * renvoyée deux fois écrase l'ancienne au lieu de s'accumuler.
 *
 * FONCTIONNEMENT :
 * - Capacité seule (Expiry::Never) : get_all() vide le cache (lecture = consommation)
 * - Capacité + TTL (Expiry::After) : get_all() ne vide pas, les entrées expirent
 * - Débordement : éviction de l'entrée dont le dernier put est le plus ancien
 * - Un seul verrou parking_lot par instance, jamais tenu pendant une I/O
 */

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Error, PartialEq)]
pub enum CacheError {
    #[error("cache ttl must be strictly positive")]
    InvalidTtl,
}

/// Politique d'expiration des entrées
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Never,
    After(Duration),
}

struct Slot<V> {
    value: V,
    inserted: Instant,
    seq: u64,
}

struct Inner<K, V> {
    slots: HashMap<K, Slot<V>>,
    // seq du dernier put -> clé, ordre du plus ancien au plus récent
    order: BTreeMap<u64, K>,
    next_seq: u64,
}

pub struct AggregationCache<K, V> {
    key_fn: fn(&V) -> K,
    maxsize: usize,
    expiry: Expiry,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> AggregationCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(key_fn: fn(&V) -> K, maxsize: usize, expiry: Expiry) -> Result<Self, CacheError> {
        if expiry == Expiry::After(Duration::ZERO) {
            return Err(CacheError::InvalidTtl);
        }
        Ok(Self {
            key_fn,
            maxsize,
            expiry,
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                order: BTreeMap::new(),
                next_seq: 0,
            }),
        })
    }

    pub fn put(&self, value: V) {
        // maxsize = 0 : tout est refusé silencieusement
        if self.maxsize == 0 {
            return;
        }
        let key = (self.key_fn)(&value);
        let now = Instant::now();

        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        if let Some(previous) = inner.slots.remove(&key) {
            inner.order.remove(&previous.seq);
        }
        if let Expiry::After(ttl) = self.expiry {
            inner.purge_expired(now, ttl);
        }
        while inner.slots.len() >= self.maxsize {
            if !inner.evict_oldest() {
                break;
            }
        }

        inner.order.insert(seq, key.clone());
        inner.slots.insert(key, Slot { value, inserted: now, seq });
    }

    /// Snapshot des valeurs vivantes, de la plus ancienne à la plus récente.
    ///
    /// Sans TTL l'appel vide le cache.
    pub fn get_all(&self) -> Vec<V> {
        let mut inner = self.inner.lock();
        match self.expiry {
            Expiry::Never => {
                let order = std::mem::take(&mut inner.order);
                let mut slots = std::mem::take(&mut inner.slots);
                order
                    .into_values()
                    .filter_map(|key| slots.remove(&key).map(|slot| slot.value))
                    .collect()
            }
            Expiry::After(ttl) => {
                inner.purge_expired(Instant::now(), ttl);
                inner
                    .order
                    .values()
                    .filter_map(|key| inner.slots.get(key).map(|slot| slot.value.clone()))
                    .collect()
            }
        }
    }

    pub fn len(&self) -> usize {
        let mut inner = self.inner.lock();
        if let Expiry::After(ttl) = self.expiry {
            inner.purge_expired(Instant::now(), ttl);
        }
        inner.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash, V> Inner<K, V> {
    fn evict_oldest(&mut self) -> bool {
        match self.order.pop_first() {
            Some((_, key)) => {
                self.slots.remove(&key);
                true
            }
            None => false,
        }
    }

    // l'ordre des seq suit l'ordre des inserted, on s'arrête à la première entrée vivante
    fn purge_expired(&mut self, now: Instant, ttl: Duration) {
        while let Some((_, key)) = self.order.first_key_value() {
            let expired = self
                .slots
                .get(key)
                .map(|slot| {
                    // TTL hors de portée de l'horloge : jamais expirée
                    slot.inserted.checked_add(ttl).is_some_and(|deadline| now >= deadline)
                })
                .unwrap_or(true);
            if !expired {
                break;
            }
            self.evict_oldest();
        }
    }
}
