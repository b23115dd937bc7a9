use dashmap::DashMap;
use std::{
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tracing::debug;

/// Entrada de cache con expiración
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Cache concurrente con TTL y capacidad acotada.
///
/// Cuando se llena, primero purga expirados y, si sigue lleno, expulsa la
/// entrada que vence antes.
#[derive(Debug)]
pub struct TtlCache<K: Clone + Eq + Hash, V> {
    data: Arc<DashMap<K, CacheEntry<V>>>,
    capacity: usize,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> TtlCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let now = Instant::now();
        if self.data.len() >= self.capacity && !self.data.contains_key(&key) {
            self.make_room(now);
        }
        let entry = CacheEntry {
            value,
            expires_at: now + self.ttl,
        };
        self.data.insert(key, entry).map(|old| old.value)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let found = match self.data.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(entry) => {
                drop(entry);
                self.data.remove(key);
                None
            }
            None => None,
        };

        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Limpia entradas expiradas y retorna el número de elementos removidos
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.data.len();
        self.data.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.data.len());

        if removed > 0 {
            debug!("Limpiadas {} entradas expiradas del cache", removed);
        }
        removed
    }

    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.data.len(),
        }
    }

    fn make_room(&self, now: Instant) {
        self.data.retain(|_, entry| !entry.is_expired(now));
        if self.data.len() < self.capacity {
            return;
        }

        let oldest = self
            .data
            .iter()
            .min_by_key(|entry| entry.value().expires_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.data.remove(&key);
        }
    }
}

/// Métricas básicas del cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}
