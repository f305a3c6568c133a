//! Least-recently-used cache of open namespace indexes
//!
//! Opening a namespace index costs a file descriptor and a redb instance, so
//! the metadata server keeps at most `capacity` of them open. The cache is a
//! plain LRU: every lookup or open is a use, and inserting past capacity
//! evicts the least recently used entry.
//!
//! Eviction runs the cache's hook synchronously, before the replacement is
//! opened, so the number of live handles never exceeds the capacity.

use crate::index::{MetaStoreResult, NamespaceIndex};
use nimbus_common::NamespaceId;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Callback receiving each evicted entry
pub type EvictionHook<K, V> = Box<dyn FnMut(K, V) + Send>;

/// Bounded recency-ordered map
pub struct LruCache<K, V> {
    capacity: usize,
    entries: HashMap<K, V>,
    /// Front is least recently used
    order: VecDeque<K>,
    on_evict: EvictionHook<K, V>,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    /// Cache that simply drops evicted values
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_eviction_hook(capacity, |_, _| {})
    }

    /// A capacity of zero is treated as one.
    pub fn with_eviction_hook(capacity: usize, hook: impl FnMut(K, V) + Send + 'static) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            on_evict: Box::new(hook),
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Membership test that does not count as a use
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys from least to most recently used
    pub fn keys_by_recency(&self) -> impl Iterator<Item = &K> {
        self.order.iter()
    }

    pub fn get(&mut self, key: &K) -> Option<&mut V> {
        if self.entries.contains_key(key) {
            promote(&mut self.order, key);
        }
        self.entries.get_mut(key)
    }

    /// Look up `key`, creating it with `open` on a miss.
    ///
    /// On a miss at capacity the LRU entry is evicted before `open` runs. If
    /// `open` fails nothing is inserted.
    pub fn get_or_try_insert_with<E>(
        &mut self,
        key: K,
        open: impl FnOnce() -> Result<V, E>,
    ) -> Result<&mut V, E> {
        if self.entries.contains_key(&key) {
            promote(&mut self.order, &key);
        } else {
            while self.entries.len() >= self.capacity {
                if !self.evict_lru() {
                    break;
                }
            }
        }

        match self.entries.entry(key) {
            Entry::Occupied(slot) => Ok(slot.into_mut()),
            Entry::Vacant(slot) => {
                let value = open()?;
                self.order.push_back(slot.key().clone());
                Ok(slot.insert(value))
            }
        }
    }

    /// Evict every entry through the hook, oldest first
    pub fn clear(&mut self) {
        while self.evict_lru() {}
    }

    fn evict_lru(&mut self) -> bool {
        let Some(key) = self.order.pop_front() else {
            return false;
        };
        if let Some(value) = self.entries.remove(&key) {
            (self.on_evict)(key, value);
        }
        true
    }
}

fn promote<K: Eq + Clone>(order: &mut VecDeque<K>, key: &K) {
    if let Some(pos) = order.iter().position(|k| k == key) {
        if let Some(k) = order.remove(pos) {
            order.push_back(k);
        }
    }
}

/// Index cache statistics
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    pub open_handles: AtomicU64,
}

impl CacheStats {
    /// Calculate hit ratio (0.0 to 1.0)
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        let total = hits + misses;
        if total == 0.0 { 0.0 } else { hits / total }
    }
}

/// Open namespace indexes, bounded by an LRU
pub struct IndexCache {
    root: PathBuf,
    handles: LruCache<NamespaceId, NamespaceIndex>,
    stats: Arc<CacheStats>,
}

impl IndexCache {
    pub fn new(root: impl Into<PathBuf>, capacity: usize) -> Self {
        let stats = Arc::new(CacheStats::default());
        let hook_stats = Arc::clone(&stats);
        let handles = LruCache::with_eviction_hook(capacity, move |ns, index: NamespaceIndex| {
            debug!("Evicting index for namespace {}", ns);
            index.close();
            hook_stats.evictions.fetch_add(1, Ordering::Relaxed);
            hook_stats.open_handles.fetch_sub(1, Ordering::Relaxed);
        });
        Self {
            root: root.into(),
            handles,
            stats,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Index file for `namespace`
    #[must_use]
    pub fn index_path(&self, namespace: NamespaceId) -> PathBuf {
        self.root.join(format!("{}.redb", namespace.to_hex()))
    }

    #[must_use]
    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.handles.capacity()
    }

    #[must_use]
    pub fn is_open(&self, namespace: NamespaceId) -> bool {
        self.handles.contains(&namespace)
    }

    /// The index for `namespace`, opening (and creating) it on a miss
    pub fn get_or_open(&mut self, namespace: NamespaceId) -> MetaStoreResult<&mut NamespaceIndex> {
        if self.handles.contains(&namespace) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
        }

        let path = self.index_path(namespace);
        let stats = &self.stats;
        self.handles.get_or_try_insert_with(namespace, || -> MetaStoreResult<_> {
            let index = NamespaceIndex::open(namespace, &path)?;
            stats.open_handles.fetch_add(1, Ordering::Relaxed);
            Ok(index)
        })
    }

    /// Like [`get_or_open`](Self::get_or_open), but never creates an index
    /// that does not exist on disk yet
    pub fn get_existing(
        &mut self,
        namespace: NamespaceId,
    ) -> MetaStoreResult<Option<&mut NamespaceIndex>> {
        if self.handles.contains(&namespace) || self.index_path(namespace).exists() {
            self.get_or_open(namespace).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Close every open index
    pub fn close_all(&mut self) {
        self.handles.clear();
    }
}
