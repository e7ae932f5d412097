//! Two-bucket in-memory image cache with priority-aware eviction.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::{ResourcePriority, ResourceUrl};

/// Receiver for eviction notifications.
///
/// Fired exactly once per high-bucket overflow eviction, outside the cache
/// lock, with the evicted image so the receiver can persist it.
pub trait EvictionDelegate: Send + Sync {
    /// An entry was evicted to make room for another insertion.
    fn cache_did_evict(
        &self,
        url: &ResourceUrl,
        image: Arc<image::DynamicImage>,
        priority: ResourcePriority,
    );
}

/// Point-in-time cache counters.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Lookup hits since the last hard reset.
    pub hits: u64,
    /// Lookup misses since the last hard reset.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Entries currently in the high bucket.
    pub high: usize,
    /// Entries currently in the low bucket.
    pub low: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cache: {} high / {} low, {:.1}% hit rate ({} hits, {} misses)",
            self.high, self.low, self.hit_rate, self.hits, self.misses
        )
    }
}

struct Buckets {
    high: LruCache<ResourceUrl, Arc<image::DynamicImage>>,
    low: LruCache<ResourceUrl, Arc<image::DynamicImage>>,
}

/// In-memory cache split into a protected high-priority bucket and an
/// expendable low-priority bucket, each with its own LRU budget.
///
/// A URL lives in at most one bucket; inserting under the other priority
/// moves it. Low-bucket evictions are silent and `clear_low` drops the
/// whole bucket on memory pressure. High-bucket overflow evictions are
/// reported through the [`EvictionDelegate`] so they can be spilled to
/// persistent storage; high entries survive memory pressure.
pub struct PriorityMemoryCache {
    buckets: Mutex<Buckets>,
    delegate: Mutex<Option<Weak<dyn EvictionDelegate>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

fn bucket_cap(limit: usize) -> NonZeroUsize {
    NonZeroUsize::new(limit).unwrap_or(NonZeroUsize::MIN)
}

impl PriorityMemoryCache {
    /// Creates a cache with the given per-bucket entry limits.
    #[must_use]
    pub fn new(high_limit: usize, low_limit: usize) -> Self {
        Self {
            buckets: Mutex::new(Buckets {
                high: LruCache::new(bucket_cap(high_limit)),
                low: LruCache::new(bucket_cap(low_limit)),
            }),
            delegate: Mutex::new(None),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Registers the eviction delegate.
    pub fn set_delegate(&self, delegate: Weak<dyn EvictionDelegate>) {
        *self.delegate.lock() = Some(delegate);
    }

    fn notify_evicted(&self, url: &ResourceUrl, image: Arc<image::DynamicImage>) {
        let delegate = self.delegate.lock().as_ref().and_then(Weak::upgrade);
        if let Some(delegate) = delegate {
            debug!(url = %url, "high-priority entry evicted, spilling");
            delegate.cache_did_evict(url, image, ResourcePriority::High);
        }
    }

    /// Looks up a URL in the high bucket, then the low bucket, refreshing
    /// recency on a hit. Bucket membership does not change.
    pub fn get(&self, url: &ResourceUrl) -> Option<Arc<image::DynamicImage>> {
        let mut buckets = self.buckets.lock();
        let found = buckets
            .high
            .get(url)
            .cloned()
            .or_else(|| buckets.low.get(url).cloned());
        drop(buckets);

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(url = %url, "memory cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(url = %url, "memory cache miss");
        }
        found
    }

    /// Inserts or replaces an entry at the given priority.
    ///
    /// An entry already held under the other priority is moved, not
    /// duplicated. On bucket overflow the LRU entry of that bucket is
    /// evicted first; high-bucket evictions fire the delegate.
    pub fn put(&self, url: ResourceUrl, image: Arc<image::DynamicImage>, priority: ResourcePriority) {
        let spilled = {
            let mut guard = self.buckets.lock();
            let buckets = &mut *guard;
            let (target, other) = match priority {
                ResourcePriority::High => (&mut buckets.high, &mut buckets.low),
                ResourcePriority::Low => (&mut buckets.low, &mut buckets.high),
            };
            other.pop(&url);
            let evicted = target
                .push(url.clone(), image)
                .filter(|(evicted_url, _)| *evicted_url != url);
            match (priority, evicted) {
                (ResourcePriority::High, Some(pair)) => Some(pair),
                _ => None,
            }
        };

        if let Some((evicted_url, evicted_image)) = spilled {
            self.notify_evicted(&evicted_url, evicted_image);
        }
    }

    /// Shorthand for a high-priority insert.
    pub fn put_important(&self, url: ResourceUrl, image: Arc<image::DynamicImage>) {
        self.put(url, image, ResourcePriority::High);
    }

    /// Removes a URL from the high bucket only. No delegate fires.
    pub fn clear_important(&self, url: &ResourceUrl) {
        self.buckets.lock().high.pop(url);
    }

    /// Removes a URL from whichever bucket holds it. No delegate fires.
    pub fn remove(&self, url: &ResourceUrl) {
        let mut buckets = self.buckets.lock();
        buckets.high.pop(url);
        buckets.low.pop(url);
    }

    /// Whether either bucket holds the URL. Recency is not refreshed.
    #[must_use]
    pub fn contains(&self, url: &ResourceUrl) -> bool {
        let buckets = self.buckets.lock();
        buckets.high.contains(url) || buckets.low.contains(url)
    }

    /// Whether the high bucket holds the URL.
    #[must_use]
    pub fn contains_important(&self, url: &ResourceUrl) -> bool {
        self.buckets.lock().high.contains(url)
    }

    /// Entries in the high bucket.
    #[must_use]
    pub fn high_count(&self) -> usize {
        self.buckets.lock().high.len()
    }

    /// Entries in the low bucket.
    #[must_use]
    pub fn low_count(&self) -> usize {
        self.buckets.lock().low.len()
    }

    /// Drops the entire low bucket. The memory-pressure response.
    pub fn clear_low(&self) {
        let count = {
            let mut buckets = self.buckets.lock();
            let count = buckets.low.len();
            buckets.low.clear();
            count
        };
        if count > 0 {
            debug!(count, "cleared low-priority cache bucket");
        }
    }

    /// Drops both buckets.
    pub fn clear_all(&self) {
        let mut buckets = self.buckets.lock();
        buckets.high.clear();
        buckets.low.clear();
    }

    /// Drops both buckets and resets the hit/miss counters.
    pub fn hard_reset(&self) {
        self.clear_all();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Resizes both buckets. Shrinking the high bucket spills its LRU
    /// entries through the delegate until it fits.
    pub fn set_limits(&self, high_limit: usize, low_limit: usize) {
        let spilled = {
            let mut buckets = self.buckets.lock();
            let high_cap = bucket_cap(high_limit);
            let mut spilled = Vec::new();
            while buckets.high.len() > high_cap.get() {
                if let Some(pair) = buckets.high.pop_lru() {
                    spilled.push(pair);
                }
            }
            buckets.high.resize(high_cap);
            buckets.low.resize(bucket_cap(low_limit));
            spilled
        };

        for (url, image) in spilled {
            self.notify_evicted(&url, image);
        }
    }

    /// Returns the counter snapshot.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let buckets = self.buckets.lock();
        CacheStats {
            hits,
            misses,
            hit_rate,
            high: buckets.high.len(),
            low: buckets.low.len(),
        }
    }
}
