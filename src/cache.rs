//! Page cache and preloader.
//!
//! Memoizes successful image resolutions per cache key with a fixed
//! TTL, deduplicates in-flight resolutions, and drives anticipatory
//! loading of the pages around the reader's current position.

use crate::images::{ContentRef, ImageStrategy, ResolvedImage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default entry time-to-live.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);

/// Monotonic time source, injectable so expiry is testable without
/// real delays.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock implementation used outside tests.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// How the reader is being paged, which shapes the preload neighborhood.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingMode {
    /// Discrete page turns: preload the next two pages and the previous
    /// one.
    Paged,
    /// Continuous vertical scrolling: preload the next three pages, no
    /// backward preload.
    Vertical,
}

/// A memoized resolution.
struct CacheEntry {
    value: ResolvedImage,
    created_at: Instant,
}

/// Process-wide image cache.
///
/// Only successful resolutions are memoized; failures retry on the next
/// access. Expiry is checked lazily on lookup, there is no background
/// sweep. In-flight dedup uses a per-key async gate: a second caller for
/// the same key waits for the first resolution to finish and then takes
/// the cache hit, rather than sharing the result directly.
pub struct ImageCache {
    strategy: Arc<dyn ImageStrategy>,
    entries: Mutex<HashMap<String, CacheEntry>>,
    pending: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ImageCache {
    /// Creates a cache over the given strategy with the default TTL.
    pub fn new(strategy: Arc<dyn ImageStrategy>) -> Self {
        Self::with_ttl_and_clock(strategy, DEFAULT_TTL, Arc::new(SystemClock))
    }

    /// Creates a cache with an explicit TTL and clock.
    pub fn with_ttl_and_clock(
        strategy: Arc<dyn ImageStrategy>,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            strategy,
            entries: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    /// Returns the cached image for `content`, resolving and memoizing
    /// it on a miss. `None` means the image is unavailable right now.
    ///
    /// Only the caller that installs the pending-map entry for a key
    /// resolves it; everyone else parks on that entry's gate and then
    /// re-consults the map, so a key never has two resolutions in
    /// flight even when one of them fails.
    pub async fn get_or_resolve(&self, content: &ContentRef) -> Option<ResolvedImage> {
        let key = content.cache_key();

        loop {
            if let Some(hit) = self.lookup(&key) {
                return Some(hit);
            }

            let (gate, owner) = {
                let mut pending = self.pending.lock();
                match pending.get(&key) {
                    Some(gate) => (gate.clone(), false),
                    None => {
                        let gate = Arc::new(tokio::sync::Mutex::new(()));
                        pending.insert(key.clone(), gate.clone());
                        (gate, true)
                    }
                }
            };

            if !owner {
                // Wait out the in-flight resolution, then start over:
                // either the entry is cached now, or the owner failed
                // and this caller takes over the key.
                drop(gate.lock().await);
                continue;
            }

            let _in_flight = gate.lock().await;
            let resolved = self.strategy.resolve(content).await;

            // The entry is written whole after the await; the map never
            // holds a partial result across a suspension point.
            if let Some(image) = &resolved {
                self.entries.lock().insert(
                    key.clone(),
                    CacheEntry {
                        value: image.clone(),
                        created_at: self.clock.now(),
                    },
                );
            }
            self.pending.lock().remove(&key);

            return resolved;
        }
    }

    /// Fresh-entry lookup with lazy expiry.
    fn lookup(&self, key: &str) -> Option<ResolvedImage> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if self.clock.now().duration_since(entry.created_at) < self.ttl => {
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Schedules fire-and-forget resolution of the pages around
    /// `current_page`. Out-of-range pages are silently filtered.
    pub fn preload(
        self: &Arc<Self>,
        chapter_id: u32,
        current_page: u32,
        total_pages: u32,
        mode: ReadingMode,
    ) {
        for page in preload_targets(current_page, total_pages, mode) {
            let cache = Arc::clone(self);
            tokio::spawn(async move {
                let _ = cache
                    .get_or_resolve(&ContentRef::Page { chapter_id, page })
                    .await;
            });
        }
    }

    /// Empties all cached entries immediately.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of live entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when no entries are cached.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Pages to preload around `current`, clamped to `[1, total]`.
pub fn preload_targets(current: u32, total: u32, mode: ReadingMode) -> Vec<u32> {
    let current = i64::from(current);
    let candidates = match mode {
        ReadingMode::Paged => vec![current + 1, current + 2, current - 1],
        ReadingMode::Vertical => vec![current + 1, current + 2, current + 3],
    };

    candidates
        .into_iter()
        .filter(|page| *page >= 1 && *page <= i64::from(total))
        .map(|page| page as u32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::SourceKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::SystemTime;

    /// Strategy fake that counts resolutions, records keys, and tracks
    /// how many resolutions overlap.
    struct CountingStrategy {
        calls: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
        resolved_keys: Mutex<Vec<String>>,
        fail: bool,
    }

    impl CountingStrategy {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                resolved_keys: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn max_active(&self) -> usize {
            self.max_active.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ImageStrategy for CountingStrategy {
        async fn resolve(&self, content: &ContentRef) -> Option<ResolvedImage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            self.resolved_keys.lock().push(content.cache_key());
            // Yield so concurrent callers genuinely interleave.
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                return None;
            }
            Some(ResolvedImage {
                uri: format!("https://img.local/{}", content.cache_key()),
                resolved_at: SystemTime::now(),
                source: SourceKind::DirectUrl,
            })
        }
    }

    /// Clock advanced by hand.
    struct ManualClock {
        now: Mutex<Instant>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                now: Mutex::new(Instant::now()),
            }
        }

        fn advance(&self, by: Duration) {
            let mut now = self.now.lock();
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock()
        }
    }

    fn page(chapter_id: u32, page: u32) -> ContentRef {
        ContentRef::Page { chapter_id, page }
    }

    #[tokio::test]
    async fn test_second_lookup_within_ttl_is_a_hit() {
        let strategy = Arc::new(CountingStrategy::new());
        let cache = ImageCache::new(strategy.clone());

        let first = cache.get_or_resolve(&page(1, 1)).await.unwrap();
        let second = cache.get_or_resolve(&page(1, 1)).await.unwrap();

        assert_eq!(strategy.calls(), 1);
        assert_eq!(first.uri, second.uri);
    }

    #[tokio::test]
    async fn test_expired_entry_is_resolved_anew() {
        let strategy = Arc::new(CountingStrategy::new());
        let clock = Arc::new(ManualClock::new());
        let cache = ImageCache::with_ttl_and_clock(
            strategy.clone(),
            Duration::from_secs(600),
            clock.clone(),
        );

        cache.get_or_resolve(&page(1, 1)).await.unwrap();
        clock.advance(Duration::from_secs(601));
        cache.get_or_resolve(&page(1, 1)).await.unwrap();

        assert_eq!(strategy.calls(), 2);
    }

    #[tokio::test]
    async fn test_entry_just_inside_ttl_still_served() {
        let strategy = Arc::new(CountingStrategy::new());
        let clock = Arc::new(ManualClock::new());
        let cache = ImageCache::with_ttl_and_clock(
            strategy.clone(),
            Duration::from_secs(600),
            clock.clone(),
        );

        cache.get_or_resolve(&page(1, 1)).await.unwrap();
        clock.advance(Duration::from_secs(599));
        cache.get_or_resolve(&page(1, 1)).await.unwrap();

        assert_eq!(strategy.calls(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_memoized() {
        let strategy = Arc::new(CountingStrategy::failing());
        let cache = ImageCache::new(strategy.clone());

        assert!(cache.get_or_resolve(&page(1, 1)).await.is_none());
        assert!(cache.get_or_resolve(&page(1, 1)).await.is_none());

        // Each access retried the resolution.
        assert_eq!(strategy.calls(), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_lookups_resolve_once() {
        let strategy = Arc::new(CountingStrategy::new());
        let cache = Arc::new(ImageCache::new(strategy.clone()));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get_or_resolve(&page(9, 2)).await })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().is_some());
        }
        assert_eq!(strategy.calls(), 1);
    }

    #[tokio::test]
    async fn test_failing_resolutions_stay_serialized_per_key() {
        let strategy = Arc::new(CountingStrategy::failing());
        let cache = Arc::new(ImageCache::new(strategy.clone()));

        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get_or_resolve(&page(9, 2)).await })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().is_none());
        }

        // Every caller retried after the previous failure, but never two
        // resolutions at once for the same key.
        assert_eq!(strategy.calls(), 3);
        assert_eq!(strategy.max_active(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_clear_forces_re_resolution() {
        let strategy = Arc::new(CountingStrategy::new());
        let cache = ImageCache::new(strategy.clone());

        cache.get_or_resolve(&page(1, 1)).await.unwrap();
        cache.clear();
        assert!(cache.is_empty());
        cache.get_or_resolve(&page(1, 1)).await.unwrap();

        assert_eq!(strategy.calls(), 2);
    }

    #[tokio::test]
    async fn test_preload_schedules_neighborhood() {
        let strategy = Arc::new(CountingStrategy::new());
        let cache = Arc::new(ImageCache::new(strategy.clone()));

        cache.preload(3, 5, 20, ReadingMode::Paged);

        // Preloads are fire-and-forget; give the spawned tasks a chance
        // to run.
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        let mut keys = strategy.resolved_keys.lock().clone();
        keys.sort();
        assert_eq!(keys, vec!["page_3_4", "page_3_6", "page_3_7"]);
    }

    #[test]
    fn test_preload_targets_paged() {
        assert_eq!(preload_targets(5, 20, ReadingMode::Paged), vec![6, 7, 4]);
        // Start of the chapter: no page 0.
        assert_eq!(preload_targets(1, 20, ReadingMode::Paged), vec![2, 3]);
        // End of the chapter: nothing past the last page.
        assert_eq!(preload_targets(20, 20, ReadingMode::Paged), vec![19]);
        assert_eq!(preload_targets(19, 20, ReadingMode::Paged), vec![20, 18]);
    }

    #[test]
    fn test_preload_targets_vertical() {
        assert_eq!(preload_targets(5, 20, ReadingMode::Vertical), vec![6, 7, 8]);
        // No backward preload when scrolling vertically.
        assert_eq!(preload_targets(19, 20, ReadingMode::Vertical), vec![20]);
        assert_eq!(preload_targets(20, 20, ReadingMode::Vertical), Vec::<u32>::new());
    }

    #[test]
    fn test_preload_targets_single_page_chapter() {
        assert_eq!(preload_targets(1, 1, ReadingMode::Paged), Vec::<u32>::new());
    }
}
