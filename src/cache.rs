//! In-memory plan cache.
//!
//! A bounded, least-recently-used memoization layer for compare results.
//! The cache is constructed explicitly and shared by reference; it is the
//! only state shared between concurrent compare calls.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

use crate::graph::CacheKey;
use crate::planner::PromotionPlanCompareResult;

/// Bounded LRU cache of compare results.
#[derive(Debug)]
pub struct PlanCache {
    /// Maximum number of plans kept.
    capacity: usize,
    /// Guarded state.
    inner: Mutex<CacheState>,
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found a plan.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Plans currently held.
    pub entries: usize,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<CacheKey, Arc<PromotionPlanCompareResult>>,
    /// Least recently used at the front.
    recency: VecDeque<CacheKey>,
    /// Request fingerprint -> key of the latest plan computed for it.
    latest: HashMap<String, CacheKey>,
    hits: u64,
    misses: u64,
}

impl PlanCache {
    /// Creates an empty cache holding at most `capacity` plans.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        // State is consistent after every mutation
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Looks up a plan and marks it most recently used.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<Arc<PromotionPlanCompareResult>> {
        let mut state = self.state();
        match state.entries.get(key).cloned() {
            Some(plan) => {
                state.hits += 1;
                state.touch(key);
                trace!("Plan cache hit: {key}");
                Some(plan)
            }
            None => {
                state.misses += 1;
                trace!("Plan cache miss: {key}");
                None
            }
        }
    }

    /// Stores a plan, evicting the least recently used one when full.
    ///
    /// If another call stored a plan under the same key first, that plan is
    /// kept and returned so equal inputs keep yielding the same instance.
    pub fn insert(
        &self,
        key: CacheKey,
        plan: Arc<PromotionPlanCompareResult>,
    ) -> Arc<PromotionPlanCompareResult> {
        let mut state = self.state();

        if let Some(existing) = state.entries.get(&key).cloned() {
            state.touch(&key);
            return existing;
        }

        while state.entries.len() >= self.capacity {
            let Some(oldest) = state.recency.pop_front() else {
                break;
            };
            state.entries.remove(&oldest);
            state.latest.retain(|_, k| *k != oldest);
            debug!("Evicted plan {oldest} from cache");
        }

        state.recency.push_back(key.clone());
        state.entries.insert(key, Arc::clone(&plan));
        plan
    }

    /// Records which plan was produced for a request.
    pub fn remember_request(&self, request: impl Into<String>, key: CacheKey) {
        let mut state = self.state();
        if state.entries.contains_key(&key) {
            state.latest.insert(request.into(), key);
        }
    }

    /// Drops the request's pointer to an older plan.
    pub fn forget_request(&self, request: &str) {
        self.state().latest.remove(request);
    }

    /// Returns the latest plan produced for a request, if still cached.
    #[must_use]
    pub fn latest(&self, request: &str) -> Option<Arc<PromotionPlanCompareResult>> {
        let state = self.state();
        state
            .latest
            .get(request)
            .and_then(|key| state.entries.get(key))
            .cloned()
    }

    /// Returns the number of cached plans.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    /// Returns true if no plan is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns hit/miss counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.state();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            entries: state.entries.len(),
        }
    }

    /// Drops every cached plan.
    pub fn clear(&self) {
        let mut state = self.state();
        state.entries.clear();
        state.recency.clear();
        state.latest.clear();
    }
}

impl Default for PlanCache {
    fn default() -> Self {
        Self::new(crate::config::EngineSettings::default().cache_capacity)
    }
}

impl CacheState {
    fn touch(&mut self, key: &CacheKey) {
        if let Some(pos) = self.recency.iter().position(|k| k == key)
            && let Some(k) = self.recency.remove(pos)
        {
            self.recency.push_back(k);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ContentHasher;

    fn key(n: &str) -> CacheKey {
        ContentHasher::new().plan_cache_key(n, "s", "dev", "prod", &[], &[])
    }

    fn plan(pipeline: &str) -> Arc<PromotionPlanCompareResult> {
        Arc::new(PromotionPlanCompareResult::new(pipeline, "s", "dev", "prod", vec![]))
    }

    #[test]
    fn test_get_returns_same_instance() {
        let cache = PlanCache::new(4);
        let stored = cache.insert(key("a"), plan("a"));

        let fetched = cache.get(&key("a")).unwrap();
        assert!(Arc::ptr_eq(&stored, &fetched));
        assert_eq!(cache.stats().hits, 1);
        assert!(cache.get(&key("b")).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_first_insert_wins() {
        let cache = PlanCache::new(4);
        let first = cache.insert(key("a"), plan("a"));
        let second = cache.insert(key("a"), plan("a"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = PlanCache::new(2);
        cache.insert(key("a"), plan("a"));
        cache.insert(key("b"), plan("b"));

        // Touch "a" so "b" becomes least recently used
        assert!(cache.get(&key("a")).is_some());
        cache.insert(key("c"), plan("c"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key("a")).is_some());
        assert!(cache.get(&key("b")).is_none());
        assert!(cache.get(&key("c")).is_some());
    }

    #[test]
    fn test_latest_request_follows_eviction() {
        let cache = PlanCache::new(1);
        cache.insert(key("a"), plan("a"));
        cache.remember_request("p/s/*", key("a"));
        assert_eq!(cache.latest("p/s/*").unwrap().pipeline_id, "a");

        cache.insert(key("b"), plan("b"));
        assert!(cache.latest("p/s/*").is_none());
    }

    #[test]
    fn test_forget_request() {
        let cache = PlanCache::new(2);
        cache.insert(key("a"), plan("a"));
        cache.remember_request("p/s/*", key("a"));
        cache.forget_request("p/s/*");
        assert!(cache.latest("p/s/*").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear() {
        let cache = PlanCache::new(2);
        cache.insert(key("a"), plan("a"));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(PlanCache::new(8));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    let k = key(&format!("p{}", i % 4));
                    let stored = cache.insert(k.clone(), plan("x"));
                    let fetched = cache.get(&k).unwrap();
                    assert!(Arc::ptr_eq(&stored, &fetched));
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 4);
    }
}
