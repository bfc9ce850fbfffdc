//! Process-wide smart cache shared by all scan workers.
//!
//! One object owns every cross-task cache: domains already recorded,
//! similarity scores, compiled filter patterns, HTTP response bodies, and
//! WHOIS/DIG lookups. Each category sits behind its own lock with an
//! independent LRU bound, so a single hot map cannot evict the others.
//! Callers never compose two reads into a decision without going through a
//! method here; every method is a single-map critical section.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;

/// Default per-category LRU bound.
pub const DEFAULT_CACHE_CAPACITY: usize = 5000;

/// A cached HTTP response body with the metadata the content matcher needs.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub body: String,
    pub status: u16,
    pub content_type: String,
}

/// Monotonic counters, one pair per cache category.
#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Counters {
    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

/// Point-in-time view of cache effectiveness, printed in the end-of-run
/// summary.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub seen_hits: u64,
    pub seen_misses: u64,
    pub similarity_hits: u64,
    pub similarity_misses: u64,
    pub pattern_hits: u64,
    pub pattern_misses: u64,
    pub response_hits: u64,
    pub response_misses: u64,
    pub whois_hits: u64,
    pub whois_misses: u64,
    pub dig_hits: u64,
    pub dig_misses: u64,
}

/// Shared caches for domain bookkeeping, pattern compilation, response
/// bodies, and net-tool results.
///
/// Created once after config load and owned by the orchestrator; workers
/// receive it behind an `Arc`. Entries survive browser restarts except the
/// response-body map, which is cleared on every restart to avoid matching
/// against a stale session.
pub struct SmartCache {
    seen_domains: Mutex<LruCache<String, ()>>,
    similarity_scores: Mutex<LruCache<(String, String), u8>>,
    compiled_patterns: Mutex<LruCache<String, Arc<Regex>>>,
    response_bodies: Mutex<LruCache<String, CachedResponse>>,
    whois_results: Mutex<LruCache<String, String>>,
    dig_results: Mutex<LruCache<(String, String), String>>,

    seen_counters: Counters,
    similarity_counters: Counters,
    pattern_counters: Counters,
    response_counters: Counters,
    whois_counters: Counters,
    dig_counters: Counters,

    /// Global gate for the response-body map (`--cache-requests`).
    cache_requests: bool,
    /// `--ignore-cache`: tool-result reads miss unconditionally; writes
    /// still happen so a later run in the same process can use them.
    ignore_reads: bool,
}

impl SmartCache {
    #[must_use]
    pub fn new(cache_requests: bool) -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY, cache_requests)
    }

    #[must_use]
    pub fn with_ignored_reads(cache_requests: bool) -> Self {
        let mut cache = Self::with_capacity(DEFAULT_CACHE_CAPACITY, cache_requests);
        cache.ignore_reads = true;
        cache
    }

    #[must_use]
    pub fn with_capacity(capacity: usize, cache_requests: bool) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            seen_domains: Mutex::new(LruCache::new(cap)),
            similarity_scores: Mutex::new(LruCache::new(cap)),
            compiled_patterns: Mutex::new(LruCache::new(cap)),
            response_bodies: Mutex::new(LruCache::new(cap)),
            whois_results: Mutex::new(LruCache::new(cap)),
            dig_results: Mutex::new(LruCache::new(cap)),
            seen_counters: Counters::default(),
            similarity_counters: Counters::default(),
            pattern_counters: Counters::default(),
            response_counters: Counters::default(),
            whois_counters: Counters::default(),
            dig_counters: Counters::default(),
            cache_requests,
            ignore_reads: false,
        }
    }

    /// True iff the full subdomain has already produced a record anywhere
    /// in this run. The lookup refreshes LRU recency.
    pub fn should_skip_domain(&self, domain: &str) -> bool {
        let mut map = self.seen_domains.lock();
        if map.get(domain).is_some() {
            self.seen_counters.hit();
            true
        } else {
            self.seen_counters.miss();
            false
        }
    }

    /// Mark a full subdomain as recorded.
    pub fn mark_domain_seen(&self, domain: &str) {
        self.seen_domains.lock().put(domain.to_string(), ());
    }

    fn similarity_key(a: &str, b: &str) -> (String, String) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }

    /// Cache a similarity score. First insertion wins; the pair key is
    /// order-insensitive.
    pub fn cache_similarity(&self, a: &str, b: &str, score: u8) {
        let key = Self::similarity_key(a, b);
        let mut map = self.similarity_scores.lock();
        if map.get(&key).is_none() {
            map.put(key, score.min(100));
        }
    }

    pub fn get_cached_similarity(&self, a: &str, b: &str) -> Option<u8> {
        let key = Self::similarity_key(a, b);
        let mut map = self.similarity_scores.lock();
        match map.get(&key) {
            Some(score) => {
                self.similarity_counters.hit();
                Some(*score)
            }
            None => {
                self.similarity_counters.miss();
                None
            }
        }
    }

    /// Similarity between two domains, computed and cached on miss.
    pub fn similarity(&self, a: &str, b: &str) -> u8 {
        if let Some(score) = self.get_cached_similarity(a, b) {
            return score;
        }
        let score = crate::domain::similarity(a, b);
        self.cache_similarity(a, b, score);
        score
    }

    /// Fetch or compile a regex pattern.
    pub fn pattern(&self, source: &str) -> Result<Arc<Regex>, regex::Error> {
        {
            let mut map = self.compiled_patterns.lock();
            if let Some(re) = map.get(source) {
                self.pattern_counters.hit();
                return Ok(Arc::clone(re));
            }
        }
        self.pattern_counters.miss();
        let compiled = Arc::new(Regex::new(source)?);
        self.compiled_patterns
            .lock()
            .put(source.to_string(), Arc::clone(&compiled));
        Ok(compiled)
    }

    /// Store a response body, unless request caching is globally off or the
    /// site opted out via `bypass_cache`.
    pub fn cache_response(&self, url: &str, response: CachedResponse, bypass_cache: bool) {
        if !self.cache_requests || bypass_cache {
            return;
        }
        self.response_bodies.lock().put(url.to_string(), response);
    }

    pub fn get_response(&self, url: &str, bypass_cache: bool) -> Option<CachedResponse> {
        if !self.cache_requests || bypass_cache || self.ignore_reads {
            return None;
        }
        let mut map = self.response_bodies.lock();
        match map.get(url) {
            Some(resp) => {
                self.response_counters.hit();
                Some(resp.clone())
            }
            None => {
                self.response_counters.miss();
                None
            }
        }
    }

    /// Dropped on every browser restart; a body captured through a dead
    /// session must not satisfy a search in the next one.
    pub fn clear_response_bodies(&self) {
        self.response_bodies.lock().clear();
    }

    pub fn cache_whois(&self, domain: &str, output: &str) {
        self.whois_results
            .lock()
            .put(domain.to_string(), output.to_string());
    }

    pub fn get_whois(&self, domain: &str, bypass_cache: bool) -> Option<String> {
        if bypass_cache || self.ignore_reads {
            return None;
        }
        let mut map = self.whois_results.lock();
        match map.get(domain) {
            Some(out) => {
                self.whois_counters.hit();
                Some(out.clone())
            }
            None => {
                self.whois_counters.miss();
                None
            }
        }
    }

    pub fn cache_dig(&self, domain: &str, record_type: &str, output: &str) {
        self.dig_results.lock().put(
            (domain.to_string(), record_type.to_ascii_uppercase()),
            output.to_string(),
        );
    }

    pub fn get_dig(&self, domain: &str, record_type: &str, bypass_cache: bool) -> Option<String> {
        if bypass_cache || self.ignore_reads {
            return None;
        }
        let key = (domain.to_string(), record_type.to_ascii_uppercase());
        let mut map = self.dig_results.lock();
        match map.get(&key) {
            Some(out) => {
                self.dig_counters.hit();
                Some(out.clone())
            }
            None => {
                self.dig_counters.miss();
                None
            }
        }
    }

    /// Wipe every category (`--clear-cache`).
    pub fn clear_all(&self) {
        self.seen_domains.lock().clear();
        self.similarity_scores.lock().clear();
        self.compiled_patterns.lock().clear();
        self.response_bodies.lock().clear();
        self.whois_results.lock().clear();
        self.dig_results.lock().clear();
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let (seen_hits, seen_misses) = self.seen_counters.snapshot();
        let (similarity_hits, similarity_misses) = self.similarity_counters.snapshot();
        let (pattern_hits, pattern_misses) = self.pattern_counters.snapshot();
        let (response_hits, response_misses) = self.response_counters.snapshot();
        let (whois_hits, whois_misses) = self.whois_counters.snapshot();
        let (dig_hits, dig_misses) = self.dig_counters.snapshot();
        CacheStats {
            seen_hits,
            seen_misses,
            similarity_hits,
            similarity_misses,
            pattern_hits,
            pattern_misses,
            response_hits,
            response_misses,
            whois_hits,
            whois_misses,
            dig_hits,
            dig_misses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seen_domains_round_trip() {
        let cache = SmartCache::new(false);
        assert!(!cache.should_skip_domain("ads.example.com"));
        cache.mark_domain_seen("ads.example.com");
        assert!(cache.should_skip_domain("ads.example.com"));
        // keyed by full subdomain, not registrable root
        assert!(!cache.should_skip_domain("cdn.example.com"));
    }

    #[test]
    fn similarity_key_is_order_insensitive() {
        let cache = SmartCache::new(false);
        cache.cache_similarity("a.com", "b.com", 42);
        assert_eq!(cache.get_cached_similarity("b.com", "a.com"), Some(42));
    }

    #[test]
    fn similarity_first_insertion_wins() {
        let cache = SmartCache::new(false);
        cache.cache_similarity("a.com", "b.com", 42);
        cache.cache_similarity("b.com", "a.com", 99);
        assert_eq!(cache.get_cached_similarity("a.com", "b.com"), Some(42));
    }

    #[test]
    fn response_cache_respects_gates() {
        let resp = CachedResponse {
            body: "hello".into(),
            status: 200,
            content_type: "text/html".into(),
        };

        // global gate off
        let cache = SmartCache::new(false);
        cache.cache_response("https://x.test/", resp.clone(), false);
        assert!(cache.get_response("https://x.test/", false).is_none());

        // gate on, site bypass wins
        let cache = SmartCache::new(true);
        cache.cache_response("https://x.test/", resp.clone(), true);
        assert!(cache.get_response("https://x.test/", false).is_none());

        // gate on, no bypass
        cache.cache_response("https://x.test/", resp, false);
        let got = cache.get_response("https://x.test/", false).expect("cached");
        assert_eq!(got.status, 200);
    }

    #[test]
    fn response_bodies_cleared_on_restart_others_survive() {
        let cache = SmartCache::new(true);
        cache.cache_response(
            "https://x.test/",
            CachedResponse {
                body: String::new(),
                status: 200,
                content_type: String::new(),
            },
            false,
        );
        cache.cache_whois("example.com", "registrar: test");
        cache.cache_dig("example.com", "a", "93.184.216.34");

        cache.clear_response_bodies();

        assert!(cache.get_response("https://x.test/", false).is_none());
        assert!(cache.get_whois("example.com", false).is_some());
        assert!(cache.get_dig("example.com", "A", false).is_some());
    }

    #[test]
    fn lru_bound_is_enforced() {
        let cache = SmartCache::with_capacity(2, false);
        cache.mark_domain_seen("a.test");
        cache.mark_domain_seen("b.test");
        cache.mark_domain_seen("c.test");
        assert!(!cache.should_skip_domain("a.test"));
        assert!(cache.should_skip_domain("b.test"));
        assert!(cache.should_skip_domain("c.test"));
    }

    #[test]
    fn pattern_compilation_is_cached() {
        let cache = SmartCache::new(false);
        let first = cache.pattern("tracker").expect("compile");
        let second = cache.pattern("tracker").expect("compile");
        assert!(Arc::ptr_eq(&first, &second));
        assert!(cache.pattern("(unclosed").is_err());
    }
}
