//! Compiled origin-host patterns and their LRU cache.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use regex::bytes::{Captures, Regex};
use tracing::debug;

use crate::observability::metrics;
use crate::rewrite::substitution::{PatternError, Substitution};

/// Longest subdomain prefix the pattern will consume in front of the root.
const MAX_PREFIX_LEN: usize = 253;

pub const DEFAULT_CACHE_SIZE: usize = 256;

/// Matcher for an origin root and every subdomain under it.
#[derive(Debug)]
pub struct CompiledPattern {
    root: String,
    regex: Regex,
    max_len: usize,
}

impl CompiledPattern {
    pub fn compile(root: &str) -> Result<Self, PatternError> {
        let root = normalize_root(root);
        let escaped = regex::escape(&root);
        let source =
            format!(r"(?i-u)\b[a-z0-9.-]{{1,{MAX_PREFIX_LEN}}}\.{escaped}\b|\b{escaped}\b");
        let regex = Regex::new(&source)?;
        if root.is_empty() || regex.is_match(b"") {
            return Err(PatternError::EmptyMatch(source));
        }
        Ok(Self {
            max_len: MAX_PREFIX_LEN + 1 + root.len(),
            root,
            regex,
        })
    }

    /// Normalized root this pattern was built for.
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text.as_bytes())
    }

    pub fn substitution<F>(&self, replacer: F) -> Substitution
    where
        F: Fn(&Captures<'_>, &mut Vec<u8>) + Send + Sync + 'static,
    {
        Substitution::from_regex(self.regex.clone(), self.max_len, true, replacer)
    }
}

/// Cache key for an origin host: lower-cased, trailing dot and a leading
/// `www.` removed.
pub fn normalize_root(host: &str) -> String {
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
    match host.strip_prefix("www.") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => host,
    }
}

/// Bounded, thread-safe cache of compiled patterns keyed by origin root.
///
/// Eviction is invisible to callers: a miss recompiles, and two lookups of
/// the same root always behave the same.
pub struct PatternCache {
    entries: Mutex<LruCache<String, Arc<CompiledPattern>>>,
}

impl Default for PatternCache {
    fn default() -> Self {
        PatternCache::new(DEFAULT_CACHE_SIZE)
    }
}

impl PatternCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        PatternCache {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, root: &str) -> Result<Arc<CompiledPattern>, PatternError> {
        let key = normalize_root(root);
        let hit = self.lock().get(&key).cloned();
        if let Some(pattern) = hit {
            return Ok(pattern);
        }

        debug!(root = %key, "pattern cache miss");
        metrics::record_pattern_cache_miss();
        let compiled = Arc::new(CompiledPattern::compile(&key)?);

        let mut entries = self.lock();
        if let Some(existing) = entries.get(&key) {
            return Ok(existing.clone());
        }
        entries.put(key, compiled.clone());
        Ok(compiled)
    }

    pub fn evict(&self, root: &str) -> bool {
        self.lock().pop(&normalize_root(root)).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Arc<CompiledPattern>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_roots() {
        assert_eq!(normalize_root("WWW.GitHub.com."), "github.com");
        assert_eq!(normalize_root("www."), "www");
        assert_eq!(normalize_root("api.github.com"), "api.github.com");
    }

    #[test]
    fn matches_root_and_subdomains_only() {
        let pattern = CompiledPattern::compile("github.com").unwrap();
        assert!(pattern.is_match("github.com"));
        assert!(pattern.is_match("https://API.GitHub.com/repo"));
        assert!(!pattern.is_match("notgithub.com"));
        assert!(!pattern.is_match("github.community"));
    }

    #[test]
    fn www_and_bare_root_share_an_entry() {
        let cache = PatternCache::new(4);
        let a = cache.get("www.github.com").unwrap();
        let b = cache.get("GitHub.com").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn eviction_is_transparent() {
        let cache = PatternCache::new(1);
        let first = cache.get("github.com").unwrap();
        cache.get("gitlab.com").unwrap();
        assert_eq!(cache.len(), 1);

        let rebuilt = cache.get("github.com").unwrap();
        assert!(!Arc::ptr_eq(&first, &rebuilt));
        for text in ["api.github.com", "github.co", "xgithub.com"] {
            assert_eq!(first.is_match(text), rebuilt.is_match(text), "{text}");
        }
    }

    #[test]
    fn concurrent_lookups_agree() {
        let cache = PatternCache::new(2);
        let roots = ["a.test", "b.test", "c.test"];
        std::thread::scope(|scope| {
            for worker in 0..4 {
                let cache = &cache;
                scope.spawn(move || {
                    for i in 0..50 {
                        let root = roots[(i + worker) % roots.len()];
                        let pattern = cache.get(root).unwrap();
                        assert_eq!(pattern.root(), root);
                        assert!(pattern.is_match(&format!("x.{root}")));
                    }
                });
            }
        });
        assert!(cache.len() <= cache.capacity());
    }
}
