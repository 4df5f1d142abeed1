//! Content-addressed response cache.
//!
//! Memoizes generated text and synthesized audio under a stable fingerprint
//! of the normalized input, so identical turns skip upstream provider calls.
//! Entries are write-once: concurrent identical computations may both run,
//! but the first `put` for a fingerprint is the one retained. Divergent
//! content for one fingerprint cannot occur because the fingerprint is a
//! pure function of normalized input.
//!
//! Cache failures are misses by policy; nothing here is surfaced to users.

use ellery_types::CacheError;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// A stable cache key derived from normalized request content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of a text request: SHA-256 over the normalized text.
    pub fn of_text(namespace: &str, text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(namespace.as_bytes());
        hasher.update(b":");
        hasher.update(normalize(text).as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Fingerprint of a synthesis request: the text fingerprint with voice
    /// parameters folded in, so different voices, models, or speeds never
    /// collide.
    pub fn of_audio(text: &str, voice: &str, model: &str, speed: f32) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"tts:");
        hasher.update(normalize(text).as_bytes());
        hasher.update(b"|");
        hasher.update(voice.as_bytes());
        hasher.update(b"|");
        hasher.update(model.as_bytes());
        hasher.update(b"|");
        hasher.update(format!("{speed:.2}").as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Fingerprint of raw bytes (audio transcription requests).
    pub fn of_bytes(namespace: &str, bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(namespace.as_bytes());
        hasher.update(b":");
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Trims, lowercases, and collapses internal whitespace so that trivially
/// different phrasings of the same request share a fingerprint.
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// In-memory write-once cache with per-entry TTL.
///
/// Locking: a single `std::sync::Mutex` around the map. All acquisitions are
/// brief HashMap operations that never span `.await` points, so a synchronous
/// lock is safe here.
pub struct ResponseCache<V> {
    entries: Mutex<HashMap<Fingerprint, Entry<V>>>,
    /// Sweep expired entries once the map grows past this size.
    sweep_threshold: usize,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            sweep_threshold: 4096,
        }
    }

    /// The map lock as a fallible resource: a poisoned lock is a
    /// [`CacheError`], which callers downgrade to a miss.
    fn guard(&self) -> Result<MutexGuard<'_, HashMap<Fingerprint, Entry<V>>>, CacheError> {
        self.entries
            .lock()
            .map_err(|_| CacheError("cache lock poisoned".to_string()))
    }

    /// Returns the cached value for `fingerprint`, or `None` on miss, expiry,
    /// or cache failure. Expired entries are removed on access.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<V> {
        let mut entries = match self.guard() {
            Ok(guard) => guard,
            Err(error) => {
                tracing::error!(%error, "treating cache failure as a miss");
                return None;
            }
        };

        match entries.get(fingerprint) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(fingerprint);
                None
            }
            None => None,
        }
    }

    /// Stores `value` under `fingerprint` unless a live entry already exists:
    /// first-writer-wins. Returns `true` when this call's value was retained;
    /// a cache failure drops the write.
    pub fn put(&self, fingerprint: Fingerprint, value: V, ttl: Duration) -> bool {
        let mut entries = match self.guard() {
            Ok(guard) => guard,
            Err(error) => {
                tracing::error!(%error, "dropping cache write");
                return false;
            }
        };

        let now = Instant::now();
        if entries.len() > self.sweep_threshold {
            entries.retain(|_, entry| entry.expires_at > now);
        }

        match entries.get(&fingerprint) {
            Some(existing) if existing.expires_at > now => false,
            _ => {
                entries.insert(
                    fingerprint,
                    Entry {
                        value,
                        expires_at: now + ttl,
                    },
                );
                true
            }
        }
    }

    /// Number of live entries (expired-but-unswept entries may be counted).
    pub fn len(&self) -> usize {
        self.guard().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone> Default for ResponseCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn fingerprint_is_stable_under_normalization() {
        let a = Fingerprint::of_text("ai", "  Hello   World ");
        let b = Fingerprint::of_text("ai", "hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_namespaces_do_not_collide() {
        let a = Fingerprint::of_text("ai", "hello");
        let b = Fingerprint::of_text("stt", "hello");
        assert_ne!(a, b);
    }

    #[test]
    fn audio_fingerprint_folds_in_voice_parameters() {
        let a = Fingerprint::of_audio("hello", "alloy", "tts-1", 1.0);
        let b = Fingerprint::of_audio("hello", "verse", "tts-1", 1.0);
        let c = Fingerprint::of_audio("hello", "alloy", "tts-1", 1.5);
        let d = Fingerprint::of_audio("hello", "alloy", "tts-1-hd", 1.0);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn round_trip_until_expiry() {
        let cache = ResponseCache::new();
        let fp = Fingerprint::of_text("ai", "hello");
        assert!(cache.put(fp.clone(), "hi".to_string(), Duration::from_millis(40)));
        assert_eq!(cache.get(&fp), Some("hi".to_string()));

        sleep(Duration::from_millis(60));
        assert_eq!(cache.get(&fp), None);
    }

    #[test]
    fn first_writer_wins() {
        let cache = ResponseCache::new();
        let fp = Fingerprint::of_text("ai", "hello");
        assert!(cache.put(fp.clone(), "first".to_string(), Duration::from_secs(60)));
        assert!(!cache.put(fp.clone(), "second".to_string(), Duration::from_secs(60)));
        assert_eq!(cache.get(&fp), Some("first".to_string()));
    }

    #[test]
    fn expired_entry_can_be_rewritten() {
        let cache = ResponseCache::new();
        let fp = Fingerprint::of_text("ai", "hello");
        assert!(cache.put(fp.clone(), "first".to_string(), Duration::from_millis(20)));
        sleep(Duration::from_millis(40));
        assert!(cache.put(fp.clone(), "second".to_string(), Duration::from_secs(60)));
        assert_eq!(cache.get(&fp), Some("second".to_string()));
    }

    #[test]
    fn miss_on_unknown_fingerprint() {
        let cache: ResponseCache<String> = ResponseCache::new();
        assert_eq!(cache.get(&Fingerprint::of_text("ai", "nothing")), None);
    }

    #[test]
    fn poisoned_cache_degrades_to_misses() {
        use std::sync::Arc;
        let cache = Arc::new(ResponseCache::new());
        let fp = Fingerprint::of_text("ai", "hello");
        assert!(cache.put(fp.clone(), "hi".to_string(), Duration::from_secs(60)));

        let poisoner = cache.clone();
        std::thread::spawn(move || {
            let _guard = poisoner.entries.lock().unwrap();
            panic!("holding the cache lock");
        })
        .join()
        .unwrap_err();

        // Reads miss, writes are dropped, nothing panics or surfaces.
        assert_eq!(cache.get(&fp), None);
        assert!(!cache.put(
            Fingerprint::of_text("ai", "other"),
            "dropped".to_string(),
            Duration::from_secs(60)
        ));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn concurrent_puts_retain_exactly_one_value() {
        use std::sync::Arc;
        let cache = Arc::new(ResponseCache::new());
        let fp = Fingerprint::of_text("ai", "contended");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                let fp = fp.clone();
                std::thread::spawn(move || {
                    cache.put(fp, format!("writer-{i}"), Duration::from_secs(60))
                })
            })
            .collect();

        let wins: usize = handles
            .into_iter()
            .map(|h| usize::from(h.join().unwrap()))
            .sum();
        assert_eq!(wins, 1, "exactly one writer should win");
        assert!(cache.get(&fp).is_some());
    }
}
