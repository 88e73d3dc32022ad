//! Round-robin API key rotation, one independent cycle per provider.
//!
//! Mirrors the upstream `key_manager.py`'s `itertools.cycle` pools, but
//! each cycle is its own mutex-guarded index rather than a global —
//! letting a `KeyRotator` be constructed per-`Config` instead of relying
//! on process-wide statics.

use std::sync::Mutex;

use crate::config::Provider;

struct Cycle {
    keys: Vec<String>,
    next: usize,
}

impl Cycle {
    fn new(keys: Vec<String>) -> Self {
        Cycle { keys, next: 0 }
    }

    fn next_key(&mut self) -> Option<String> {
        if self.keys.is_empty() {
            return None;
        }
        let key = self.keys[self.next].clone();
        self.next = (self.next + 1) % self.keys.len();
        Some(key)
    }
}

/// Thread-safe round-robin key source, one cycle per provider.
///
/// Concurrent callers always observe distinct keys in round-robin order
/// because each call serialises on the provider's mutex for the full
/// read-increment-return sequence.
pub struct KeyRotator {
    groq: Mutex<Cycle>,
    nvidia: Mutex<Cycle>,
}

impl KeyRotator {
    pub fn new(groq_keys: Vec<String>, nvidia_keys: Vec<String>) -> Self {
        KeyRotator {
            groq: Mutex::new(Cycle::new(groq_keys)),
            nvidia: Mutex::new(Cycle::new(nvidia_keys)),
        }
    }

    /// Return the next key for `provider`, or `fallback` if that
    /// provider's pool is empty (unconfigured).
    pub fn next(&self, provider: Provider, fallback: &str) -> String {
        let cycle = match provider {
            Provider::Groq => &self.groq,
            Provider::Nvidia => &self.nvidia,
        };
        let mut guard = cycle.lock().expect("key rotator mutex poisoned");
        guard.next_key().unwrap_or_else(|| fallback.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotates_in_round_robin_order() {
        let rotator = KeyRotator::new(vec!["a".into(), "b".into(), "c".into()], vec![]);
        let seq: Vec<String> = (0..5).map(|_| rotator.next(Provider::Groq, "fallback")).collect();
        assert_eq!(seq, vec!["a", "b", "c", "a", "b"]);
    }

    #[test]
    fn empty_pool_returns_fallback() {
        let rotator = KeyRotator::new(vec![], vec![]);
        assert_eq!(rotator.next(Provider::Groq, "fallback-key"), "fallback-key");
        assert_eq!(rotator.next(Provider::Nvidia, "other-fallback"), "other-fallback");
    }

    #[test]
    fn providers_are_independent_cycles() {
        let rotator = KeyRotator::new(vec!["g1".into(), "g2".into()], vec!["n1".into()]);
        assert_eq!(rotator.next(Provider::Groq, ""), "g1");
        assert_eq!(rotator.next(Provider::Nvidia, ""), "n1");
        assert_eq!(rotator.next(Provider::Nvidia, ""), "n1");
        assert_eq!(rotator.next(Provider::Groq, ""), "g2");
    }

    #[test]
    fn concurrent_callers_receive_distinct_keys() {
        use std::sync::Arc;
        let rotator = Arc::new(KeyRotator::new(
            (0..8).map(|i| format!("k{i}")).collect(),
            vec![],
        ));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let r = rotator.clone();
            handles.push(std::thread::spawn(move || r.next(Provider::Groq, "")));
        }
        let mut seen: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 8, "all 8 concurrent callers must see distinct keys");
    }
}
