//! Correlation of dispatched checks with their asynchronous replies
//!
//! Each dispatched check is tagged with a fresh token. The token maps to a
//! `PendingCallback` describing what the reply should do; a token resolves at
//! most once and only for the validator it was sent to.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Continuation for one dispatched check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCallback {
    pub target_id: i32,
    pub url: String,
    pub validator_id: i32,
    pub reward: i64,
    pub registered_at: Instant,
}

#[derive(Debug, Default)]
pub struct CallbackCorrelator {
    pending: RwLock<HashMap<Uuid, PendingCallback>>,
}

impl CallbackCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a continuation under a fresh token and return the token
    pub async fn register(&self, callback: PendingCallback) -> Uuid {
        let token = Uuid::now_v7();
        self.pending.write().await.insert(token, callback);
        token
    }

    /// Remove and return the continuation for `token`, but only when it was
    /// dispatched to `validator_id`. A foreign validator's attempt leaves it in place.
    pub async fn take_for(&self, token: &Uuid, validator_id: i32) -> Option<PendingCallback> {
        let mut pending = self.pending.write().await;
        match pending.get(token) {
            Some(cb) if cb.validator_id == validator_id => pending.remove(token),
            _ => None,
        }
    }

    /// Drop a continuation whose request never left the hub
    pub async fn discard(&self, token: &Uuid) -> bool {
        self.pending.write().await.remove(token).is_some()
    }

    /// Evict continuations registered at least `ttl` ago; returns how many
    pub async fn evict_older_than(&self, ttl: Duration) -> usize {
        let mut pending = self.pending.write().await;
        let before = pending.len();
        pending.retain(|_, cb| cb.registered_at.elapsed() < ttl);
        before - pending.len()
    }

    pub async fn get(&self, token: &Uuid) -> Option<PendingCallback> {
        self.pending.read().await.get(token).cloned()
    }

    pub async fn len(&self) -> usize {
        self.pending.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn callback(validator_id: i32) -> PendingCallback {
        PendingCallback {
            target_id: 1,
            url: "https://example.com".to_string(),
            validator_id,
            reward: 1000,
            registered_at: Instant::now(),
        }
    }

    #[tokio::test]
    async fn test_token_resolves_once() {
        let correlator = CallbackCorrelator::new();
        let token = correlator.register(callback(7)).await;

        assert!(correlator.take_for(&token, 7).await.is_some());
        assert!(correlator.take_for(&token, 7).await.is_none());
        assert!(correlator.is_empty().await);
    }

    #[tokio::test]
    async fn test_foreign_validator_cannot_resolve() {
        let correlator = CallbackCorrelator::new();
        let token = correlator.register(callback(7)).await;

        assert!(correlator.take_for(&token, 8).await.is_none());
        assert_eq!(correlator.len().await, 1);
        assert!(correlator.take_for(&token, 7).await.is_some());
    }

    #[tokio::test]
    async fn test_tokens_are_unique() {
        let correlator = CallbackCorrelator::new();
        let a = correlator.register(callback(1)).await;
        let b = correlator.register(callback(1)).await;
        assert_ne!(a, b);
        assert_eq!(correlator.len().await, 2);
    }

    #[tokio::test]
    async fn test_eviction() {
        let correlator = CallbackCorrelator::new();
        let mut stale = callback(1);
        stale.registered_at = Instant::now() - Duration::from_secs(2);
        correlator.register(stale).await;
        let fresh = correlator.register(callback(2)).await;

        assert_eq!(correlator.evict_older_than(Duration::from_secs(1)).await, 1);
        assert_eq!(correlator.len().await, 1);
        assert!(correlator.get(&fresh).await.is_some());
    }
}
