//! Key store: cached identity provider keys with lazy, single-flight refresh.
//!
//! The store hands out a [`VerificationKey`] for a token's `kid`, or a
//! fallback key for tokens that omit one. Keys come from the identity
//! provider's key set and are cached for a fixed TTL; the whole map is
//! replaced atomically on every successful refresh. A failed refresh leaves
//! the previous keys in place and they keep being served until one succeeds.
//!
//! # Concurrency
//!
//! - Cache hits only take the shared read lock
//! - Fetches are serialized by a refresh gate; callers queued behind a fetch
//!   that completed while they waited reuse its outcome instead of fetching again
//! - The write lock is held only for the map swap, never across the network call
//! - Keys are cloned out, so no lock is held during signature verification

use crate::auth::key_set::{parse_key_set, HttpKeySetSource, KeySetSource, VerificationKey};
use crate::config::Config;
use crate::errors::KeyStoreError;
use crate::observability::metrics::{record_jwks_refresh, set_jwks_cached_keys};
use common::secret::{ExposeSecret, SecretString};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;

/// Default cache TTL in seconds (1 hour).
const DEFAULT_CACHE_TTL_SECONDS: u64 = 3600;

/// Algorithm that selects the shared secret for keyless tokens.
const SYMMETRIC_ALGORITHM: &str = "HS256";

/// Cached keys plus the time of the last successful refresh.
#[derive(Default)]
struct KeyCache {
    keys: BTreeMap<String, VerificationKey>,
    refreshed_at: Option<Instant>,
}

impl KeyCache {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.refreshed_at
            .is_some_and(|refreshed_at| refreshed_at.elapsed() < ttl)
    }
}

/// Outcome of the most recent fetch, shared with callers that queued behind it.
struct RefreshFlight {
    last_outcome: Result<(), KeyStoreError>,
}

/// Thread-safe store of verification keys.
pub struct KeyStore {
    source: Arc<dyn KeySetSource>,
    cache: RwLock<KeyCache>,
    refresh_gate: Mutex<RefreshFlight>,
    /// Bumped after every completed fetch, successful or not.
    completed_refreshes: AtomicU64,
    cache_ttl: Duration,
    shared_secret: Option<VerificationKey>,
    require_kid_for_asymmetric: bool,
}

impl KeyStore {
    /// Create a key store backed by `source` with the default TTL.
    pub fn new(source: Arc<dyn KeySetSource>) -> Self {
        Self {
            source,
            cache: RwLock::new(KeyCache::default()),
            refresh_gate: Mutex::new(RefreshFlight {
                last_outcome: Ok(()),
            }),
            completed_refreshes: AtomicU64::new(0),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECONDS),
            shared_secret: None,
            require_kid_for_asymmetric: false,
        }
    }

    /// Build the production key store from configuration.
    pub fn from_config(config: &Config) -> Self {
        let source = HttpKeySetSource::new(config.jwks_url.clone(), config.jwks_fetch_timeout);

        Self::new(Arc::new(source))
            .with_ttl(config.jwks_cache_ttl)
            .with_shared_secret(config.shared_secret.as_ref())
            .with_require_kid_for_asymmetric(config.require_kid_for_asymmetric)
    }

    /// Override how long a fetched key set stays fresh.
    pub fn with_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }

    /// Configure the HS256 shared secret used for keyless tokens.
    pub fn with_shared_secret(mut self, secret: Option<&SecretString>) -> Self {
        self.shared_secret = secret
            .map(|secret| VerificationKey::shared_secret(secret.expose_secret().as_bytes()));
        self
    }

    /// Reject keyless asymmetric tokens instead of picking a cached key.
    pub fn with_require_kid_for_asymmetric(mut self, require: bool) -> Self {
        self.require_kid_for_asymmetric = require;
        self
    }

    /// Resolve the key for a token with the given header `kid` and `alg`.
    ///
    /// # Errors
    ///
    /// - `KeyNotFound` if `kid` is still unknown after a refresh
    /// - `MissingSharedSecret` for keyless HS256 without a configured secret
    /// - `KidRequired` for keyless asymmetric tokens under the hardened policy
    /// - `NoKeysAvailable` if a keyless asymmetric token meets an empty key set
    /// - `Fetch` / `Document` if a needed refresh fails and the cache cannot
    ///   answer; a key still cached from an earlier refresh is served instead
    #[instrument(skip_all, fields(alg = %alg, has_kid = kid.is_some()))]
    pub async fn resolve_key(
        &self,
        kid: Option<&str>,
        alg: &str,
    ) -> Result<VerificationKey, KeyStoreError> {
        match kid {
            Some(kid) => self.resolve_by_kid(kid).await,
            None if alg == SYMMETRIC_ALGORITHM => self.shared_secret.clone().ok_or_else(|| {
                tracing::debug!(target: "gate.auth.key_store", "Keyless HS256 token but no shared secret configured");
                KeyStoreError::MissingSharedSecret
            }),
            None if self.require_kid_for_asymmetric => {
                tracing::debug!(target: "gate.auth.key_store", alg = %alg, "Keyless asymmetric token rejected");
                Err(KeyStoreError::KidRequired)
            }
            None => self.resolve_fallback().await,
        }
    }

    async fn resolve_by_kid(&self, kid: &str) -> Result<VerificationKey, KeyStoreError> {
        let observed = self.completed_refreshes.load(Ordering::Acquire);

        {
            let cache = self.cache.read().await;
            if cache.is_fresh(self.cache_ttl) {
                if let Some(key) = cache.keys.get(kid) {
                    tracing::trace!(target: "gate.auth.key_store", "Key cache hit");
                    return Ok(key.clone());
                }
            }
        }

        tracing::debug!(target: "gate.auth.key_store", kid = %kid, "Key cache miss or stale, refreshing");
        let refreshed = self.refresh_after(observed).await;

        let cache = self.cache.read().await;
        if let Err(e) = refreshed {
            let stale = cache.keys.get(kid).cloned();
            if stale.is_some() {
                tracing::warn!(target: "gate.auth.key_store", kid = %kid, "Key set refresh failed, serving stale cached key");
            }
            return stale.ok_or(e);
        }

        cache.keys.get(kid).cloned().ok_or_else(|| {
            tracing::warn!(target: "gate.auth.key_store", kid = %kid, "Key not found in key set after refresh");
            KeyStoreError::KeyNotFound
        })
    }

    /// Lowest-`kid` cached key, for tokens that do not name one.
    async fn resolve_fallback(&self) -> Result<VerificationKey, KeyStoreError> {
        let observed = self.completed_refreshes.load(Ordering::Acquire);

        {
            let cache = self.cache.read().await;
            if cache.is_fresh(self.cache_ttl) {
                if let Some(key) = cache.keys.values().next() {
                    return Ok(key.clone());
                }
            }
        }

        let refreshed = self.refresh_after(observed).await;

        let cache = self.cache.read().await;
        if let Err(e) = refreshed {
            let stale = cache.keys.values().next().cloned();
            if stale.is_some() {
                tracing::warn!(target: "gate.auth.key_store", "Key set refresh failed, serving stale cached key");
            }
            return stale.ok_or(e);
        }

        cache.keys.values().next().cloned().ok_or_else(|| {
            tracing::warn!(target: "gate.auth.key_store", "No keys available for keyless token");
            KeyStoreError::NoKeysAvailable
        })
    }

    /// Refresh the key set, joining a fetch that completes while waiting.
    ///
    /// # Errors
    ///
    /// Returns the fetch or document error; the previous cache is kept.
    pub async fn refresh(&self) -> Result<(), KeyStoreError> {
        let observed = self.completed_refreshes.load(Ordering::Acquire);
        self.refresh_after(observed).await
    }

    /// Refresh the key set unconditionally.
    ///
    /// Used by the readiness probe and for manual invalidation.
    pub async fn force_refresh(&self) -> Result<(), KeyStoreError> {
        let mut flight = self.refresh_gate.lock().await;
        self.complete_flight(&mut flight).await
    }

    /// Fetch unless another fetch completed since `observed` was read.
    async fn refresh_after(&self, observed: u64) -> Result<(), KeyStoreError> {
        let mut flight = self.refresh_gate.lock().await;

        if self.completed_refreshes.load(Ordering::Acquire) != observed {
            tracing::debug!(target: "gate.auth.key_store", "Reusing result of concurrent key set refresh");
            return flight.last_outcome.clone();
        }

        self.complete_flight(&mut flight).await
    }

    async fn complete_flight(&self, flight: &mut RefreshFlight) -> Result<(), KeyStoreError> {
        let outcome = self.fetch_and_swap().await;
        flight.last_outcome = outcome.clone();
        self.completed_refreshes.fetch_add(1, Ordering::AcqRel);
        outcome
    }

    #[instrument(skip_all)]
    async fn fetch_and_swap(&self) -> Result<(), KeyStoreError> {
        let start = Instant::now();

        let fetched = match self.source.fetch().await {
            Ok(body) => parse_key_set(&body),
            Err(e) => Err(e),
        };

        let keys = match fetched {
            Ok(keys) => keys,
            Err(e) => {
                tracing::error!(
                    target: "gate.auth.key_store",
                    error = %e,
                    "Key set refresh failed, keeping previous keys"
                );
                record_jwks_refresh("error", start.elapsed());
                return Err(e);
            }
        };

        let key_count = keys.len();
        {
            let mut cache = self.cache.write().await;
            cache.keys = keys;
            cache.refreshed_at = Some(Instant::now());
        }

        record_jwks_refresh("success", start.elapsed());
        set_jwks_cached_keys(key_count);
        tracing::info!(target: "gate.auth.key_store", key_count, "Key set cache refreshed");

        Ok(())
    }

    /// Number of cached identity provider keys.
    pub async fn key_count(&self) -> usize {
        self.cache.read().await.keys.len()
    }

    /// Whether the cache was refreshed within the TTL.
    pub async fn is_fresh(&self) -> bool {
        self.cache.read().await.is_fresh(self.cache_ttl)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::key_set::mock::MockKeySetSource;
    use serde_json::json;

    const TEST_N: &str = "rGhCjPUqY_rnAFJOVhxjGuh9T-W2CJo58Qs3ivA2Y4hO05bq0sRmazp5cUi7KkSgL6a9lKTwO-QaSBxq8u_S_6OYb8ejFWk3Bbm78Mn0PMO9m6mNlWoixrKvztgSY_jcsUU3lg6jXj4drYOYigfPVqyCT4p73SBYA-dS5gCmhdGlk_EpXfbPb4w555H5Woet4DeHFcApeOSFcr7n7G0RV0SBpwFKPV8M1r2iq7k8Zqrr4jpVWlgHoOBhueM4T5xAUR2UyD4UxMvBflsUUtauRruHiw4Ph3eLfDdsq0NnQvzWiAO6nuIkn4uqwT6ODXYz9IYzLzGRpnmqfW7p1fJarw";

    fn key_set(kids: &[&str]) -> Vec<u8> {
        let keys: Vec<_> = kids
            .iter()
            .map(|kid| json!({"kty": "RSA", "use": "sig", "kid": kid, "n": TEST_N, "e": "AQAB"}))
            .collect();
        serde_json::to_vec(&json!({ "keys": keys })).unwrap()
    }

    fn store_with(source: Arc<MockKeySetSource>) -> KeyStore {
        KeyStore::new(source)
    }

    #[tokio::test]
    async fn test_starts_empty_and_stale() {
        let store = store_with(Arc::new(MockKeySetSource::serving(key_set(&["a"]))));

        assert_eq!(store.key_count().await, 0);
        assert!(!store.is_fresh().await);
    }

    #[tokio::test]
    async fn test_resolve_by_kid_fetches_once_within_ttl() {
        let source = Arc::new(MockKeySetSource::serving(key_set(&["a"])));
        let store = store_with(source.clone());

        assert!(store.resolve_key(Some("a"), "RS256").await.unwrap().is_rsa());
        assert!(store.resolve_key(Some("a"), "RS256").await.is_ok());

        assert_eq!(source.fetch_count(), 1);
        assert!(store.is_fresh().await);
    }

    #[tokio::test]
    async fn test_unknown_kid_refreshes_then_fails() {
        let source = Arc::new(MockKeySetSource::serving(key_set(&["a"])));
        let store = store_with(source.clone());

        store.refresh().await.unwrap();
        let result = store.resolve_key(Some("rotated"), "RS256").await;

        assert_eq!(result.unwrap_err(), KeyStoreError::KeyNotFound);
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_miss_picks_up_rotated_key() {
        let source = Arc::new(MockKeySetSource::with_responses(vec![
            Ok(key_set(&["old"])),
            Ok(key_set(&["new"])),
        ]));
        let store = store_with(source.clone());

        store.resolve_key(Some("old"), "RS256").await.unwrap();
        store.resolve_key(Some("new"), "RS256").await.unwrap();

        // Map is replaced wholesale
        assert_eq!(store.key_count().await, 1);
        assert_eq!(
            store.resolve_key(Some("old"), "RS256").await.unwrap_err(),
            KeyStoreError::KeyNotFound
        );
    }

    #[tokio::test]
    async fn test_expired_ttl_triggers_refresh() {
        let source = Arc::new(MockKeySetSource::serving(key_set(&["a"])));
        let store = store_with(source.clone()).with_ttl(Duration::from_millis(20));

        store.resolve_key(Some("a"), "RS256").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!store.is_fresh().await);

        store.resolve_key(Some("a"), "RS256").await.unwrap();
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_cache() {
        let source = Arc::new(MockKeySetSource::with_responses(vec![
            Ok(key_set(&["a", "b"])),
            Err(KeyStoreError::Fetch("connection refused".to_string())),
            Ok(b"{broken".to_vec()),
        ]));
        let store = store_with(source.clone());

        store.refresh().await.unwrap();
        assert!(matches!(
            store.force_refresh().await,
            Err(KeyStoreError::Fetch(_))
        ));
        assert!(matches!(
            store.force_refresh().await,
            Err(KeyStoreError::Document(_))
        ));

        assert_eq!(store.key_count().await, 2);
        assert!(store.resolve_key(Some("b"), "RS256").await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_cache_serves_stale_key_while_idp_down() {
        let source = Arc::new(MockKeySetSource::with_responses(vec![
            Ok(key_set(&["a"])),
            Err(KeyStoreError::Fetch("idp down".to_string())),
        ]));
        let store = store_with(source.clone()).with_ttl(Duration::from_millis(20));

        assert!(store.resolve_key(Some("a"), "RS256").await.is_ok());
        tokio::time::sleep(Duration::from_millis(40)).await;

        let key = store.resolve_key(Some("a"), "RS256").await.unwrap();
        assert!(key.is_rsa());
        assert_eq!(source.fetch_count(), 2);
        assert!(!store.is_fresh().await);

        // A kid the cache never held still fails with the fetch error
        let err = store.resolve_key(Some("b"), "RS256").await.unwrap_err();
        assert_eq!(err, KeyStoreError::Fetch("idp down".to_string()));
    }

    #[tokio::test]
    async fn test_expired_cache_serves_stale_fallback_while_idp_down() {
        let source = Arc::new(MockKeySetSource::with_responses(vec![
            Ok(key_set(&["a"])),
            Err(KeyStoreError::Fetch("idp down".to_string())),
        ]));
        let store = store_with(source.clone()).with_ttl(Duration::from_millis(20));

        store.refresh().await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(store.resolve_key(None, "RS256").await.is_ok());
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_stale_keys_replaced_once_idp_recovers() {
        let source = Arc::new(MockKeySetSource::with_responses(vec![
            Ok(key_set(&["a"])),
            Err(KeyStoreError::Fetch("idp down".to_string())),
            Ok(key_set(&["b"])),
        ]));
        let store = store_with(source.clone()).with_ttl(Duration::from_millis(20));

        store.refresh().await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.resolve_key(Some("a"), "RS256").await.is_ok());

        // Still stale, so the next lookup fetches again and sees the rotation
        assert!(store.resolve_key(Some("b"), "RS256").await.is_ok());
        assert!(store.is_fresh().await);
        assert_eq!(
            store.resolve_key(Some("a"), "RS256").await.unwrap_err(),
            KeyStoreError::KeyNotFound
        );
    }

    #[tokio::test]
    async fn test_fetch_error_surfaces_on_empty_cache() {
        let source = Arc::new(MockKeySetSource::failing(KeyStoreError::Fetch(
            "timeout".to_string(),
        )));
        let store = store_with(source);

        let err = store.resolve_key(Some("a"), "RS256").await.unwrap_err();
        assert_eq!(err, KeyStoreError::Fetch("timeout".to_string()));
    }

    #[tokio::test]
    async fn test_keyless_hs256_uses_shared_secret_without_fetching() {
        let source = Arc::new(MockKeySetSource::serving(key_set(&["a"])));
        let secret = SecretString::from("shared");
        let store = store_with(source.clone()).with_shared_secret(Some(&secret));

        let key = store.resolve_key(None, "HS256").await.unwrap();

        assert!(matches!(key, VerificationKey::SharedSecret(_)));
        assert_eq!(source.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_keyless_hs256_without_secret() {
        let store = store_with(Arc::new(MockKeySetSource::serving(key_set(&["a"]))));

        assert_eq!(
            store.resolve_key(None, "HS256").await.unwrap_err(),
            KeyStoreError::MissingSharedSecret
        );
    }

    #[tokio::test]
    async fn test_keyless_asymmetric_falls_back_to_lowest_kid() {
        let source = Arc::new(MockKeySetSource::serving(key_set(&["zeta", "alpha"])));
        let store = store_with(source.clone());

        let key = store.resolve_key(None, "RS256").await.unwrap();
        assert!(key.is_rsa());
        assert_eq!(source.fetch_count(), 1);

        // Fresh non-empty cache answers without fetching
        store.resolve_key(None, "RS256").await.unwrap();
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_keyless_asymmetric_with_empty_key_set() {
        let source = Arc::new(MockKeySetSource::serving(br#"{"keys": []}"#.to_vec()));
        let store = store_with(source);

        assert_eq!(
            store.resolve_key(None, "RS256").await.unwrap_err(),
            KeyStoreError::NoKeysAvailable
        );
    }

    #[tokio::test]
    async fn test_keyless_asymmetric_rejected_when_kid_required() {
        let source = Arc::new(MockKeySetSource::serving(key_set(&["a"])));
        let store = store_with(source.clone()).with_require_kid_for_asymmetric(true);

        assert_eq!(
            store.resolve_key(None, "RS256").await.unwrap_err(),
            KeyStoreError::KidRequired
        );
        assert_eq!(source.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_kid_is_looked_up() {
        let source = Arc::new(MockKeySetSource::serving(key_set(&["a"])));
        let store = store_with(source);

        assert_eq!(
            store.resolve_key(Some(""), "RS256").await.unwrap_err(),
            KeyStoreError::KeyNotFound
        );
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_fetch() {
        let source = Arc::new(
            MockKeySetSource::serving(key_set(&["a"])).with_delay(Duration::from_millis(50)),
        );
        let store = Arc::new(store_with(source.clone()));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.resolve_key(Some("a"), "RS256").await })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }

        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_waiters_share_failed_fetch() {
        let source = Arc::new(
            MockKeySetSource::failing(KeyStoreError::Fetch("timeout".to_string()))
                .with_delay(Duration::from_millis(50)),
        );
        let store = Arc::new(store_with(source.clone()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.resolve_key(Some("a"), "RS256").await })
            })
            .collect();

        for task in tasks {
            assert!(matches!(
                task.await.unwrap(),
                Err(KeyStoreError::Fetch(_))
            ));
        }

        assert_eq!(source.fetch_count(), 1);

        // The next request after the flight retries
        assert!(store.resolve_key(Some("a"), "RS256").await.is_err());
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_force_refresh_always_fetches() {
        let source = Arc::new(MockKeySetSource::serving(key_set(&["a"])));
        let store = store_with(source.clone());

        store.force_refresh().await.unwrap();
        store.force_refresh().await.unwrap();

        assert_eq!(source.fetch_count(), 2);
        assert_eq!(store.key_count().await, 1);
    }
}
