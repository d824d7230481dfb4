//! Single-flight cache for vended storage credentials.
//!
//! Every cache key maps to at most one slot. A slot is either a loaded
//! credential or a marker for a vend in flight; lookups that land on an
//! in-flight slot subscribe to its broadcast channel instead of vending
//! again, so a thundering herd of lookups for one scope costs exactly one
//! provider round trip. Vend failures are broadcast to everyone already
//! waiting and then forgotten, never cached.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::watch;

use meridian_core::{
    ConfigError, CredentialError, MeridianError, MeridianResult, ReadinessCheck, ReadinessError,
    StorageCredential, Timestamp,
};

use super::scope_key::CredentialCacheKey;
use super::stats::CredentialCacheStats;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the credential cache.
#[derive(Debug, Clone)]
pub struct CredentialCacheConfig {
    /// Maximum number of loaded entries resident at once. When a vend
    /// completes and the bound is exceeded, least-recently-used loaded
    /// entries are evicted. In-flight slots never count against the bound.
    pub max_entries: usize,
    /// Upper bound on how long any entry stays resident, regardless of the
    /// credential's own validity window.
    pub max_residency: Duration,
}

impl Default for CredentialCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_residency: Duration::minutes(30),
        }
    }
}

impl CredentialCacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_max_residency(mut self, max_residency: Duration) -> Self {
        self.max_residency = max_residency;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> MeridianResult<()> {
        if self.max_entries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_entries".to_string(),
                value: "0".to_string(),
                reason: "must allow at least one resident entry".to_string(),
            }
            .into());
        }
        if self.max_residency <= Duration::zero() {
            return Err(ConfigError::InvalidValue {
                field: "max_residency".to_string(),
                value: format!("{:?}", self.max_residency),
                reason: "must be a positive duration".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Inspect the configuration for production readiness.
    ///
    /// Unlike [`CredentialCacheConfig::validate`], this never fails; it
    /// reports findings, severe ones for configurations that defeat the
    /// cache and advisories for ones that are merely questionable.
    pub fn check_readiness(&self) -> ReadinessCheck {
        let mut errors = Vec::new();
        if self.max_entries == 0 {
            errors.push(ReadinessError::of_severe(
                "Credential caching is disabled; every lookup will vend",
                "max_entries",
            ));
        }
        if self.max_residency <= Duration::zero() {
            errors.push(ReadinessError::of_severe(
                "Vended credentials can never be served from cache",
                "max_residency",
            ));
        } else if self.max_residency > Duration::days(1) {
            errors.push(ReadinessError::of(
                "Credentials may outlive provider rotation schedules",
                "max_residency",
            ));
        }
        ReadinessCheck::of(errors)
    }
}

// ============================================================================
// VENDOR SEAM
// ============================================================================

/// The seam between the cache and a cloud identity provider.
///
/// Implementations mint a subscoped credential for the key's entity and
/// requested permissions, typically one STS or token-broker round trip.
/// Provider failures are reported as [`CredentialError::VendingFailed`].
#[async_trait]
pub trait CredentialVendor: Send + Sync {
    /// Vend a credential scoped to `key`.
    async fn vend(&self, key: &CredentialCacheKey) -> MeridianResult<StorageCredential>;
}

// ============================================================================
// CACHE ENTRIES
// ============================================================================

/// A loaded cache entry: the vended credential plus the instant the cache
/// stops serving it.
///
/// `expires_at` is the earlier of the credential's own validity end and the
/// vend time plus the configured residency bound. Callers that hand the
/// credential on can treat it as the hard deadline for downstream reuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedCredential {
    pub credential: StorageCredential,
    pub expires_at: Timestamp,
}

/// Effective expiration for a vended credential: the provider's declared
/// validity end, capped by the residency bound.
fn effective_expiration(
    declared: Timestamp,
    vended_at: Timestamp,
    max_residency: Duration,
) -> Timestamp {
    declared.min(vended_at + max_residency)
}

/// Broadcast payload delivered to waiters on an in-flight vend.
type VendOutcome = Result<CachedCredential, MeridianError>;

/// Sender half shared between the in-flight slot and the vending caller.
type LoadingHandle = Arc<watch::Sender<Option<VendOutcome>>>;

/// Per-key slot state.
enum Slot {
    /// A vended credential, resident until expiry, eviction, or invalidation.
    Loaded(LoadedEntry),
    /// A vend is in flight; latecomers subscribe to the channel.
    Loading(LoadingHandle),
}

struct LoadedEntry {
    entry: CachedCredential,
    /// Use ordinal for least-recently-used eviction.
    last_used: u64,
}

/// Slot map plus counters, all behind one mutex.
struct CacheState {
    slots: HashMap<CredentialCacheKey, Slot>,
    use_clock: u64,
    stats: CredentialCacheStats,
}

impl CacheState {
    fn new() -> Self {
        Self {
            slots: HashMap::new(),
            use_clock: 0,
            stats: CredentialCacheStats::default(),
        }
    }

    /// Install an in-flight marker for `key` and return the shared sender.
    fn install_loading(&mut self, key: &CredentialCacheKey) -> LoadingHandle {
        let (tx, _rx) = watch::channel(None);
        let handle = Arc::new(tx);
        self.slots
            .insert(key.clone(), Slot::Loading(Arc::clone(&handle)));
        handle
    }

    /// Whether the in-flight marker for `key` is still the given one. False
    /// when the slot was invalidated or replaced while the vend ran.
    fn loading_is(&self, key: &CredentialCacheKey, handle: &LoadingHandle) -> bool {
        matches!(
            self.slots.get(key),
            Some(Slot::Loading(current)) if Arc::ptr_eq(current, handle)
        )
    }

    fn loaded_count(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, Slot::Loaded(_)))
            .count()
    }

    /// Evict least-recently-used loaded entries until at most `max_entries`
    /// remain. In-flight slots are never candidates, so capacity pressure
    /// cannot cancel a vend.
    fn evict_to_capacity(&mut self, max_entries: usize) {
        while self.loaded_count() > max_entries {
            let victim = self
                .slots
                .iter()
                .filter_map(|(key, slot)| match slot {
                    Slot::Loaded(loaded) => Some((key.clone(), loaded.last_used)),
                    Slot::Loading(_) => None,
                })
                .min_by_key(|(_, last_used)| *last_used)
                .map(|(key, _)| key);
            match victim {
                Some(key) => {
                    self.slots.remove(&key);
                    self.stats.evictions += 1;
                }
                None => break,
            }
        }
    }
}

/// What a lookup decided to do, resolved under the state lock.
enum Action {
    /// Fresh entry found; serve it.
    Hit(CachedCredential),
    /// Another caller's vend is in flight; wait for its broadcast.
    Wait(watch::Receiver<Option<VendOutcome>>),
    /// This caller vends and broadcasts through the handle.
    Vend(LoadingHandle),
}

// ============================================================================
// CACHE
// ============================================================================

/// Keyed, time-bounded, single-flight cache for vended storage credentials.
///
/// # Lookup outcomes
///
/// [`CredentialCache::get_or_vend`] resolves to one of three actions under
/// the state lock: serve a resident unexpired entry, subscribe to an
/// in-flight vend for the same scope, or become the vending caller itself.
/// The vendor runs outside the lock; lock hold times stay in the
/// microseconds regardless of provider latency.
///
/// # Expiration
///
/// Entries expire at the earlier of the credential's declared validity end
/// and vend time plus the configured residency bound. Expired entries are
/// dropped lazily on lookup; [`CredentialCache::evict_expired`] sweeps them
/// eagerly for callers that want bounded memory between lookups.
///
/// # Failure semantics
///
/// A failed vend reaches every waiter already subscribed to it, then the
/// slot is removed. Nothing negative is cached; the next lookup retries the
/// provider. If a vending caller is dropped mid-vend, its slot is cleaned
/// up and one of the waiters retries from scratch.
///
/// Share the cache across tasks via `Arc`; all methods take `&self`.
pub struct CredentialCache {
    state: Mutex<CacheState>,
    config: CredentialCacheConfig,
}

impl CredentialCache {
    pub fn new(config: CredentialCacheConfig) -> Self {
        Self {
            state: Mutex::new(CacheState::new()),
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CredentialCacheConfig::default())
    }

    pub fn config(&self) -> &CredentialCacheConfig {
        &self.config
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        // The state is plain owned data; a panicking holder cannot leave it
        // torn, so a poisoned lock is recovered rather than propagated.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the credential for `key`, vending through `vendor` on a miss.
    ///
    /// Concurrent calls for equal keys coalesce into a single vend; every
    /// caller receives the same outcome, success or failure. The vendor is
    /// never invoked while the cache lock is held.
    pub async fn get_or_vend<V: CredentialVendor>(
        &self,
        key: &CredentialCacheKey,
        vendor: &V,
    ) -> MeridianResult<CachedCredential> {
        loop {
            let now = Utc::now();
            let action = {
                let mut guard = self.lock_state();
                let state = &mut *guard;
                state.use_clock += 1;
                let tick = state.use_clock;
                match state.slots.get_mut(key) {
                    Some(Slot::Loaded(loaded)) if now < loaded.entry.expires_at => {
                        loaded.last_used = tick;
                        state.stats.hits += 1;
                        Action::Hit(loaded.entry.clone())
                    }
                    Some(Slot::Loading(handle)) => {
                        state.stats.coalesced_waits += 1;
                        Action::Wait(handle.subscribe())
                    }
                    Some(Slot::Loaded(_)) => {
                        // Expired in place; this caller vends its replacement.
                        state.stats.expirations += 1;
                        state.stats.misses += 1;
                        Action::Vend(state.install_loading(key))
                    }
                    None => {
                        state.stats.misses += 1;
                        Action::Vend(state.install_loading(key))
                    }
                }
            };

            match action {
                Action::Hit(entry) => return Ok(entry),
                Action::Wait(mut rx) => {
                    let outcome = loop {
                        let current = rx.borrow().clone();
                        if let Some(outcome) = current {
                            break Some(outcome);
                        }
                        if rx.changed().await.is_err() {
                            // The vending caller was dropped before it could
                            // broadcast; redo the lookup from scratch.
                            break None;
                        }
                    };
                    match outcome {
                        None => continue,
                        Some(Err(err)) => return Err(err),
                        Some(Ok(entry)) => {
                            if entry.expires_at <= Utc::now() {
                                // The broadcast arrived after the entry's own
                                // expiry; treat it as absent and retry.
                                continue;
                            }
                            return Ok(entry);
                        }
                    }
                }
                Action::Vend(handle) => return self.vend_and_install(key, vendor, handle).await,
            }
        }
    }

    /// Run the vend, install the result, and broadcast it to waiters.
    async fn vend_and_install<V: CredentialVendor>(
        &self,
        key: &CredentialCacheKey,
        vendor: &V,
        handle: LoadingHandle,
    ) -> MeridianResult<CachedCredential> {
        // If this future is dropped mid-vend, the guard clears the in-flight
        // slot so waiters observe channel closure and retry.
        let vend_guard = VendGuard {
            cache: self,
            key,
            handle: Arc::clone(&handle),
            finished: false,
        };

        let vended = vendor.vend(key).await;
        let vended_at = Utc::now();

        let outcome: VendOutcome = match vended {
            Ok(credential) => {
                if credential.is_expired_at(vended_at) {
                    Err(CredentialError::ImmediatelyExpired {
                        expires_at: credential.expires_at,
                        vended_at,
                    }
                    .into())
                } else {
                    let expires_at = effective_expiration(
                        credential.expires_at,
                        vended_at,
                        self.config.max_residency,
                    );
                    Ok(CachedCredential {
                        credential,
                        expires_at,
                    })
                }
            }
            Err(err) => Err(err),
        };

        {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            let still_ours = state.loading_is(key, &handle);
            match &outcome {
                Ok(entry) => {
                    // If the slot was invalidated while the vend ran, the
                    // outcome still reaches the waiters below but is not
                    // installed.
                    if still_ours {
                        state.use_clock += 1;
                        let last_used = state.use_clock;
                        state.slots.insert(
                            key.clone(),
                            Slot::Loaded(LoadedEntry {
                                entry: entry.clone(),
                                last_used,
                            }),
                        );
                        state.evict_to_capacity(self.config.max_entries);
                    }
                }
                Err(_) => {
                    state.stats.load_failures += 1;
                    if still_ours {
                        state.slots.remove(key);
                    }
                }
            }
        }

        vend_guard.finish(&outcome);
        outcome
    }

    /// Remove the entry for `key`, loaded or in flight. Returns whether one
    /// was present.
    ///
    /// Invalidating an in-flight key does not cancel the vend: the vend
    /// completes and its waiters still receive the outcome, but the result
    /// is not installed. The next lookup vends fresh.
    pub fn invalidate(&self, key: &CredentialCacheKey) -> bool {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        let removed = state.slots.remove(key).is_some();
        if removed {
            state.stats.invalidations += 1;
        }
        removed
    }

    /// Remove every entry belonging to `realm_id`, for realm offboarding or
    /// credential revocation. Returns the number of entries removed.
    pub fn invalidate_realm(&self, realm_id: &str) -> u64 {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        let before = state.slots.len();
        state.slots.retain(|key, _| key.realm_id() != realm_id);
        let removed = (before - state.slots.len()) as u64;
        state.stats.invalidations += removed;
        removed
    }

    /// Eagerly drop every loaded entry whose expiration has passed. Returns
    /// the number dropped. In-flight slots are left alone.
    pub fn evict_expired(&self) -> u64 {
        let now = Utc::now();
        let mut guard = self.lock_state();
        let state = &mut *guard;
        let before = state.slots.len();
        state.slots.retain(|_, slot| match slot {
            Slot::Loaded(loaded) => now < loaded.entry.expires_at,
            Slot::Loading(_) => true,
        });
        let removed = (before - state.slots.len()) as u64;
        state.stats.expirations += removed;
        removed
    }

    /// Drop every slot, in-flight markers included. Vends already running
    /// still complete and reach their waiters, but their results are not
    /// installed.
    pub fn clear(&self) {
        self.lock_state().slots.clear();
    }

    /// Number of slots currently resident, in-flight vends included.
    pub fn len(&self) -> usize {
        self.lock_state().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of usage counters.
    pub fn stats(&self) -> CredentialCacheStats {
        let state = self.lock_state();
        let mut stats = state.stats.clone();
        stats.entry_count = state.slots.len() as u64;
        stats
    }
}

impl fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("CredentialCache")
            .field("entries", &state.slots.len())
            .field("max_entries", &self.config.max_entries)
            .field("max_residency", &self.config.max_residency)
            .finish()
    }
}

/// Removes the in-flight slot if the vending caller is dropped before it
/// broadcasts. Dropping the slot's sender closes the channel, which sends
/// waiters back to a fresh lookup where one of them becomes the new vendor.
struct VendGuard<'a> {
    cache: &'a CredentialCache,
    key: &'a CredentialCacheKey,
    handle: LoadingHandle,
    finished: bool,
}

impl VendGuard<'_> {
    /// Broadcast the outcome and disarm the guard.
    fn finish(mut self, outcome: &VendOutcome) {
        let _ = self.handle.send(Some(outcome.clone()));
        self.finished = true;
    }
}

impl Drop for VendGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut guard = self.cache.lock_state();
        let state = &mut *guard;
        if state.loading_is(self.key, &self.handle) {
            state.slots.remove(self.key);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
