//! Credential caching for Meridian storage access
//!
//! # Design Philosophy
//!
//! Vending a subscoped storage credential means a round trip to a cloud
//! identity provider, so results are cached and concurrent requests for the
//! same scope are collapsed into one vend. Three rules shape the design:
//!
//! 1. **Scope is identity**: two lookups share an entry exactly when their
//!    realm, catalog, storage configuration, and requested permissions all
//!    match. The entity that triggered the lookup is deliberately not part
//!    of identity.
//! 2. **Single-flight**: at most one vend per key is in flight at a time.
//!    Latecomers subscribe to the in-flight result instead of dialing the
//!    provider again.
//! 3. **Failures are never cached**: a failed vend is broadcast to everyone
//!    already waiting on it, then forgotten. The next lookup retries.
//!
//! # Tenant Isolation
//!
//! Every key carries a realm id, so credentials vended for one tenant can
//! never be served to another. [`CredentialCache::invalidate_realm`] drops a
//! whole tenant's entries at once, for realm offboarding or credential
//! revocation.
//!
//! # Example
//!
//! ```ignore
//! let cache = CredentialCache::new(CredentialCacheConfig::default());
//! let key = CredentialCacheKey::new(realm_id, &table, true, read_locs, write_locs)?;
//! let vended = cache.get_or_vend(&key, &vendor).await?;
//! ```

pub mod scope_key;
pub mod stats;
pub mod vending;

pub use scope_key::CredentialCacheKey;
pub use stats::CredentialCacheStats;
pub use vending::{CachedCredential, CredentialCache, CredentialCacheConfig, CredentialVendor};
