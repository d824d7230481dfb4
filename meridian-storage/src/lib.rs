//! # MERIDIAN Storage - Credential Cache Layer
//!
//! Storage-access support for the Meridian data catalog. The centerpiece is a
//! keyed, single-flight cache for vended storage credentials: subscoped cloud
//! credentials are expensive to mint and safe to share across callers whose
//! requested scope is identical, so the cache deduplicates concurrent vends
//! and bounds how long any credential stays resident.
//!
//! ## Architecture
//!
//! - `cache::scope_key` - cache key whose identity is the permission scope,
//!   not the entity that triggered the lookup
//! - `cache::vending` - the single-flight cache, its configuration, and the
//!   [`CredentialVendor`] seam implemented by provider integrations
//! - `cache::stats` - usage counters exposed for diagnostics

pub mod cache;

pub use cache::{
    CachedCredential, CredentialCache, CredentialCacheConfig, CredentialCacheKey,
    CredentialCacheStats, CredentialVendor,
};
