//! MERIDIAN Core - Catalog Domain Types
//!
//! Pure data types shared by every Meridian crate: the catalog entity slice,
//! vended credential values, the error taxonomy, and readiness checks.
//! This crate contains ONLY data types - no business logic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

// ============================================================================
// IDENTITY TYPES (Task 1.1)
// ============================================================================

/// Catalog entity identifier. Assigned by the metastore id sequence.
pub type EntityId = i64;

/// Catalog identifier within a realm.
pub type CatalogId = i64;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Compute a short hex fingerprint of a serialized storage configuration.
///
/// Storage configurations embed account and role identifiers and can run to
/// kilobytes, so diagnostics carry this 16-character fingerprint instead of
/// the raw string. Never use the fingerprint as an identity: only the full
/// serialized configuration participates in equality.
pub fn storage_config_fingerprint(serialized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

// ============================================================================
// ENUMS (Task 1.2)
// ============================================================================

/// Entity kind discriminator for catalog tree nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Catalog,
    Namespace,
    Table,
    View,
}

// ============================================================================
// CORE ENTITY STRUCTS (Task 1.3)
// ============================================================================

/// A node of the catalog tree (catalog, namespace, table, or view).
///
/// This is the slice of the metastore entity model the storage layer needs:
/// identity, placement within a catalog, and the internal property map that
/// carries the serialized storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntity {
    pub id: EntityId,
    pub catalog_id: CatalogId,
    pub parent_id: Option<EntityId>,
    pub kind: EntityKind,
    pub name: String,
    /// Catalog-managed properties, never user-set. The serialized storage
    /// configuration lives here under [`CatalogEntity::STORAGE_CONFIG_PROPERTY`].
    pub internal_properties: HashMap<String, String>,
    pub created_at: Timestamp,
    pub metadata: Option<serde_json::Value>,
}

impl CatalogEntity {
    /// Internal property key holding the serialized storage configuration.
    pub const STORAGE_CONFIG_PROPERTY: &'static str = "storage-config-info";

    /// Create a new entity with an empty internal property map.
    pub fn new(id: EntityId, catalog_id: CatalogId, kind: EntityKind, name: String) -> Self {
        Self {
            id,
            catalog_id,
            parent_id: None,
            kind,
            name,
            internal_properties: HashMap::new(),
            created_at: Utc::now(),
            metadata: None,
        }
    }

    /// Set an internal property.
    pub fn with_internal_property(mut self, key: String, value: String) -> Self {
        self.internal_properties.insert(key, value);
        self
    }

    /// Set the serialized storage configuration property.
    pub fn with_storage_config(self, serialized: String) -> Self {
        self.with_internal_property(Self::STORAGE_CONFIG_PROPERTY.to_string(), serialized)
    }

    /// The serialized storage configuration, if this entity has one.
    pub fn storage_config(&self) -> Option<&str> {
        self.internal_properties
            .get(Self::STORAGE_CONFIG_PROPERTY)
            .map(String::as_str)
    }
}

// ============================================================================
// CREDENTIALS (Task 1.4)
// ============================================================================

/// A temporary storage credential vended by a cloud identity provider.
///
/// The claim set is opaque to Meridian: providers populate whatever their
/// object store needs (access key ids, session tokens, signed headers). The
/// only field Meridian interprets is `expires_at`, the provider's declared
/// validity end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageCredential {
    /// Provider-specific claims.
    pub claims: BTreeMap<String, String>,
    /// When the provider says these claims stop working.
    pub expires_at: Timestamp,
}

impl StorageCredential {
    /// Create a new credential.
    pub fn new(claims: BTreeMap<String, String>, expires_at: Timestamp) -> Self {
        Self { claims, expires_at }
    }

    /// Look up a single claim by name.
    pub fn claim(&self, name: &str) -> Option<&str> {
        self.claims.get(name).map(String::as_str)
    }

    /// Whether the provider-declared validity window has ended at `now`.
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }
}

// ============================================================================
// ERROR TYPES (Task 1.5)
// ============================================================================

/// Cache key construction errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("Realm id must not be empty")]
    EmptyRealmId,

    #[error("Entity {entity_id} has no storage configuration property")]
    MissingStorageConfig { entity_id: EntityId },
}

/// Credential vending errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Credential vending failed for entity {entity_id}: {reason}")]
    VendingFailed { entity_id: EntityId, reason: String },

    #[error("Vended credential expired at {expires_at}, before it could be served (vended at {vended_at})")]
    ImmediatelyExpired {
        expires_at: Timestamp,
        vended_at: Timestamp,
    },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Meridian errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MeridianError {
    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for Meridian operations.
pub type MeridianResult<T> = Result<T, MeridianError>;

// ============================================================================
// READINESS CHECKS (Task 1.6)
// ============================================================================

/// A single finding from a production-readiness inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessError {
    /// Human-readable description of the problem.
    pub message: String,
    /// The configuration property the finding is about.
    pub offending_property: String,
    /// Severe findings block production deployment; non-severe ones are advisories.
    pub severe: bool,
}

impl ReadinessError {
    /// An advisory finding.
    pub fn of(message: impl Into<String>, offending_property: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            offending_property: offending_property.into(),
            severe: false,
        }
    }

    /// A finding that blocks production deployment.
    pub fn of_severe(message: impl Into<String>, offending_property: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            offending_property: offending_property.into(),
            severe: true,
        }
    }
}

/// Aggregated readiness findings for a component's configuration.
///
/// Components report zero or more [`ReadinessError`] records; the component
/// is ready exactly when no records were reported. Validation happens before
/// construction, so a running component never re-checks its own config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessCheck {
    errors: Vec<ReadinessError>,
}

impl ReadinessCheck {
    /// A check that found nothing wrong.
    pub fn ok() -> Self {
        Self::default()
    }

    /// A check carrying the given findings.
    pub fn of(errors: Vec<ReadinessError>) -> Self {
        Self { errors }
    }

    /// Ready means no findings at all, advisories included.
    pub fn ready(&self) -> bool {
        self.errors.is_empty()
    }

    /// Whether any finding blocks production deployment.
    pub fn severe(&self) -> bool {
        self.errors.iter().any(|e| e.severe)
    }

    /// All findings, in report order.
    pub fn errors(&self) -> &[ReadinessError] {
        &self.errors
    }
}

// ============================================================================
// TESTS
// ============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
