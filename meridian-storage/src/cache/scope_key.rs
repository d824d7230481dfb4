//! Credential-scope cache key with entity-independent identity.
//!
//! The key insight is that a vended credential is reusable by every lookup
//! that shares a realm, catalog, storage configuration, and permission scope.
//! Identity is therefore a strict projection of the key's fields: the entity
//! id rides along so a cache miss can vend for the right entity, but it never
//! participates in equality or hashing. Two tables under the same storage
//! configuration asking for the same access share one cache entry.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use meridian_core::{
    storage_config_fingerprint, CatalogEntity, CatalogId, EntityId, KeyError, MeridianResult,
};

/// Cache key for vended storage credentials.
///
/// Construction derives the catalog id, entity id, and serialized storage
/// configuration from the entity, so a key can only exist for entities that
/// actually carry a storage configuration. Fields are private and the key
/// owns its location sets; once constructed, nothing can mutate it.
#[derive(Debug, Clone, Eq)]
pub struct CredentialCacheKey {
    realm_id: String,
    catalog_id: CatalogId,
    /// Full serialized storage configuration. Compared verbatim; two configs
    /// that differ only in key order are distinct scopes.
    storage_config: String,
    /// The entity the lookup was issued for. Carried for the vend call on a
    /// miss, excluded from identity.
    entity_id: EntityId,
    allowed_list_action: bool,
    allowed_read_locations: BTreeSet<String>,
    allowed_write_locations: BTreeSet<String>,
}

impl CredentialCacheKey {
    /// Build a key for `entity` within `realm_id`, scoped to the given
    /// permissions.
    ///
    /// Fails with [`KeyError::EmptyRealmId`] when the realm id is empty and
    /// with [`KeyError::MissingStorageConfig`] when the entity has no
    /// serialized storage configuration property.
    pub fn new(
        realm_id: String,
        entity: &CatalogEntity,
        allowed_list_action: bool,
        allowed_read_locations: BTreeSet<String>,
        allowed_write_locations: BTreeSet<String>,
    ) -> MeridianResult<Self> {
        if realm_id.is_empty() {
            return Err(KeyError::EmptyRealmId.into());
        }
        let storage_config = entity
            .storage_config()
            .ok_or(KeyError::MissingStorageConfig {
                entity_id: entity.id,
            })?
            .to_string();
        Ok(Self {
            realm_id,
            catalog_id: entity.catalog_id,
            storage_config,
            entity_id: entity.id,
            allowed_list_action,
            allowed_read_locations,
            allowed_write_locations,
        })
    }

    /// The tenant realm this key is scoped to.
    pub fn realm_id(&self) -> &str {
        &self.realm_id
    }

    /// The catalog the entity lives in.
    pub fn catalog_id(&self) -> CatalogId {
        self.catalog_id
    }

    /// The full serialized storage configuration.
    pub fn storage_config(&self) -> &str {
        &self.storage_config
    }

    /// Short hex fingerprint of the storage configuration, for diagnostics.
    pub fn storage_config_fingerprint(&self) -> String {
        storage_config_fingerprint(&self.storage_config)
    }

    /// The entity the lookup was issued for. Not part of identity.
    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    /// Whether listing is within the requested scope.
    pub fn allowed_list_action(&self) -> bool {
        self.allowed_list_action
    }

    /// Storage locations readable under the requested scope.
    pub fn allowed_read_locations(&self) -> &BTreeSet<String> {
        &self.allowed_read_locations
    }

    /// Storage locations writable under the requested scope.
    pub fn allowed_write_locations(&self) -> &BTreeSet<String> {
        &self.allowed_write_locations
    }
}

// Identity is the projection onto every field except entity_id. Hash must
// stay in lockstep: each field compared here is hashed below, nothing else.
impl PartialEq for CredentialCacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.realm_id == other.realm_id
            && self.catalog_id == other.catalog_id
            && self.storage_config == other.storage_config
            && self.allowed_list_action == other.allowed_list_action
            && self.allowed_read_locations == other.allowed_read_locations
            && self.allowed_write_locations == other.allowed_write_locations
    }
}

impl Hash for CredentialCacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.realm_id.hash(state);
        self.catalog_id.hash(state);
        self.storage_config.hash(state);
        self.allowed_list_action.hash(state);
        self.allowed_read_locations.hash(state);
        self.allowed_write_locations.hash(state);
    }
}

impl fmt::Display for CredentialCacheKey {
    /// Compact one-line form for diagnostics. Shows the configuration
    /// fingerprint rather than the raw configuration, which may embed
    /// account identifiers.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "credential-scope realm={} catalog={} entity={} config#{} list={} read={} write={}",
            self.realm_id,
            self.catalog_id,
            self.entity_id,
            self.storage_config_fingerprint(),
            self.allowed_list_action,
            self.allowed_read_locations.len(),
            self.allowed_write_locations.len(),
        )
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use meridian_core::EntityKind;
    use proptest::prelude::*;
    use std::collections::hash_map::DefaultHasher;

    /// Strategy to generate realm identifiers.
    fn realm_strategy() -> impl Strategy<Value = String> {
        "[a-z]{1,4}-[0-9]{1,4}"
    }

    /// Strategy to generate serialized storage configurations.
    fn config_strategy() -> impl Strategy<Value = String> {
        "[a-z]{3,12}".prop_map(|bucket| {
            serde_json::json!({"provider": "aws", "bucket": bucket}).to_string()
        })
    }

    /// Strategy to generate storage location sets.
    fn location_set_strategy() -> impl Strategy<Value = BTreeSet<String>> {
        prop::collection::btree_set("s3://[a-z]{1,8}/", 0..4)
    }

    /// The non-entity fields a key's identity is built from.
    type Scope = (String, CatalogId, String, bool, BTreeSet<String>, BTreeSet<String>);

    fn scope_strategy() -> impl Strategy<Value = Scope> {
        (
            realm_strategy(),
            1i64..100,
            config_strategy(),
            any::<bool>(),
            location_set_strategy(),
            location_set_strategy(),
        )
    }

    fn key_from_scope(scope: &Scope, entity_id: EntityId) -> CredentialCacheKey {
        let (realm, catalog_id, config, list, read, write) = scope;
        let entity = CatalogEntity::new(entity_id, *catalog_id, EntityKind::Table, "t".to_string())
            .with_storage_config(config.clone());
        CredentialCacheKey::new(
            realm.clone(),
            &entity,
            *list,
            read.clone(),
            write.clone(),
        )
        .expect("generated scopes are valid")
    }

    fn hash_of(key: &CredentialCacheKey) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(1000))]

        /// Keys built from the same scope SHALL be equal and hash-equal no
        /// matter which entity triggered them.
        #[test]
        fn prop_entity_id_never_affects_identity(
            scope in scope_strategy(),
            entity_a in 1i64..1_000_000,
            entity_b in 1i64..1_000_000,
        ) {
            let key_a = key_from_scope(&scope, entity_a);
            let key_b = key_from_scope(&scope, entity_b);

            prop_assert_eq!(&key_a, &key_b);
            prop_assert_eq!(hash_of(&key_a), hash_of(&key_b));
        }

        /// Two keys SHALL be equal exactly when their scope projections are
        /// equal.
        #[test]
        fn prop_identity_is_the_scope_projection(
            scope_a in scope_strategy(),
            scope_b in scope_strategy(),
            entity_a in 1i64..1_000_000,
            entity_b in 1i64..1_000_000,
        ) {
            let key_a = key_from_scope(&scope_a, entity_a);
            let key_b = key_from_scope(&scope_b, entity_b);

            prop_assert_eq!(key_a == key_b, scope_a == scope_b);
        }

        /// Equal keys SHALL have equal hashes.
        #[test]
        fn prop_hash_consistent_with_eq(
            scope_a in scope_strategy(),
            scope_b in scope_strategy(),
        ) {
            let key_a = key_from_scope(&scope_a, 1);
            let key_b = key_from_scope(&scope_b, 2);

            if key_a == key_b {
                prop_assert_eq!(hash_of(&key_a), hash_of(&key_b));
            }
        }

        /// Cloning SHALL preserve identity and the Display form.
        #[test]
        fn prop_clone_preserves_identity(scope in scope_strategy(), entity in 1i64..1_000_000) {
            let key = key_from_scope(&scope, entity);
            let cloned = key.clone();

            prop_assert_eq!(&key, &cloned);
            prop_assert_eq!(hash_of(&key), hash_of(&cloned));
            prop_assert_eq!(key.to_string(), cloned.to_string());
        }
    }
}
