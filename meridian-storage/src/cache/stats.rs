//! Usage counters for the credential cache.

/// Statistics about credential cache usage.
///
/// Counters are cumulative since cache construction; `entry_count` is a
/// snapshot taken when the statistics are read.
#[derive(Debug, Clone, Default)]
pub struct CredentialCacheStats {
    /// Lookups served from a resident, unexpired entry.
    pub hits: u64,
    /// Lookups that started a vend (no entry, or the entry had expired).
    pub misses: u64,
    /// Lookups that piggybacked on another caller's in-flight vend.
    pub coalesced_waits: u64,
    /// Slots currently resident, in-flight vends included.
    pub entry_count: u64,
    /// Loaded entries removed by the size bound.
    pub evictions: u64,
    /// Entries dropped because their expiration passed.
    pub expirations: u64,
    /// Entries removed by explicit invalidation.
    pub invalidations: u64,
    /// Vends that returned a failure. Failures are never cached, so each
    /// one is counted at most once.
    pub load_failures: u64,
}

impl CredentialCacheStats {
    /// Hit rate over direct lookups, 0.0 to 1.0.
    ///
    /// Coalesced waits count as neither hits nor misses: they are riders on
    /// somebody else's miss.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_empty() {
        let stats = CredentialCacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let stats = CredentialCacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert_eq!(stats.hit_rate(), 0.75);
    }

    #[test]
    fn test_hit_rate_ignores_coalesced_waits() {
        let stats = CredentialCacheStats {
            hits: 1,
            misses: 1,
            coalesced_waits: 100,
            ..Default::default()
        };
        assert_eq!(stats.hit_rate(), 0.5);
    }
}
