//! Runtime configuration for the trie.
//!
//! All tuning knobs live in a single [`TrieConfig`] record passed at
//! construction instead of a stack of type parameters. The two knobs that
//! genuinely change behavior rather than layout — the hasher and the key
//! comparator — stay type parameters on the containers so they can be
//! zero-sized and inlined.

/// Width of an unsigned integer field embedded in bucket storage.
///
/// Used for both the per-entry key-length field (capping the key length)
/// and the per-entry value-index field (capping the number of elements a
/// single hash node can hold).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeWidth {
    /// 8-bit field.
    U8,
    /// 16-bit field, the default.
    U16,
    /// 32-bit field.
    U32,
    /// 64-bit field.
    U64,
}

impl SizeWidth {
    /// Number of bytes the field occupies in bucket storage.
    #[inline]
    pub(crate) fn bytes(self) -> usize {
        match self {
            SizeWidth::U8 => 1,
            SizeWidth::U16 => 2,
            SizeWidth::U32 => 4,
            SizeWidth::U64 => 8,
        }
    }

    /// Largest value representable in the field.
    #[inline]
    pub(crate) fn max_value(self) -> u64 {
        match self {
            SizeWidth::U8 => u8::MAX as u64,
            SizeWidth::U16 => u16::MAX as u64,
            SizeWidth::U32 => u32::MAX as u64,
            SizeWidth::U64 => u64::MAX,
        }
    }

    #[inline]
    pub(crate) fn to_tag(self) -> u8 {
        self.bytes() as u8
    }

    #[inline]
    pub(crate) fn from_tag(tag: u8) -> Option<SizeWidth> {
        match tag {
            1 => Some(SizeWidth::U8),
            2 => Some(SizeWidth::U16),
            4 => Some(SizeWidth::U32),
            8 => Some(SizeWidth::U64),
            _ => None,
        }
    }
}

/// Bucket-count discipline for the array-hash tables backing the leaves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GrowthPolicy {
    /// Bucket counts are powers of two; the bucket for a hash is selected
    /// by masking. `growth_factor` must be a power of two `>= 2`.
    PowerOfTwo {
        /// Multiplier applied when the table grows.
        growth_factor: u32,
    },
    /// Arbitrary bucket counts; the bucket for a hash is selected by
    /// modulo. Slower than masking but spreads poor hash functions better.
    Modulo,
}

impl GrowthPolicy {
    /// Smallest bucket count this policy accepts that is `>= minimum`.
    #[inline]
    pub(crate) fn initial_bucket_count(self, minimum: usize) -> usize {
        match self {
            GrowthPolicy::PowerOfTwo { .. } => minimum.max(2).next_power_of_two(),
            GrowthPolicy::Modulo => minimum.max(1),
        }
    }

    #[inline]
    pub(crate) fn bucket_for_hash(self, hash: u64, bucket_count: usize) -> usize {
        debug_assert!(bucket_count > 0);
        match self {
            GrowthPolicy::PowerOfTwo { .. } => {
                debug_assert!(bucket_count.is_power_of_two());
                (hash as usize) & (bucket_count - 1)
            }
            GrowthPolicy::Modulo => (hash % bucket_count as u64) as usize,
        }
    }

    #[inline]
    pub(crate) fn next_bucket_count(self, current: usize) -> usize {
        match self {
            GrowthPolicy::PowerOfTwo { growth_factor } => {
                current.saturating_mul(growth_factor as usize)
            }
            GrowthPolicy::Modulo => current.saturating_mul(2),
        }
    }

    #[inline]
    pub(crate) fn to_tag(self) -> (u8, u8) {
        match self {
            GrowthPolicy::PowerOfTwo { growth_factor } => (0, growth_factor.trailing_zeros() as u8),
            GrowthPolicy::Modulo => (1, 0),
        }
    }

    #[inline]
    pub(crate) fn from_tag(tag: u8, factor_log2: u8) -> Option<GrowthPolicy> {
        match tag {
            0 if factor_log2 >= 1 && factor_log2 < 32 => Some(GrowthPolicy::PowerOfTwo {
                growth_factor: 1 << factor_log2,
            }),
            1 => Some(GrowthPolicy::Modulo),
            _ => None,
        }
    }
}

impl Default for GrowthPolicy {
    #[inline]
    fn default() -> Self {
        GrowthPolicy::PowerOfTwo { growth_factor: 4 }
    }
}

/// Configuration record for [`TrieMap`](crate::TrieMap) and
/// [`TrieSet`](crate::TrieSet).
///
/// Obtained from [`TrieConfig::new`] (or `Default`) and refined with the
/// builder-style setters:
///
/// ```rust
/// use hat_trie::{TrieConfig, TrieMap};
///
/// let config = TrieConfig::new().burst_threshold(1024).max_load_factor(4.0);
/// let map: TrieMap<u64> = TrieMap::with_config(config);
/// assert_eq!(map.burst_threshold(), 1024);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct TrieConfig {
    pub(crate) burst_threshold: usize,
    pub(crate) max_load_factor: f32,
    pub(crate) store_null_terminator: bool,
    pub(crate) key_size: SizeWidth,
    pub(crate) index_size: SizeWidth,
    pub(crate) growth_policy: GrowthPolicy,
}

impl TrieConfig {
    /// Number of elements past which a hash node is burst into a trie node
    /// on the next insertion.
    pub const DEFAULT_BURST_THRESHOLD: usize = 16_384;

    /// Smallest accepted burst threshold.
    pub const MIN_BURST_THRESHOLD: usize = 4;

    /// Load factor past which a hash node's table is rehashed.
    pub const DEFAULT_MAX_LOAD_FACTOR: f32 = 8.0;

    /// The default configuration: burst threshold 16 384, max load factor
    /// 8.0, 16-bit key lengths and value indices, power-of-two bucket
    /// growth with factor 4, no null-terminator storage.
    #[inline]
    pub fn new() -> TrieConfig {
        TrieConfig {
            burst_threshold: Self::DEFAULT_BURST_THRESHOLD,
            max_load_factor: Self::DEFAULT_MAX_LOAD_FACTOR,
            store_null_terminator: false,
            key_size: SizeWidth::U16,
            index_size: SizeWidth::U16,
            growth_policy: GrowthPolicy::default(),
        }
    }

    /// Sets the burst threshold. Values below
    /// [`MIN_BURST_THRESHOLD`](Self::MIN_BURST_THRESHOLD) are clamped up.
    #[inline]
    pub fn burst_threshold(mut self, threshold: usize) -> TrieConfig {
        self.burst_threshold = threshold.max(Self::MIN_BURST_THRESHOLD);
        self
    }

    /// Sets the maximum load factor of the leaf hash tables. Must be
    /// positive.
    #[inline]
    pub fn max_load_factor(mut self, max_load_factor: f32) -> TrieConfig {
        assert!(max_load_factor > 0.0, "max_load_factor must be positive");
        self.max_load_factor = max_load_factor;
        self
    }

    /// Reserves one extra byte per stored key so that key bytes inside the
    /// buckets are always followed by a zero byte.
    ///
    /// This lowers [`max_key_size`](crate::TrieMap::max_key_size) by one
    /// and slightly increases memory use; it exists for callers that hand
    /// key pointers to C APIs expecting null-terminated strings.
    #[inline]
    pub fn store_null_terminator(mut self, store: bool) -> TrieConfig {
        self.store_null_terminator = store;
        self
    }

    /// Sets the width of the per-entry key-length field, which caps the
    /// key length (see [`max_key_size`](crate::TrieMap::max_key_size)).
    #[inline]
    pub fn key_size(mut self, width: SizeWidth) -> TrieConfig {
        self.key_size = width;
        self
    }

    /// Sets the width of the per-entry value-index field, which caps the
    /// number of elements a single hash node can hold.
    #[inline]
    pub fn index_size(mut self, width: SizeWidth) -> TrieConfig {
        self.index_size = width;
        self
    }

    /// Sets the bucket-count growth policy of the leaf hash tables.
    ///
    /// # Panics
    ///
    /// Panics if a [`GrowthPolicy::PowerOfTwo`] factor is not a power of
    /// two `>= 2`.
    #[inline]
    pub fn growth_policy(mut self, policy: GrowthPolicy) -> TrieConfig {
        if let GrowthPolicy::PowerOfTwo { growth_factor } = policy {
            assert!(
                growth_factor >= 2 && growth_factor.is_power_of_two(),
                "growth_factor must be a power of two >= 2"
            );
        }
        self.growth_policy = policy;
        self
    }
}

impl Default for TrieConfig {
    #[inline]
    fn default() -> Self {
        TrieConfig::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_threshold_clamped() {
        let config = TrieConfig::new().burst_threshold(0);
        assert_eq!(config.burst_threshold, TrieConfig::MIN_BURST_THRESHOLD);

        let config = TrieConfig::new().burst_threshold(100);
        assert_eq!(config.burst_threshold, 100);
    }

    #[test]
    fn test_power_of_two_policy() {
        let policy = GrowthPolicy::PowerOfTwo { growth_factor: 2 };
        assert_eq!(policy.initial_bucket_count(0), 2);
        assert_eq!(policy.initial_bucket_count(3), 4);
        assert_eq!(policy.initial_bucket_count(32), 32);
        assert_eq!(policy.next_bucket_count(32), 64);
        assert_eq!(policy.bucket_for_hash(0x1234, 16), 0x4);
    }

    #[test]
    fn test_modulo_policy() {
        let policy = GrowthPolicy::Modulo;
        assert_eq!(policy.initial_bucket_count(0), 1);
        assert_eq!(policy.initial_bucket_count(7), 7);
        assert_eq!(policy.next_bucket_count(7), 14);
        assert_eq!(policy.bucket_for_hash(22, 7), 1);
    }

    #[test]
    fn test_growth_policy_tags_round_trip() {
        for policy in [
            GrowthPolicy::PowerOfTwo { growth_factor: 2 },
            GrowthPolicy::PowerOfTwo { growth_factor: 4 },
            GrowthPolicy::Modulo,
        ] {
            let (tag, factor) = policy.to_tag();
            assert_eq!(GrowthPolicy::from_tag(tag, factor), Some(policy));
        }
        assert_eq!(GrowthPolicy::from_tag(7, 0), None);
    }

    #[test]
    #[should_panic(expected = "growth_factor")]
    fn test_growth_policy_rejects_non_power_of_two() {
        let _ = TrieConfig::new().growth_policy(GrowthPolicy::PowerOfTwo { growth_factor: 3 });
    }
}
