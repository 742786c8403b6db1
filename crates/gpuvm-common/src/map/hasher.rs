use core::hash::{BuildHasher, Hash};

/// 2^31 + 2^29 - 2^25 + 2^22 - 2^19 - 2^16 + 1
pub const GOLDEN_RATIO_PRIME_32: u32 = 0x9e37_0001;

/// 2^63 + 2^61 - 2^57 + 2^54 - 2^51 - 2^18 + 1
pub const GOLDEN_RATIO_PRIME_64: u64 = 0x9e37_ffff_fffc_0001;

/// Maps a key to the 32-bit hash cached in every [OpenMap](super::OpenMap) slot.
///
/// Equality comes from the key's [Eq] implementation; the hasher only has to be
/// consistent with it.
pub trait MapHasher<K: ?Sized> {
    /// Hash the given key.
    fn hash(&self, key: &K) -> u32;
}

/// Multiplicative hash for small integer keys such as object handles.
///
/// 64-bit keys are truncated to their low 32 bits before mixing, which suits
/// monotonically increasing counters.
#[derive(Default, Debug, Clone, Copy)]
pub struct GoldenRatio32;

impl MapHasher<u32> for GoldenRatio32 {
    fn hash(&self, key: &u32) -> u32 {
        key.wrapping_mul(GOLDEN_RATIO_PRIME_32)
    }
}

impl MapHasher<u64> for GoldenRatio32 {
    fn hash(&self, key: &u64) -> u32 {
        (*key as u32).wrapping_mul(GOLDEN_RATIO_PRIME_32)
    }
}

/// Multiplicative hash for 64-bit keys such as address offsets.
#[derive(Default, Debug, Clone, Copy)]
pub struct GoldenRatio64;

impl MapHasher<u64> for GoldenRatio64 {
    fn hash(&self, key: &u64) -> u32 {
        // High bits are more random, so use them.
        (key.wrapping_mul(GOLDEN_RATIO_PRIME_64) >> 32) as u32
    }
}

/// Hashes any [Hash] key with a fixed-seed foldhash, so hashes are reproducible
/// between runs.
#[derive(Default, Debug, Clone, Copy)]
pub struct FoldHasher;

impl<K: Hash + ?Sized> MapHasher<K> for FoldHasher {
    fn hash(&self, key: &K) -> u32 {
        let hash = foldhash::fast::FixedState::with_seed(0).hash_one(key);
        (hash ^ (hash >> 32)) as u32
    }
}
