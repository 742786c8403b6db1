pub use rand::{Rng, SeedableRng, rngs::SmallRng};

use rand::distr::StandardUniform;
use rand::prelude::Distribution;

/// Returns a reproducible random number generator for the given seed.
#[inline(always)]
pub fn get_fixed_rng(seed: u64) -> SmallRng {
    SmallRng::seed_from_u64(seed)
}

/// Generates random data from a thread-local RNG.
#[inline]
pub fn gen_random<T>() -> T
where
    StandardUniform: Distribution<T>,
{
    rand::rng().random()
}
