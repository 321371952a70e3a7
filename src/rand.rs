use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Deterministic single-bit generator used for randomized tie-breaking.
///
/// Median selection needs an unbiased coin for two decisions: which of the
/// two central windows to keep when the trim excess is odd, and which of the
/// two central elements is "the" median of an even-sized sample. The bits are
/// drawn from a seeded generator and cached 64 at a time, so repeated flips
/// cost one RNG invocation per 64 decisions.
///
/// Reproducibility contract: two `BitSource`s built with `derived` from the
/// same `(seed, rank, round)` produce the same bit sequence. Tests rely on
/// this; the protocols themselves only need the bits to be unbiased.
pub struct BitSource {
    rng: StdRng,
    cache: u64,
    remaining: u32,
}

impl BitSource {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            cache: 0,
            remaining: 0,
        }
    }

    /// Seed derived from a base seed plus the caller's rank and round, so
    /// every participant owns an independent deterministic stream.
    pub fn derived(seed: u64, rank: usize, round: usize) -> Self {
        let mixed = seed
            ^ (rank as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15)
            ^ (round as u64).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        Self::new(mixed)
    }

    /// Returns 0 or 1.
    pub fn next_bit(&mut self) -> u64 {
        if self.remaining == 0 {
            self.cache = self.rng.random::<u64>();
            self.remaining = 64;
        }
        let bit = self.cache & 1;
        self.cache >>= 1;
        self.remaining -= 1;
        bit
    }
}
