//! Seeded linear-congruential PRNG and Fisher-Yates shuffle.
//!
//! Both distributors shuffle with this generator instead of a general purpose
//! RNG so that plans are bit-for-bit reproducible across runs and platforms.

/// Seed used for difficulty sequences.
pub const DIFFICULTY_SEED: u64 = 123;

/// Seed used for worked-example sequences.
pub const EXAMPLE_SEED: u64 = 42;

const MULTIPLIER: u64 = 9301;
const INCREMENT: u64 = 49297;
const MODULUS: u64 = 233_280;

/// `seed = (seed * 9301 + 49297) mod 233280`, yielding values in `[0, 1)`.
#[derive(Debug, Clone)]
pub struct SeededRng {
    state: u64,
}

impl SeededRng {
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed % MODULUS,
        }
    }

    pub fn next_f64(&mut self) -> f64 {
        self.state = (self.state * MULTIPLIER + INCREMENT) % MODULUS;
        self.state as f64 / MODULUS as f64
    }

    /// Uniform index in `0..bound`. `bound` must be non-zero.
    pub fn next_index(&mut self, bound: usize) -> usize {
        let idx = (self.next_f64() * bound as f64).floor() as usize;
        idx.min(bound - 1)
    }
}

/// Shuffle in place, walking from the back: `j = floor(r * (i + 1))`.
pub fn seeded_shuffle<T>(items: &mut [T], seed: u64) {
    let mut rng = SeededRng::new(seed);
    for i in (1..items.len()).rev() {
        let j = rng.next_index(i + 1);
        items.swap(i, j);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recurrence_matches_reference_values() {
        let mut rng = SeededRng::new(42);
        // (42 * 9301 + 49297) % 233280 = 206659
        assert!((rng.next_f64() - 206_659.0 / 233_280.0).abs() < 1e-12);
        // (206659 * 9301 + 49297) % 233280 = 190736
        assert!((rng.next_f64() - 190_736.0 / 233_280.0).abs() < 1e-12);
    }

    #[test]
    fn values_stay_in_unit_interval() {
        let mut rng = SeededRng::new(DIFFICULTY_SEED);
        for _ in 0..10_000 {
            let v = rng.next_f64();
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let mut items: Vec<u32> = (0..50).collect();
        seeded_shuffle(&mut items, EXAMPLE_SEED);
        let mut sorted = items.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..50).collect::<Vec<_>>());
        assert_ne!(items, sorted, "50 elements should not survive unshuffled");
    }

    #[test]
    fn same_seed_same_order() {
        let mut a: Vec<u32> = (0..20).collect();
        let mut b = a.clone();
        seeded_shuffle(&mut a, 7);
        seeded_shuffle(&mut b, 7);
        assert_eq!(a, b);
    }

    #[test]
    fn tiny_inputs_untouched() {
        let mut empty: Vec<u8> = vec![];
        seeded_shuffle(&mut empty, 1);
        assert!(empty.is_empty());

        let mut one = vec![9];
        seeded_shuffle(&mut one, 1);
        assert_eq!(one, vec![9]);
    }
}
