// src/dataset/sampler.rs

//! Example samplers: the order in which a chunk's examples enter batches.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::traits::ExampleSampler;

/// Yields example indices in their original order.
#[derive(Debug, Default)]
pub struct SequentialExampleSampler {
    example_count: usize,
    cursor: usize,
}

impl SequentialExampleSampler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExampleSampler for SequentialExampleSampler {
    fn reset(&mut self, example_count: usize) {
        self.example_count = example_count;
        self.cursor = 0;
    }

    fn next(&mut self, count: usize) -> Option<Vec<usize>> {
        if self.cursor >= self.example_count {
            return None;
        }
        let end = (self.cursor + count).min(self.example_count);
        let indices = (self.cursor..end).collect();
        self.cursor = end;
        Some(indices)
    }
}

/// Yields example indices as a seeded random permutation, drawn without
/// replacement.
///
/// Each `reset(n)` shuffles a fresh `[0, n)` permutation with the sampler's
/// RNG; the RNG state carries across resets, so successive chunks see
/// different permutations while the whole sequence stays reproducible for a
/// given seed.
#[derive(Debug)]
pub struct RandomExampleSampler {
    indices: Vec<usize>,
    cursor: usize,
    rng: StdRng,
}

impl RandomExampleSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            indices: Vec::new(),
            cursor: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl ExampleSampler for RandomExampleSampler {
    fn reset(&mut self, example_count: usize) {
        self.indices = (0..example_count).collect();
        self.indices.shuffle(&mut self.rng);
        self.cursor = 0;
    }

    fn next(&mut self, count: usize) -> Option<Vec<usize>> {
        if self.cursor >= self.indices.len() {
            return None;
        }
        let end = (self.cursor + count).min(self.indices.len());
        let indices = self.indices[self.cursor..end].to_vec();
        self.cursor = end;
        Some(indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_identity_order() {
        let mut sampler = SequentialExampleSampler::new();
        sampler.reset(5);

        assert_eq!(sampler.next(2), Some(vec![0, 1]));
        assert_eq!(sampler.next(2), Some(vec![2, 3]));
        assert_eq!(sampler.next(2), Some(vec![4]));
        assert_eq!(sampler.next(2), None);
    }

    #[test]
    fn test_sequential_rearms_on_reset() {
        let mut sampler = SequentialExampleSampler::new();
        sampler.reset(3);
        assert_eq!(sampler.next(3), Some(vec![0, 1, 2]));

        sampler.reset(2);
        assert_eq!(sampler.next(3), Some(vec![0, 1]));
    }

    #[test]
    fn test_sequential_empty() {
        let mut sampler = SequentialExampleSampler::new();
        sampler.reset(0);
        assert_eq!(sampler.next(1), None);
    }

    #[test]
    fn test_random_is_a_permutation() {
        let mut sampler = RandomExampleSampler::new(42);
        sampler.reset(10);

        let mut drawn = Vec::new();
        drawn.extend(sampler.next(3).unwrap());
        drawn.extend(sampler.next(3).unwrap());
        drawn.extend(sampler.next(4).unwrap());
        assert_eq!(sampler.next(1), None);

        drawn.sort_unstable();
        assert_eq!(drawn, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_random_deterministic_for_seed() {
        let mut a = RandomExampleSampler::new(7);
        let mut b = RandomExampleSampler::new(7);

        for n in [4usize, 9, 1] {
            a.reset(n);
            b.reset(n);
            assert_eq!(a.next(n), b.next(n));
        }
    }

    #[test]
    fn test_random_clamps_overdraw() {
        let mut sampler = RandomExampleSampler::new(0);
        sampler.reset(3);

        let drawn = sampler.next(10).unwrap();
        assert_eq!(drawn.len(), 3);
    }
}
