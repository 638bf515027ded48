//! Strategies for picking which questions go into an assessment.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;

/// Picks `wanted` distinct indices out of `0..available`.
///
/// Implementations return `min(wanted, available)` indices, never repeating one.
pub trait SelectionStrategy: Send + Sync {
    fn select(&self, available: usize, wanted: usize) -> Vec<usize>;

    fn name(&self) -> &'static str;
}

/// Uniform random sampling without replacement.
///
/// With a seed the selection is reproducible; without one it draws from
/// the thread RNG.
#[derive(Debug, Clone, Default)]
pub struct UniformRandom {
    seed: Option<u64>,
}

impl UniformRandom {
    pub fn new() -> Self {
        Self { seed: None }
    }

    pub fn seeded(seed: u64) -> Self {
        Self { seed: Some(seed) }
    }
}

impl SelectionStrategy for UniformRandom {
    fn select(&self, available: usize, wanted: usize) -> Vec<usize> {
        let amount = wanted.min(available);
        let picked = match self.seed {
            Some(seed) => index::sample(&mut StdRng::seed_from_u64(seed), available, amount),
            None => index::sample(&mut rand::thread_rng(), available, amount),
        };
        picked.into_vec()
    }

    fn name(&self) -> &'static str {
        "uniform-random"
    }
}

/// Takes the first `wanted` items in stored order.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstN;

impl SelectionStrategy for FirstN {
    fn select(&self, available: usize, wanted: usize) -> Vec<usize> {
        (0..wanted.min(available)).collect()
    }

    fn name(&self) -> &'static str {
        "first-n"
    }
}
