//! Trial sampling interface.
//!
//! The search only needs `suggest_float(name, low, high)` per scalar, so any
//! multi-objective trial sampler can sit behind this trait. The shipped
//! implementation draws independent uniforms, seedable for reproducible
//! studies.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Per-trial parameter suggestion.
pub trait TrialSampler {
    /// A value for the named parameter within `[low, high]`.
    fn suggest_float(&mut self, name: &str, low: f64, high: f64) -> f64;
}

/// Independent uniform sampling over each parameter range.
pub struct UniformSampler {
    rng: StdRng,
}

impl UniformSampler {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            rng: seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64),
        }
    }
}

impl TrialSampler for UniformSampler {
    fn suggest_float(&mut self, _name: &str, low: f64, high: f64) -> f64 {
        self.rng.gen_range(low..=high)
    }
}
