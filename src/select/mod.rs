//! Uniform selection of a backing data item for a requesting identity.
//!
//! The repository computes the eligible set (items below their completion
//! limit that the identity has not yet responded to); this module only
//! owns the random draw. The generator is seedable so tests can pin the
//! sequence of picks.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::models::Datum;

/// Picks uniformly at random among eligible data items.
pub struct DataSelector {
    rng: StdRng,
}

impl DataSelector {
    /// Create a selector; a seed yields a reproducible pick sequence.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    /// Choose one eligible item, or None when there is no work left for
    /// this identity. An empty eligible set is an expected outcome, not
    /// an error.
    pub fn pick<'a>(&mut self, eligible: &'a [Datum]) -> Option<&'a Datum> {
        if eligible.is_empty() {
            return None;
        }
        let index = self.rng.gen_range(0..eligible.len());
        eligible.get(index)
    }
}
