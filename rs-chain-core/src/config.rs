use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{ChainError, Result};
use crate::model::scorer::Scorer;
use crate::model::selector::{ChainRng, Selector};

/// Engine settings, usually read from the `[chain]` table of a config file.
///
/// Every field has a default, so an empty table is a valid configuration:
/// a look size of 1, no score decay, a score-proportional selector and an
/// entropy-seeded RNG.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ChainConfig {
	/// Number of context words in a search key.
	pub look_size: usize,
	pub scorer: Scorer,
	pub selector: Selector,
	/// Fixed RNG seed for reproducible output.
	pub seed: Option<u64>,
}

impl Default for ChainConfig {
	fn default() -> Self {
		Self {
			look_size: 1,
			scorer: Scorer::default(),
			selector: Selector::default(),
			seed: None,
		}
	}
}

impl ChainConfig {
	/// # Errors
	/// - `ChainError::InvalidLookSize` if `look_size` is 0.
	pub fn validate(&self) -> Result<()> {
		if self.look_size == 0 {
			return Err(ChainError::InvalidLookSize);
		}
		Ok(())
	}

	/// A generator seeded from `seed`, or from OS entropy if unset.
	pub fn rng(&self) -> ChainRng {
		match self.seed {
			Some(seed) => ChainRng::seed_from_u64(seed),
			None => ChainRng::from_os_rng(),
		}
	}
}
