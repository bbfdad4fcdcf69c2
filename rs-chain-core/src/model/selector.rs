use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

use super::scorer::{Score, Scorer};
use super::snippet::Snippet;
use super::state::State;

/// Random generator threaded through selection and random picks.
///
/// Owned by the caller (normally the `Chain`) and passed down explicitly, so
/// a seeded instance makes generation reproducible.
pub type ChainRng = StdRng;

/// Weight factor at which `BestWeighted` draws proportionally to score.
pub const NEUTRAL_WEIGHT: u8 = 128;

/// Strategy choosing one snippet among candidates.
///
/// # Variants
/// - `BestAlways`: highest adjusted score, first encountered on ties.
/// - `Random`: uniform pick, score ignored.
/// - `BestWeighted { weight }`: random pick weighted by adjusted score.
///   `255` behaves exactly like `BestAlways`, `0` exactly like `Random`.
///   In between, each candidate weighs `score^(weight / 128)`: `128` is a
///   draw proportional to score, lower values flatten toward uniform and
///   higher values sharpen toward the best candidate.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Selector {
	BestAlways,
	Random,
	BestWeighted { weight: u8 },
}

impl Default for Selector {
	fn default() -> Self {
		Selector::BestWeighted { weight: NEUTRAL_WEIGHT }
	}
}

impl Selector {
	pub fn best_always() -> Self {
		Selector::BestAlways
	}

	pub fn random() -> Self {
		Selector::Random
	}

	/// Weighted selector, shortcut to `BestAlways`/`Random` at the extremes.
	pub fn best_weighted(weight: u8) -> Self {
		match weight {
			u8::MAX => Selector::BestAlways,
			0 => Selector::Random,
			weight => Selector::BestWeighted { weight },
		}
	}

	/// Picks one of `candidates`.
	///
	/// Returns `None` only if `candidates` is empty.
	pub fn select<'a>(
		&self,
		candidates: &[&'a Snippet],
		scorer: &Scorer,
		state: &State,
		rng: &mut ChainRng,
	) -> Option<&'a Snippet> {
		// shortcuts: save a draw
		match candidates {
			[] => return None,
			[only] => return Some(*only),
			_ => (),
		}

		match *self {
			Selector::BestAlways => select_best(candidates, scorer, state),
			Selector::Random => select_random(candidates, rng),
			Selector::BestWeighted { weight: u8::MAX } => select_best(candidates, scorer, state),
			Selector::BestWeighted { weight: 0 } => select_random(candidates, rng),
			Selector::BestWeighted { weight: NEUTRAL_WEIGHT } => {
				select_proportional(candidates, scorer, state, rng)
			}
			Selector::BestWeighted { weight } => {
				select_skewed(candidates, scorer, state, rng, f64::from(weight) / f64::from(NEUTRAL_WEIGHT))
			}
		}
	}
}

fn select_best<'a>(candidates: &[&'a Snippet], scorer: &Scorer, state: &State) -> Option<&'a Snippet> {
	let mut best: Option<(&'a Snippet, Score)> = None;
	for candidate in candidates {
		let score = candidate.score(scorer, state);
		match best {
			Some((_, best_score)) if score <= best_score => (),
			_ => best = Some((candidate, score)),
		}
	}
	best.map(|(snippet, _)| snippet)
}

fn select_random<'a>(candidates: &[&'a Snippet], rng: &mut ChainRng) -> Option<&'a Snippet> {
	candidates.choose(rng).copied()
}

/// Two passes: sum the adjusted scores, then walk the candidates subtracting
/// each score from a uniform draw in `[0, sum)`.
fn select_proportional<'a>(
	candidates: &[&'a Snippet],
	scorer: &Scorer,
	state: &State,
	rng: &mut ChainRng,
) -> Option<&'a Snippet> {
	let total: Score = candidates.iter().map(|c| c.score(scorer, state)).sum();
	if total == 0 {
		// every candidate fully decayed: nothing to weigh by
		return select_random(candidates, rng);
	}

	let mut r = rng.random_range(0..total);
	for candidate in candidates {
		let score = candidate.score(scorer, state);
		if r < score {
			return Some(candidate);
		}
		r -= score;
	}
	candidates.last().copied()
}

fn select_skewed<'a>(
	candidates: &[&'a Snippet],
	scorer: &Scorer,
	state: &State,
	rng: &mut ChainRng,
	exponent: f64,
) -> Option<&'a Snippet> {
	let weights: Vec<f64> = candidates
		.iter()
		.map(|c| (c.score(scorer, state) as f64).powf(exponent))
		.collect();
	let total: f64 = weights.iter().sum();
	if !(total > 0.0) {
		return select_random(candidates, rng);
	}

	let mut r = rng.random_range(0.0..total);
	for (candidate, weight) in candidates.iter().zip(&weights) {
		if r < *weight {
			return Some(candidate);
		}
		r -= weight;
	}
	// float rounding can leave a sliver past the last bucket
	candidates.last().copied()
}
