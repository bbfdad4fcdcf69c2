use serde::{Deserialize, Serialize};

use super::state::State;

/// Raw or adjusted occurrence score of a snippet.
pub type Score = u64;

/// Strategy computing a snippet's adjusted score.
///
/// The adjusted score is derived from the stored (raw) score, the state at
/// the snippet's last update and the current state. It is never persisted.
///
/// # Variants
/// - `NoAdj`: the raw score, unchanged.
/// - `CountAdj { period }`: loses one point per `period` lines observed since
///   the last update.
/// - `TimeAdj { seconds }`: loses one point per `seconds` elapsed since the
///   last update.
///
/// A period of 0 behaves like `NoAdj`.
///
/// ## Invariants
/// - Never negative (floored at 0)
/// - Non-increasing as the current state advances
/// - A point is only lost once a *full* period has elapsed
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scorer {
	#[default]
	NoAdj,
	CountAdj { period: u64 },
	TimeAdj { seconds: u64 },
}

impl Scorer {
	pub fn no_adj() -> Self {
		Scorer::NoAdj
	}

	pub fn count_adj(period: u64) -> Self {
		Scorer::CountAdj { period }
	}

	pub fn time_adj(seconds: u64) -> Self {
		Scorer::TimeAdj { seconds }
	}

	/// Computes the adjusted score.
	///
	/// `ceil(raw - elapsed / period)` is computed as
	/// `raw - floor(elapsed / period)`, which is equal for integer `raw`.
	pub fn score(&self, raw: Score, last: &State, now: &State) -> Score {
		match *self {
			Scorer::NoAdj => raw,
			Scorer::CountAdj { period } => {
				decay(raw, now.count.saturating_sub(last.count), period)
			}
			Scorer::TimeAdj { seconds } => {
				let elapsed = now.time.saturating_sub(last.time).max(0) as u64;
				decay(raw, elapsed, seconds)
			}
		}
	}
}

fn decay(raw: Score, elapsed: u64, period: u64) -> Score {
	if period == 0 {
		return raw;
	}
	raw.saturating_sub(elapsed / period)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn states(time: i64, count: u64) -> (State, State) {
		(State::new(0, 0), State::new(time, count))
	}

	#[test]
	fn no_adj_is_identity() {
		let scorer = Scorer::no_adj();
		let (last, now) = states(20, 20);
		assert_eq!(scorer.score(0, &last, &now), 0);
		assert_eq!(scorer.score(50, &last, &now), 50);
		assert_eq!(scorer.score(324, &last, &now), 324);
	}

	#[test]
	fn zero_period_degenerates_to_no_adj() {
		let (last, now) = states(20, 20);
		for scorer in [Scorer::count_adj(0), Scorer::time_adj(0)] {
			assert_eq!(scorer.score(0, &last, &now), 0);
			assert_eq!(scorer.score(50, &last, &now), 50);
			assert_eq!(scorer.score(324, &last, &now), 324);
		}
	}

	#[test]
	fn period_of_one_subtracts_elapsed() {
		let (last, now) = states(20, 20);
		for scorer in [Scorer::count_adj(1), Scorer::time_adj(1)] {
			assert_eq!(scorer.score(50, &last, &now), 30);
			assert_eq!(scorer.score(324, &last, &now), 304);
			assert_eq!(scorer.score(5, &last, &now), 0);
		}
	}

	#[test]
	fn score_only_drops_after_full_period() {
		let scorer = Scorer::count_adj(7);
		for (elapsed, expected) in [(1, 50), (6, 50), (7, 49), (8, 49), (13, 49), (14, 48), (20, 48)] {
			let (last, now) = states(0, elapsed);
			assert_eq!(scorer.score(50, &last, &now), expected, "elapsed={elapsed}");
		}

		let scorer = Scorer::time_adj(5);
		let (last, now) = states(4, 0);
		assert_eq!(scorer.score(10, &last, &now), 10);
		let (last, now) = states(5, 0);
		assert_eq!(scorer.score(10, &last, &now), 9);
	}

	#[test]
	fn each_scorer_reads_its_own_clock() {
		let (last, now) = states(100, 0);
		assert_eq!(Scorer::count_adj(1).score(10, &last, &now), 10);
		assert_eq!(Scorer::time_adj(10).score(10, &last, &now), 0);
	}

	#[test]
	fn clock_going_backwards_does_not_raise_score() {
		let scorer = Scorer::time_adj(1);
		let last = State::new(100, 5);
		let now = State::new(50, 5);
		assert_eq!(scorer.score(3, &last, &now), 3);
	}
}
