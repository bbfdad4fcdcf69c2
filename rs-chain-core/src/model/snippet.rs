use serde::{Deserialize, Serialize};

use super::scorer::{Score, Scorer};
use super::state::State;
use super::word::{Word, Words};

/// A stored word window paired with its decaying score.
///
/// A `Snippet` with words `[w0..wk]` answers two questions:
/// - what follows the prefix `[w0..w(k-1)]` (its last word, `back`)
/// - what precedes the suffix `[w1..wk]` (its first word, `front`)
///
/// ## Responsibilities:
/// - Hold the raw score and the state at the last update
/// - Compute the adjusted score through a `Scorer`
/// - Bank the decayed score and add occurrences on `increment`
///
/// ## Invariants
/// - `words` never changes once created and is never empty
/// - `score` only changes through `increment`
/// - Only `score` and `state` are persisted, never the adjusted score
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Snippet {
	words: Words,
	/// Backend state at the last update.
	state: State,
	/// Raw score as of `state`.
	score: Score,
}

impl Snippet {
	pub fn new(words: Words, state: State, score: Score) -> Self {
		debug_assert!(!words.is_empty());
		Self { words, state, score }
	}

	pub fn words(&self) -> &Words {
		&self.words
	}

	/// Words without the last one: the key of the "nexts" index.
	pub fn prefix(&self) -> &[Word] {
		&self.words[..self.words.len() - 1]
	}

	/// Words without the first one: the key of the "prevs" index.
	pub fn suffix(&self) -> &[Word] {
		&self.words[1..]
	}

	/// First word, i.e. the word preceding `suffix`.
	pub fn front(&self) -> &Word {
		&self.words[0]
	}

	/// Last word, i.e. the word following `prefix`.
	pub fn back(&self) -> &Word {
		&self.words[self.words.len() - 1]
	}

	/// Raw score as of the last update.
	pub fn raw_score(&self) -> Score {
		self.score
	}

	/// State captured at the last update.
	pub fn last_state(&self) -> &State {
		&self.state
	}

	/// Adjusted score at `now`.
	pub fn score(&self, scorer: &Scorer, now: &State) -> Score {
		scorer.score(self.score, &self.state, now)
	}

	/// Banks the adjusted score at `now`, adds `amount` and resets the
	/// snippet's clock to `now`. Returns the new raw score.
	pub fn increment(&mut self, scorer: &Scorer, now: &State, amount: Score) -> Score {
		self.score = amount + self.score(scorer, now);
		self.state = *now;
		self.score
	}
}
