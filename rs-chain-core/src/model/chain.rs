use std::collections::VecDeque;

use rand::SeedableRng;
use tracing::{debug, info};

use super::scorer::Scorer;
use super::selector::{ChainRng, Selector};
use super::state::{State, unix_now};
use super::word::{LINE_END, LINE_START, Word, Words, first_n, is_sentinel, last_n};
use crate::backend::{Backend, WindowCounts};
use crate::config::ChainConfig;
use crate::error::{ChainError, Result};

/// Word chain engine over a `Backend`.
///
/// # Responsibilities
/// - Turn each inserted line into window counts for the backend
/// - Grow a sequence in both directions from a seed word or phrase
/// - Keep the decay `State` and hand it back to the backend on `finalize`
///
/// ## Invariants
/// - `look_size >= 1`
/// - `state.count` is the number of non-empty lines inserted over the life of
///   the store
/// - All randomness comes from the owned `rng`
pub struct Chain<B: Backend> {
	backend: B,
	scorer: Scorer,
	selector: Selector,
	look_size: usize,
	state: State,
	rng: ChainRng,
	clock: fn() -> i64,
}

impl<B: Backend> Chain<B> {
	/// Creates an engine, loading the state from `backend`.
	///
	/// # Parameters
	/// - `look_size`: number of context words used as search key. Windows of
	///   up to `look_size + 1` words are stored.
	///
	/// # Errors
	/// - `ChainError::InvalidLookSize` if `look_size` is 0.
	/// - Any error from `backend.create_state()`.
	pub fn new(mut backend: B, selector: Selector, scorer: Scorer, look_size: usize) -> Result<Self> {
		if look_size == 0 {
			return Err(ChainError::InvalidLookSize);
		}
		let state = backend.create_state()?;
		debug!(time = state.time, count = state.count, look_size, "chain ready");
		Ok(Self {
			backend,
			scorer,
			selector,
			look_size,
			state,
			rng: ChainRng::from_os_rng(),
			clock: unix_now,
		})
	}

	/// Creates an engine from a validated `ChainConfig`.
	pub fn from_config(backend: B, config: &ChainConfig) -> Result<Self> {
		config.validate()?;
		Ok(Self::new(backend, config.selector, config.scorer, config.look_size)?.with_rng(config.rng()))
	}

	/// Replaces the random generator, e.g. with a seeded one.
	pub fn with_rng(mut self, rng: ChainRng) -> Self {
		self.rng = rng;
		self
	}

	/// Replaces the wall clock (seconds since the epoch) used on insert.
	pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
		self.clock = clock;
		self
	}

	pub fn state(&self) -> &State {
		&self.state
	}

	pub fn look_size(&self) -> usize {
		self.look_size
	}

	pub fn backend(&self) -> &B {
		&self.backend
	}

	pub fn backend_mut(&mut self) -> &mut B {
		&mut self.backend
	}

	/// Learns one line of words.
	///
	/// Empty words are dropped; an empty line is ignored and does not count.
	/// Every window of 1 to `look_size + 1` words over
	/// `[LINE_START] + line + [LINE_END]` is sent to the backend in a single
	/// `update_snippets` call.
	pub fn insert<S: AsRef<str>>(&mut self, line: &[S]) -> Result<()> {
		let mut padded: Words = Vec::with_capacity(line.len() + 2);
		padded.push(LINE_START.to_owned());
		padded.extend(line.iter().map(|w| w.as_ref()).filter(|w| !w.is_empty()).map(str::to_owned));
		if padded.len() == 1 {
			return Ok(());
		}
		padded.push(LINE_END.to_owned());

		self.state.time = (self.clock)();
		let windows = count_windows(&padded, self.look_size + 1);
		self.backend.update_snippets(&self.state, &self.scorer, &windows)?;
		self.state.count += 1;
		debug!(words = padded.len() - 2, windows = windows.len(), count = self.state.count, "inserted line");
		Ok(())
	}

	/// Generates a sequence around `search`.
	///
	/// # Parameters
	/// - `search`: seed words. If empty, a random stored word is used.
	/// - `max_words` / `max_chars`: limits on the result (0 = unlimited);
	///   characters are counted without separators.
	///
	/// # Returns
	/// - The grown sequence, without sentinels.
	/// - An empty sequence if the store is empty (random seed) or if `search`
	///   could not be extended at all.
	///
	/// # Errors
	/// - `ChainError::NoLimit` if both limits are 0.
	/// - Any backend error.
	pub fn produce<S: AsRef<str>>(&mut self, search: &[S], max_words: usize, max_chars: usize) -> Result<Words> {
		if max_words == 0 && max_chars == 0 {
			return Err(ChainError::NoLimit);
		}

		let seed: Words = search
			.iter()
			.map(|w| w.as_ref())
			.filter(|w| !w.is_empty())
			.map(str::to_owned)
			.collect();

		if seed.is_empty() {
			let word = self.backend.get_random(&self.state, &self.scorer, &mut self.rng)?;
			if is_sentinel(&word) {
				debug!("empty store, nothing to produce");
				return Ok(Words::new());
			}
			let mut line = VecDeque::from([word]);
			self.grow(&mut line, max_words, max_chars)?;
			return Ok(line.into());
		}

		let seed_len = seed.len();
		let mut line = VecDeque::from(seed);
		self.grow(&mut line, max_words, max_chars)?;
		if line.len() == seed_len {
			debug!(seed_len, "search not found");
			return Ok(Words::new());
		}
		Ok(line.into())
	}

	/// Extends `line` right then left, in turns, until both sides reach a
	/// line boundary or a limit is hit.
	fn grow(&mut self, line: &mut VecDeque<Word>, max_words: usize, max_chars: usize) -> Result<()> {
		let mut chars: usize = line.iter().map(|w| w.chars().count()).sum();
		let under_limits = |words: usize, chars: usize| {
			(max_words == 0 || words < max_words) && (max_chars == 0 || chars < max_chars)
		};

		let (mut left_dead, mut right_dead) = (false, false);
		while !(left_dead && right_dead) {
			if !under_limits(line.len(), chars) {
				break;
			}
			if !right_dead {
				let key = last_n(line.iter(), self.look_size);
				let word = self.backend.get_next(&self.state, &self.selector, &self.scorer, &mut self.rng, &key)?;
				if is_sentinel(&word) {
					right_dead = true;
				} else {
					chars += word.chars().count();
					line.push_back(word);
				}
			}

			if !under_limits(line.len(), chars) {
				break;
			}
			if !left_dead {
				let key = first_n(line.iter(), self.look_size);
				let word = self.backend.get_prev(&self.state, &self.selector, &self.scorer, &mut self.rng, &key)?;
				if is_sentinel(&word) {
					left_dead = true;
				} else {
					chars += word.chars().count();
					line.push_front(word);
				}
			}
		}
		Ok(())
	}

	/// Drops every fully decayed snippet from the backend.
	pub fn prune_backend(&mut self) -> Result<()> {
		self.backend.prune(&self.state, &self.scorer)?;
		info!(count = self.state.count, "pruned backend");
		Ok(())
	}

	/// Persists the state, flushing anything the backend holds pending.
	pub fn save_state(&mut self) -> Result<()> {
		self.backend.store_state(&self.state)?;
		info!(time = self.state.time, count = self.state.count, "state saved");
		Ok(())
	}

	/// Saves the state and hands back the backend.
	pub fn finalize(mut self) -> Result<B> {
		self.save_state()?;
		Ok(self.backend)
	}
}

/// Counts every window of 1 to `max_size` words over `line`.
///
/// ```
/// use rs_chain_core::model::chain::count_windows;
/// use rs_chain_core::model::word::words;
///
/// let counts = count_windows(&words(&["a", "b", "a"]), 2);
/// assert_eq!(counts[&words(&["a"])], 2);
/// assert_eq!(counts[&words(&["a", "b"])], 1);
/// assert_eq!(counts.len(), 4);
/// ```
pub fn count_windows(line: &[Word], max_size: usize) -> WindowCounts {
	let mut counts = WindowCounts::new();
	for size in 1..=max_size.min(line.len()) {
		for window in line.windows(size) {
			*counts.entry(window.to_vec()).or_default() += 1;
		}
	}
	counts
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::backend::MapBackend;
	use crate::model::word::words;

	fn fixed_clock() -> i64 {
		1_000
	}

	fn chain(look_size: usize) -> Chain<MapBackend> {
		Chain::new(MapBackend::new(), Selector::best_always(), Scorer::no_adj(), look_size)
			.unwrap()
			.with_rng(ChainRng::seed_from_u64(1))
			.with_clock(fixed_clock)
	}

	#[test]
	fn zero_look_size_is_rejected() {
		let result = Chain::new(MapBackend::new(), Selector::random(), Scorer::no_adj(), 0);
		assert!(matches!(result, Err(ChainError::InvalidLookSize)));
	}

	#[test]
	fn windows_cover_every_size_and_position() {
		let line = words(&[LINE_START, "a", "b", LINE_END]);
		let counts = count_windows(&line, 2);
		assert_eq!(counts.len(), 4 + 3);
		assert_eq!(counts[&words(&[LINE_START, "a"])], 1);
		assert_eq!(counts[&words(&["b", LINE_END])], 1);
		assert!(!counts.contains_key(&words(&[LINE_START, "a", "b"])));

		// never longer than the line itself
		assert_eq!(count_windows(&words(&["a"]), 5).len(), 1);
	}

	#[test]
	fn insert_sets_time_and_counts_lines() {
		let mut chain = chain(1);
		chain.insert(&["a", "b"]).unwrap();
		chain.insert(&["c"]).unwrap();
		assert_eq!(chain.state(), &State::new(1_000, 2));
		assert!(chain.backend().get(&words(&[LINE_START, "a"])).is_some());
		assert!(chain.backend().get(&words(&["a", "b", LINE_END])).is_none());
	}

	#[test]
	fn empty_line_is_ignored() {
		let mut chain = chain(1);
		let before = *chain.state();
		chain.insert::<&str>(&[]).unwrap();
		chain.insert(&["", ""]).unwrap();
		assert_eq!(chain.state(), &before);
		assert!(chain.backend().is_empty());
	}

	#[test]
	fn produce_needs_a_limit() {
		let mut chain = chain(1);
		assert!(matches!(chain.produce(&["a"], 0, 0), Err(ChainError::NoLimit)));
	}

	#[test]
	fn produce_on_empty_store_is_empty() {
		let mut chain = chain(1);
		assert!(chain.produce::<&str>(&[], 10, 0).unwrap().is_empty());
		assert!(chain.produce(&["a"], 10, 0).unwrap().is_empty());
	}

	#[test]
	fn produce_grows_both_ways() {
		let mut chain = chain(1);
		chain.insert(&["the", "quick", "brown", "fox"]).unwrap();
		assert_eq!(chain.produce(&["brown"], 10, 0).unwrap(), words(&["the", "quick", "brown", "fox"]));
		assert_eq!(chain.produce::<&str>(&[], 10, 0).unwrap(), words(&["the", "quick", "brown", "fox"]));
	}

	#[test]
	fn produce_with_longer_look_size() {
		let mut chain = chain(2);
		chain.insert(&["a", "b", "c"]).unwrap();
		chain.insert(&["x", "b", "d"]).unwrap();
		chain.insert(&["x", "b", "d"]).unwrap();
		// with two words of context, "a b" can only go on to "c"
		assert_eq!(chain.produce(&["a", "b"], 10, 0).unwrap(), words(&["a", "b", "c"]));
		assert_eq!(chain.produce(&["x", "b"], 10, 0).unwrap(), words(&["x", "b", "d"]));
	}

	#[test]
	fn produce_stops_at_word_limit() {
		let mut chain = chain(1);
		chain.insert(&["a", "b", "c", "d", "e"]).unwrap();
		let produced = chain.produce(&["c"], 3, 0).unwrap();
		assert_eq!(produced, words(&["b", "c", "d"]));
	}

	#[test]
	fn produce_stops_at_char_limit() {
		let mut chain = chain(1);
		chain.insert(&["aa", "bb", "cc", "dd"]).unwrap();
		// "bb" -> right "cc" (4 chars) -> left "aa" (6 chars) -> stop
		let produced = chain.produce(&["bb"], 0, 6).unwrap();
		assert_eq!(produced, words(&["aa", "bb", "cc"]));
	}

	#[test]
	fn unknown_search_is_not_found() {
		let mut chain = chain(1);
		chain.insert(&["a", "b"]).unwrap();
		assert!(chain.produce(&["zzz"], 10, 0).unwrap().is_empty());
	}

	#[test]
	fn finalize_stores_state() {
		let mut chain = chain(1);
		chain.insert(&["a"]).unwrap();
		let mut backend = chain.finalize().unwrap();
		assert_eq!(backend.create_state().unwrap(), State::new(1_000, 1));
	}
}
