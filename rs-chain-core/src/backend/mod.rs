//! Storage backends for scored word windows.
//!
//! A backend owns the snippets and their two derived indexes:
//! - `nexts`: prefix `[w0..w(k-1)]` -> snippets, answering "what comes next"
//! - `prevs`: suffix `[w1..wk]` -> snippets, answering "what came before"
//!
//! Implementations:
//! - `MapBackend`: authoritative in-memory store, optionally snapshotted
//! - `SqliteBackend`: persistent store, only reachable through the cache
//!   for lookups with backoff
//! - `CacheBackend`: write-back cache in front of any `CacheableBackend`

use std::collections::{BTreeMap, HashMap};

use rand::Rng;

use crate::error::Result;
use crate::model::scorer::{Score, Scorer};
use crate::model::selector::{ChainRng, Selector};
use crate::model::snippet::Snippet;
use crate::model::state::State;
use crate::model::word::{LINE_END, LINE_START, Word, Words};

/// In-memory store with optional postcard snapshots.
pub mod map;

/// SQLite store implementing the cacheable contract.
pub mod sqlite;

/// Write-back cache over a `CacheableBackend`.
pub mod cache;

pub use cache::CacheBackend;
pub use map::MapBackend;
pub use sqlite::SqliteBackend;

/// Occurrences of each distinct window within one line.
///
/// Ordered so that backends create new snippets in a reproducible order.
pub type WindowCounts = BTreeMap<Words, Score>;

/// Store of snippets answering the engine's lookups.
///
/// # Responsibilities
/// - Persist or keep the decay `State` between sessions
/// - Answer "previous"/"next" word lookups with backoff to shorter keys
/// - Create or increment snippets for each inserted line
/// - Drop fully decayed snippets on `prune`
///
/// ## Invariants
/// - A lookup that finds nothing is not an error: `get_prev` yields
///   `LINE_START`, `get_next` and `get_random` yield `LINE_END`
/// - Every live snippet of two or more words is reachable from exactly one
///   prefix bucket and one suffix bucket. Single words have an empty prefix
///   and suffix and are not indexed, as no lookup uses an empty key
/// - `get_random` draws uniformly among live snippets holding a real word
/// - Candidates reach the `Selector` in ascending word order, so ties break
///   the same way whatever the backend
pub trait Backend {
	/// Returns the stored state, or a fresh one if nothing was stored.
	fn create_state(&mut self) -> Result<State>;

	/// Persists `state` (and anything pending).
	fn store_state(&mut self, state: &State) -> Result<()>;

	/// Returns a real word from a random live snippet, or `LINE_END` if the
	/// store holds none.
	fn get_random(&mut self, state: &State, scorer: &Scorer, rng: &mut ChainRng) -> Result<Word>;

	/// Picks the word preceding `search`.
	///
	/// Looks up snippets whose suffix equals `search`; on a miss retries with
	/// the last word dropped, down to a single word.
	fn get_prev(
		&mut self,
		state: &State,
		selector: &Selector,
		scorer: &Scorer,
		rng: &mut ChainRng,
		search: &[Word],
	) -> Result<Word>;

	/// Picks the word following `search`.
	///
	/// Looks up snippets whose prefix equals `search`; on a miss retries with
	/// the first word dropped, down to a single word.
	fn get_next(
		&mut self,
		state: &State,
		selector: &Selector,
		scorer: &Scorer,
		rng: &mut ChainRng,
		search: &[Word],
	) -> Result<Word>;

	/// Creates each window with its count as score, or increments it by its
	/// count if it already exists.
	fn update_snippets(&mut self, state: &State, scorer: &Scorer, windows: &WindowCounts) -> Result<()>;

	/// Removes every snippet whose adjusted score is exactly 0.
	fn prune(&mut self, state: &State, scorer: &Scorer) -> Result<()>;
}

/// A backend that can sit behind a `CacheBackend`.
///
/// Lookups here are exact (no backoff) and return every matching snippet, so
/// the cache can hold whole buckets.
pub trait CacheableBackend: Backend {
	/// Snippets whose suffix is exactly `suffix`, in word order.
	fn get_prevs(&mut self, suffix: &[Word]) -> Result<Vec<Snippet>>;

	/// Snippets whose prefix is exactly `prefix`, in word order.
	fn get_nexts(&mut self, prefix: &[Word]) -> Result<Vec<Snippet>>;

	/// Fetches the snippets stored under `keys`. Missing keys are absent from
	/// the result.
	fn get_snippets(&mut self, keys: &[Words]) -> Result<HashMap<Words, Snippet>>;

	/// Upserts `snippets` in one batch, re-indexing each. Either the whole
	/// batch is applied or none of it.
	fn flush(&mut self, state: &State, scorer: &Scorer, snippets: &[Snippet]) -> Result<()>;

	/// Number of stored snippets, live or not.
	fn snippet_count(&mut self) -> Result<usize>;

	/// The `index`-th stored snippet in a stable storage order, `None` past
	/// the end.
	fn nth_snippet(&mut self, index: usize) -> Result<Option<Snippet>>;

	/// Calls `visit` on every stored snippet.
	fn for_each_snippet(&mut self, visit: &mut dyn FnMut(&Snippet)) -> Result<()>;
}

impl<B: Backend + ?Sized> Backend for Box<B> {
	fn create_state(&mut self) -> Result<State> {
		(**self).create_state()
	}

	fn store_state(&mut self, state: &State) -> Result<()> {
		(**self).store_state(state)
	}

	fn get_random(&mut self, state: &State, scorer: &Scorer, rng: &mut ChainRng) -> Result<Word> {
		(**self).get_random(state, scorer, rng)
	}

	fn get_prev(
		&mut self,
		state: &State,
		selector: &Selector,
		scorer: &Scorer,
		rng: &mut ChainRng,
		search: &[Word],
	) -> Result<Word> {
		(**self).get_prev(state, selector, scorer, rng, search)
	}

	fn get_next(
		&mut self,
		state: &State,
		selector: &Selector,
		scorer: &Scorer,
		rng: &mut ChainRng,
		search: &[Word],
	) -> Result<Word> {
		(**self).get_next(state, selector, scorer, rng, search)
	}

	fn update_snippets(&mut self, state: &State, scorer: &Scorer, windows: &WindowCounts) -> Result<()> {
		(**self).update_snippets(state, scorer, windows)
	}

	fn prune(&mut self, state: &State, scorer: &Scorer) -> Result<()> {
		(**self).prune(state, scorer)
	}
}

/// Runs `lookup` on `search`, then on ever shorter keys with the last word
/// dropped, until it yields a word. Falls back to `LINE_START`.
pub(crate) fn backoff_prev<F>(search: &[Word], mut lookup: F) -> Result<Word>
where
	F: FnMut(&[Word]) -> Result<Option<Word>>,
{
	let mut key = search;
	while !key.is_empty() {
		if let Some(word) = lookup(key)? {
			return Ok(word);
		}
		key = &key[..key.len() - 1];
	}
	Ok(LINE_START.to_owned())
}

/// Runs `lookup` on `search`, then on ever shorter keys with the first word
/// dropped, until it yields a word. Falls back to `LINE_END`.
pub(crate) fn backoff_next<F>(search: &[Word], mut lookup: F) -> Result<Word>
where
	F: FnMut(&[Word]) -> Result<Option<Word>>,
{
	let mut key = search;
	while !key.is_empty() {
		if let Some(word) = lookup(key)? {
			return Ok(word);
		}
		key = &key[1..];
	}
	Ok(LINE_END.to_owned())
}

/// First real word of `snippet`, if any.
pub(crate) fn first_real_word(snippet: &Snippet) -> Option<&Word> {
	snippet.words().iter().find(|w| !crate::model::word::is_sentinel(w))
}

/// Random draws tried before `get_random` falls back to a full scan.
pub(crate) const RANDOM_ATTEMPTS: usize = 32;

/// The word `get_random` may return for `snippet`: its first real word,
/// while its adjusted score is not 0.
pub(crate) fn random_candidate<'a>(snippet: &'a Snippet, state: &State, scorer: &Scorer) -> Option<&'a Word> {
	if snippet.score(scorer, state) == 0 {
		return None;
	}
	first_real_word(snippet)
}

/// Uniform pick among the eligible entries of `0..total`, by rejection.
///
/// `fetch(i)` yields the word of entry `i`, or `None` if that entry is not
/// eligible. Returns `None` once `RANDOM_ATTEMPTS` draws were rejected.
pub(crate) fn sample_by_rejection<F>(total: usize, rng: &mut ChainRng, mut fetch: F) -> Result<Option<Word>>
where
	F: FnMut(usize) -> Result<Option<Word>>,
{
	if total == 0 {
		return Ok(None);
	}
	for _ in 0..RANDOM_ATTEMPTS {
		if let Some(word) = fetch(rng.random_range(0..total))? {
			return Ok(Some(word));
		}
	}
	Ok(None)
}

#[cfg(test)]
mod tests {
	use rand::SeedableRng;

	use super::*;
	use crate::model::word::words;

	#[test]
	fn backoff_prev_drops_last_word() {
		let mut tried = Vec::new();
		let word = backoff_prev(&words(&["a", "b", "c"]), |key| {
			tried.push(key.to_vec());
			Ok(None)
		})
		.unwrap();
		assert_eq!(word, LINE_START);
		assert_eq!(tried, vec![words(&["a", "b", "c"]), words(&["a", "b"]), words(&["a"])]);
	}

	#[test]
	fn backoff_next_drops_first_word() {
		let mut tried = Vec::new();
		let word = backoff_next(&words(&["a", "b", "c"]), |key| {
			tried.push(key.to_vec());
			Ok(None)
		})
		.unwrap();
		assert_eq!(word, LINE_END);
		assert_eq!(tried, vec![words(&["a", "b", "c"]), words(&["b", "c"]), words(&["c"])]);
	}

	#[test]
	fn backoff_stops_at_first_hit() {
		let word = backoff_next(&words(&["a", "b"]), |key| {
			Ok((key.len() == 1).then(|| "hit".to_owned()))
		})
		.unwrap();
		assert_eq!(word, "hit");
	}

	#[test]
	fn rejection_sampling_gives_up() {
		let mut rng = ChainRng::seed_from_u64(1);
		let mut tries = 0;
		let word = sample_by_rejection(10, &mut rng, |_| {
			tries += 1;
			Ok(None)
		})
		.unwrap();
		assert_eq!(word, None);
		assert_eq!(tries, RANDOM_ATTEMPTS);
		assert_eq!(sample_by_rejection(0, &mut rng, |_| Ok(Some("x".to_owned()))).unwrap(), None);
	}

	#[test]
	fn rejection_sampling_reaches_every_eligible_entry() {
		let mut rng = ChainRng::seed_from_u64(2);
		let mut seen = std::collections::BTreeSet::new();
		for _ in 0..200 {
			let word = sample_by_rejection(4, &mut rng, |i| Ok((i % 2 == 0).then(|| i.to_string())))
				.unwrap()
				.unwrap();
			seen.insert(word);
		}
		assert_eq!(seen, ["0", "2"].map(String::from).into_iter().collect());
	}

	#[test]
	fn empty_search_misses() {
		assert_eq!(backoff_prev(&[], |_| Ok(Some("x".to_owned()))).unwrap(), LINE_START);
		assert_eq!(backoff_next(&[], |_| Ok(Some("x".to_owned()))).unwrap(), LINE_END);
	}
}
