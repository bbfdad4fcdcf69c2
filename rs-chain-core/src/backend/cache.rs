use std::collections::{BTreeMap, BTreeSet, HashMap};

use rand::seq::IndexedRandom;
use tracing::{debug, info};

use super::{
	Backend, CacheableBackend, WindowCounts, backoff_next, backoff_prev, random_candidate, sample_by_rejection,
};
use crate::error::Result;
use crate::model::scorer::Scorer;
use crate::model::selector::{ChainRng, Selector};
use crate::model::snippet::Snippet;
use crate::model::state::State;
use crate::model::word::{LINE_END, Word, Words};

/// One prefix or suffix bucket as seen by the cache.
#[derive(Debug, Default)]
struct Bucket {
	/// Keys fetched from the backend, `None` until first looked up. An empty
	/// list is a cached miss.
	read: Option<Vec<Words>>,
	/// Keys of snippets changed since the last flush.
	write: BTreeSet<Words>,
}

#[derive(Clone, Copy)]
enum Side {
	Prev,
	Next,
}

/// Write-back cache in front of a `CacheableBackend`.
///
/// # Responsibilities
/// - Serve lookups from lazily loaded buckets, caching misses too
/// - Accumulate created and incremented snippets in a write pool
/// - Push the write pool to the backend in one batch on `prune` and
///   `store_state`
///
/// ## Invariants
/// - For the same words, the write pool overrides the read pool
/// - Every snippet of two or more words in the write pool is listed in the
///   write side of its prefix and suffix buckets
/// - `get_random` draws from the written and the stored snippets alike
/// - If a flush fails, nothing cached is dropped
pub struct CacheBackend<B: CacheableBackend> {
	backend: B,
	pool_read: HashMap<Words, Snippet>,
	pool_write: BTreeMap<Words, Snippet>,
	prevs: HashMap<Words, Bucket>,
	nexts: HashMap<Words, Bucket>,
}

impl<B: CacheableBackend> CacheBackend<B> {
	pub fn new(backend: B) -> Self {
		Self {
			backend,
			pool_read: HashMap::new(),
			pool_write: BTreeMap::new(),
			prevs: HashMap::new(),
			nexts: HashMap::new(),
		}
	}

	/// The wrapped backend. Does not see unflushed writes.
	pub fn inner(&self) -> &B {
		&self.backend
	}

	/// Number of snippets waiting to be flushed.
	pub fn pending(&self) -> usize {
		self.pool_write.len()
	}

	/// Writes the pending snippets to the backend, then drops every cached
	/// structure. Leaves the cache untouched if the backend fails.
	pub fn flush(&mut self, state: &State, scorer: &Scorer) -> Result<()> {
		if !self.pool_write.is_empty() {
			let snippets: Vec<Snippet> = self.pool_write.values().cloned().collect();
			self.backend.flush(state, scorer, &snippets)?;
			debug!(count = snippets.len(), "flushed cached writes");
		}
		self.clear();
		Ok(())
	}

	fn clear(&mut self) {
		self.pool_read.clear();
		self.pool_write.clear();
		self.prevs.clear();
		self.nexts.clear();
	}

	fn index(&self, side: Side) -> &HashMap<Words, Bucket> {
		match side {
			Side::Prev => &self.prevs,
			Side::Next => &self.nexts,
		}
	}

	/// Loads the read side of bucket `key` from the backend if never loaded.
	fn load(&mut self, side: Side, key: &[Word]) -> Result<()> {
		let loaded = self.index(side).get(key).is_some_and(|b| b.read.is_some());
		if loaded {
			return Ok(());
		}

		let snippets = match side {
			Side::Prev => self.backend.get_prevs(key)?,
			Side::Next => self.backend.get_nexts(key)?,
		};
		let mut keys = Vec::with_capacity(snippets.len());
		for snippet in snippets {
			let words = snippet.words().clone();
			keys.push(words.clone());
			self.pool_read.insert(words, snippet);
		}

		let index = match side {
			Side::Prev => &mut self.prevs,
			Side::Next => &mut self.nexts,
		};
		index.entry(key.to_vec()).or_default().read = Some(keys);
		Ok(())
	}

	/// Current version of each snippet in bucket `key`, in word order. A
	/// written snippet shadows the read one with the same words.
	fn candidates(&self, side: Side, key: &[Word]) -> Vec<&Snippet> {
		let Some(bucket) = self.index(side).get(key) else {
			return Vec::new();
		};

		let mut candidates: Vec<&Snippet> = bucket
			.write
			.iter()
			.filter_map(|words| self.pool_write.get(words))
			.collect();
		for words in bucket.read.iter().flatten() {
			if self.pool_write.contains_key(words) {
				continue;
			}
			if let Some(snippet) = self.pool_read.get(words) {
				candidates.push(snippet);
			}
		}
		candidates.sort_by(|a, b| a.words().cmp(b.words()));
		candidates
	}

	/// Records `snippet` as changed and lists it in its buckets.
	fn write(&mut self, snippet: Snippet) {
		if snippet.words().len() > 1 {
			for (index, key) in [(&mut self.prevs, snippet.suffix()), (&mut self.nexts, snippet.prefix())] {
				let bucket = index.entry(key.to_vec()).or_default();
				if !bucket.write.contains(snippet.words()) {
					bucket.write.insert(snippet.words().clone());
				}
			}
		}
		self.pool_write.insert(snippet.words().clone(), snippet);
	}
}

impl<B: CacheableBackend> Backend for CacheBackend<B> {
	fn create_state(&mut self) -> Result<State> {
		self.backend.create_state()
	}

	fn store_state(&mut self, state: &State) -> Result<()> {
		self.flush(state, &Scorer::NoAdj)?;
		self.backend.store_state(state)
	}

	/// Draws over the written snippets followed by the stored ones; a stored
	/// snippet shadowed by a written one is rejected, so each live snippet
	/// is counted once.
	fn get_random(&mut self, state: &State, scorer: &Scorer, rng: &mut ChainRng) -> Result<Word> {
		let pending = self.pool_write.len();
		let total = pending + self.backend.snippet_count()?;
		let pool_write = &self.pool_write;
		let backend = &mut self.backend;

		let sampled = sample_by_rejection(total, rng, |index| {
			if index < pending {
				let snippet = pool_write.values().nth(index);
				return Ok(snippet.and_then(|s| random_candidate(s, state, scorer)).cloned());
			}
			let snippet = backend
				.nth_snippet(index - pending)?
				.filter(|s| !pool_write.contains_key(s.words()));
			Ok(snippet.and_then(|s| random_candidate(&s, state, scorer).cloned()))
		})?;
		if let Some(word) = sampled {
			return Ok(word);
		}

		let mut live: Vec<Word> = pool_write
			.values()
			.filter_map(|s| random_candidate(s, state, scorer))
			.cloned()
			.collect();
		backend.for_each_snippet(&mut |s| {
			if pool_write.contains_key(s.words()) {
				return;
			}
			if let Some(word) = random_candidate(s, state, scorer) {
				live.push(word.clone());
			}
		})?;
		debug!(total, live = live.len(), "random word drawn from a full scan");
		Ok(live.choose(rng).cloned().unwrap_or_else(|| LINE_END.to_owned()))
	}

	fn get_prev(
		&mut self,
		state: &State,
		selector: &Selector,
		scorer: &Scorer,
		rng: &mut ChainRng,
		search: &[Word],
	) -> Result<Word> {
		backoff_prev(search, |key| {
			self.load(Side::Prev, key)?;
			let candidates = self.candidates(Side::Prev, key);
			Ok(selector.select(&candidates, scorer, state, rng).map(|s| s.front().clone()))
		})
	}

	fn get_next(
		&mut self,
		state: &State,
		selector: &Selector,
		scorer: &Scorer,
		rng: &mut ChainRng,
		search: &[Word],
	) -> Result<Word> {
		backoff_next(search, |key| {
			self.load(Side::Next, key)?;
			let candidates = self.candidates(Side::Next, key);
			Ok(selector.select(&candidates, scorer, state, rng).map(|s| s.back().clone()))
		})
	}

	fn update_snippets(&mut self, state: &State, scorer: &Scorer, windows: &WindowCounts) -> Result<()> {
		// one backend round trip for everything the cache has never seen
		let unknown: Vec<Words> = windows
			.keys()
			.filter(|w| !self.pool_write.contains_key(*w) && !self.pool_read.contains_key(*w))
			.cloned()
			.collect();
		let mut fetched = if unknown.is_empty() {
			HashMap::new()
		} else {
			self.backend.get_snippets(&unknown)?
		};

		for (words, count) in windows {
			let current = self
				.pool_write
				.remove(words)
				.or_else(|| self.pool_read.get(words).cloned())
				.or_else(|| fetched.remove(words));
			let snippet = match current {
				Some(mut snippet) => {
					snippet.increment(scorer, state, *count);
					snippet
				}
				None => Snippet::new(words.clone(), *state, *count),
			};
			self.write(snippet);
		}
		Ok(())
	}

	fn prune(&mut self, state: &State, scorer: &Scorer) -> Result<()> {
		let pending = self.pending();
		self.flush(state, scorer)?;
		info!(flushed = pending, "cache flushed before prune");
		self.backend.prune(state, scorer)
	}
}

#[cfg(test)]
mod tests {
	use std::cell::Cell;
	use std::rc::Rc;

	use rand::SeedableRng;

	use super::*;
	use crate::backend::{MapBackend, SqliteBackend};
	use crate::model::word::{LINE_END, LINE_START, words};

	fn rng() -> ChainRng {
		ChainRng::seed_from_u64(3)
	}

	fn at(n: u64) -> State {
		State::new(n as i64, n)
	}

	fn counts(windows: &[&[&str]]) -> WindowCounts {
		let mut counts = WindowCounts::new();
		for window in windows {
			*counts.entry(words(window)).or_default() += 1;
		}
		counts
	}

	fn next<B: Backend>(backend: &mut B, search: &[&str]) -> Word {
		backend
			.get_next(&at(0), &Selector::best_always(), &Scorer::no_adj(), &mut rng(), &words(search))
			.unwrap()
	}

	fn prev<B: Backend>(backend: &mut B, search: &[&str]) -> Word {
		backend
			.get_prev(&at(0), &Selector::best_always(), &Scorer::no_adj(), &mut rng(), &words(search))
			.unwrap()
	}

	/// Map backend counting the exact-key lookups that reach it.
	struct Counting {
		inner: MapBackend,
		lookups: Rc<Cell<usize>>,
	}

	impl Backend for Counting {
		fn create_state(&mut self) -> Result<State> {
			self.inner.create_state()
		}

		fn store_state(&mut self, state: &State) -> Result<()> {
			self.inner.store_state(state)
		}

		fn get_random(&mut self, state: &State, scorer: &Scorer, rng: &mut ChainRng) -> Result<Word> {
			self.inner.get_random(state, scorer, rng)
		}

		fn get_prev(
			&mut self,
			state: &State,
			selector: &Selector,
			scorer: &Scorer,
			rng: &mut ChainRng,
			search: &[Word],
		) -> Result<Word> {
			self.inner.get_prev(state, selector, scorer, rng, search)
		}

		fn get_next(
			&mut self,
			state: &State,
			selector: &Selector,
			scorer: &Scorer,
			rng: &mut ChainRng,
			search: &[Word],
		) -> Result<Word> {
			self.inner.get_next(state, selector, scorer, rng, search)
		}

		fn update_snippets(&mut self, state: &State, scorer: &Scorer, windows: &WindowCounts) -> Result<()> {
			self.inner.update_snippets(state, scorer, windows)
		}

		fn prune(&mut self, state: &State, scorer: &Scorer) -> Result<()> {
			self.inner.prune(state, scorer)
		}
	}

	impl CacheableBackend for Counting {
		fn get_prevs(&mut self, suffix: &[Word]) -> Result<Vec<Snippet>> {
			self.lookups.set(self.lookups.get() + 1);
			self.inner.get_prevs(suffix)
		}

		fn get_nexts(&mut self, prefix: &[Word]) -> Result<Vec<Snippet>> {
			self.lookups.set(self.lookups.get() + 1);
			self.inner.get_nexts(prefix)
		}

		fn get_snippets(&mut self, keys: &[Words]) -> Result<HashMap<Words, Snippet>> {
			self.inner.get_snippets(keys)
		}

		fn flush(&mut self, state: &State, scorer: &Scorer, snippets: &[Snippet]) -> Result<()> {
			self.inner.flush(state, scorer, snippets)
		}

		fn snippet_count(&mut self) -> Result<usize> {
			self.inner.snippet_count()
		}

		fn nth_snippet(&mut self, index: usize) -> Result<Option<Snippet>> {
			self.inner.nth_snippet(index)
		}

		fn for_each_snippet(&mut self, visit: &mut dyn FnMut(&Snippet)) -> Result<()> {
			self.inner.for_each_snippet(visit)
		}
	}

	#[test]
	fn writes_are_visible_before_flush() {
		let mut cache = CacheBackend::new(SqliteBackend::open_in_memory().unwrap());
		cache.update_snippets(&at(0), &Scorer::no_adj(), &counts(&[&["a", "b", "c"]])).unwrap();

		assert_eq!(cache.inner().len().unwrap(), 0);
		assert_eq!(cache.pending(), 1);
		assert_eq!(next(&mut cache, &["a", "b"]), "c");
		assert_eq!(prev(&mut cache, &["b", "c"]), "a");
		assert_eq!(next(&mut cache, &["z", "b"]), LINE_END);
		assert_eq!(prev(&mut cache, &["z"]), LINE_START);
	}

	#[test]
	fn misses_and_hits_are_cached() {
		let lookups = Rc::new(Cell::new(0));
		let mut inner = MapBackend::new();
		inner.update_snippets(&at(0), &Scorer::no_adj(), &counts(&[&["a", "b"]])).unwrap();
		let mut cache = CacheBackend::new(Counting { inner, lookups: lookups.clone() });

		assert_eq!(next(&mut cache, &["a"]), "b");
		assert_eq!(next(&mut cache, &["a"]), "b");
		assert_eq!(lookups.get(), 1);

		assert_eq!(next(&mut cache, &["x"]), LINE_END);
		assert_eq!(next(&mut cache, &["x"]), LINE_END);
		assert_eq!(lookups.get(), 2);
	}

	#[test]
	fn write_pool_overrides_read_pool() {
		let mut inner = MapBackend::new();
		let windows = counts(&[&["a", "b"], &["a", "c"], &["a", "c"]]);
		inner.update_snippets(&at(0), &Scorer::no_adj(), &windows).unwrap();
		let mut cache = CacheBackend::new(inner);

		assert_eq!(next(&mut cache, &["a"]), "c");
		let boost = counts(&[&["a", "b"], &["a", "b"], &["a", "b"]]);
		cache.update_snippets(&at(1), &Scorer::no_adj(), &boost).unwrap();
		assert_eq!(next(&mut cache, &["a"]), "b");

		// the backend only learns about it on flush
		assert_eq!(cache.inner().get(&words(&["a", "b"])).unwrap().raw_score(), 1);
		cache.flush(&at(1), &Scorer::no_adj()).unwrap();
		assert_eq!(cache.inner().get(&words(&["a", "b"])).unwrap().raw_score(), 4);
	}

	#[test]
	fn updates_increment_backend_snippets() {
		let mut inner = SqliteBackend::open_in_memory().unwrap();
		inner.update_snippets(&at(0), &Scorer::no_adj(), &counts(&[&["a", "b"]])).unwrap();
		let mut cache = CacheBackend::new(inner);

		cache.update_snippets(&at(1), &Scorer::no_adj(), &counts(&[&["a", "b"]])).unwrap();
		cache.update_snippets(&at(2), &Scorer::no_adj(), &counts(&[&["a", "b"]])).unwrap();
		cache.store_state(&at(2)).unwrap();

		assert_eq!(cache.pending(), 0);
		let found = cache.backend.get_snippets(&[words(&["a", "b"])]).unwrap();
		assert_eq!(found[&words(&["a", "b"])].raw_score(), 3);
		assert_eq!(cache.create_state().unwrap(), at(2));
	}

	#[test]
	fn prune_flushes_then_prunes_backend() {
		let scorer = Scorer::count_adj(1);
		let mut cache = CacheBackend::new(SqliteBackend::open_in_memory().unwrap());
		cache.update_snippets(&at(0), &scorer, &counts(&[&["a", "b"]])).unwrap();
		cache.update_snippets(&at(0), &scorer, &counts(&[&["a", "c"], &["a", "c"]])).unwrap();

		cache.prune(&at(1), &scorer).unwrap();
		assert_eq!(cache.pending(), 0);
		assert_eq!(cache.inner().len().unwrap(), 1);
		assert_eq!(next(&mut cache, &["a"]), "c");
	}

	fn random_words<B: Backend>(backend: &mut B, state: &State, scorer: &Scorer) -> BTreeSet<Word> {
		let mut rng = rng();
		(0..200).map(|_| backend.get_random(state, scorer, &mut rng).unwrap()).collect()
	}

	#[test]
	fn random_word_covers_stored_and_written_snippets() {
		let scorer = Scorer::no_adj();
		let mut bare = MapBackend::new();
		bare.update_snippets(&at(0), &scorer, &counts(&[&["old"]])).unwrap();
		bare.update_snippets(&at(0), &scorer, &counts(&[&["new"]])).unwrap();

		let mut inner = MapBackend::new();
		inner.update_snippets(&at(0), &scorer, &counts(&[&["old"]])).unwrap();
		let mut cache = CacheBackend::new(inner);
		assert_eq!(cache.get_random(&at(0), &scorer, &mut rng()).unwrap(), "old");
		cache.update_snippets(&at(0), &scorer, &counts(&[&["new"]])).unwrap();
		assert_eq!(cache.pending(), 1);

		let expected: BTreeSet<Word> = ["new", "old"].map(String::from).into();
		assert_eq!(random_words(&mut bare, &at(0), &scorer), expected);
		assert_eq!(random_words(&mut cache, &at(0), &scorer), expected);
	}

	#[test]
	fn random_word_uses_the_written_score() {
		let scorer = Scorer::count_adj(1);
		let mut inner = MapBackend::new();
		inner.update_snippets(&at(0), &scorer, &counts(&[&["kept"], &["faded"]])).unwrap();
		let mut cache = CacheBackend::new(inner);
		// the stored "kept" is dead at count 3, its written version is not
		cache.update_snippets(&at(2), &scorer, &counts(&[&["kept"], &["kept"]])).unwrap();

		let expected: BTreeSet<Word> = ["kept"].map(String::from).into();
		assert_eq!(random_words(&mut cache, &at(3), &scorer), expected);
		assert_eq!(cache.get_random(&at(10), &scorer, &mut rng()).unwrap(), LINE_END);
	}

	#[test]
	fn single_words_stay_out_of_the_buckets() {
		let mut cache = CacheBackend::new(MapBackend::new());
		let vocabulary: Vec<String> = (0..50).map(|i| format!("w{i}")).collect();
		for word in &vocabulary {
			let mut windows = WindowCounts::new();
			windows.insert(vec![word.clone()], 1);
			cache.update_snippets(&at(0), &Scorer::no_adj(), &windows).unwrap();
		}
		assert_eq!(cache.pending(), 50);
		assert!(cache.prevs.is_empty());
		assert!(cache.nexts.is_empty());

		// a rewritten pair is listed once
		cache.update_snippets(&at(0), &Scorer::no_adj(), &counts(&[&["a", "b"]])).unwrap();
		cache.update_snippets(&at(0), &Scorer::no_adj(), &counts(&[&["a", "b"]])).unwrap();
		assert_eq!(cache.nexts[&words(&["a"])].write.len(), 1);
		assert_eq!(cache.prevs[&words(&["b"])].write.len(), 1);
		assert_eq!(next(&mut cache, &["a"]), "b");
	}

	#[test]
	fn failed_flush_keeps_pending_writes() {
		let mut cache = CacheBackend::new(SqliteBackend::open_in_memory().unwrap());
		cache.update_snippets(&at(0), &Scorer::no_adj(), &counts(&[&["a", "b"]])).unwrap();
		cache.backend.conn().execute_batch("DROP TABLE prevs").unwrap();

		assert!(cache.prune(&at(0), &Scorer::no_adj()).is_err());
		assert_eq!(cache.pending(), 1);
		assert_eq!(next(&mut cache, &["a"]), "b");
	}
}
