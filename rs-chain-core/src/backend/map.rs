use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

use rand::seq::IteratorRandom;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::{Backend, CacheableBackend, WindowCounts, backoff_next, backoff_prev, random_candidate};
use crate::error::Result;
use crate::model::scorer::Scorer;
use crate::model::selector::{ChainRng, Selector};
use crate::model::snippet::Snippet;
use crate::model::state::State;
use crate::model::word::{LINE_END, Word, Words};

/// Authoritative in-memory snippet store.
///
/// Snippets are keyed by their words. Two indexes map each prefix and each
/// suffix to the sorted keys of the snippets sharing it.
///
/// # Responsibilities
/// - Hold every snippet and keep both indexes in sync
/// - Optionally snapshot itself (snippets and state) with `postcard`
///
/// ## Invariants
/// - Each key of two or more words in `snippets` appears once in
///   `nexts[prefix]` and once in `prevs[suffix]`; single words are not indexed
/// - No index bucket is ever empty
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct MapBackend {
	snippets: BTreeMap<Words, Snippet>,
	prevs: HashMap<Words, Vec<Words>>,
	nexts: HashMap<Words, Vec<Words>>,
	state: Option<State>,
	/// Snapshot file written on `store_state`, if any.
	#[serde(skip)]
	path: Option<PathBuf>,
}

impl MapBackend {
	/// Creates an empty store that lives in memory only.
	pub fn new() -> Self {
		Self::default()
	}

	/// Opens a store bound to a snapshot file.
	///
	/// # Parameters
	/// - `path`: snapshot location. Loaded if it exists, otherwise the store
	///   starts empty. Written back atomically by `store_state`.
	///
	/// # Errors
	/// - `ChainError::Io` if the file exists but cannot be read.
	/// - `ChainError::Snapshot` if its content is not a valid snapshot.
	pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
		let path = path.as_ref();
		let mut backend = if path.exists() {
			let bytes = std::fs::read(path)?;
			let backend: MapBackend = postcard::from_bytes(&bytes)?;
			info!(path = %path.display(), snippets = backend.len(), "loaded snapshot");
			backend
		} else {
			debug!(path = %path.display(), "no snapshot, starting empty");
			MapBackend::new()
		};
		backend.path = Some(path.to_path_buf());
		Ok(backend)
	}

	/// Number of stored snippets.
	pub fn len(&self) -> usize {
		self.snippets.len()
	}

	pub fn is_empty(&self) -> bool {
		self.snippets.is_empty()
	}

	/// Stored snippet for `words`, if any.
	pub fn get(&self, words: &[Word]) -> Option<&Snippet> {
		self.snippets.get(words)
	}

	/// Writes the snapshot through a temporary file in the same directory,
	/// then renames it over the target.
	fn save(&self) -> Result<()> {
		let Some(path) = &self.path else {
			return Ok(());
		};

		let bytes = postcard::to_allocvec(self)?;
		let parent = match path.parent() {
			Some(parent) if !parent.as_os_str().is_empty() => parent,
			_ => Path::new("."),
		};
		std::fs::create_dir_all(parent)?;

		let mut file = NamedTempFile::new_in(parent)?;
		file.write_all(&bytes)?;
		file.persist(path).map_err(|e| e.error)?;

		info!(path = %path.display(), snippets = self.len(), bytes = bytes.len(), "wrote snapshot");
		Ok(())
	}

	/// Inserts or replaces `snippet`, indexing it if it is new.
	fn put(&mut self, snippet: Snippet) {
		let key = snippet.words().clone();
		if !self.snippets.contains_key(&key) {
			index_key(&mut self.prevs, snippet.suffix(), &key);
			index_key(&mut self.nexts, snippet.prefix(), &key);
		}
		self.snippets.insert(key, snippet);
	}

	/// Removes `key` and its two index entries.
	fn remove(&mut self, key: &Words) {
		let Some(snippet) = self.snippets.remove(key) else {
			return;
		};
		unindex(&mut self.prevs, snippet.suffix(), key);
		unindex(&mut self.nexts, snippet.prefix(), key);
	}

	/// Snippets listed in `index[key]`, in word order.
	fn bucket<'a>(&'a self, index: &'a HashMap<Words, Vec<Words>>, key: &[Word]) -> Vec<&'a Snippet> {
		match index.get(key) {
			Some(keys) => keys.iter().filter_map(|k| self.snippets.get(k)).collect(),
			None => Vec::new(),
		}
	}
}

/// Adds `key` to `index[bucket]`, keeping the bucket sorted. The empty
/// bucket is never kept.
fn index_key(index: &mut HashMap<Words, Vec<Words>>, bucket: &[Word], key: &Words) {
	if bucket.is_empty() {
		return;
	}
	let keys = index.entry(bucket.to_vec()).or_default();
	if let Err(pos) = keys.binary_search(key) {
		keys.insert(pos, key.clone());
	}
}

fn unindex(index: &mut HashMap<Words, Vec<Words>>, bucket: &[Word], key: &Words) {
	if let Some(keys) = index.get_mut(bucket) {
		if let Ok(pos) = keys.binary_search(key) {
			keys.remove(pos);
		}
		if keys.is_empty() {
			index.remove(bucket);
		}
	}
}

impl Backend for MapBackend {
	fn create_state(&mut self) -> Result<State> {
		Ok(self.state.unwrap_or_else(State::now))
	}

	fn store_state(&mut self, state: &State) -> Result<()> {
		self.state = Some(*state);
		self.save()
	}

	fn get_random(&mut self, state: &State, scorer: &Scorer, rng: &mut ChainRng) -> Result<Word> {
		let word = self
			.snippets
			.values()
			.filter_map(|s| random_candidate(s, state, scorer))
			.choose(rng)
			.cloned();
		Ok(word.unwrap_or_else(|| LINE_END.to_owned()))
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
			let candidates = self.bucket(&self.prevs, key);
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
			let candidates = self.bucket(&self.nexts, key);
			Ok(selector.select(&candidates, scorer, state, rng).map(|s| s.back().clone()))
		})
	}

	fn update_snippets(&mut self, state: &State, scorer: &Scorer, windows: &WindowCounts) -> Result<()> {
		for (words, count) in windows {
			match self.snippets.get_mut(words) {
				Some(snippet) => {
					snippet.increment(scorer, state, *count);
				}
				None => self.put(Snippet::new(words.clone(), *state, *count)),
			}
		}
		Ok(())
	}

	fn prune(&mut self, state: &State, scorer: &Scorer) -> Result<()> {
		let dead: Vec<Words> = self
			.snippets
			.values()
			.filter(|s| s.score(scorer, state) == 0)
			.map(|s| s.words().clone())
			.collect();
		for key in &dead {
			self.remove(key);
		}
		info!(pruned = dead.len(), remaining = self.len(), "pruned snippets");
		Ok(())
	}
}

impl CacheableBackend for MapBackend {
	fn get_prevs(&mut self, suffix: &[Word]) -> Result<Vec<Snippet>> {
		Ok(self.bucket(&self.prevs, suffix).into_iter().cloned().collect())
	}

	fn get_nexts(&mut self, prefix: &[Word]) -> Result<Vec<Snippet>> {
		Ok(self.bucket(&self.nexts, prefix).into_iter().cloned().collect())
	}

	fn get_snippets(&mut self, keys: &[Words]) -> Result<HashMap<Words, Snippet>> {
		Ok(keys
			.iter()
			.filter_map(|k| self.snippets.get(k).map(|s| (k.clone(), s.clone())))
			.collect())
	}

	fn flush(&mut self, _state: &State, _scorer: &Scorer, snippets: &[Snippet]) -> Result<()> {
		debug!(count = snippets.len(), "flushing snippets");
		for snippet in snippets {
			self.put(snippet.clone());
		}
		Ok(())
	}

	fn snippet_count(&mut self) -> Result<usize> {
		Ok(self.len())
	}

	fn nth_snippet(&mut self, index: usize) -> Result<Option<Snippet>> {
		Ok(self.snippets.values().nth(index).cloned())
	}

	fn for_each_snippet(&mut self, visit: &mut dyn FnMut(&Snippet)) -> Result<()> {
		self.snippets.values().for_each(visit);
		Ok(())
	}
}
