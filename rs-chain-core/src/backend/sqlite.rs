use std::collections::HashMap;
use std::path::Path;

use rand::seq::IndexedRandom;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, error, info, warn};

use super::{
	Backend, CacheableBackend, WindowCounts, backoff_next, backoff_prev, random_candidate, sample_by_rejection,
};
use crate::error::{ChainError, Result};
use crate::model::scorer::Scorer;
use crate::model::selector::{ChainRng, Selector};
use crate::model::snippet::Snippet;
use crate::model::state::State;
use crate::model::word::{LINE_END, Word, Words};
use crate::pack::{pack, unpack};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS state (
	key TEXT PRIMARY KEY NOT NULL,
	value INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS snippets (
	id INTEGER PRIMARY KEY AUTOINCREMENT,
	words TEXT UNIQUE NOT NULL,
	score INTEGER NOT NULL,
	time INTEGER NOT NULL,
	count INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS prevs (
	search TEXT NOT NULL,
	snippet_id INTEGER NOT NULL REFERENCES snippets(id) ON DELETE CASCADE
);
CREATE TABLE IF NOT EXISTS nexts (
	search TEXT NOT NULL,
	snippet_id INTEGER NOT NULL REFERENCES snippets(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS prevs_search ON prevs(search);
CREATE INDEX IF NOT EXISTS nexts_search ON nexts(search);
CREATE INDEX IF NOT EXISTS prevs_snippet ON prevs(snippet_id);
CREATE INDEX IF NOT EXISTS nexts_snippet ON nexts(snippet_id);
";

const SNIPPET_COLUMNS: &str = "snippets.words, snippets.score, snippets.time, snippets.count";

/// Attaches the failing statement to a SQLite error and logs it.
trait QueryContext<T> {
	fn context(self, query: &str) -> Result<T>;
}

impl<T> QueryContext<T> for rusqlite::Result<T> {
	fn context(self, query: &str) -> Result<T> {
		self.map_err(|source| {
			error!(query, error = %source, "storage query failed");
			ChainError::Storage { query: query.to_owned(), source }
		})
	}
}

/// Persistent snippet store on SQLite.
///
/// Snippets are keyed by their packed words and referenced from the `prevs`
/// and `nexts` index tables through a surrogate id. Replacing a snippet
/// deletes its row (cascading to its index rows) and inserts a fresh one.
///
/// Lookups go straight to the database; put a `CacheBackend` in front of it
/// for anything beyond a handful of calls.
///
/// ## Invariants
/// - Multi-row writes (`flush`, `prune`, `store_state`) run in a single
///   transaction, rolled back on any failure
/// - Foreign keys are enforced on the connection
pub struct SqliteBackend {
	conn: Connection,
}

impl SqliteBackend {
	/// Opens (or creates) a database file.
	///
	/// # Errors
	/// - `ChainError::Storage` if the file cannot be opened or the schema
	///   cannot be created.
	pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
		let path = path.as_ref();
		let conn = Connection::open(path).context("open")?;
		debug!(path = %path.display(), "opened sqlite store");
		Self::init(conn)
	}

	/// Opens a private in-memory database.
	pub fn open_in_memory() -> Result<Self> {
		let conn = Connection::open_in_memory().context("open")?;
		Self::init(conn)
	}

	fn init(conn: Connection) -> Result<Self> {
		conn.execute_batch("PRAGMA foreign_keys=ON;").context("PRAGMA foreign_keys=ON")?;
		conn.execute_batch(SCHEMA).context("schema")?;
		Ok(Self { conn })
	}

	/// Number of stored snippets.
	pub fn len(&self) -> Result<usize> {
		let query = "SELECT COUNT(*) FROM snippets";
		let count: i64 = self.conn.query_row(query, [], |row| row.get(0)).context(query)?;
		Ok(count as usize)
	}

	pub fn is_empty(&self) -> Result<bool> {
		Ok(self.len()? == 0)
	}

	#[cfg(test)]
	pub(crate) fn conn(&self) -> &Connection {
		&self.conn
	}

	/// Runs `f` inside `BEGIN`/`COMMIT`, rolling back if `f` or the commit
	/// fails. A failed rollback is logged and the first error returned.
	fn transaction<T, F>(&self, f: F) -> Result<T>
	where
		F: FnOnce(&Connection) -> Result<T>,
	{
		self.conn.execute_batch("BEGIN").context("BEGIN")?;
		let result = f(&self.conn).and_then(|value| {
			self.conn.execute_batch("COMMIT").context("COMMIT")?;
			Ok(value)
		});
		if result.is_err() {
			if let Err(e) = self.conn.execute_batch("ROLLBACK") {
				warn!(error = %e, "rollback failed");
			}
		}
		result
	}

	/// Snippets referenced from `table` (`prevs` or `nexts`) under `search`,
	/// in word order.
	fn indexed(&self, table: &str, search: &[Word]) -> Result<Vec<Snippet>> {
		let query = format!(
			"SELECT {SNIPPET_COLUMNS} FROM {table} \
			 JOIN snippets ON snippets.id = {table}.snippet_id \
			 WHERE {table}.search = ?1"
		);
		let mut stmt = self.conn.prepare_cached(&query).context(&query)?;
		let rows = stmt.query_map(params![pack(search)], row_to_snippet).context(&query)?;
		let mut snippets = rows.collect::<rusqlite::Result<Vec<_>>>().context(&query)?;
		// packed order differs from word order
		snippets.sort_by(|a, b| a.words().cmp(b.words()));
		Ok(snippets)
	}
}

/// Reads `words, score, time, count` starting at column 0.
fn row_to_snippet(row: &Row<'_>) -> rusqlite::Result<Snippet> {
	row_to_snippet_at(row, 0)
}

/// Reads `words, score, time, count` starting at column `offset`.
fn row_to_snippet_at(row: &Row<'_>, offset: usize) -> rusqlite::Result<Snippet> {
	let words: String = row.get(offset)?;
	let score: i64 = row.get(offset + 1)?;
	let time: i64 = row.get(offset + 2)?;
	let count: i64 = row.get(offset + 3)?;
	Ok(Snippet::new(unpack(&words), State::new(time, count as u64), score as u64))
}

fn read_state_value(conn: &Connection, key: &str) -> Result<Option<i64>> {
	let query = "SELECT value FROM state WHERE key = ?1";
	conn.query_row(query, params![key], |row| row.get(0))
		.optional()
		.context(query)
}

impl Backend for SqliteBackend {
	fn create_state(&mut self) -> Result<State> {
		let time = read_state_value(&self.conn, "time")?;
		let count = read_state_value(&self.conn, "count")?;
		let state = match (time, count) {
			(Some(time), Some(count)) => State::new(time, count as u64),
			_ => State::now(),
		};
		debug!(time = state.time, count = state.count, "loaded state");
		Ok(state)
	}

	fn store_state(&mut self, state: &State) -> Result<()> {
		self.transaction(|conn| {
			let query = "INSERT OR REPLACE INTO state (key, value) VALUES (?1, ?2)";
			let mut stmt = conn.prepare_cached(query).context(query)?;
			stmt.execute(params!["time", state.time]).context(query)?;
			stmt.execute(params!["count", state.count as i64]).context(query)?;
			Ok(())
		})
	}

	fn get_random(&mut self, state: &State, scorer: &Scorer, rng: &mut ChainRng) -> Result<Word> {
		let total = self.len()?;
		let sampled = sample_by_rejection(total, rng, |index| {
			let snippet = self.nth_snippet(index)?;
			Ok(snippet.and_then(|s| random_candidate(&s, state, scorer).cloned()))
		})?;
		if let Some(word) = sampled {
			return Ok(word);
		}

		// mostly dead or sentinel rows: exact draw over a scan
		let mut live = Vec::new();
		self.for_each_snippet(&mut |s| {
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
			let snippets = self.get_prevs(key)?;
			let candidates: Vec<&Snippet> = snippets.iter().collect();
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
			let snippets = self.get_nexts(key)?;
			let candidates: Vec<&Snippet> = snippets.iter().collect();
			Ok(selector.select(&candidates, scorer, state, rng).map(|s| s.back().clone()))
		})
	}

	fn update_snippets(&mut self, state: &State, scorer: &Scorer, windows: &WindowCounts) -> Result<()> {
		let keys: Vec<Words> = windows.keys().cloned().collect();
		let mut existing = self.get_snippets(&keys)?;

		let mut updated = Vec::with_capacity(windows.len());
		for (words, count) in windows {
			let snippet = match existing.remove(words) {
				Some(mut snippet) => {
					snippet.increment(scorer, state, *count);
					snippet
				}
				None => Snippet::new(words.clone(), *state, *count),
			};
			updated.push(snippet);
		}
		self.flush(state, scorer, &updated)
	}

	fn prune(&mut self, state: &State, scorer: &Scorer) -> Result<()> {
		let query = "SELECT id, words, score, time, count FROM snippets";
		let dead: Vec<i64> = {
			let mut stmt = self.conn.prepare(query).context(query)?;
			let rows = stmt
				.query_map([], |row| Ok((row.get::<_, i64>(0)?, row_to_snippet_at(row, 1)?)))
				.context(query)?;
			let mut dead = Vec::new();
			for row in rows {
				let (id, snippet) = row.context(query)?;
				if snippet.score(scorer, state) == 0 {
					dead.push(id);
				}
			}
			dead
		};
		info!(count = dead.len(), "snippets to prune");
		if dead.is_empty() {
			return Ok(());
		}

		self.transaction(|conn| {
			let query = "DELETE FROM snippets WHERE id = ?1";
			let mut stmt = conn.prepare_cached(query).context(query)?;
			for id in &dead {
				stmt.execute(params![id]).context(query)?;
			}
			Ok(())
		})?;
		info!(pruned = dead.len(), "pruned snippets");
		Ok(())
	}
}

impl CacheableBackend for SqliteBackend {
	fn get_prevs(&mut self, suffix: &[Word]) -> Result<Vec<Snippet>> {
		self.indexed("prevs", suffix)
	}

	fn get_nexts(&mut self, prefix: &[Word]) -> Result<Vec<Snippet>> {
		self.indexed("nexts", prefix)
	}

	fn get_snippets(&mut self, keys: &[Words]) -> Result<HashMap<Words, Snippet>> {
		let query = "SELECT words, score, time, count FROM snippets WHERE words = ?1";
		let mut stmt = self.conn.prepare_cached(query).context(query)?;
		let mut found = HashMap::with_capacity(keys.len());
		for key in keys {
			let snippet = stmt
				.query_row(params![pack(key)], row_to_snippet)
				.optional()
				.context(query)?;
			if let Some(snippet) = snippet {
				found.insert(key.clone(), snippet);
			}
		}
		debug!(requested = keys.len(), found = found.len(), "fetched snippets");
		Ok(found)
	}

	fn flush(&mut self, state: &State, _scorer: &Scorer, snippets: &[Snippet]) -> Result<()> {
		if snippets.is_empty() {
			return Ok(());
		}
		debug!(count = snippets.len(), lines = state.count, "flushing snippets");

		self.transaction(|conn| {
			let delete = "DELETE FROM snippets WHERE words = ?1";
			let insert = "INSERT INTO snippets (words, score, time, count) VALUES (?1, ?2, ?3, ?4)";
			let index_prev = "INSERT INTO prevs (search, snippet_id) VALUES (?1, ?2)";
			let index_next = "INSERT INTO nexts (search, snippet_id) VALUES (?1, ?2)";

			for snippet in snippets {
				let words = pack(snippet.words());
				let last = snippet.last_state();

				conn.prepare_cached(delete).context(delete)?.execute(params![words]).context(delete)?;
				conn.prepare_cached(insert)
					.context(insert)?
					.execute(params![words, snippet.raw_score() as i64, last.time, last.count as i64])
					.context(insert)?;
				let id = conn.last_insert_rowid();

				// single words have nothing to index
				if snippet.words().len() > 1 {
					conn.prepare_cached(index_prev)
						.context(index_prev)?
						.execute(params![pack(snippet.suffix()), id])
						.context(index_prev)?;
					conn.prepare_cached(index_next)
						.context(index_next)?
						.execute(params![pack(snippet.prefix()), id])
						.context(index_next)?;
				}
			}
			Ok(())
		})
	}

	fn snippet_count(&mut self) -> Result<usize> {
		self.len()
	}

	fn nth_snippet(&mut self, index: usize) -> Result<Option<Snippet>> {
		let query = "SELECT words, score, time, count FROM snippets ORDER BY id LIMIT 1 OFFSET ?1";
		let mut stmt = self.conn.prepare_cached(query).context(query)?;
		stmt.query_row(params![index as i64], row_to_snippet)
			.optional()
			.context(query)
	}

	fn for_each_snippet(&mut self, visit: &mut dyn FnMut(&Snippet)) -> Result<()> {
		let query = "SELECT words, score, time, count FROM snippets ORDER BY id";
		let mut stmt = self.conn.prepare_cached(query).context(query)?;
		let rows = stmt.query_map([], row_to_snippet).context(query)?;
		for snippet in rows {
			visit(&snippet.context(query)?);
		}
		Ok(())
	}
}
