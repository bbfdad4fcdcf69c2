use thiserror::Error;

/// Errors surfaced by the chain engine and its backends.
///
/// Absence of data is never an error: lookups that find nothing return the
/// `LINE_START`/`LINE_END` sentinels or an empty sequence instead.
#[derive(Error, Debug)]
pub enum ChainError {
	/// A SQLite statement failed. `query` holds the statement text.
	#[error("storage error in `{query}`: {source}")]
	Storage {
		query: String,
		#[source]
		source: rusqlite::Error,
	},
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("snapshot error: {0}")]
	Snapshot(#[from] postcard::Error),
	/// `produce` was called with both `max_words` and `max_chars` set to 0.
	#[error("at least one of max_words or max_chars must be non-zero")]
	NoLimit,
	#[error("look size must be at least 1")]
	InvalidLookSize,
	#[error("invalid configuration: {0}")]
	InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ChainError>;
