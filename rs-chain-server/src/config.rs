use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

use rs_chain_core::backend::{Backend, CacheBackend, MapBackend, SqliteBackend};
use rs_chain_core::config::ChainConfig;
use rs_chain_core::{Chain, ChainError, Result};

/// Environment variable naming the config file when no argument is given.
pub const CONFIG_ENV: &str = "RS_CHAIN_CONFIG";

/// Engine behind the server, whatever the configured store.
pub type ServerChain = Chain<Box<dyn Backend + Send>>;

/// Server settings, read from a TOML file.
///
/// Every field has a default, so a missing file serves an in-memory store
/// on 127.0.0.1:5000.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
	pub host: String,
	pub port: u16,
	pub backend: BackendConfig,
	/// Lines inserted between two automatic prunes (0 = never).
	pub prune_every: usize,
	/// Default word limit of `/v1/produce`.
	pub max_words: usize,
	/// Default character limit of `/v1/produce`.
	pub max_chars: usize,
	pub chain: ChainConfig,
}

/// Where snippets are kept.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
	/// In-memory store, optionally snapshotted to a file on shutdown.
	Memory {
		#[serde(default)]
		snapshot: Option<PathBuf>,
	},
	/// SQLite database, behind a write-back cache unless `cache = false`.
	Sqlite {
		path: PathBuf,
		#[serde(default = "default_cache")]
		cache: bool,
	},
}

fn default_cache() -> bool {
	true
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			host: "127.0.0.1".to_owned(),
			port: 5000,
			backend: BackendConfig::Memory { snapshot: None },
			prune_every: 1000,
			max_words: 50,
			max_chars: 0,
			chain: ChainConfig::default(),
		}
	}
}

impl ServerConfig {
	/// Reads the config at `path`, or the defaults if there is none.
	///
	/// # Errors
	/// - `ChainError::Io` if the file exists but cannot be read.
	/// - `ChainError::InvalidConfig` if it is not valid TOML for this schema,
	///   or fails `validate`.
	pub fn load(path: Option<&Path>) -> Result<Self> {
		let config = match path {
			Some(path) if path.exists() => {
				let text = fs::read_to_string(path)?;
				info!(path = %path.display(), "loading config");
				Self::parse(&text)?
			}
			Some(path) => {
				warn!(path = %path.display(), "config file not found, using defaults");
				Self::default()
			}
			None => Self::default(),
		};
		config.validate()?;
		Ok(config)
	}

	pub fn parse(text: &str) -> Result<Self> {
		toml::from_str(text).map_err(|e| ChainError::InvalidConfig(e.to_string()))
	}

	/// # Errors
	/// - `ChainError::InvalidLookSize` from the `[chain]` table.
	/// - `ChainError::InvalidConfig` if both default limits are 0.
	pub fn validate(&self) -> Result<()> {
		self.chain.validate()?;
		if self.max_words == 0 && self.max_chars == 0 {
			return Err(ChainError::InvalidConfig("max_words and max_chars cannot both be 0".into()));
		}
		Ok(())
	}

	/// Opens the configured store and builds the engine over it.
	pub fn open_chain(&self) -> Result<ServerChain> {
		let backend: Box<dyn Backend + Send> = match &self.backend {
			BackendConfig::Memory { snapshot: Some(path) } => Box::new(MapBackend::open(path)?),
			BackendConfig::Memory { snapshot: None } => Box::new(MapBackend::new()),
			BackendConfig::Sqlite { path, cache: true } => Box::new(CacheBackend::new(SqliteBackend::open(path)?)),
			BackendConfig::Sqlite { path, cache: false } => Box::new(SqliteBackend::open(path)?),
		};
		info!(backend = ?self.backend, look_size = self.chain.look_size, "opening chain");
		Chain::from_config(backend, &self.chain)
	}
}
