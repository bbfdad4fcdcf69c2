//! Word-level Markov chain library.
//!
//! This crate provides a snippet store for word n-grams including:
//! - Windowed word sequences with decaying scores (`Snippet`)
//! - Pluggable scoring and selection strategies
//! - An in-memory backend, a SQLite backend and a write-back cache
//! - A chain engine that grows sequences outward from a seed
//!
//! The engine (`model::chain::Chain`) is the entry point; backends are
//! swapped in through the `backend::Backend` trait.

/// Data model, scoring, selection and the chain engine.
pub mod model;

/// Storage backends and the caching layer.
pub mod backend;

/// Engine configuration (look size, scorer, selector, RNG seed).
pub mod config;

/// Error type shared by every layer.
pub mod error;

/// Word sequence packing, used as a persistence and index key.
pub mod pack;

pub use error::{ChainError, Result};
pub use model::chain::Chain;
pub use model::word::{LINE_END, LINE_START, Word, Words};
