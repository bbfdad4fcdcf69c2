//! Top-level module for the word chain model.
//!
//! This module provides the pieces a backend stores and the engine drives:
//! - Words, word sequences and the line sentinels (`word`)
//! - The decay clock (`State`)
//! - Scored word windows (`Snippet`)
//! - Score adjustment (`Scorer`) and candidate selection (`Selector`)
//! - The high-level engine (`Chain`)

/// High-level engine inserting lines and growing sequences from a seed.
///
/// Slides look-ahead windows over each inserted line and walks the stored
/// model outward in both directions when producing.
pub mod chain;

/// Words, word sequences and the `LINE_START`/`LINE_END` sentinels.
pub mod word;

/// Monotonic clock (elapsed time and line count) used for score decay.
pub mod state;

/// A stored word window with its raw score and last-seen state.
pub mod snippet;

/// Score adjustment strategies (`no_adj`, `count_adj`, `time_adj`).
pub mod scorer;

/// Candidate selection strategies (`best_always`, `random`, `best_weighted`).
pub mod selector;
