use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// The decay clock of a store.
///
/// A `State` pairs the current wall-clock time with the number of lines
/// observed so far. Scorers compare the state captured when a snippet was
/// last updated against the current one to compute decay.
///
/// ## Invariants
/// - Exactly one logical `State` exists per store; it is read when a session
///   starts and written back when the session is finalized
/// - `count` never decreases
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct State {
	/// Seconds since the Unix epoch.
	pub time: i64,
	/// Total number of lines observed.
	pub count: u64,
}

impl State {
	pub fn new(time: i64, count: u64) -> Self {
		Self { time, count }
	}

	/// A fresh state starting now with nothing observed.
	pub fn now() -> Self {
		Self::new(unix_now(), 0)
	}
}

/// Current time in seconds since the Unix epoch.
///
/// Falls back to 0 for clocks set before the epoch.
pub fn unix_now() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs() as i64)
		.unwrap_or(0)
}
