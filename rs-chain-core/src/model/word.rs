/// A single text token.
pub type Word = String;

/// An ordered run of words, used both as a storage key and as a search key.
pub type Words = Vec<Word>;

/// Sentinel marking the start of a line.
pub const LINE_START: &str = "\u{2}";

/// Sentinel marking the end of a line.
pub const LINE_END: &str = "\u{3}";

/// Returns `true` for `LINE_START` and `LINE_END`.
pub fn is_sentinel(word: &str) -> bool {
	word == LINE_START || word == LINE_END
}

/// Builds an owned word sequence from anything string-like.
///
/// Convenience for callers holding `&str` tokens:
/// `words(&["hello", "world"])`.
pub fn words<S: AsRef<str>>(tokens: &[S]) -> Words {
	tokens.iter().map(|t| t.as_ref().to_owned()).collect()
}

/// Returns the last `n` words of `line` (all of it if shorter).
pub(crate) fn last_n<'a, I>(line: I, n: usize) -> Words
where
	I: ExactSizeIterator<Item = &'a Word>,
{
	let skip = line.len().saturating_sub(n);
	line.skip(skip).cloned().collect()
}

/// Returns the first `n` words of `line` (all of it if shorter).
pub(crate) fn first_n<'a, I>(line: I, n: usize) -> Words
where
	I: Iterator<Item = &'a Word>,
{
	line.take(n).cloned().collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sentinels_are_distinct_and_recognized() {
		assert_ne!(LINE_START, LINE_END);
		assert!(is_sentinel(LINE_START));
		assert!(is_sentinel(LINE_END));
		assert!(!is_sentinel("word"));
	}

	#[test]
	fn first_and_last_windows() {
		let line = words(&["a", "b", "c", "d"]);
		assert_eq!(last_n(line.iter(), 2), words(&["c", "d"]));
		assert_eq!(first_n(line.iter(), 2), words(&["a", "b"]));
		assert_eq!(last_n(line.iter(), 10), line);
		assert_eq!(first_n(line.iter(), 10), line);
	}
}
