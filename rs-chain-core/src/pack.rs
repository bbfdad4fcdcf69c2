use crate::model::word::Words;

const DELIM: char = ',';
const ESCAPE: char = '\\';

/// Packs a word sequence into a single string key.
///
/// Words are joined with `,`. Inside a packed sequence of several words,
/// `,` and `\` are escaped with `\`. A lone word is passed through untouched
/// unless it contains `,`, in which case it is escaped the same way.
///
/// ```
/// use rs_chain_core::model::word::words;
/// use rs_chain_core::pack::pack;
///
/// assert_eq!(pack(&words(&["hello", "world"])), "hello,world");
/// assert_eq!(pack(&words(&["I'm", "fine,", "thanks"])), "I'm,fine\\,,thanks");
/// ```
pub fn pack<S: AsRef<str>>(words: &[S]) -> String {
	if let [word] = words {
		let word = word.as_ref();
		if !word.contains(DELIM) {
			return word.to_owned();
		}
	}

	let mut packed = String::with_capacity(words.iter().map(|w| w.as_ref().len() + 1).sum());
	for (i, word) in words.iter().enumerate() {
		if i > 0 {
			packed.push(DELIM);
		}
		for c in word.as_ref().chars() {
			if c == DELIM || c == ESCAPE {
				packed.push(ESCAPE);
			}
			packed.push(c);
		}
	}
	packed
}

/// Reverses [`pack`].
///
/// A string without `,` is a single word. Otherwise `\` makes the next
/// character literal; a trailing lone `\` is kept as is. The empty string
/// unpacks to the empty sequence.
pub fn unpack(packed: &str) -> Words {
	if packed.is_empty() {
		return Words::new();
	}
	if !packed.contains(DELIM) {
		return vec![packed.to_owned()];
	}

	let mut words = Words::new();
	let mut current = String::new();
	let mut chars = packed.chars();
	while let Some(c) = chars.next() {
		match c {
			ESCAPE => match chars.next() {
				Some(literal) => current.push(literal),
				None => current.push(ESCAPE),
			},
			DELIM => words.push(std::mem::take(&mut current)),
			c => current.push(c),
		}
	}
	words.push(current);
	words
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::word::{LINE_END, LINE_START, words};

	#[test]
	fn single_word_passes_through() {
		assert_eq!(pack(&["hello"]), "hello");
		assert_eq!(unpack("hello"), words(&["hello"]));

		assert_eq!(pack(&["back\\slash"]), "back\\slash");
		assert_eq!(unpack("back\\slash"), words(&["back\\slash"]));
	}

	#[test]
	fn several_words_are_joined() {
		assert_eq!(pack(&["hello", "world"]), "hello,world");
		assert_eq!(unpack("hello,world"), words(&["hello", "world"]));
	}

	#[test]
	fn sentinels_pack_verbatim() {
		let seq = words(&[LINE_START, "world", LINE_END]);
		let packed = pack(&seq);
		assert_eq!(packed, format!("{LINE_START},world,{LINE_END}"));
		assert_eq!(unpack(&packed), seq);
	}

	#[test]
	fn delimiter_inside_words_is_escaped() {
		assert_eq!(pack(&["same", ",OP"]), "same,\\,OP");
		assert_eq!(unpack("same,\\,OP"), words(&["same", ",OP"]));

		assert_eq!(pack(&["I'm", "fine,", "thanks"]), "I'm,fine\\,,thanks");
		assert_eq!(unpack("I'm,fine\\,,thanks"), words(&["I'm", "fine,", "thanks"]));

		assert_eq!(pack(&["hey!", "hi!,"]), "hey!,hi!\\,");
		assert_eq!(unpack("hey!,hi!\\,"), words(&["hey!", "hi!,"]));

		assert_eq!(pack(&["a,b"]), "a\\,b");
		assert_eq!(unpack("a\\,b"), words(&["a,b"]));
	}

	#[test]
	fn escape_character_round_trips() {
		for seq in [
			words(&["a\\", "b"]),
			words(&["a\\,b"]),
			words(&["\\", ",", "\\,"]),
			words(&[LINE_START, "x\\y", LINE_END]),
		] {
			assert_eq!(unpack(&pack(&seq)), seq, "{seq:?}");
		}
	}

	#[test]
	fn trailing_escape_is_kept() {
		assert_eq!(unpack("hey!,hello\\"), words(&["hey!", "hello\\"]));
	}

	#[test]
	fn empty_sequence() {
		let empty: [&str; 0] = [];
		assert_eq!(pack(&empty), "");
		assert!(unpack("").is_empty());
	}
}
