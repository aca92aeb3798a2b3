//! Extraction of candidate hint words from file content.

use crate::analyzer;

/// Hint words must be strictly longer than this many characters.
pub const MIN_WORD_LEN: usize = 3;
/// ...and strictly shorter than this many characters.
pub const MAX_WORD_LEN: usize = 200;

/// Split `content` with the code tokenizer rules and yield every token whose
/// character length lies strictly inside `(MIN_WORD_LEN, MAX_WORD_LEN)`.
///
/// Case is preserved; deduplication is the caller's concern.
pub fn segment(content: &str) -> impl Iterator<Item = &str> {
    analyzer::tokenize(content).filter(|token| {
        let len = token.chars().count();
        len > MIN_WORD_LEN && len < MAX_WORD_LEN
    })
}
