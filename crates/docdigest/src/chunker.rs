//! Splits extracted text into bounded, ordered chunks.

use std::num::NonZeroUsize;

/// A contiguous slice of the source text. `index` is its zero-based position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
}

/// Splits `text` into chunks of at most `max_chars` characters.
///
/// Chunks cover the input without gaps or overlaps, so concatenating their
/// texts in index order reproduces `text` exactly. Boundaries fall on `char`
/// boundaries, never inside a UTF-8 sequence. Empty input yields no chunks.
pub fn split(text: &str, max_chars: NonZeroUsize) -> Vec<Chunk> {
    let max_chars = max_chars.get();
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;

    for (offset, _) in text.char_indices() {
        if count == max_chars {
            chunks.push(Chunk {
                index: chunks.len(),
                text: text[start..offset].to_string(),
            });
            start = offset;
            count = 0;
        }
        count += 1;
    }

    if start < text.len() {
        chunks.push(Chunk {
            index: chunks.len(),
            text: text[start..].to_string(),
        });
    }

    chunks
}
