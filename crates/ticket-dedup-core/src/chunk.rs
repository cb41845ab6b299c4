//! Overlapping-window text chunker for over-length ticket summaries.
//!
//! Splits a record's embedding text into [`TextChunk`]s of at most
//! `chunk_size` characters, with `overlap` characters shared between
//! consecutive chunks. Every chunk carries its parent ticket key so that
//! index entries can be joined back to the catalog without relying on
//! position.
//!
//! # Algorithm
//!
//! 1. Text of at most `chunk_size` characters becomes a single chunk.
//! 2. Otherwise take a window of `chunk_size` characters.
//! 3. If the window ends mid-word, pull the end back to the last
//!    whitespace, as long as that still leaves more than `overlap`
//!    characters in the window.
//! 4. The next window starts `overlap` characters before the previous
//!    end, moved forward to the next word start inside the overlap.
//! 5. Repeat until the text is consumed.
//!
//! # Example
//!
//! ```rust
//! use ticket_dedup_core::chunk::{chunk_text, ChunkingParams};
//!
//! let params = ChunkingParams { chunk_size: 1000, overlap: 200 };
//! let chunks = chunk_text("BUG-1", "Loses charging plan on long routes", &params);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].parent_key, "BUG-1");
//! ```

use serde::{Deserialize, Serialize};

/// Window size and overlap, both in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingParams {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 200,
        }
    }
}

/// One embeddable piece of a ticket's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub parent_key: String,
    pub index: usize,
    pub text: String,
}

/// Split `text` into overlapping chunks tagged with `parent_key`.
///
/// # Guarantees
///
/// - At least one chunk is returned (even for empty text).
/// - Chunk indices are contiguous from 0.
/// - No chunk exceeds `chunk_size` characters.
/// - Progress is always made, even when `overlap >= chunk_size`.
pub fn chunk_text(parent_key: &str, text: &str, params: &ChunkingParams) -> Vec<TextChunk> {
    let chunk_size = params.chunk_size.max(1);
    let overlap = params.overlap.min(chunk_size - 1);
    let chars: Vec<char> = text.trim().chars().collect();

    if chars.len() <= chunk_size {
        return vec![make_chunk(parent_key, 0, text.trim().to_string())];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let mut end = (start + chunk_size).min(chars.len());

        if end < chars.len() && !chars[end].is_whitespace() {
            if let Some(ws) = (start + overlap + 1..end)
                .rev()
                .find(|&i| chars[i].is_whitespace())
            {
                end = ws;
            }
        }

        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            chunks.push(make_chunk(parent_key, chunks.len(), piece.to_string()));
        }

        if end >= chars.len() {
            break;
        }

        let mut next = end.saturating_sub(overlap).max(start + 1);
        if next > 0 && !chars[next - 1].is_whitespace() {
            if let Some(ws) = (next..end).find(|&i| chars[i].is_whitespace()) {
                next = ws + 1;
            }
        }
        start = next;
    }

    if chunks.is_empty() {
        chunks.push(make_chunk(parent_key, 0, String::new()));
    }

    chunks
}

fn make_chunk(parent_key: &str, index: usize, text: String) -> TextChunk {
    TextChunk {
        parent_key: parent_key.to_string(),
        index,
        text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(chunk_size: usize, overlap: usize) -> ChunkingParams {
        ChunkingParams {
            chunk_size,
            overlap,
        }
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_text("BUG-1", "  Announces wrong exit number  ", &params(100, 10));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "Announces wrong exit number");
    }

    #[test]
    fn test_empty_text() {
        let chunks = chunk_text("BUG-1", "", &params(100, 10));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "");
    }

    #[test]
    fn test_long_text_splits_within_limit() {
        let text = (0..60)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunk_text("BUG-7", &text, &params(50, 10));
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
            assert_eq!(c.parent_key, "BUG-7");
            assert!(c.text.chars().count() <= 50, "chunk too long: {:?}", c.text);
        }
    }

    #[test]
    fn test_chunks_overlap() {
        let text = (0..40)
            .map(|i| format!("w{:02}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunk_text("BUG-2", &text, &params(30, 8));
        for pair in chunks.windows(2) {
            let last_word = pair[0].text.split_whitespace().last().unwrap();
            assert!(
                pair[1].text.contains(last_word),
                "expected {:?} to repeat {:?}",
                pair[1].text,
                last_word
            );
        }
    }

    #[test]
    fn test_covers_whole_text() {
        let text = (0..40)
            .map(|i| format!("t{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunk_text("BUG-3", &text, &params(25, 5));
        for word in text.split_whitespace() {
            assert!(
                chunks.iter().any(|c| c.text.split_whitespace().any(|w| w == word)),
                "word {} lost",
                word
            );
        }
    }

    #[test]
    fn test_no_whitespace_hard_split() {
        let text = "x".repeat(95);
        let chunks = chunk_text("BUG-4", &text, &params(40, 10));
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| c.text.len() <= 40));
    }

    #[test]
    fn test_overlap_larger_than_size_still_progresses() {
        let text = "a ".repeat(50);
        let chunks = chunk_text("BUG-5", &text, &params(10, 50));
        assert!(!chunks.is_empty());
        assert!(chunks.len() < 200);
    }

    #[test]
    fn test_multibyte_chars() {
        let text = "ルート計算が失敗する ".repeat(20);
        let chunks = chunk_text("BUG-6", &text, &params(15, 3));
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.chars().count() <= 15);
        }
    }
}
