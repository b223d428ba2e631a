//! Recursive, boundary-preferring text splitter.
//!
//! Page text is first cut into pieces no longer than `chunk_size`, trying
//! paragraph breaks, then line breaks, then sentence ends, then spaces, and
//! finally a hard character cut. Separators stay attached to the piece they
//! end, so the pieces concatenate back to the original text. Pieces are then
//! packed greedily into chunks. With a non-zero overlap every chunk after
//! the first starts with the tail of its predecessor.
//!
//! All lengths are counted in `char`s, never bytes.

use std::ops::Range;

use crate::config::Config;
use crate::error::{RagError, Result};
use crate::models::Document;

/// Boundaries tried in order before falling back to a hard cut.
pub const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

#[derive(Debug, Clone, Copy)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::Configuration("chunk_size must be > 0".into()));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::Configuration(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    /// Byte ranges of the chunks of `text`, in order.
    pub fn split_ranges(&self, text: &str) -> Vec<Range<usize>> {
        let mut pieces = Vec::new();
        split_pieces(text, &SEPARATORS, self.chunk_size, 0, &mut pieces);
        self.merge(text, &pieces)
            .into_iter()
            .filter(|r| !text[r.clone()].trim().is_empty())
            .collect()
    }

    pub fn split_text<'a>(&self, text: &'a str) -> Vec<&'a str> {
        self.split_ranges(text)
            .into_iter()
            .map(|r| &text[r])
            .collect()
    }

    /// Split each page independently. Chunks inherit the page metadata and
    /// gain `chunk_index` and `start_index` (character offset in the page).
    pub fn split_documents(&self, documents: &[Document]) -> Vec<Document> {
        let mut out = Vec::new();
        for doc in documents {
            let text = doc.content.as_str();
            for (index, range) in self.split_ranges(text).into_iter().enumerate() {
                let start_index = text[..range.start].chars().count();
                let mut chunk = Document {
                    content: text[range].to_string(),
                    metadata: doc.metadata.clone(),
                };
                chunk = chunk
                    .with_metadata("chunk_index", index)
                    .with_metadata("start_index", start_index);
                out.push(chunk);
            }
        }
        out
    }

    fn merge(&self, text: &str, pieces: &[Range<usize>]) -> Vec<Range<usize>> {
        let mut chunks = Vec::new();
        let mut start = 0;
        let mut cursor = 0;
        let mut len = 0;
        // Characters added after the overlap prefix.
        let mut fresh = 0;
        let mut i = 0;

        while i < pieces.len() {
            let end = pieces[i].end;
            let piece = &text[cursor..end];
            let piece_len = piece.chars().count();

            if len + piece_len <= self.chunk_size {
                cursor = end;
                len += piece_len;
                fresh += piece_len;
                i += 1;
                continue;
            }

            if fresh == 0 || len <= self.chunk_overlap {
                // Only the overlap prefix so far, or the whole chunk would be
                // carried over: cut the piece to fill the room.
                let room = self.chunk_size - len;
                cursor += byte_offset(piece, room);
            }

            chunks.push(start..cursor);
            let (next_start, carried) = self.overlap_start(text, start..cursor);
            start = next_start;
            len = carried;
            fresh = 0;
        }

        if fresh > 0 {
            chunks.push(start..cursor);
        }
        chunks
    }

    /// Where the chunk after `prev` begins, and how many characters it
    /// carries over. Snaps back to a word start when the overlap would
    /// otherwise begin mid-word and the longer overlap still fits.
    fn overlap_start(&self, text: &str, prev: Range<usize>) -> (usize, usize) {
        let body = &text[prev.clone()];
        let body_len = body.chars().count();
        let take = self.chunk_overlap.min(body_len);
        if take == 0 {
            return (prev.end, 0);
        }

        let mut begin = byte_offset(body, body_len - take);
        let mut taken = take;
        let limit = (2 * self.chunk_overlap).min(self.chunk_size - 1);

        let mid_word = body[..begin]
            .chars()
            .next_back()
            .is_some_and(|c| !c.is_whitespace())
            && body[begin..]
                .chars()
                .next()
                .is_some_and(|c| !c.is_whitespace());
        if mid_word {
            let mut extra = 0;
            for (b, c) in body[..begin].char_indices().rev() {
                if c.is_whitespace() {
                    if taken + extra <= limit {
                        begin = b + c.len_utf8();
                        taken += extra;
                    }
                    break;
                }
                extra += 1;
                if taken + extra > limit {
                    break;
                }
            }
        }

        (prev.start + begin, taken)
    }
}

/// Cut `text` into byte ranges of at most `max` chars, preferring the
/// earliest separator in `separators` that occurs in it.
fn split_pieces(
    text: &str,
    separators: &[&str],
    max: usize,
    base: usize,
    out: &mut Vec<Range<usize>>,
) {
    if text.is_empty() {
        return;
    }
    if text.chars().count() <= max {
        out.push(base..base + text.len());
        return;
    }

    let Some(pos) = separators.iter().position(|sep| text.contains(sep)) else {
        hard_cut(text, max, base, out);
        return;
    };

    let mut offset = 0;
    for piece in text.split_inclusive(separators[pos]) {
        if piece.chars().count() <= max {
            out.push(base + offset..base + offset + piece.len());
        } else {
            split_pieces(piece, &separators[pos + 1..], max, base + offset, out);
        }
        offset += piece.len();
    }
}

fn hard_cut(text: &str, max: usize, base: usize, out: &mut Vec<Range<usize>>) {
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in text.char_indices() {
        if count == max {
            out.push(base + start..base + idx);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        out.push(base + start..base + text.len());
    }
}

/// Byte offset of the `n`th char of `s` (or `s.len()` past the end).
fn byte_offset(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(b, _)| b).unwrap_or(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic prose with paragraphs, sentences and varied word lengths.
    fn prose(words: usize, seed: u64) -> String {
        let vocab = [
            "level", "engineer", "ownership", "scope", "mentors", "delivers", "a", "the",
            "architecture", "reviews", "impact", "team", "of", "consistently", "designs",
        ];
        let mut state = seed;
        let mut out = String::new();
        for i in 0..words {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let word = vocab[(state >> 33) as usize % vocab.len()];
            if i > 0 {
                if i % 97 == 0 {
                    out.push_str(".\n\n");
                } else if i % 13 == 0 {
                    out.push_str(". ");
                } else if i % 41 == 0 {
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
            out.push_str(word);
        }
        out
    }

    #[test]
    fn small_text_is_one_chunk() {
        let splitter = TextSplitter::new(100, 0).unwrap();
        assert_eq!(splitter.split_text("Hello, world!"), vec!["Hello, world!"]);
    }

    #[test]
    fn empty_and_blank_text_produce_nothing() {
        let splitter = TextSplitter::new(10, 2).unwrap();
        assert!(splitter.split_text("").is_empty());
        assert!(splitter.split_text("   \n\n  ").is_empty());
    }

    #[test]
    fn prefers_paragraph_boundaries() {
        let splitter = TextSplitter::new(30, 0).unwrap();
        let text = "First paragraph here.\n\nSecond paragraph here.";
        let chunks = splitter.split_text(text);
        assert_eq!(chunks, vec!["First paragraph here.\n\n", "Second paragraph here."]);
    }

    #[test]
    fn falls_back_to_words_then_characters() {
        let splitter = TextSplitter::new(5, 0).unwrap();
        let chunks = splitter.split_text("ab cd supercalifragilistic");
        assert!(chunks.iter().all(|c| c.chars().count() <= 5));
        assert_eq!(chunks.concat(), "ab cd supercalifragilistic");
        assert_eq!(chunks[0], "ab ");
    }

    #[test]
    fn no_overlap_chunks_tile_the_text() {
        let text = prose(2_000, 7);
        let splitter = TextSplitter::new(300, 0).unwrap();
        let chunks = splitter.split_text(&text);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn chunks_never_exceed_size() {
        for (size, overlap) in [(40, 0), (40, 10), (128, 32), (300, 0), (300, 120), (7, 3)] {
            let splitter = TextSplitter::new(size, overlap).unwrap();
            let text = prose(1_500, size as u64);
            for chunk in splitter.split_text(&text) {
                assert!(
                    chunk.chars().count() <= size,
                    "chunk of {} chars exceeds {}",
                    chunk.chars().count(),
                    size
                );
            }
        }
    }

    #[test]
    fn consecutive_chunks_share_at_least_the_overlap() {
        for (size, overlap) in [(60, 10), (128, 32), (300, 120), (500, 1)] {
            let splitter = TextSplitter::new(size, overlap).unwrap();
            let text = prose(1_500, overlap as u64);
            let page = Document::new(text.clone());
            let chunks = splitter.split_documents(&[page]);
            assert!(chunks.len() > 2);

            for pair in chunks.windows(2) {
                let (a, b) = (&pair[0], &pair[1]);
                let a_start = a.meta_int("start_index").unwrap() as usize;
                let b_start = b.meta_int("start_index").unwrap() as usize;
                let a_end = a_start + a.char_len();
                assert!(b_start < a_end, "gap between chunks");
                let shared = a_end - b_start;
                assert!(shared >= overlap, "shared {} < overlap {}", shared, overlap);

                let a_tail: String = a.content.chars().skip(a.char_len() - shared).collect();
                let b_head: String = b.content.chars().take(shared).collect();
                assert_eq!(a_tail, b_head);
            }
        }
    }

    #[test]
    fn no_chunk_is_contained_in_its_successor() {
        let splitter = TextSplitter::new(7, 4).unwrap();
        let text = "a cccccccccccc word bb a word";
        let ranges = splitter.split_ranges(text);
        assert_eq!(&text[ranges[0].clone()], "a ccccc");

        for (size, overlap) in [(7, 4), (9, 6), (13, 10), (20, 15), (40, 30)] {
            let splitter = TextSplitter::new(size, overlap).unwrap();
            for seed in 0..40 {
                let text = prose(200, seed);
                let ranges = splitter.split_ranges(&text);
                for pair in ranges.windows(2) {
                    let (a, b) = (&pair[0], &pair[1]);
                    assert!(b.start > a.start, "{:?} swallowed by {:?}", a, b);
                    assert!(b.start < a.end);
                    let shared = text[b.start..a.end].chars().count();
                    assert!(shared >= overlap, "shared {} < overlap {}", shared, overlap);
                }
            }
        }
    }

    #[test]
    fn multibyte_text_is_cut_on_char_boundaries() {
        let splitter = TextSplitter::new(3, 1).unwrap();
        let chunks = splitter.split_text("ééééééééééé");
        assert!(chunks.len() > 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 3));
    }

    #[test]
    fn pages_are_split_independently_in_order() {
        let splitter = TextSplitter::new(20, 0).unwrap();
        let pages = vec![
            Document::new("alpha beta gamma delta epsilon").with_metadata("page", 0usize),
            Document::new("zeta").with_metadata("page", 1usize),
        ];
        let chunks = splitter.split_documents(&pages);
        let page_of: Vec<i64> = chunks.iter().map(|c| c.meta_int("page").unwrap()).collect();
        assert_eq!(page_of, vec![0, 0, 1]);
        assert_eq!(chunks[0].meta_int("chunk_index"), Some(0));
        assert_eq!(chunks[1].meta_int("chunk_index"), Some(1));
        assert_eq!(chunks[2].meta_int("chunk_index"), Some(0));
        assert_eq!(chunks[2].content, "zeta");
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        assert!(TextSplitter::new(10, 10).is_err());
        assert!(TextSplitter::new(0, 0).is_err());
    }
}
