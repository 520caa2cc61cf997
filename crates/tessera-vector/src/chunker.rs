//! Recursive character text splitter.
//!
//! Text is first cut into pieces no longer than `max_chunk_size - overlap`
//! characters, preferring the earliest separator in the priority list that
//! occurs in the span. Separators stay attached to the piece they end, so no
//! character is ever dropped. The pieces are then packed greedily into
//! chunks of at most `max_chunk_size` characters; every chunk after the
//! first starts exactly `overlap` characters before the previous one ended.
//!
//! All offsets are character offsets, not byte offsets.

use tessera_core::config::ChunkingConfig;
use tessera_core::error::TesseraError;
use tessera_core::types::Chunk;

/// Splits documents into overlapping, bounded-size chunks.
#[derive(Debug, Clone)]
pub struct Chunker {
    max_chunk_size: usize,
    overlap: usize,
    separators: Vec<Vec<char>>,
}

/// Half-open character range `[start, end)`.
type Span = (usize, usize);

impl Chunker {
    /// Build a chunker. Fails when `max_chunk_size` is zero or `overlap` is
    /// not strictly smaller than it.
    pub fn new(
        max_chunk_size: usize,
        overlap: usize,
        separators: &[String],
    ) -> Result<Self, TesseraError> {
        if max_chunk_size == 0 {
            return Err(TesseraError::Config(
                "max_chunk_size must be greater than zero".to_string(),
            ));
        }
        if overlap >= max_chunk_size {
            return Err(TesseraError::Config(format!(
                "overlap ({}) must be smaller than max_chunk_size ({})",
                overlap, max_chunk_size
            )));
        }

        Ok(Self {
            max_chunk_size,
            overlap,
            separators: separators.iter().map(|s| s.chars().collect()).collect(),
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self, TesseraError> {
        Self::new(config.max_chunk_size, config.overlap, &config.separators)
    }

    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split `text` into chunks tagged with `source_id`.
    pub fn split(&self, source_id: &str, text: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        if total == 0 {
            return Vec::new();
        }

        // byte_at[i] is the byte offset of char i; byte_at[total] == text.len().
        let mut byte_at: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
        byte_at.push(text.len());

        let spans = if total <= self.max_chunk_size {
            vec![(0, total)]
        } else {
            let window = self.max_chunk_size - self.overlap;
            let mut pieces = Vec::new();
            self.split_span(&chars, (0, total), &self.separators, window, &mut pieces);
            self.merge(&pieces, total)
        };

        spans
            .into_iter()
            .enumerate()
            .map(|(ordinal, (start, end))| Chunk {
                text: text[byte_at[start]..byte_at[end]].to_string(),
                source_id: source_id.to_string(),
                ordinal,
                start_offset: start,
                end_offset: end,
            })
            .collect()
    }

    /// Cut `span` into contiguous pieces of at most `window` characters.
    fn split_span(
        &self,
        chars: &[char],
        span: Span,
        separators: &[Vec<char>],
        window: usize,
        out: &mut Vec<Span>,
    ) {
        let (start, end) = span;
        if end - start <= window {
            out.push(span);
            return;
        }

        let chosen = separators
            .iter()
            .position(|sep| sep.is_empty() || find(chars, start, end, sep).is_some());

        let Some(idx) = chosen.filter(|&i| !separators[i].is_empty()) else {
            hard_cut(span, window, out);
            return;
        };
        let sep = &separators[idx];
        let rest = &separators[idx + 1..];

        let mut seg_start = start;
        let mut cursor = start;
        while let Some(hit) = find(chars, cursor, end, sep) {
            let seg_end = hit + sep.len();
            self.push_segment(chars, (seg_start, seg_end), rest, window, out);
            seg_start = seg_end;
            cursor = seg_end;
        }
        if seg_start < end {
            self.push_segment(chars, (seg_start, end), rest, window, out);
        }
    }

    fn push_segment(
        &self,
        chars: &[char],
        segment: Span,
        rest: &[Vec<char>],
        window: usize,
        out: &mut Vec<Span>,
    ) {
        if segment.1 - segment.0 <= window {
            out.push(segment);
        } else if rest.is_empty() {
            hard_cut(segment, window, out);
        } else {
            self.split_span(chars, segment, rest, window, out);
        }
    }

    /// Greedy sliding-window packing of pieces into chunk spans.
    fn merge(&self, pieces: &[Span], total: usize) -> Vec<Span> {
        let mut spans = Vec::new();
        let mut next = 0;
        let mut start = 0;

        while next < pieces.len() {
            let mut end = start;
            while next < pieces.len() && pieces[next].1 - start <= self.max_chunk_size {
                end = pieces[next].1;
                next += 1;
            }
            spans.push((start, end));
            if end >= total {
                break;
            }
            start = end - self.overlap;
        }

        spans
    }
}

impl Default for Chunker {
    fn default() -> Self {
        let config = ChunkingConfig::default();
        Self {
            max_chunk_size: config.max_chunk_size,
            overlap: config.overlap,
            separators: config.separators.iter().map(|s| s.chars().collect()).collect(),
        }
    }
}

fn hard_cut(span: Span, window: usize, out: &mut Vec<Span>) {
    let (mut start, end) = span;
    while start < end {
        let stop = (start + window).min(end);
        out.push((start, stop));
        start = stop;
    }
}

/// First index in `[from, to)` where `needle` begins and fits entirely.
fn find(chars: &[char], from: usize, to: usize, needle: &[char]) -> Option<usize> {
    if needle.is_empty() || to - from < needle.len() {
        return None;
    }
    (from..=to - needle.len()).find(|&i| chars[i..i + needle.len()] == *needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(max: usize, overlap: usize) -> Chunker {
        let config = ChunkingConfig::default();
        Chunker::new(max, overlap, &config.separators).unwrap()
    }

    /// Strip each chunk's overlap prefix and concatenate.
    fn reconstruct(chunks: &[Chunk], overlap: usize) -> String {
        let mut out = String::new();
        for (i, chunk) in chunks.iter().enumerate() {
            if i == 0 {
                out.push_str(&chunk.text);
            } else {
                out.extend(chunk.text.chars().skip(overlap));
            }
        }
        out
    }

    fn assert_chunk_invariants(chunks: &[Chunk], text: &str, max: usize, overlap: usize) {
        let chars: Vec<char> = text.chars().collect();
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.ordinal, i);
            assert!(!chunk.text.is_empty());
            assert!(chunk.char_len() <= max, "chunk {} too long", i);
            let expected: String = chars[chunk.start_offset..chunk.end_offset].iter().collect();
            assert_eq!(chunk.text, expected);
            if i > 0 {
                assert_eq!(chunk.start_offset, chunks[i - 1].end_offset - overlap);
            }
        }
        assert_eq!(chunks.first().map(|c| c.start_offset), Some(0));
        assert_eq!(chunks.last().map(|c| c.end_offset), Some(chars.len()));
    }

    #[test]
    fn test_rejects_invalid_parameters() {
        let seps = vec![" ".to_string()];
        assert!(matches!(
            Chunker::new(0, 0, &seps),
            Err(TesseraError::Config(_))
        ));
        assert!(matches!(
            Chunker::new(10, 10, &seps),
            Err(TesseraError::Config(_))
        ));
        assert!(matches!(
            Chunker::new(10, 11, &seps),
            Err(TesseraError::Config(_))
        ));
        assert!(Chunker::new(10, 9, &seps).is_ok());
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        assert!(chunker(500, 50).split("doc", "").is_empty());
    }

    #[test]
    fn test_short_text_is_one_chunk() {
        let chunks = chunker(500, 50).split("doc", "hello world");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "hello world");
        assert_eq!(chunks[0].source_id, "doc");
        assert_eq!((chunks[0].start_offset, chunks[0].end_offset), (0, 11));
    }

    #[test]
    fn test_text_exactly_max_is_one_chunk() {
        let text = "abcde";
        let chunks = chunker(5, 2).split("doc", text);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
    }

    #[test]
    fn test_sentence_scenario() {
        let text = "A. B. C.";
        let chunks = chunker(5, 2).split("doc", text);

        assert!(chunks.len() > 1);
        assert_chunk_invariants(&chunks, text, 5, 2);
        for pair in chunks.windows(2) {
            let prev: Vec<char> = pair[0].text.chars().collect();
            let next: Vec<char> = pair[1].text.chars().collect();
            assert_eq!(prev[prev.len() - 2..], next[..2]);
        }
        assert_eq!(reconstruct(&chunks, 2), text);
    }

    #[test]
    fn test_sentence_scenario_exact_layout() {
        let chunks = chunker(5, 2).split("doc", "A. B. C.");
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["A. ", ". B. ", ". C."]);
    }

    #[test]
    fn test_prefers_paragraph_breaks() {
        let para = "word ".repeat(8);
        let text = format!("{}\n\n{}", para.trim_end(), para.trim_end());
        let chunks = chunker(50, 5).split("doc", &text);

        assert_chunk_invariants(&chunks, &text, 50, 5);
        assert!(chunks[0].text.ends_with("\n\n"));
        assert_eq!(reconstruct(&chunks, 5), text);
    }

    #[test]
    fn test_hard_cut_without_separators() {
        let text = "x".repeat(23);
        let chunks = Chunker::new(10, 3, &[]).unwrap().split("doc", &text);

        assert_chunk_invariants(&chunks, &text, 10, 3);
        assert_eq!(reconstruct(&chunks, 3), text);
    }

    #[test]
    fn test_hard_cut_with_empty_separator() {
        let text = "abcdefghijklmnopqrstuvwxyz";
        let chunks = Chunker::new(8, 2, &["".to_string()])
            .unwrap()
            .split("doc", text);

        assert_chunk_invariants(&chunks, text, 8, 2);
        assert_eq!(reconstruct(&chunks, 2), text);
    }

    #[test]
    fn test_zero_overlap() {
        let text = "one two three four five six seven eight nine ten";
        let chunks = chunker(12, 0).split("doc", text);

        assert_chunk_invariants(&chunks, text, 12, 0);
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn test_offsets_are_characters_not_bytes() {
        let text = "héllo wörld. ünïcödé text. もっと文字があります。 end.";
        let chunks = chunker(12, 3).split("doc", text);

        assert_chunk_invariants(&chunks, text, 12, 3);
        assert_eq!(reconstruct(&chunks, 3), text);
    }

    #[test]
    fn test_reconstruction_over_varied_inputs() {
        let inputs = [
            "Lorem ipsum dolor sit amet, consectetur adipiscing elit. Sed do eiusmod tempor.\n\nUt enim ad minim veniam!\nQuis nostrud? Exercitation ullamco.",
            "no-separators-at-all-in-this-rather-long-single-token-string",
            "   leading and trailing whitespace   ",
            "a\nb\nc\nd\ne\nf\ng\nh\ni\nj\nk\nl\nm\nn\no\np",
            "Tiny.",
        ];
        for (max, overlap) in [(7, 0), (7, 3), (16, 4), (30, 10), (500, 50)] {
            let c = chunker(max, overlap);
            for text in inputs {
                let chunks = c.split("doc", text);
                assert_chunk_invariants(&chunks, text, max, overlap);
                assert_eq!(reconstruct(&chunks, overlap), text, "max={} overlap={}", max, overlap);
            }
        }
    }

    #[test]
    fn test_chunks_pack_close_to_max() {
        let text = "aa ".repeat(100);
        let chunks = chunker(20, 4).split("doc", &text);

        // Every chunk but the last is within one piece of the limit.
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.char_len() > 20 - 3, "underfilled chunk {:?}", chunk);
        }
    }

    #[test]
    fn test_record_ids_use_ordinals() {
        let chunks = chunker(5, 2).split("notes", "A. B. C.");
        let ids: Vec<String> = chunks.iter().map(Chunk::record_id).collect();
        assert_eq!(ids, vec!["notes#0", "notes#1", "notes#2"]);
    }
}
