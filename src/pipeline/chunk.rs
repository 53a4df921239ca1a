//! Token-ceiling chunking with a prioritized-separator splitter.
//!
//! Sections whose whole body fits the token ceiling pass through untouched —
//! most do, and an unsplit section keeps maximal context for the rewrite.
//! Oversized sections are cut near a target character size, preferring the
//! most semantically meaningful boundary available: paragraph breaks, then
//! line breaks, then sentence punctuation, then clause punctuation, then
//! plain spaces. A configured character overlap is carried between
//! consecutive pieces so a thought severed by a cut still appears whole on
//! one side of it.
//!
//! [`split_text`] is a pure function of (text, size, overlap, separators);
//! no configuration or tokenizer state leaks into it.

use crate::config::RunConfig;
use crate::pipeline::extract::Section;
use crate::pipeline::tokenizer::TokenCount;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Separator priority for splitting oversized sections.
pub const SEPARATORS: &[&str] = &[
    "\n\n", "\n", ". ", "? ", "! ", "; ", ": ", " - ", ", ", " ",
];

/// Identifying metadata carried with a chunk through the whole pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMeta {
    /// Header of the section this chunk came from; keys aggregation.
    pub header: String,
    /// `{normalized-header}_{index}`, unique within the header's chunk set.
    pub chunk_id: String,
    /// Token count of the chunk text under the configured vocabulary.
    pub token_count: usize,
}

/// The unit of rephrasing: a token-bounded piece of a section's body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub meta: ChunkMeta,
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn normalize_header(header: &str) -> String {
    header.split_whitespace().collect::<Vec<_>>().join("_")
}

fn make_chunk(text: &str, header: &str, index: usize, token_count: usize) -> Chunk {
    Chunk {
        text: text.to_string(),
        meta: ChunkMeta {
            header: header.to_string(),
            chunk_id: format!("{}_{}", normalize_header(header), index),
            token_count,
        },
    }
}

/// Split `text` into pieces of roughly `chunk_size` characters with
/// `chunk_overlap` characters carried between consecutive pieces.
///
/// The first separator (in priority order) present in the text is used to
/// cut it into fragments; fragments still larger than `chunk_size` descend
/// to the next separator tier. Fragments that fit are greedily packed back
/// together up to the target size. Text containing none of the separators
/// cannot be split and is returned whole.
pub fn split_text(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
    separators: &[&str],
) -> Vec<String> {
    if char_len(text) <= chunk_size {
        return vec![text.to_string()];
    }

    let Some(sep_pos) = separators.iter().position(|sep| text.contains(sep)) else {
        // Nothing to cut on; the caller keeps the oversized piece as-is.
        return vec![text.to_string()];
    };
    let separator = separators[sep_pos];
    let deeper = &separators[sep_pos + 1..];

    let mut pieces: Vec<String> = Vec::new();
    // Fragments that fit the target size, awaiting greedy re-packing.
    let mut pending: Vec<String> = Vec::new();

    for fragment in text.split_inclusive(separator) {
        if char_len(fragment) <= chunk_size {
            pending.push(fragment.to_string());
            continue;
        }

        if !pending.is_empty() {
            merge_fragments(&mut pieces, &pending, chunk_size, chunk_overlap);
            pending.clear();
        }

        if deeper.is_empty() {
            pieces.push(fragment.to_string());
        } else {
            pieces.extend(split_text(fragment, chunk_size, chunk_overlap, deeper));
        }
    }

    if !pending.is_empty() {
        merge_fragments(&mut pieces, &pending, chunk_size, chunk_overlap);
    }

    pieces
}

/// Greedily pack fragments into pieces up to `chunk_size` characters,
/// seeding each new piece with the previous piece's tail fragments up to
/// `chunk_overlap` characters.
fn merge_fragments(
    pieces: &mut Vec<String>,
    fragments: &[String],
    chunk_size: usize,
    chunk_overlap: usize,
) {
    let mut window: Vec<&str> = Vec::new();
    let mut window_len = 0usize;

    for fragment in fragments {
        let fragment_len = char_len(fragment);

        if window_len + fragment_len > chunk_size && !window.is_empty() {
            pieces.push(window.concat());

            // Drop leading fragments until what remains fits the overlap
            // budget and leaves room for the incoming fragment.
            while window_len > chunk_overlap
                || (window_len + fragment_len > chunk_size && !window.is_empty())
            {
                let removed = window.remove(0);
                window_len -= char_len(removed);
                if window.is_empty() {
                    break;
                }
            }
        }

        window.push(fragment);
        window_len += fragment_len;
    }

    if !window.is_empty() {
        pieces.push(window.concat());
    }
}

/// Split every section into token-bounded chunks.
///
/// A section within the ceiling becomes a single chunk with index 0. Pieces
/// of a split section are token-counted independently; a piece that still
/// exceeds the ceiling (no separator fine enough to cut it) is kept as-is —
/// re-splitting below separator granularity would cut mid-word, so the
/// overflow is logged and accepted.
pub fn chunk_sections(
    sections: &[Section],
    config: &RunConfig,
    counter: &dyn TokenCount,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    for section in sections {
        let header = section.header.trim();
        let text = section.text.trim();
        if text.is_empty() {
            debug!(header, "skipping empty section");
            continue;
        }

        let tokens = counter.count(text);
        if tokens <= config.max_tokens_check {
            chunks.push(make_chunk(text, header, 0, tokens));
            continue;
        }

        for (index, piece) in
            split_text(text, config.chunk_size, config.chunk_overlap, SEPARATORS)
                .iter()
                .enumerate()
        {
            let piece = piece.trim();
            if piece.is_empty() {
                continue;
            }
            let piece_tokens = counter.count(piece);
            if piece_tokens > config.max_tokens_check {
                warn!(
                    header,
                    index,
                    tokens = piece_tokens,
                    ceiling = config.max_tokens_check,
                    "piece exceeds token ceiling and cannot be split further"
                );
            }
            chunks.push(make_chunk(piece, header, index, piece_tokens));
        }
    }

    chunks
}
