//! Structural extraction: page spans → blocks → header-delimited sections.
//!
//! Header detection is statistical, not rule-based: the document's own font
//! distribution decides what counts as a header. Spans well above the median
//! size form at most two candidate tiers (title and subtitle), and a block
//! is a header only if it matches a candidate tier, carries bold weight, and
//! is short enough to not be an emphasised paragraph.
//!
//! The detection pipeline is pure over [`RawBlock`] values and knows nothing
//! about any PDF library. Span acquisition sits behind the [`SpanSource`]
//! capability; [`PdfiumSpanSource`] is the production implementation and
//! runs inside `spawn_blocking` because pdfium is not async-safe.

use crate::error::PipelineError;
use pdfium_render::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Sizes above `median × HEADER_SIZE_RATIO` are header candidates.
const HEADER_SIZE_RATIO: f32 = 1.2;

/// At most this many candidate header tiers are kept (title + subtitle).
const MAX_HEADER_TIERS: usize = 2;

/// A block whose word count exceeds this is never a header, no matter how
/// it is styled.
const MAX_HEADER_WORDS: usize = 15;

/// Two font sizes closer than this are treated as the same size.
const SIZE_TOLERANCE: f32 = 0.05;

/// Vertical top-to-top distance beyond this multiple of the font size
/// starts a new block.
const LINE_SPACING_FACTOR: f32 = 1.4;

// ── Input types ──────────────────────────────────────────────────────────

/// A run of uniformly styled text on a page. Ephemeral — consumed by block
/// detection and never stored.
#[derive(Debug, Clone)]
pub struct Span {
    pub text: String,
    /// Rendered font size in points.
    pub size: f32,
    pub bold: bool,
    /// 1-indexed page number.
    pub page: usize,
}

/// One visually contiguous text unit as reported by the parser, before any
/// header classification.
#[derive(Debug, Clone, Default)]
pub struct RawBlock {
    pub spans: Vec<Span>,
    pub page: usize,
}

/// Capability that yields the document's text as parser-grouped blocks of
/// styled spans, independent of the underlying PDF library.
pub trait SpanSource {
    fn raw_blocks(&self) -> Result<Vec<RawBlock>, PipelineError>;
}

// ── Output types ─────────────────────────────────────────────────────────

/// A classified text block.
#[derive(Debug, Clone)]
pub struct Block {
    pub text: String,
    pub is_header: bool,
    pub page: usize,
    /// Position in the block sequence; section slicing keys off this.
    pub index: usize,
}

/// A header-delimited portion of the document, in document order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub header: String,
    pub text: String,
    /// Index of the header block this section started at.
    pub original_index: usize,
    /// 1-indexed page the header appeared on.
    pub page: usize,
}

/// Font statistics driving header detection.
#[derive(Debug, Clone)]
pub struct FontStats {
    pub median: f32,
    /// Candidate header sizes, largest first, at most [`MAX_HEADER_TIERS`].
    pub header_sizes: Vec<f32>,
}

// ── Pure detection pipeline ──────────────────────────────────────────────

/// Compute the median span size and the candidate header sizes.
pub fn analyze_fonts(blocks: &[RawBlock]) -> FontStats {
    let mut sizes: Vec<f32> = blocks
        .iter()
        .flat_map(|b| b.spans.iter().map(|s| s.size))
        .collect();

    if sizes.is_empty() {
        return FontStats {
            median: 0.0,
            header_sizes: Vec::new(),
        };
    }

    sizes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median = if sizes.len() % 2 == 1 {
        sizes[sizes.len() / 2]
    } else {
        (sizes[sizes.len() / 2 - 1] + sizes[sizes.len() / 2]) / 2.0
    };

    // Distinct sizes strictly above the prominence cut-off, largest first,
    // truncated to the two most prominent tiers.
    let mut candidates: Vec<f32> = Vec::new();
    for &size in sizes.iter().rev() {
        if size <= median * HEADER_SIZE_RATIO {
            break;
        }
        if !candidates.iter().any(|&c| (c - size).abs() < SIZE_TOLERANCE) {
            candidates.push(size);
        }
    }
    candidates.truncate(MAX_HEADER_TIERS);

    debug!(median, header_sizes = ?candidates, "font statistics");
    FontStats {
        median,
        header_sizes: candidates,
    }
}

/// Classify raw blocks as headers or body text.
///
/// A header must match a candidate size tier on average, contain at least
/// one bold span, and stay within [`MAX_HEADER_WORDS`] words — the word cap
/// rejects bold paragraphs that happen to be set large.
pub fn detect_blocks(raw: &[RawBlock], stats: &FontStats) -> Vec<Block> {
    let mut blocks = Vec::new();

    for raw_block in raw {
        let text = raw_block
            .spans
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string();
        if text.is_empty() {
            continue;
        }

        let sizes: Vec<f32> = raw_block.spans.iter().map(|s| s.size).collect();
        let avg_size = sizes.iter().sum::<f32>() / sizes.len() as f32;
        let bold = raw_block.spans.iter().any(|s| s.bold);

        let is_header = stats
            .header_sizes
            .iter()
            .any(|&h| (h - avg_size).abs() < SIZE_TOLERANCE)
            && bold
            && text.split_whitespace().count() <= MAX_HEADER_WORDS;

        blocks.push(Block {
            text,
            is_header,
            page: raw_block.page,
            index: blocks.len(),
        });
    }

    blocks
}

/// Slice the block sequence at header boundaries.
///
/// Each header starts a section whose body is every non-header block up to
/// (not including) the next header, joined with paragraph breaks so block
/// boundaries survive into chunking.
///
/// Zero detected headers yields zero sections. Callers must treat that as a
/// failed extraction, not an empty-but-valid document — the run aborts
/// rather than guessing a structure the document does not have.
pub fn sections_from_blocks(blocks: &[Block]) -> Vec<Section> {
    let header_positions: Vec<usize> = blocks
        .iter()
        .enumerate()
        .filter(|(_, b)| b.is_header)
        .map(|(i, _)| i)
        .collect();

    if header_positions.is_empty() {
        warn!("no headers detected in document");
        return Vec::new();
    }

    let mut sections = Vec::with_capacity(header_positions.len());
    for (i, &pos) in header_positions.iter().enumerate() {
        let header = &blocks[pos];
        let start = pos + 1;
        let end = header_positions
            .get(i + 1)
            .copied()
            .unwrap_or(blocks.len());

        let text = blocks[start..end]
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        sections.push(Section {
            header: header.text.clone(),
            text,
            original_index: header.index,
            page: header.page,
        });
    }

    sections
}

/// Run the full detection pipeline over a span source.
///
/// The source's blocking work is moved off the async executor; everything
/// after that is pure.
pub async fn extract_sections<S>(source: S) -> Result<Vec<Section>, PipelineError>
where
    S: SpanSource + Send + 'static,
{
    let raw = tokio::task::spawn_blocking(move || source.raw_blocks())
        .await
        .map_err(|e| PipelineError::Internal(format!("extraction task panicked: {e}")))??;

    let stats = analyze_fonts(&raw);
    let blocks = detect_blocks(&raw, &stats);
    let sections = sections_from_blocks(&blocks);

    info!(
        blocks = blocks.len(),
        sections = sections.len(),
        "extraction complete"
    );
    Ok(sections)
}

// ── Pdfium span source ───────────────────────────────────────────────────

/// Production [`SpanSource`] reading text objects through pdfium.
///
/// Text objects arrive in content order with position and font information;
/// consecutive objects are grouped into blocks by vertical proximity, since
/// pdfium (unlike structured parsers) does not report paragraph blocks
/// itself.
pub struct PdfiumSpanSource {
    path: PathBuf,
}

impl PdfiumSpanSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl SpanSource for PdfiumSpanSource {
    fn raw_blocks(&self) -> Result<Vec<RawBlock>, PipelineError> {
        let pdfium = Pdfium::default();
        let document =
            pdfium
                .load_pdf_from_file(&self.path, None)
                .map_err(|e| PipelineError::PdfOpen {
                    path: self.path.clone(),
                    detail: format!("{e:?}"),
                })?;

        let mut blocks: Vec<RawBlock> = Vec::new();
        let mut current = RawBlock::default();
        // Top edge of the previously seen object, for block grouping.
        let mut prev_top: Option<f32> = None;

        for (page_index, page) in document.pages().iter().enumerate() {
            let page_num = page_index + 1;

            for object in page.objects().iter() {
                let Some(text_object) = object.as_text_object() else {
                    continue;
                };

                let text = text_object.text();
                if text.trim().is_empty() {
                    continue;
                }

                let size = text_object.unscaled_font_size().value;
                let bold = text_object
                    .font()
                    .family()
                    .to_lowercase()
                    .contains("bold");

                let top = object
                    .bounds()
                    .map(|b| {
                        b.y1.value
                            .max(b.y2.value)
                            .max(b.y3.value)
                            .max(b.y4.value)
                    })
                    .unwrap_or(0.0);

                // A new block starts on a page change, a paragraph-sized
                // downward jump, or any upward jump (column/page layout
                // reset). Same-line neighbours have near-equal tops and
                // stay together.
                let new_block = match prev_top {
                    None => true,
                    _ if current.page != page_num => true,
                    Some(prev) => {
                        let dy = prev - top;
                        dy > LINE_SPACING_FACTOR * size.max(1.0) || dy < -0.5 * size.max(1.0)
                    }
                };

                if new_block && !current.spans.is_empty() {
                    blocks.push(std::mem::take(&mut current));
                }
                if current.spans.is_empty() {
                    current.page = page_num;
                }

                current.spans.push(Span {
                    text,
                    size,
                    bold,
                    page: page_num,
                });
                prev_top = Some(top);
            }
        }

        if !current.spans.is_empty() {
            blocks.push(current);
        }

        debug!(path = %self.path.display(), blocks = blocks.len(), "pdfium blocks read");
        Ok(blocks)
    }
}
