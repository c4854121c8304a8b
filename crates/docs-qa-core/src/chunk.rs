//! Markdown-aware document chunker.
//!
//! Turns a [`SourceDocument`] into retrieval-sized [`Chunk`]s:
//!
//! 1. Fenced code blocks are extracted and removed from the prose.
//! 2. The remaining prose is segmented by `#`, `##`, `###` headings.
//! 3. Each section is split recursively on a priority list of separators
//!    until every piece fits `max_chunk_size` characters, then pieces are
//!    merged greedily with `overlap` characters of shared context.
//! 4. Every code block becomes one `code` chunk, never size-split.
//!
//! Splitting works on byte spans of the input, so each text chunk is an
//! exact substring and line spans are computed from offsets rather than by
//! searching for the chunk text.
//!
//! # Example
//!
//! ```rust
//! use docs_qa_core::chunk::{extract_code_blocks, strip_code_blocks};
//!
//! let text = "intro\n```python\nprint(1)\n```\noutro";
//! let blocks = extract_code_blocks(text);
//! assert_eq!(blocks.len(), 1);
//! assert_eq!(blocks[0].language.as_deref(), Some("python"));
//! assert_eq!(blocks[0].code, "print(1)");
//! assert!(!strip_code_blocks(text).contains("print(1)"));
//! ```

use std::collections::VecDeque;
use std::ops::Range;
use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;
use uuid::Uuid;

use crate::checksum::compute_fingerprint;
use crate::models::{Chunk, ChunkKind, SourceDocument};

pub const DEFAULT_MAX_CHUNK_SIZE: usize = 4000;
pub const DEFAULT_OVERLAP: usize = 200;

/// Separators in priority order, coarsest first. The empty separator splits
/// into single characters and always applies.
pub const SEPARATORS: [&str; 8] = ["\n\n", "\n", ".", "!", "?", ",", " ", ""];

/// Chunk sizing and code handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSettings {
    /// Maximum chunk length in characters.
    pub max_chunk_size: usize,
    /// Characters of shared context between adjacent chunks.
    pub overlap: usize,
    /// Emit fenced code blocks as separate `code` chunks.
    pub isolate_code: bool,
}

impl Default for ChunkSettings {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
            isolate_code: true,
        }
    }
}

/// A fenced code region found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// Language tag from the opening fence, if any.
    pub language: Option<String>,
    /// Code between the fences, without the final newline.
    pub code: String,
    /// Byte range of the whole fenced region, fences included.
    pub span: Range<usize>,
}

/// A heading-delimited section of prose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Heading text without the `#` markers, `""` for leading text.
    pub heading: String,
    /// Section text, starting at the heading line.
    pub body: String,
    /// Byte range of `body` within the segmented text.
    pub span: Range<usize>,
}

fn fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Lazy body: a block closes at the nearest following fence.
    RE.get_or_init(|| {
        Regex::new(r"(?s)```[ \t]*([^\s`]*)[^\n]*\n(.*?)```").expect("fence regex is valid")
    })
}

fn heading_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^(#{1,3})[ \t]+(.+?)(?:[ \t]+#+)?[ \t]*$")
            .expect("heading regex is valid")
    })
}

/// Find fenced code blocks, first to last.
pub fn extract_code_blocks(text: &str) -> Vec<CodeBlock> {
    fence_regex()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let language = caps
                .get(1)
                .map(|m| m.as_str().trim())
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            let body = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            let code = body
                .strip_suffix('\n')
                .map(|b| b.strip_suffix('\r').unwrap_or(b))
                .unwrap_or(body);
            Some(CodeBlock {
                language,
                code: code.to_string(),
                span: whole.range(),
            })
        })
        .collect()
}

/// Remove every fenced code region, leaving the surrounding prose intact.
pub fn strip_code_blocks(text: &str) -> String {
    strip_with_offsets(text).0
}

/// Maps positions in stripped text back to the original document.
#[derive(Debug, Clone)]
struct OffsetMap {
    /// `(stripped_start, original_start)` of each retained segment, ascending.
    segments: Vec<(usize, usize)>,
}

impl OffsetMap {
    fn identity() -> Self {
        Self {
            segments: vec![(0, 0)],
        }
    }

    fn to_original(&self, pos: usize) -> usize {
        let idx = self
            .segments
            .partition_point(|(stripped, _)| *stripped <= pos)
            .saturating_sub(1);
        match self.segments.get(idx) {
            Some((stripped, original)) => original + (pos - stripped),
            None => pos,
        }
    }
}

fn strip_with_offsets(text: &str) -> (String, OffsetMap) {
    let mut out = String::with_capacity(text.len());
    let mut segments = Vec::new();
    let mut last = 0;

    for m in fence_regex().find_iter(text) {
        if m.start() > last {
            segments.push((out.len(), last));
            out.push_str(&text[last..m.start()]);
        }
        last = m.end();
    }
    if last < text.len() {
        segments.push((out.len(), last));
        out.push_str(&text[last..]);
    }

    (out, OffsetMap { segments })
}

/// Newline positions of a document, for offset → line lookups.
struct LineIndex {
    newlines: Vec<usize>,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        Self {
            newlines: text.match_indices('\n').map(|(i, _)| i).collect(),
        }
    }

    /// 1-based line containing byte `pos`.
    fn line_of(&self, pos: usize) -> usize {
        self.newlines.partition_point(|&n| n < pos) + 1
    }
}

/// Segment prose by Markdown headings (`#` to `###`).
///
/// Sections tile the input: each starts at its heading line and runs to
/// the next heading. Text before the first heading becomes a section with
/// an empty heading.
pub fn split_by_headings(text: &str) -> Vec<Section> {
    let headings: Vec<(usize, String)> = heading_regex()
        .captures_iter(text)
        .filter_map(|caps| {
            let start = caps.get(0)?.start();
            let title = caps.get(2)?.as_str().trim().to_string();
            Some((start, title))
        })
        .collect();

    let mut sections = Vec::new();
    let first_start = headings.first().map(|(s, _)| *s).unwrap_or(text.len());
    if first_start > 0 {
        sections.push(Section {
            heading: String::new(),
            body: text[..first_start].to_string(),
            span: 0..first_start,
        });
    }

    for (i, (start, title)) in headings.iter().enumerate() {
        let end = headings.get(i + 1).map(|(s, _)| *s).unwrap_or(text.len());
        sections.push(Section {
            heading: title.clone(),
            body: text[*start..end].to_string(),
            span: *start..end,
        });
    }

    sections
}

/// Split text into chunks of at most `max_chunk_size` characters.
///
/// Adjacent chunks produced from the same run of pieces share up to
/// `overlap` characters. Whitespace-only chunks are dropped.
pub fn split_text(text: &str, max_chunk_size: usize, overlap: usize) -> Vec<String> {
    split_spans(text, max_chunk_size, overlap)
        .into_iter()
        .map(|span| text[span].to_string())
        .collect()
}

/// Like [`split_text`], returning byte ranges into `text` instead of copies.
///
/// Ranges are in ascending order of start; consecutive ranges touch,
/// overlap, or are separated only by a dropped whitespace-only stretch.
pub fn split_spans(text: &str, max_chunk_size: usize, overlap: usize) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    if text.is_empty() || max_chunk_size == 0 {
        return out;
    }
    split_recursive(text, 0..text.len(), &SEPARATORS, max_chunk_size, overlap, &mut out);
    out.retain(|span| !text[span.clone()].trim().is_empty());
    out
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn split_recursive(
    text: &str,
    range: Range<usize>,
    separators: &[&str],
    max_chunk_size: usize,
    overlap: usize,
    out: &mut Vec<Range<usize>>,
) {
    let slice = &text[range.clone()];

    let (separator, finer) = match separators
        .iter()
        .position(|s| s.is_empty() || slice.contains(s))
    {
        Some(i) => (separators[i], &separators[i + 1..]),
        None => (separators.last().copied().unwrap_or(""), &[][..]),
    };

    let mut fitting: Vec<Range<usize>> = Vec::new();
    for piece in split_keeping_separator(slice, range.start, separator) {
        if char_len(&text[piece.clone()]) <= max_chunk_size {
            fitting.push(piece);
            continue;
        }
        if !fitting.is_empty() {
            merge_pieces(text, &fitting, max_chunk_size, overlap, out);
            fitting.clear();
        }
        if finer.is_empty() {
            // nothing left to split on
            out.push(piece);
        } else {
            split_recursive(text, piece, finer, max_chunk_size, overlap, out);
        }
    }
    if !fitting.is_empty() {
        merge_pieces(text, &fitting, max_chunk_size, overlap, out);
    }
}

/// Split `slice` (located at `base` in the full text) at every occurrence of
/// `separator`, keeping the separator at the start of the following piece.
fn split_keeping_separator(slice: &str, base: usize, separator: &str) -> Vec<Range<usize>> {
    if separator.is_empty() {
        return slice
            .char_indices()
            .map(|(i, c)| base + i..base + i + c.len_utf8())
            .collect();
    }

    let mut pieces = Vec::new();
    let mut piece_start = 0;
    for (i, _) in slice.match_indices(separator) {
        if i > piece_start {
            pieces.push(base + piece_start..base + i);
        }
        piece_start = i;
    }
    if piece_start < slice.len() {
        pieces.push(base + piece_start..base + slice.len());
    }
    pieces
}

/// Greedily merge contiguous pieces into chunks, carrying trailing pieces
/// worth at most `overlap` characters into the next chunk.
fn merge_pieces(
    text: &str,
    pieces: &[Range<usize>],
    max_chunk_size: usize,
    overlap: usize,
    out: &mut Vec<Range<usize>>,
) {
    let mut window: VecDeque<(Range<usize>, usize)> = VecDeque::new();
    let mut total = 0usize;

    for piece in pieces {
        let len = char_len(&text[piece.clone()]);

        if total + len > max_chunk_size {
            if let (Some(first), Some(last)) = (window.front(), window.back()) {
                out.push(first.0.start..last.0.end);
            }
            while total > overlap || (total > 0 && total + len > max_chunk_size) {
                match window.pop_front() {
                    Some((_, dropped)) => total -= dropped,
                    None => break,
                }
            }
        }

        window.push_back((piece.clone(), len));
        total += len;
    }

    if let (Some(first), Some(last)) = (window.front(), window.back()) {
        out.push(first.0.start..last.0.end);
    }
}

/// Build all chunks for a document.
///
/// Fails only when the document is not valid UTF-8. Empty documents
/// produce no chunks.
pub fn build_chunks(document: &SourceDocument, settings: &ChunkSettings) -> Result<Vec<Chunk>> {
    let text = document.text()?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let (prose, offsets, blocks) = if settings.isolate_code {
        let (prose, offsets) = strip_with_offsets(text);
        (prose, offsets, extract_code_blocks(text))
    } else {
        (text.to_string(), OffsetMap::identity(), Vec::new())
    };

    let lines = LineIndex::new(text);
    let meta = ChunkMeta {
        source_id: &document.name,
        last_modified: document.last_modified_millis(),
        fingerprint: document.fingerprint(),
    };

    let mut chunks = Vec::new();
    let mut ordinal: i64 = 0;

    for section in split_by_headings(&prose) {
        for span in split_spans(&section.body, settings.max_chunk_size, settings.overlap) {
            let start = section.span.start + span.start;
            let end = section.span.start + span.end;

            // line span covers the chunk's content, not its edge whitespace
            let body = &prose[start..end];
            let content_start = start + (body.len() - body.trim_start().len());
            let content_end = start + body.trim_end().len();
            let start_line = lines.line_of(offsets.to_original(content_start));
            let last_byte = content_end.max(content_start + 1) - 1;
            let end_line = lines.line_of(offsets.to_original(last_byte));

            let mut chunk = meta.make(ordinal, ChunkKind::Text, body);
            chunk.start_line = Some(start_line);
            chunk.end_line = Some(end_line.max(start_line));
            chunk.header = Some(section.heading.clone());
            chunks.push(chunk);
            ordinal += 1;
        }
    }

    for (index, block) in blocks.iter().enumerate() {
        if block.code.trim().is_empty() {
            continue;
        }
        let mut chunk = meta.make(ordinal, ChunkKind::Code, &block.code);
        chunk.block_index = Some(index);
        chunk.language = block.language.clone();
        chunks.push(chunk);
        ordinal += 1;
    }

    tracing::debug!(
        document = %document.name,
        chunks = chunks.len(),
        code_blocks = blocks.len(),
        "chunked document"
    );

    Ok(chunks)
}

/// Document-level fields copied onto every chunk.
struct ChunkMeta<'a> {
    source_id: &'a str,
    last_modified: Option<i64>,
    fingerprint: String,
}

impl ChunkMeta<'_> {
    fn make(&self, ordinal: i64, kind: ChunkKind, text: &str) -> Chunk {
        Chunk {
            id: Uuid::new_v4().to_string(),
            source_id: self.source_id.to_string(),
            ordinal,
            kind,
            text: text.to_string(),
            start_line: None,
            end_line: None,
            block_index: None,
            language: None,
            header: None,
            last_modified: self.last_modified,
            fingerprint: self.fingerprint.clone(),
            hash: compute_fingerprint(text.as_bytes()),
        }
    }
}
