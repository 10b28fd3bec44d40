//! Token-bounded text chunker with inter-chunk overlap.
//!
//! Splits one document's normalized text into [`Chunk`]s of at most
//! `max_tokens` tokens. Splitting prefers structural boundaries in
//! priority order — section, then paragraph, then sentence — and falls
//! back to an exact token window when a single structural unit alone
//! exceeds the budget. That fallback is a degradation path for messy
//! content, not an error.
//!
//! Each chunk after the first re-includes the trailing `overlap_tokens`
//! tokens of its predecessor, measured in tokens via [`crate::tokens`],
//! so extraction prompts never lose context at a cut point.
//!
//! Chunking is deterministic: identical `(text, max_tokens,
//! overlap_tokens)` always produces an identical chunk sequence. The
//! pipeline relies on this for idempotent re-invocation.

use crate::models::Chunk;
use crate::tokens::{count_tokens, tail_tokens, token_spans};

/// Split `text` into an ordered chunk sequence for `document`.
///
/// `overlap_tokens` must be strictly less than `max_tokens`; this is
/// validated at configuration load, not re-checked per call.
///
/// An empty (or whitespace-only) document yields zero chunks. A document
/// within the token budget yields exactly one chunk with zero overlap.
pub fn chunk_document(
    document: &str,
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Chunk> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let total = count_tokens(trimmed);
    if total <= max_tokens {
        return vec![Chunk {
            document: document.to_string(),
            index: 0,
            text: trimmed.to_string(),
            tokens: total,
            overlap_tokens: 0,
        }];
    }

    let mut builder = ChunkBuilder::new(document, max_tokens, overlap_tokens);
    for section in split_sections(trimmed) {
        builder.push_unit(section, BoundaryLevel::Section);
    }
    builder.finish()
}

/// Boundary granularity, coarsest first. An oversized unit descends one
/// level before resorting to the raw token window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoundaryLevel {
    Section,
    Paragraph,
    Sentence,
}

struct ChunkBuilder<'a> {
    document: &'a str,
    max_tokens: usize,
    overlap_tokens: usize,
    chunks: Vec<Chunk>,
    buf: String,
    buf_tokens: usize,
    /// Tokens at the start of `buf` carried over from the previous chunk.
    buf_overlap: usize,
}

impl<'a> ChunkBuilder<'a> {
    fn new(document: &'a str, max_tokens: usize, overlap_tokens: usize) -> Self {
        Self {
            document,
            max_tokens,
            overlap_tokens,
            chunks: Vec::new(),
            buf: String::new(),
            buf_tokens: 0,
            buf_overlap: 0,
        }
    }

    fn push_unit(&mut self, unit: &str, level: BoundaryLevel) {
        let unit = unit.trim();
        if unit.is_empty() {
            return;
        }
        let unit_tokens = count_tokens(unit);

        if unit_tokens > self.max_tokens {
            self.split_oversized(unit, level);
            return;
        }

        if self.buf_tokens + unit_tokens > self.max_tokens {
            self.flush();
        }
        // An empty buffer after any emitted chunk (flush or window run)
        // restarts the overlap chain from that chunk's tail.
        if self.buf.is_empty() {
            self.seed_overlap(unit_tokens);
        }
        self.append(unit, unit_tokens);
    }

    /// Descend one boundary level; at the bottom, cut exact token windows.
    fn split_oversized(&mut self, unit: &str, level: BoundaryLevel) {
        match level {
            BoundaryLevel::Section => {
                let paragraphs = split_paragraphs(unit);
                if paragraphs.len() > 1 {
                    for p in paragraphs {
                        self.push_unit(p, BoundaryLevel::Paragraph);
                    }
                    return;
                }
                self.split_oversized(unit, BoundaryLevel::Paragraph);
            }
            BoundaryLevel::Paragraph => {
                let sentences = split_sentences(unit);
                if sentences.len() > 1 {
                    for s in sentences {
                        self.push_unit(s, BoundaryLevel::Sentence);
                    }
                    return;
                }
                self.split_oversized(unit, BoundaryLevel::Sentence);
            }
            BoundaryLevel::Sentence => self.split_window(unit),
        }
    }

    /// Hard split at exact token windows of `max_tokens`, advancing so
    /// consecutive windows share `overlap_tokens` tokens. The first
    /// window re-includes the previous chunk's tail so the overlap chain
    /// survives the degradation path.
    fn split_window(&mut self, unit: &str) {
        self.flush();

        let spans = token_spans(unit);

        // The first window continues the overlap chain from whatever
        // chunk preceded the oversized unit.
        let lead = match self.chunks.last() {
            Some(prev) => tail_tokens(&prev.text, self.overlap_tokens).to_string(),
            None => String::new(),
        };
        let lead_tokens = count_tokens(&lead);

        let mut start = 0;
        let mut window = self.max_tokens - lead_tokens;
        let mut overlap = lead_tokens;
        let mut first = true;
        loop {
            let end = (start + window).min(spans.len());
            let body = &unit[spans[start].0..spans[end - 1].1];
            if first && lead_tokens > 0 {
                let text = format!("{}\n\n{}", lead, body);
                self.emit(text, lead_tokens + (end - start), overlap);
            } else {
                self.emit(body.to_string(), end - start, overlap);
            }
            if end == spans.len() {
                break;
            }
            // max(start + 1) keeps the window advancing even when the
            // overlap nearly fills the budget.
            start = end.saturating_sub(self.overlap_tokens).max(start + 1);
            overlap = end - start;
            window = self.max_tokens;
            first = false;
        }
    }

    /// Start the next buffer with the tail of the chunk just emitted,
    /// trimmed so that overlap plus the incoming unit still fits.
    fn seed_overlap(&mut self, incoming_tokens: usize) {
        let Some(prev) = self.chunks.last() else {
            return;
        };
        let allowed = self
            .overlap_tokens
            .min(self.max_tokens.saturating_sub(incoming_tokens));
        if allowed == 0 {
            return;
        }
        let tail = tail_tokens(&prev.text, allowed);
        if tail.is_empty() {
            return;
        }
        let tail_count = count_tokens(tail);
        self.buf = tail.to_string();
        self.buf_tokens = tail_count;
        self.buf_overlap = tail_count;
    }

    fn append(&mut self, unit: &str, unit_tokens: usize) {
        if !self.buf.is_empty() {
            self.buf.push_str("\n\n");
        }
        self.buf.push_str(unit);
        self.buf_tokens += unit_tokens;
    }

    fn flush(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.buf);
        let tokens = self.buf_tokens;
        let overlap = self.buf_overlap;
        self.buf_tokens = 0;
        self.buf_overlap = 0;
        self.emit(text, tokens, overlap);
    }

    fn emit(&mut self, text: String, tokens: usize, overlap_tokens: usize) {
        self.chunks.push(Chunk {
            document: self.document.to_string(),
            index: self.chunks.len(),
            text,
            tokens,
            overlap_tokens,
        });
    }

    fn finish(mut self) -> Vec<Chunk> {
        self.flush();
        self.chunks
    }
}

// ============ Boundary detection ============

/// Split on section boundaries: markdown headings, long `=`/`-` separator
/// rules, `--- DOCUMENT: … ---` markers, and ALL-CAPS title lines after a
/// blank line. A boundary line belongs to the section it opens.
fn split_sections(text: &str) -> Vec<&str> {
    let mut sections = Vec::new();
    let mut section_start = 0;
    let mut prev_blank = true;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let content = line.trim_end_matches(['\n', '\r']);
        let is_boundary = offset > section_start
            && (is_heading(content)
                || is_separator_rule(content)
                || content.starts_with("--- DOCUMENT:")
                || (prev_blank && is_caps_title(content)));

        if is_boundary {
            let section = text[section_start..offset].trim();
            if !section.is_empty() {
                sections.push(&text[section_start..offset]);
            }
            section_start = offset;
        }
        prev_blank = content.trim().is_empty();
        offset += line.len();
    }

    if !text[section_start..].trim().is_empty() {
        sections.push(&text[section_start..]);
    }
    if sections.is_empty() {
        sections.push(text);
    }
    sections
}

fn is_heading(line: &str) -> bool {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    (1..=3).contains(&hashes) && line[hashes..].starts_with(' ')
}

fn is_separator_rule(line: &str) -> bool {
    line.len() >= 50 && (line.chars().all(|c| c == '=') || line.chars().all(|c| c == '-'))
}

fn is_caps_title(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.chars().count() >= 10
        && trimmed.chars().any(|c| c.is_alphabetic())
        && trimmed
            .chars()
            .all(|c| c.is_uppercase() || c.is_whitespace() || c.is_numeric())
}

fn split_paragraphs(text: &str) -> Vec<&str> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Split on sentence terminators followed by whitespace and a plausible
/// sentence opener (upper-case letter, digit, quote, or inverted Spanish
/// punctuation).
fn split_sentences(text: &str) -> Vec<&str> {
    const TERMINATORS: [char; 4] = ['.', '?', '!', '…'];
    const OPENERS: [char; 8] = ['"', '\'', '“', '”', '«', '»', '¿', '¡'];

    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        if !TERMINATORS.contains(&ch) {
            continue;
        }
        // Must be followed by whitespace…
        let Some(&(_, next)) = chars.peek() else {
            continue;
        };
        if !next.is_whitespace() {
            continue;
        }
        // …and the first non-whitespace character after it must open a
        // sentence.
        let after = text[idx + ch.len_utf8()..]
            .chars()
            .find(|c| !c.is_whitespace());
        let opens = matches!(after, Some(c) if c.is_uppercase() || c.is_numeric() || OPENERS.contains(&c));
        if !opens {
            continue;
        }
        let end = idx + ch.len_utf8();
        let sentence = text[start..end].trim();
        if !sentence.is_empty() {
            sentences.push(&text[start..end]);
        }
        start = end;
    }

    if !text[start..].trim().is_empty() {
        sentences.push(&text[start..]);
    }
    if sentences.is_empty() {
        sentences.push(text);
    }
    sentences
}
