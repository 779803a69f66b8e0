//! Paragraph-bounded splitting of long documents.
//!
//! Chunks are borrowed slices of the input and cover it exactly:
//! `split_chunks(doc, n).concat() == doc`. Separators stay attached to the
//! paragraph before them. Budgets are in `char`s, not bytes.

use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;

static RE_PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n(?:[ \t]*\n)+").unwrap());
static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Paragraph,
    Line,
    Word,
    Char,
}

impl Level {
    fn finer(self) -> Level {
        match self {
            Level::Paragraph => Level::Line,
            Level::Line => Level::Word,
            Level::Word | Level::Char => Level::Char,
        }
    }

    /// End offsets of each segment of `text` at this level. The last is `text.len()`.
    fn segment_ends(self, text: &str) -> Vec<usize> {
        let mut ends: Vec<usize> = match self {
            Level::Paragraph => RE_PARAGRAPH_BREAK.find_iter(text).map(|m| m.end()).collect(),
            Level::Line => text.match_indices('\n').map(|(i, _)| i + 1).collect(),
            Level::Word => RE_WHITESPACE.find_iter(text).map(|m| m.end()).collect(),
            Level::Char => text.char_indices().skip(1).map(|(i, _)| i).collect(),
        };
        if ends.last() != Some(&text.len()) {
            ends.push(text.len());
        }
        ends
    }
}

/// Split `doc` into chunks of at most `max_chars` characters.
///
/// Paragraphs are packed greedily. A paragraph that alone exceeds the budget
/// is split at line boundaries, then word boundaries, then characters.
/// A document within budget comes back as a single chunk.
pub fn split_chunks(doc: &str, max_chars: usize) -> Vec<&str> {
    if doc.is_empty() {
        return Vec::new();
    }
    let max_chars = max_chars.max(1);
    if doc.chars().count() <= max_chars {
        return vec![doc];
    }

    let mut ranges = Vec::new();
    pack(doc, 0..doc.len(), Level::Paragraph, max_chars, &mut ranges);
    ranges.into_iter().map(|r| &doc[r]).collect()
}

fn pack(doc: &str, span: Range<usize>, level: Level, max_chars: usize, out: &mut Vec<Range<usize>>) {
    let text = &doc[span.clone()];
    let mut current: Option<(Range<usize>, usize)> = None;
    let mut seg_start = span.start;

    for end in level.segment_ends(text) {
        let seg = seg_start..span.start + end;
        seg_start = seg.end;
        let seg_chars = doc[seg.clone()].chars().count();

        if seg_chars > max_chars {
            if let Some((range, _)) = current.take() {
                out.push(range);
            }
            pack(doc, seg, level.finer(), max_chars, out);
            continue;
        }

        current = match current.take() {
            Some((range, chars)) if chars + seg_chars <= max_chars => {
                Some((range.start..seg.end, chars + seg_chars))
            }
            Some((range, _)) => {
                out.push(range);
                Some((seg, seg_chars))
            }
            None => Some((seg, seg_chars)),
        };
    }

    if let Some((range, _)) = current {
        out.push(range);
    }
}
