use crate::error::IngestError;
use crate::models::Chunk;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::ops::Range;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Upper bound on a chunk's length, in chars.
    pub max_chunk_chars: usize,
    /// Chars repeated between consecutive chunks, at most.
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: 1_000,
            overlap_chars: 100,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chunk_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_chunk_chars must be positive".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chunk_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap_chars {} must be smaller than max_chunk_chars {}",
                self.overlap_chars, self.max_chunk_chars
            )));
        }
        Ok(())
    }

    pub fn fingerprint(&self) -> String {
        format!("max{}-overlap{}", self.max_chunk_chars, self.overlap_chars)
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

/// Byte offsets where a sentence or paragraph unit ends.
///
/// A unit ends after the whitespace run that follows `.`, `!` or `?` (closing
/// quotes and brackets may sit in between), or after any whitespace run holding
/// a blank line. The last offset is always `text.len()`, so the units tile the
/// whole text.
pub fn segment_boundaries(text: &str) -> Vec<usize> {
    let mut boundaries = Vec::new();
    let mut after_terminator = false;
    let mut chars = text.char_indices().peekable();

    while let Some((_, ch)) = chars.next() {
        if ch.is_whitespace() {
            let mut newlines = usize::from(ch == '\n');
            let mut run_end = text.len();
            while let Some(&(next_index, next)) = chars.peek() {
                if !next.is_whitespace() {
                    run_end = next_index;
                    break;
                }
                if next == '\n' {
                    newlines += 1;
                }
                chars.next();
            }
            if after_terminator || newlines >= 2 {
                boundaries.push(run_end);
            }
            after_terminator = false;
        } else if matches!(ch, '.' | '!' | '?') {
            after_terminator = true;
        } else if !matches!(ch, '"' | '\'' | ')' | ']' | '\u{201d}' | '\u{2019}') {
            after_terminator = false;
        }
    }

    if !text.is_empty() && boundaries.last() != Some(&text.len()) {
        boundaries.push(text.len());
    }
    boundaries
}

/// Sentence ranges of `text` with surrounding whitespace trimmed off.
pub fn sentence_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut start = 0;
    for end in segment_boundaries(text) {
        let unit = &text[start..end];
        let leading = unit.len() - unit.trim_start().len();
        let trimmed = unit.trim();
        if !trimmed.is_empty() {
            let span_start = start + leading;
            spans.push(span_start..span_start + trimmed.len());
        }
        start = end;
    }
    spans
}

/// Splits `text` into ordered chunks of at most `max_chunk_chars` chars.
///
/// Chunks end on sentence or paragraph boundaries when one fits, otherwise on the
/// last whitespace in the back half of the window, otherwise at a hard char cut.
/// Consecutive chunks share at most `overlap_chars` chars; the shared window starts
/// on a word when it can. Concatenating the chunks with the shared prefixes
/// removed gives back `text` exactly.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    config: ChunkingConfig,
) -> Result<Vec<Chunk>, IngestError> {
    config.validate()?;
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let char_starts: Vec<usize> = text
        .char_indices()
        .map(|(index, _)| index)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_position = |byte: usize| char_starts.partition_point(|&offset| offset < byte);
    let byte_at = |char_index: usize| {
        char_starts
            .get(char_index)
            .copied()
            .unwrap_or(text.len())
    };
    let boundaries = segment_boundaries(text);

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut previous_end = 0usize;

    loop {
        let start_char = char_position(start);
        let limit = byte_at(start_char + config.max_chunk_chars);
        let floor = previous_end.max(start);

        let end = if limit >= text.len() {
            text.len()
        } else {
            let fitting = boundaries.partition_point(|&boundary| boundary <= limit);
            match fitting.checked_sub(1).map(|index| boundaries[index]) {
                Some(boundary) if boundary > floor => boundary,
                _ => {
                    let soft_floor = floor.max(byte_at(start_char + config.max_chunk_chars / 2));
                    last_whitespace_cut(text, soft_floor, limit).unwrap_or(limit)
                }
            }
        };

        let ordinal = u32::try_from(chunks.len()).map_err(|_| {
            IngestError::InvalidArgument("document produces too many chunks".to_string())
        })?;
        let slice = &text[start..end];
        chunks.push(Chunk {
            chunk_id: make_chunk_id(document_id, ordinal, start, slice),
            document_id: document_id.to_string(),
            ordinal,
            start,
            end,
            text: slice.to_string(),
        });

        if end == text.len() {
            break;
        }

        previous_end = end;
        start = overlap_start(text, start, end, char_position(end), config.overlap_chars, &byte_at);
    }

    Ok(chunks)
}

fn last_whitespace_cut(text: &str, floor: usize, limit: usize) -> Option<usize> {
    if floor >= limit {
        return None;
    }
    text[floor..limit]
        .char_indices()
        .rev()
        .find(|(_, ch)| ch.is_whitespace())
        .map(|(index, ch)| floor + index + ch.len_utf8())
        .filter(|&cut| cut > floor)
}

fn overlap_start(
    text: &str,
    start: usize,
    end: usize,
    end_char: usize,
    overlap_chars: usize,
    byte_at: &dyn Fn(usize) -> usize,
) -> usize {
    if overlap_chars == 0 {
        return end;
    }
    let candidate = byte_at(end_char.saturating_sub(overlap_chars));
    if candidate <= start {
        return end;
    }

    let mut previous_is_space = text[..candidate]
        .chars()
        .next_back()
        .map_or(true, char::is_whitespace);
    for (index, ch) in text[candidate..end].char_indices() {
        if previous_is_space && !ch.is_whitespace() {
            return candidate + index;
        }
        previous_is_space = ch.is_whitespace();
    }
    candidate
}

fn make_chunk_id(document_id: &str, ordinal: u32, start: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(ordinal.to_le_bytes());
    hasher.update((start as u64).to_le_bytes());
    hasher.update(text.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{ordinal:04}-{}", &digest[..12])
}
