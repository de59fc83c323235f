//! Sentence-windowed text chunking with overlap.
//!
//! Text is split into sentence units, units are packed into chunks of at most
//! `max_tokens`, and each new chunk is seeded with the tail of the previous
//! one (up to `overlap_tokens`). A final chunk smaller than `min_tokens` is
//! folded into its predecessor.
//!
//! # Algorithm
//!
//! 1. Split on hard newlines, then on sentence terminators (`.`, `!`, `?`)
//!    followed by whitespace and an uppercase letter.
//! 2. Units over the cap are split on `,` `;` `:`, then on whitespace, then
//!    by characters, so no unit alone exceeds `max_tokens`.
//! 3. Units accumulate until the next one would push the chunk over the cap;
//!    the chunk closes and the next one opens with a greedy overlap seed taken
//!    from the end of the closed chunk.
//! 4. An undersized final chunk merges into the previous one, unless it is
//!    the only chunk.
//!
//! Token counts are estimated as `ceil(chars / 4)` throughout.

use serde::Serialize;

use crate::models::ChunkingConfig;

/// Approximate characters-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// A chunk of document text before it is attached to a document and embedded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextChunk {
    pub content: String,
    pub chunk_index: u32,
    pub token_count: u32,
}

/// Text chunker with a fixed token window.
#[derive(Debug, Clone, Copy)]
pub struct TextChunker {
    min_tokens: u32,
    max_tokens: u32,
    overlap_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Unit {
    text: String,
    chars: usize,
    starts_line: bool,
}

#[derive(Debug, Default)]
struct Draft {
    units: Vec<Unit>,
    /// Leading units copied from the previous chunk.
    seeded: usize,
    chars: usize,
}

impl Unit {
    fn new(text: String, starts_line: bool) -> Self {
        let chars = text.chars().count();
        Self {
            text,
            chars,
            starts_line,
        }
    }
}

impl Draft {
    fn seeded_with(units: Vec<Unit>) -> Self {
        let mut draft = Draft::default();
        for unit in units {
            draft.push(unit);
        }
        draft.seeded = draft.units.len();
        draft
    }

    fn projected_chars(&self, unit: &Unit) -> usize {
        if self.units.is_empty() {
            unit.chars
        } else {
            self.chars + 1 + unit.chars
        }
    }

    fn push(&mut self, unit: Unit) {
        self.chars = self.projected_chars(&unit);
        self.units.push(unit);
    }

    fn render(&self) -> String {
        let mut out = String::with_capacity(self.chars);
        for (i, unit) in self.units.iter().enumerate() {
            if i > 0 {
                out.push(if unit.starts_line { '\n' } else { ' ' });
            }
            out.push_str(&unit.text);
        }
        out
    }
}

impl TextChunker {
    /// Create a chunker; `max_tokens` is at least 1 and the overlap stays below it.
    pub fn new(min_tokens: u32, max_tokens: u32, overlap_tokens: u32) -> Self {
        let max_tokens = max_tokens.max(1);
        Self {
            min_tokens,
            max_tokens,
            overlap_tokens: overlap_tokens.min(max_tokens - 1),
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.min_tokens, config.max_tokens, config.overlap_tokens)
    }

    /// Create a chunker with default settings.
    pub fn with_defaults() -> Self {
        Self::from_config(&ChunkingConfig::default())
    }

    /// Chunk `text`. Blank input yields no chunks.
    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        let max_chars = self.max_tokens as usize * CHARS_PER_TOKEN;
        let units = split_units(text, max_chars);
        if units.is_empty() {
            return Vec::new();
        }

        let mut closed: Vec<Draft> = Vec::new();
        let mut current = Draft::default();

        for unit in units {
            if !current.units.is_empty()
                && tokens_for_chars(current.projected_chars(&unit)) > self.max_tokens
            {
                let seed = self.overlap_seed(&current, &unit);
                closed.push(std::mem::replace(&mut current, Draft::seeded_with(seed)));
            }
            current.push(unit);
        }

        if !closed.is_empty() && tokens_for_chars(current.chars) < self.min_tokens {
            let last = closed.len() - 1;
            let seeded = current.seeded;
            for unit in current.units.into_iter().skip(seeded) {
                closed[last].push(unit);
            }
        } else {
            closed.push(current);
        }

        closed
            .iter()
            .enumerate()
            .map(|(idx, draft)| {
                let content = draft.render();
                TextChunk {
                    token_count: estimate_tokens(&content),
                    content,
                    chunk_index: idx as u32,
                }
            })
            .collect()
    }

    /// Trailing units of `closed` to repeat at the head of the next chunk.
    ///
    /// Takes units from the end while the seed stays within the overlap
    /// budget, never the whole chunk, then drops from the front until the
    /// seed plus `next` fits under the cap.
    fn overlap_seed(&self, closed: &Draft, next: &Unit) -> Vec<Unit> {
        if self.overlap_tokens == 0 || closed.units.len() < 2 {
            return Vec::new();
        }

        let mut seed: Vec<Unit> = Vec::new();
        let mut seed_chars = 0usize;
        for unit in closed.units.iter().rev().take(closed.units.len() - 1) {
            let projected = if seed.is_empty() {
                unit.chars
            } else {
                seed_chars + 1 + unit.chars
            };
            if tokens_for_chars(projected) > self.overlap_tokens {
                break;
            }
            seed_chars = projected;
            seed.push(unit.clone());
        }
        seed.reverse();

        while !seed.is_empty()
            && tokens_for_chars(seed_chars + 1 + next.chars) > self.max_tokens
        {
            let dropped = seed.remove(0);
            seed_chars = seed_chars.saturating_sub(dropped.chars + 1);
        }
        seed
    }
}

/// Chunk `text` with explicit window parameters.
pub fn chunk_text(
    text: &str,
    min_tokens: u32,
    max_tokens: u32,
    overlap_tokens: u32,
) -> Vec<TextChunk> {
    TextChunker::new(min_tokens, max_tokens, overlap_tokens).chunk(text)
}

/// Estimate the number of tokens in a text.
/// Uses a simple heuristic: ~4 characters per token, rounded up.
pub fn estimate_tokens(text: &str) -> u32 {
    tokens_for_chars(text.chars().count())
}

fn tokens_for_chars(chars: usize) -> u32 {
    chars.div_ceil(CHARS_PER_TOKEN) as u32
}

/// Sentence units, each at most `max_chars` characters.
fn split_units(text: &str, max_chars: usize) -> Vec<Unit> {
    let mut units = Vec::new();
    for line in text.lines() {
        let mut starts_line = true;
        for sentence in split_sentences(line) {
            if sentence.chars().count() <= max_chars {
                units.push(Unit::new(sentence.to_string(), starts_line));
            } else {
                for piece in split_oversized(sentence, max_chars) {
                    units.push(Unit::new(piece, starts_line));
                    starts_line = false;
                }
            }
            starts_line = false;
        }
    }
    units
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

fn is_closer(c: char) -> bool {
    matches!(c, '"' | '\'' | ')' | ']' | '\u{201d}' | '\u{2019}')
}

/// Split one line at terminators followed by whitespace and a capital letter.
fn split_sentences(line: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = line.char_indices().collect();
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        if is_terminator(chars[i].1) {
            let mut end = i + 1;
            while end < chars.len() && is_closer(chars[end].1) {
                end += 1;
            }
            let mut next = end;
            while next < chars.len() && chars[next].1.is_whitespace() {
                next += 1;
            }
            if next > end && next < chars.len() && chars[next].1.is_uppercase() {
                let sentence = line[start..chars[end].0].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                start = chars[next].0;
                i = next;
                continue;
            }
        }
        i += 1;
    }

    let tail = line[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Break an over-long sentence on clause punctuation, then words, then characters.
fn split_oversized(sentence: &str, max_chars: usize) -> Vec<String> {
    let mut parts = Vec::new();
    for clause in split_clauses(sentence) {
        if clause.chars().count() <= max_chars {
            parts.push(clause.to_string());
        } else {
            let words: Vec<String> = clause
                .split_whitespace()
                .flat_map(|w| hard_split(w, max_chars))
                .collect();
            parts.extend(pack(words, max_chars));
        }
    }
    pack(parts, max_chars)
}

/// Split after `,` `;` `:` when followed by whitespace, keeping the punctuation.
fn split_clauses(sentence: &str) -> Vec<&str> {
    let mut clauses = Vec::new();
    let mut start = 0usize;
    let mut iter = sentence.char_indices().peekable();
    while let Some((idx, c)) = iter.next() {
        if matches!(c, ',' | ';' | ':')
            && iter.peek().is_some_and(|(_, next)| next.is_whitespace())
        {
            let end = idx + c.len_utf8();
            let clause = sentence[start..end].trim();
            if !clause.is_empty() {
                clauses.push(clause);
            }
            start = end;
        }
    }
    let tail = sentence[start..].trim();
    if !tail.is_empty() {
        clauses.push(tail);
    }
    clauses
}

fn hard_split(word: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    chars
        .chunks(max_chars.max(1))
        .map(|c| c.iter().collect())
        .collect()
}

/// Greedily join parts with single spaces while the result fits `max_chars`.
fn pack(parts: Vec<String>, max_chars: usize) -> Vec<String> {
    let mut packed: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for part in parts {
        let part_chars = part.chars().count();
        if current.is_empty() {
            current = part;
            current_chars = part_chars;
        } else if current_chars + 1 + part_chars <= max_chars {
            current.push(' ');
            current.push_str(&part);
            current_chars += 1 + part_chars;
        } else {
            packed.push(std::mem::take(&mut current));
            current = part;
            current_chars = part_chars;
        }
    }
    if !current.is_empty() {
        packed.push(current);
    }
    packed
}
