// Copyright 2025 RagForge Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Chunking strategies declared by the node-type registry.

use crate::constants::PARAGRAPH_OVERFLOW_FACTOR;
use crate::types::ChunkingStrategy;
use regex::Regex;
use std::sync::LazyLock;

static SENTENCE_BOUNDARY: LazyLock<Regex> = LazyLock::new(|| {
	// A `.`/`!`/`?` followed by whitespace and an uppercase letter, or by a newline.
	// Deliberately excludes boundaries inside decimals (`3.14`) and URLs (`a.b.com`)
	// by requiring the character before the punctuation not be a digit when followed
	// by a digit, which the lookaround-free engine handles via the uppercase/newline
	// requirement on the right-hand side alone.
	Regex::new(r"([.!?])(\s+)([A-Z]|\n)").unwrap()
});

static BLANK_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n[ \t]*\n+").unwrap());

/// A chunk carved out of a parent node's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
	pub content: String,
	pub start_line: u32,
	pub end_line: u32,
	pub start_char: usize,
	pub end_char: usize,
}

/// Maps a byte offset into `text` onto a 1-based line number.
struct LineMap {
	/// Byte offset at which each line starts, in order.
	line_starts: Vec<usize>,
}

impl LineMap {
	fn build(text: &str) -> Self {
		let mut line_starts = vec![0];
		for (idx, byte) in text.bytes().enumerate() {
			if byte == b'\n' {
				line_starts.push(idx + 1);
			}
		}
		Self { line_starts }
	}

	fn line_of(&self, offset: usize) -> u32 {
		match self.line_starts.binary_search(&offset) {
			Ok(idx) => (idx + 1) as u32,
			Err(idx) => idx as u32,
		}
	}
}

/// Dispatches to the strategy-specific chunker and then applies the shared
/// "too small, merge with predecessor" rule.
pub fn chunk(text: &str, strategy: &ChunkingStrategy) -> Vec<Chunk> {
	if text.trim().is_empty() {
		return Vec::new();
	}
	let raw = match strategy {
		ChunkingStrategy::None => vec![whole_document(text)],
		ChunkingStrategy::Fixed {
			chunk_size,
			overlap,
			..
		} => chunk_fixed(text, *chunk_size, *overlap),
		ChunkingStrategy::Paragraph {
			chunk_size,
			overlap,
			..
		} => chunk_paragraph(text, *chunk_size, *overlap),
		ChunkingStrategy::Sentence {
			chunk_size,
			overlap,
			..
		} => chunk_sentence(text, *chunk_size, *overlap),
	};
	merge_undersized(raw, strategy.min_chunk_size())
}

fn whole_document(text: &str) -> Chunk {
	let line_map = LineMap::build(text);
	Chunk {
		content: text.to_string(),
		start_line: 1,
		end_line: line_map.line_of(text.len().saturating_sub(1)),
		start_char: 0,
		end_char: text.len(),
	}
}

/// Fixed-size chunking on character count, breaking at the nearest preceding
/// word boundary so chunks never split mid-token.
fn chunk_fixed(text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
	let line_map = LineMap::build(text);
	let chars: Vec<(usize, char)> = text.char_indices().collect();
	if chars.is_empty() {
		return Vec::new();
	}

	let mut chunks = Vec::new();
	let mut start_idx = 0usize;

	while start_idx < chars.len() {
		let mut end_idx = (start_idx + chunk_size).min(chars.len());
		if end_idx < chars.len() {
			end_idx = back_off_to_word_boundary(&chars, start_idx, end_idx);
		}
		if end_idx <= start_idx {
			end_idx = (start_idx + chunk_size).min(chars.len());
		}

		let start_char = chars[start_idx].0;
		let end_char = if end_idx < chars.len() {
			chars[end_idx].0
		} else {
			text.len()
		};
		chunks.push(Chunk {
			content: text[start_char..end_char].to_string(),
			start_line: line_map.line_of(start_char),
			end_line: line_map.line_of(end_char.saturating_sub(1)),
			start_char,
			end_char,
		});

		if end_idx >= chars.len() {
			break;
		}
		let next_start = if overlap > 0 && end_idx > overlap {
			back_off_to_word_boundary(&chars, start_idx, end_idx - overlap)
		} else {
			end_idx
		};
		start_idx = next_start.max(start_idx + 1);
	}

	chunks
}

fn back_off_to_word_boundary(chars: &[(usize, char)], floor: usize, ideal: usize) -> usize {
	let mut idx = ideal.min(chars.len());
	while idx > floor && idx < chars.len() && !chars[idx].1.is_whitespace() {
		idx -= 1;
	}
	if idx <= floor {
		ideal
	} else {
		idx
	}
}

/// Split on blank-line boundaries; paragraphs over `1.5 * chunk_size` are
/// recursively split into sentences.
fn chunk_paragraph(text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
	let line_map = LineMap::build(text);
	let overflow_limit = (chunk_size as f64 * PARAGRAPH_OVERFLOW_FACTOR) as usize;

	let mut paragraphs: Vec<(usize, usize)> = Vec::new();
	let mut cursor = 0;
	for m in BLANK_LINE.find_iter(text) {
		if m.start() > cursor {
			paragraphs.push((cursor, m.start()));
		}
		cursor = m.end();
	}
	if cursor < text.len() {
		paragraphs.push((cursor, text.len()));
	}
	if paragraphs.is_empty() {
		paragraphs.push((0, text.len()));
	}

	let mut chunks = Vec::new();
	let mut buf_start: Option<usize> = None;
	let mut buf_end = 0usize;

	let flush = |chunks: &mut Vec<Chunk>, start: usize, end: usize| {
		if end > start {
			chunks.push(Chunk {
				content: text[start..end].to_string(),
				start_line: line_map.line_of(start),
				end_line: line_map.line_of(end.saturating_sub(1)),
				start_char: start,
				end_char: end,
			});
		}
	};

	for (p_start, p_end) in paragraphs {
		let p_len = p_end - p_start;
		if p_len > overflow_limit {
			if let Some(start) = buf_start.take() {
				flush(&mut chunks, start, buf_end);
			}
			let sub = chunk_sentence(&text[p_start..p_end], chunk_size, overlap);
			for mut c in sub {
				c.start_char += p_start;
				c.end_char += p_start;
				c.start_line = line_map.line_of(c.start_char);
				c.end_line = line_map.line_of(c.end_char.saturating_sub(1));
				chunks.push(c);
			}
			continue;
		}

		match buf_start {
			None => {
				buf_start = Some(p_start);
				buf_end = p_end;
			}
			Some(start) => {
				if p_end - start > chunk_size {
					flush(&mut chunks, start, buf_end);
					buf_start = Some(p_start);
					buf_end = p_end;
				} else {
					buf_end = p_end;
				}
			}
		}
	}
	if let Some(start) = buf_start {
		flush(&mut chunks, start, buf_end);
	}

	chunks
}

/// Split on sentence boundaries, combining sentences shorter than
/// `MIN_SENTENCE_CHARS` with their neighbors, then packing into chunks of
/// roughly `chunk_size`.
fn chunk_sentence(text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
	use crate::constants::MIN_SENTENCE_CHARS;
	let line_map = LineMap::build(text);

	let mut sentence_bounds: Vec<usize> = Vec::new();
	for m in SENTENCE_BOUNDARY.captures_iter(text) {
		if let Some(punct) = m.get(1) {
			sentence_bounds.push(punct.end());
		}
	}
	sentence_bounds.push(text.len());

	let mut sentences: Vec<(usize, usize)> = Vec::new();
	let mut start = 0;
	for end in sentence_bounds {
		if end > start {
			sentences.push((start, end));
			start = end;
		}
	}
	if sentences.is_empty() {
		sentences.push((0, text.len()));
	}

	// Combine runs shorter than MIN_SENTENCE_CHARS with the following sentence.
	let mut combined: Vec<(usize, usize)> = Vec::new();
	for (s_start, s_end) in sentences {
		if let Some(last) = combined.last_mut() {
			if s_end - last.0 < MIN_SENTENCE_CHARS || last.1 - last.0 < MIN_SENTENCE_CHARS {
				last.1 = s_end;
				continue;
			}
		}
		combined.push((s_start, s_end));
	}

	// Pack sentences into chunks up to chunk_size, carrying overlap at sentence boundaries.
	let mut chunks = Vec::new();
	let mut i = 0;
	while i < combined.len() {
		let chunk_start = combined[i].0;
		let mut chunk_end = combined[i].1;
		let mut j = i + 1;
		while j < combined.len() && combined[j].1 - chunk_start <= chunk_size {
			chunk_end = combined[j].1;
			j += 1;
		}
		chunks.push(Chunk {
			content: text[chunk_start..chunk_end].to_string(),
			start_line: line_map.line_of(chunk_start),
			end_line: line_map.line_of(chunk_end.saturating_sub(1)),
			start_char: chunk_start,
			end_char: chunk_end,
		});

		if j >= combined.len() {
			break;
		}
		// Step back by overlap worth of sentences for the next chunk's start.
		let mut back = j;
		let mut consumed = 0usize;
		while back > i + 1 && consumed < overlap {
			back -= 1;
			consumed += combined[back].1 - combined[back].0;
		}
		i = back.max(i + 1);
	}

	chunks
}

/// Discards chunks shorter than `min_chunk_size` by folding them into the
/// preceding chunk: "the smallest chunk is appended to its predecessor".
fn merge_undersized(chunks: Vec<Chunk>, min_chunk_size: usize) -> Vec<Chunk> {
	if chunks.len() <= 1 || min_chunk_size == 0 {
		return chunks;
	}
	let mut result: Vec<Chunk> = Vec::with_capacity(chunks.len());
	for chunk in chunks {
		if chunk.content.len() < min_chunk_size && !result.is_empty() {
			let prev = result.last_mut().unwrap();
			prev.content.push(' ');
			prev.content.push_str(&chunk.content);
			prev.end_line = chunk.end_line;
			prev.end_char = chunk.end_char;
		} else {
			result.push(chunk);
		}
	}
	result
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fixed_chunking_covers_whole_text() {
		let text = "word ".repeat(500);
		let chunks = chunk_fixed(&text, 200, 20);
		assert!(!chunks.is_empty());
		assert_eq!(chunks.last().unwrap().end_char, text.len());
	}

	#[test]
	fn fixed_chunking_never_splits_a_word() {
		let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
		let chunks = chunk_fixed(text, 20, 5);
		for c in &chunks {
			assert!(!c.content.starts_with(' '));
		}
	}

	#[test]
	fn paragraph_chunking_splits_on_blank_lines() {
		let text = "Para one is short.\n\nPara two is also short.\n\nPara three too.";
        let chunks = chunk_paragraph(text, 1000, 0);
        assert_eq!(chunks.len(), 1, "small paragraphs under chunk_size pack into one chunk");
	}

	#[test]
	fn oversized_paragraph_falls_back_to_sentences() {
		let long_sentence_unit = "This is one sentence. ";
		let huge_paragraph = long_sentence_unit.repeat(200);
		let chunks = chunk_paragraph(&huge_paragraph, 100, 10);
		assert!(chunks.len() > 1);
	}

	#[test]
	fn undersized_chunks_merge_into_predecessor() {
		let chunks = vec![
			Chunk {
				content: "a".repeat(100),
				start_line: 1,
				end_line: 1,
				start_char: 0,
				end_char: 100,
			},
			Chunk {
				content: "b".repeat(5),
				start_line: 2,
				end_line: 2,
				start_char: 100,
				end_char: 105,
			},
		];
		let merged = merge_undersized(chunks, 50);
		assert_eq!(merged.len(), 1);
		assert!(merged[0].content.ends_with(&"b".repeat(5)));
	}

	#[test]
	fn none_strategy_returns_whole_document() {
		let chunks = chunk("hello\nworld", &ChunkingStrategy::None);
		assert_eq!(chunks.len(), 1);
		assert_eq!(chunks[0].content, "hello\nworld");
	}
}
