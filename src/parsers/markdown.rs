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

//! Markdown parser: splits a document into `MarkdownSection` nodes at heading
//! boundaries, nested by heading level via `HAS_SECTION`.

use super::{Parser, SymbolKeyIndex};
use crate::constants::{DEFINED_IN, HAS_SECTION};
use crate::error::{IngestError, Result};
use crate::registry::Registry;
use crate::types::{Node as GraphNode, ParseOutput, Relationship, SymbolKey};
use pulldown_cmark::{Event, HeadingLevel, Parser as CmarkParser, Tag, TagEnd};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

struct Section {
	uuid: Uuid,
	level: u8,
	title: String,
	start_line: u32,
	end_line: u32,
	content: String,
}

pub struct MarkdownParser {
	registry: Arc<Registry>,
}

impl MarkdownParser {
	pub fn new(registry: Arc<Registry>) -> Self {
		Self { registry }
	}
}

impl Parser for MarkdownParser {
	fn parse(
		&self,
		path: &str,
		bytes: &[u8],
		_project_id: &str,
		symbols: &SymbolKeyIndex,
	) -> Result<ParseOutput> {
		let text = std::str::from_utf8(bytes).map_err(|e| IngestError::Parse {
			path: path.to_string(),
			reason: format!("not valid utf-8: {e}"),
		})?;

		let file_def = self
			.registry
			.get("File")
			.expect("File is a builtin registry label");
		let mut file_props = std::collections::BTreeMap::new();
		file_props.insert("path".to_string(), json!(path));
		file_props.insert("language".to_string(), json!("markdown"));
		let file_uuid = file_def.derive_uuid(&file_props);
		let mut file_node = GraphNode::new(file_uuid, "File");
		file_node.properties = file_props;

		let line_offsets = build_line_offsets(text);
		let sections = split_sections(text, path, symbols, &line_offsets);

		let mut output = ParseOutput::default();
		let mut stack: Vec<(u8, Uuid)> = Vec::new();

		for section in &sections {
			while stack.last().is_some_and(|(level, _)| *level >= section.level) {
				stack.pop();
			}
			let parent_uuid = stack.last().map(|(_, uuid)| *uuid).unwrap_or(file_uuid);
			let rel_type = if parent_uuid == file_uuid { DEFINED_IN } else { HAS_SECTION };

			let mut node = GraphNode::new(section.uuid, "MarkdownSection");
			node.properties.insert("file".to_string(), json!(path));
			node.properties.insert("title".to_string(), json!(section.title));
			node.properties.insert("content".to_string(), json!(section.content));
			node.properties.insert("level".to_string(), json!(section.level));
			node.properties.insert("startLine".to_string(), json!(section.start_line));
			node.properties.insert("endLine".to_string(), json!(section.end_line));

			output.relationships.push(Relationship::new(section.uuid, rel_type, parent_uuid));
			output.nodes.push(node);
			stack.push((section.level, section.uuid));
		}

		output.nodes.push(file_node);
		tracing::debug!(path, sections = sections.len(), "parsed markdown sections");
		Ok(output)
	}
}

fn build_line_offsets(text: &str) -> Vec<usize> {
	let mut offsets = vec![0];
	for (idx, byte) in text.bytes().enumerate() {
		if byte == b'\n' {
			offsets.push(idx + 1);
		}
	}
	offsets
}

fn line_of(offsets: &[usize], byte_offset: usize) -> u32 {
	match offsets.binary_search(&byte_offset) {
		Ok(line) => line as u32 + 1,
		Err(line) => line as u32,
	}
}

fn split_sections(
	text: &str,
	path: &str,
	symbols: &SymbolKeyIndex,
	line_offsets: &[usize],
) -> Vec<Section> {
	let parser = CmarkParser::new(text).into_offset_iter();
	let mut headings: Vec<(u8, String, usize)> = Vec::new();
	let mut current_title = String::new();
	let mut in_heading = false;
	let mut current_level = 0u8;
	let mut current_start = 0usize;

	for (event, range) in parser {
		match event {
			Event::Start(Tag::Heading { level, .. }) => {
				in_heading = true;
				current_title.clear();
				current_level = heading_level(level);
				current_start = range.start;
			}
			Event::End(TagEnd::Heading(_)) => {
				in_heading = false;
				headings.push((current_level, current_title.trim().to_string(), current_start));
			}
			Event::Text(t) | Event::Code(t) if in_heading => {
				current_title.push_str(&t);
			}
			_ => {}
		}
	}

	if headings.is_empty() {
		if text.trim().is_empty() {
			return Vec::new();
		}
		let uuid = symbol_uuid(path, "document", 1, symbols);
		return vec![Section {
			uuid,
			level: 1,
			title: "document".to_string(),
			start_line: 1,
			end_line: line_of(line_offsets, text.len()),
			content: text.to_string(),
		}];
	}

	let mut sections = Vec::with_capacity(headings.len());
	for (idx, (level, title, start)) in headings.iter().enumerate() {
		let end = headings.get(idx + 1).map(|(_, _, s)| *s).unwrap_or(text.len());
		let content = text[*start..end].to_string();
		let start_line = line_of(line_offsets, *start);
		let uuid = symbol_uuid(path, title, start_line, symbols);
		sections.push(Section {
			uuid,
			level: *level,
			title: title.clone(),
			start_line,
			end_line: line_of(line_offsets, end),
			content,
		});
	}
	sections
}

fn symbol_uuid(path: &str, title: &str, start_line: u32, symbols: &SymbolKeyIndex) -> Uuid {
	let key = if title.is_empty() {
		SymbolKey::anonymous(path, start_line)
	} else {
		SymbolKey::named(path, title)
	};
	symbols.get(&key).copied().unwrap_or_else(Uuid::new_v4)
}

fn heading_level(level: HeadingLevel) -> u8 {
	match level {
		HeadingLevel::H1 => 1,
		HeadingLevel::H2 => 2,
		HeadingLevel::H3 => 3,
		HeadingLevel::H4 => 4,
		HeadingLevel::H5 => 5,
		HeadingLevel::H6 => 6,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;

	#[test]
	fn splits_on_headings_and_nests_by_level() {
		let registry = Arc::new(Registry::with_builtins());
		let parser = MarkdownParser::new(registry);
		let text = b"# Title\n\nintro\n\n## Sub\n\nbody\n";
		let symbols: SymbolKeyIndex = HashMap::new();
		let output = parser.parse("docs/readme.md", text, "proj", &symbols).unwrap();

		let sections: Vec<_> = output
			.nodes
			.iter()
			.filter(|n| n.label == "MarkdownSection")
			.collect();
		assert_eq!(sections.len(), 2);

		let has_section = output
			.relationships
			.iter()
			.any(|r| r.rel_type == HAS_SECTION);
		assert!(has_section, "Sub should nest under Title via HAS_SECTION");
	}

	#[test]
	fn document_with_no_headings_becomes_one_section() {
		let registry = Arc::new(Registry::with_builtins());
		let parser = MarkdownParser::new(registry);
		let symbols: SymbolKeyIndex = HashMap::new();
		let output = parser
			.parse("docs/notes.md", b"just text, no headings\n", "proj", &symbols)
			.unwrap();
		let sections: Vec<_> = output
			.nodes
			.iter()
			.filter(|n| n.label == "MarkdownSection")
			.collect();
		assert_eq!(sections.len(), 1);
	}
}
