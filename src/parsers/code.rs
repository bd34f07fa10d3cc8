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

//! Generic tree-sitter scope extractor: walks meaningful node kinds declared
//! by a [`CodeLanguage`] into `Scope` nodes, nests them via `HAS_PARENT`, and
//! buffers `CONSUMES`/`USES_LIBRARY` as unresolved references for the
//! reference linker.

use super::{Parser, SymbolKeyIndex};
use crate::constants::{CONSUMES, DEFINED_IN, HAS_PARENT, USES_LIBRARY};
use crate::error::{IngestError, Result};
use crate::parsers::languages::CodeLanguage;
use crate::registry::Registry;
use crate::types::{Node as GraphNode, ParseOutput, Relationship, SymbolKey, UnresolvedReference};
use serde_json::json;
use std::sync::Arc;
use tree_sitter::Node as TsNode;
use uuid::Uuid;

pub struct CodeParser {
	language: Box<dyn CodeLanguage>,
	registry: Arc<Registry>,
}

impl CodeParser {
	pub fn new(language: Box<dyn CodeLanguage>, registry: Arc<Registry>) -> Self {
		Self { language, registry }
	}
}

impl Parser for CodeParser {
	fn parse(
		&self,
		path: &str,
		bytes: &[u8],
		_project_id: &str,
		symbols: &SymbolKeyIndex,
	) -> Result<ParseOutput> {
		let source = std::str::from_utf8(bytes).map_err(|e| IngestError::Parse {
			path: path.to_string(),
			reason: format!("not valid utf-8: {e}"),
		})?;

		let mut ts_parser = tree_sitter::Parser::new();
		ts_parser
			.set_language(&self.language.get_ts_language())
			.map_err(|e| IngestError::Parse {
				path: path.to_string(),
				reason: format!("grammar mismatch: {e}"),
			})?;
		let tree = ts_parser.parse(source, None).ok_or_else(|| IngestError::Parse {
			path: path.to_string(),
			reason: "tree-sitter produced no tree".to_string(),
		})?;

		let file_def = self
			.registry
			.get("File")
			.expect("File is a builtin registry label");
		let mut file_props = std::collections::BTreeMap::new();
		file_props.insert("path".to_string(), json!(path));
		file_props.insert("language".to_string(), json!(self.language.name()));
		file_props.insert("size".to_string(), json!(bytes.len()));
		let file_uuid = file_def.derive_uuid(&file_props);
		let mut file_node = GraphNode::new(file_uuid, "File");
		file_node.properties = file_props;

		let mut output = ParseOutput::default();
		let mut identifier_refs = Vec::new();
		walk(
			tree.root_node(),
			source,
			path,
			self.language.as_ref(),
			None,
			file_uuid,
			symbols,
			&mut output,
			&mut identifier_refs,
		);

		output.nodes.push(file_node);

		// Every referenced identifier is buffered for the reference linker,
		// which resolves same-file targets first and falls back to scopes in
		// other files; unresolvable ones (locals, parameters) drop silently.
		for (source_uuid, identifier) in identifier_refs {
			output.unresolved.push(UnresolvedReference {
				source_uuid,
				rel_type: CONSUMES.to_string(),
				target_symbol: identifier,
				target_label: Some("Scope".to_string()),
				mandatory: false,
			});
		}

		tracing::debug!(path, scopes = output.nodes.len(), "parsed code scopes");
		Ok(output)
	}
}

#[allow(clippy::too_many_arguments)]
fn walk(
	node: TsNode,
	source: &str,
	path: &str,
	language: &dyn CodeLanguage,
	parent: Option<Uuid>,
	file_uuid: Uuid,
	symbols: &SymbolKeyIndex,
	output: &mut ParseOutput,
	identifier_refs: &mut Vec<(Uuid, String)>,
) {
	let kind = node.kind();

	if language.import_kinds().contains(&kind) {
		if let Ok(text) = node.utf8_text(source.as_bytes()) {
			let source_scope = parent.unwrap_or(file_uuid);
			for target in language.import_targets(text) {
				output.unresolved.push(UnresolvedReference {
					source_uuid: source_scope,
					rel_type: USES_LIBRARY.to_string(),
					target_symbol: target,
					target_label: Some("ExternalLibrary".to_string()),
					mandatory: false,
				});
			}
		}
		return;
	}

	let mut current_parent = parent;

	if language.meaningful_kinds().contains(&kind) {
		let name = language.extract_name(node, source);
		let start_line = node.start_position().row as u32 + 1;
		let end_line = node.end_position().row as u32 + 1;
		let content = node.utf8_text(source.as_bytes()).unwrap_or_default();

		let key = match &name {
			Some(n) => SymbolKey::named(path, n),
			None => SymbolKey::anonymous(path, start_line),
		};
		let uuid = symbols.get(&key).copied().unwrap_or_else(Uuid::new_v4);

		let mut scope = GraphNode::new(uuid, "Scope");
		scope.properties.insert("file".to_string(), json!(path));
		scope
			.properties
			.insert("name".to_string(), json!(name.clone().unwrap_or_default()));
		scope
			.properties
			.insert("kind".to_string(), json!(language.scope_kind(kind)));
		scope.properties.insert("content".to_string(), json!(content));
		scope.properties.insert("startLine".to_string(), json!(start_line));
		scope.properties.insert("endLine".to_string(), json!(end_line));

		output
			.relationships
			.push(Relationship::new(uuid, DEFINED_IN, file_uuid));
		if let Some(parent_uuid) = parent {
			output
				.relationships
				.push(Relationship::new(uuid, HAS_PARENT, parent_uuid));
		}

		for identifier in language.identifiers(node, source) {
			if name.as_deref() != Some(identifier.as_str()) {
				identifier_refs.push((uuid, identifier));
			}
		}

		output.nodes.push(scope);
		current_parent = Some(uuid);
	}

	let mut cursor = node.walk();
	if cursor.goto_first_child() {
		loop {
			walk(
				cursor.node(),
				source,
				path,
				language,
				current_parent,
				file_uuid,
				symbols,
				output,
				identifier_refs,
			);
			if !cursor.goto_next_sibling() {
				break;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::parsers::languages::Rust;
	use std::collections::HashMap;

	#[test]
	fn extracts_scopes_and_defined_in_edges() {
		let registry = Arc::new(Registry::with_builtins());
		let parser = CodeParser::new(Box::new(Rust), registry);
		let source = b"fn a() { b(); }\nfn b() {}\n";
		let symbols: SymbolKeyIndex = HashMap::new();
		let output = parser.parse("src/lib.rs", source, "proj", &symbols).unwrap();

		let scopes: Vec<_> = output.nodes.iter().filter(|n| n.label == "Scope").collect();
		assert_eq!(scopes.len(), 2);
		assert!(output.nodes.iter().any(|n| n.label == "File"));

		let defined_in = output
			.relationships
			.iter()
			.filter(|r| r.rel_type == DEFINED_IN)
			.count();
		assert_eq!(defined_in, 2);

		let consumes = output
			.unresolved
			.iter()
			.any(|r| r.rel_type == CONSUMES && r.target_symbol == "b");
		assert!(consumes, "a() calling b() should buffer a CONSUMES reference for the linker");
	}

	#[test]
	fn reuses_uuid_from_symbol_index_for_named_scope() {
		let registry = Arc::new(Registry::with_builtins());
		let parser = CodeParser::new(Box::new(Rust), registry);
		let mut symbols: SymbolKeyIndex = HashMap::new();
		let reused = Uuid::new_v4();
		symbols.insert(SymbolKey::named("src/lib.rs", "a"), reused);

		let output = parser
			.parse("src/lib.rs", b"fn a() {}\n", "proj", &symbols)
			.unwrap();
		let scope = output.nodes.iter().find(|n| n.label == "Scope").unwrap();
		assert_eq!(scope.uuid, reused);
	}
}
