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

use super::CodeLanguage;
use tree_sitter::Node;

pub struct Rust;

impl CodeLanguage for Rust {
	fn name(&self) -> &'static str {
		"rust"
	}

	fn get_ts_language(&self) -> tree_sitter::Language {
		tree_sitter_rust::LANGUAGE.into()
	}

	fn meaningful_kinds(&self) -> &'static [&'static str] {
		&[
			"function_item",
			"struct_item",
			"enum_item",
			"trait_item",
			"mod_item",
			"const_item",
			"macro_definition",
		]
	}

	fn import_kinds(&self) -> &'static [&'static str] {
		&["use_declaration"]
	}

	fn scope_kind(&self, node_kind: &str) -> &'static str {
		match node_kind {
			"function_item" => "function",
			"struct_item" => "struct",
			"enum_item" => "enum",
			"trait_item" => "trait",
			"mod_item" => "module",
			"const_item" => "const",
			"macro_definition" => "macro",
			_ => "other",
		}
	}

	fn extract_name(&self, node: Node, source: &str) -> Option<String> {
		for child in node.children(&mut node.walk()) {
			if child.kind() == "identifier" {
				return child.utf8_text(source.as_bytes()).ok().map(str::to_string);
			}
		}
		None
	}

	fn import_targets(&self, import_text: &str) -> Vec<String> {
		// `use a::b::{c, d};` -> ["a::b::c", "a::b::d"]; no brace expansion attempted
		// for nested groups, just the flat common case parsers actually emit.
		let body = import_text
			.trim()
			.trim_start_matches("use ")
			.trim_end_matches(';')
			.trim();
		if let Some((prefix, rest)) = body.split_once('{') {
			let rest = rest.trim_end_matches('}');
			rest.split(',')
				.map(|item| format!("{}{}", prefix, item.trim()))
				.filter(|s| !s.ends_with("::"))
				.collect()
		} else {
			vec![body.to_string()]
		}
	}
}
