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

pub struct Go;

impl CodeLanguage for Go {
	fn name(&self) -> &'static str {
		"go"
	}

	fn get_ts_language(&self) -> tree_sitter::Language {
		tree_sitter_go::LANGUAGE.into()
	}

	fn meaningful_kinds(&self) -> &'static [&'static str] {
		&[
			"function_declaration",
			"method_declaration",
			"type_declaration",
			"const_declaration",
		]
	}

	fn import_kinds(&self) -> &'static [&'static str] {
		&["import_declaration"]
	}

	fn scope_kind(&self, node_kind: &str) -> &'static str {
		match node_kind {
			"function_declaration" => "function",
			"method_declaration" => "method",
			"type_declaration" => "type",
			"const_declaration" => "const",
			_ => "other",
		}
	}

	fn extract_name(&self, node: Node, source: &str) -> Option<String> {
		node.child_by_field_name("name")
			.and_then(|n| n.utf8_text(source.as_bytes()).ok())
			.map(str::to_string)
	}

	fn import_targets(&self, import_text: &str) -> Vec<String> {
		import_text
			.trim_start_matches("import")
			.trim()
			.trim_start_matches('(')
			.trim_end_matches(')')
			.lines()
			.map(|line| line.trim().trim_matches('"'))
			.filter(|s| !s.is_empty())
			.map(str::to_string)
			.collect()
	}
}
