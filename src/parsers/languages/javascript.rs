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

pub struct JavaScript;

impl CodeLanguage for JavaScript {
	fn name(&self) -> &'static str {
		"javascript"
	}

	fn get_ts_language(&self) -> tree_sitter::Language {
		tree_sitter_javascript::LANGUAGE.into()
	}

	fn meaningful_kinds(&self) -> &'static [&'static str] {
		&["function_declaration", "method_definition", "class_declaration"]
	}

	fn import_kinds(&self) -> &'static [&'static str] {
		&["import_statement"]
	}

	fn scope_kind(&self, node_kind: &str) -> &'static str {
		match node_kind {
			"function_declaration" => "function",
			"method_definition" => "method",
			"class_declaration" => "class",
			_ => "other",
		}
	}

	fn extract_name(&self, node: Node, source: &str) -> Option<String> {
		node.child_by_field_name("name")
			.and_then(|n| n.utf8_text(source.as_bytes()).ok())
			.map(str::to_string)
	}

	fn import_targets(&self, import_text: &str) -> Vec<String> {
		// `import { a, b } from "mod"` / `import a from "mod"` -> ["mod"]
		import_text
			.rsplit_once("from")
			.map(|(_, rest)| rest)
			.or(Some(import_text))
			.map(|s| s.trim().trim_matches(';').trim_matches('"').trim_matches('\'').to_string())
			.filter(|s| !s.is_empty())
			.into_iter()
			.collect()
	}
}
