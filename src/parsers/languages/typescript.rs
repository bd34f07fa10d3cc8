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

//! TypeScript reuses JavaScript's name/import extraction: the two grammars
//! share almost all relevant node shapes, only `get_ts_language` differs.

use super::{CodeLanguage, JavaScript};
use tree_sitter::Node;

pub struct TypeScript;

impl CodeLanguage for TypeScript {
	fn name(&self) -> &'static str {
		"typescript"
	}

	fn get_ts_language(&self) -> tree_sitter::Language {
		tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
	}

	fn meaningful_kinds(&self) -> &'static [&'static str] {
		&[
			"function_declaration",
			"method_definition",
			"class_declaration",
			"interface_declaration",
		]
	}

	fn import_kinds(&self) -> &'static [&'static str] {
		&["import_statement"]
	}

	fn scope_kind(&self, node_kind: &str) -> &'static str {
		match node_kind {
			"interface_declaration" => "interface",
			other => JavaScript.scope_kind(other),
		}
	}

	fn extract_name(&self, node: Node, source: &str) -> Option<String> {
		JavaScript.extract_name(node, source)
	}

	fn import_targets(&self, import_text: &str) -> Vec<String> {
		JavaScript.import_targets(import_text)
	}
}
