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

pub struct Python;

impl CodeLanguage for Python {
	fn name(&self) -> &'static str {
		"python"
	}

	fn get_ts_language(&self) -> tree_sitter::Language {
		tree_sitter_python::LANGUAGE.into()
	}

	fn meaningful_kinds(&self) -> &'static [&'static str] {
		&["function_definition", "class_definition"]
	}

	fn import_kinds(&self) -> &'static [&'static str] {
		&["import_statement", "import_from_statement"]
	}

	fn scope_kind(&self, node_kind: &str) -> &'static str {
		match node_kind {
			"function_definition" => "function",
			"class_definition" => "class",
			_ => "other",
		}
	}

	fn extract_name(&self, node: Node, source: &str) -> Option<String> {
		node.child_by_field_name("name")
			.and_then(|n| n.utf8_text(source.as_bytes()).ok())
			.map(str::to_string)
	}

	fn import_targets(&self, import_text: &str) -> Vec<String> {
		let text = import_text.trim();
		if let Some(rest) = text.strip_prefix("from ") {
			let (module, names) = rest.split_once(" import ").unwrap_or((rest, ""));
			names
				.split(',')
				.map(|n| n.trim().split(" as ").next().unwrap_or("").trim())
				.filter(|n| !n.is_empty())
				.map(|n| format!("{}.{}", module.trim(), n))
				.collect()
		} else if let Some(rest) = text.strip_prefix("import ") {
			rest.split(',')
				.map(|n| n.trim().split(" as ").next().unwrap_or("").trim().to_string())
				.filter(|n| !n.is_empty())
				.collect()
		} else {
			vec![]
		}
	}
}
