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

//! Per-language tree-sitter grammars and symbol extraction, feeding the
//! generic scope builder in [`super::code`]. Cross-file import resolution is
//! deliberately not implemented here: parsers only emit raw import targets as
//! [`crate::types::UnresolvedReference`] values, and resolving them against the
//! graph is the reference linker's job, not a per-language concern.

mod go;
mod javascript;
mod python;
mod rust;
mod typescript;

pub use go::Go;
pub use javascript::JavaScript;
pub use python::Python;
pub use rust::Rust;
pub use typescript::TypeScript;

use tree_sitter::Node;

/// A language's tree-sitter grammar plus the minimal symbol-extraction surface
/// the code parser needs to turn scope nodes into [`crate::types::Node`]s.
pub trait CodeLanguage: Send + Sync {
	fn name(&self) -> &'static str;

	fn get_ts_language(&self) -> tree_sitter::Language;

	/// Tree-sitter node kinds worth materializing as a `Scope` node.
	fn meaningful_kinds(&self) -> &'static [&'static str];

	/// Tree-sitter node kinds representing an import/use statement; their full
	/// text is handed to [`CodeLanguage::import_targets`] verbatim.
	fn import_kinds(&self) -> &'static [&'static str];

	/// The scope `kind` property value for a meaningful node kind, e.g.
	/// `"function_item"` -> `"function"`.
	fn scope_kind(&self, node_kind: &str) -> &'static str;

	/// The declared name of a meaningful node, if it has one (anonymous
	/// closures and the like return `None`).
	fn extract_name(&self, node: Node, source: &str) -> Option<String>;

	/// Raw module/symbol names referenced by an import statement's text, in
	/// source order. No path resolution: `"foo::bar::Baz"` stays as-is.
	fn import_targets(&self, import_text: &str) -> Vec<String>;

	/// All identifiers appearing under `node`, for the `CONSUMES` heuristic:
	/// each becomes a buffered unresolved reference the linker matches
	/// against scope names, same-file first, then across files.
	fn identifiers(&self, node: Node, source: &str) -> Vec<String> {
		let mut out = Vec::new();
		collect_identifiers(node, source, &mut out);
		out.sort();
		out.dedup();
		out
	}
}

fn collect_identifiers(node: Node, source: &str, out: &mut Vec<String>) {
	let kind = node.kind();
	if kind.contains("identifier") && !kind.contains("type") {
		if let Ok(text) = node.utf8_text(source.as_bytes()) {
			let text = text.trim();
			if !text.is_empty() {
				out.push(text.to_string());
			}
		}
	}
	let mut cursor = node.walk();
	if cursor.goto_first_child() {
		loop {
			collect_identifiers(cursor.node(), source, out);
			if !cursor.goto_next_sibling() {
				break;
			}
		}
	}
}

/// Gets a language implementation by its registry name.
pub fn get_language(name: &str) -> Option<Box<dyn CodeLanguage>> {
	match name {
		"rust" => Some(Box::new(Rust)),
		"python" => Some(Box::new(Python)),
		"javascript" => Some(Box::new(JavaScript)),
		"typescript" => Some(Box::new(TypeScript)),
		"go" => Some(Box::new(Go)),
		_ => None,
	}
}

/// Detects language from a file extension.
pub fn detect_language(path: &str) -> Option<&'static str> {
	let ext = std::path::Path::new(path).extension()?.to_str()?;
	match ext {
		"rs" => Some("rust"),
		"py" => Some("python"),
		"js" | "mjs" | "jsx" => Some("javascript"),
		"ts" | "tsx" => Some("typescript"),
		"go" => Some("go"),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn detect_language_covers_known_extensions() {
		assert_eq!(detect_language("src/main.rs"), Some("rust"));
		assert_eq!(detect_language("lib/foo.py"), Some("python"));
		assert_eq!(detect_language("app/index.tsx"), Some("typescript"));
		assert_eq!(detect_language("README.md"), None);
	}

	#[test]
	fn get_language_round_trips_detect_language() {
		for name in ["rust", "python", "javascript", "typescript", "go"] {
			assert!(get_language(name).is_some());
		}
		assert!(get_language("cobol").is_none());
	}
}
