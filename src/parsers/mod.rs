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

//! Parser dispatch: picks a [`Parser`] by file extension, with a plain-text
//! fallback and a forced choice for web sources. Parsers never write to the
//! graph and never call an embedding provider; they turn raw bytes into a
//! [`ParseOutput`] only.

pub mod code;
pub mod languages;
pub mod markdown;
pub mod text;

use crate::error::Result;
use crate::registry::Registry;
use crate::types::{ParseOutput, SymbolKey};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Built by the metadata preserver's capture phase and handed to
/// each parser so named symbols reappearing in the same file can reuse their
/// previous uuid instead of minting a new one.
pub type SymbolKeyIndex = HashMap<SymbolKey, Uuid>;

pub trait Parser: Send + Sync {
	fn parse(
		&self,
		path: &str,
		bytes: &[u8],
		project_id: &str,
		symbols: &SymbolKeyIndex,
	) -> Result<ParseOutput>;
}

/// Picks a parser for `path`. `is_web_source` forces the web-sourced
/// fallback regardless of extension; the core has no dedicated web-markup
/// parser, so web sources are extracted as plain text by the embedding
/// application's own fetch step and handed to [`text::PlainTextParser`] here.
pub fn dispatch(path: &str, is_web_source: bool, registry: Arc<Registry>) -> Box<dyn Parser> {
	if is_web_source {
		return Box::new(text::PlainTextParser::new(registry));
	}

	if let Some(language) = languages::detect_language(path) {
		if let Some(implementation) = languages::get_language(language) {
			return Box::new(code::CodeParser::new(implementation, registry));
		}
	}

	let ext = Path::new(path)
		.extension()
		.and_then(|e| e.to_str())
		.unwrap_or("");
	if matches!(ext, "md" | "markdown") {
		return Box::new(markdown::MarkdownParser::new(registry));
	}

	Box::new(text::PlainTextParser::new(registry))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn dispatches_by_extension() {
		let registry = Arc::new(Registry::with_builtins());
		let symbols = SymbolKeyIndex::new();

		let code = dispatch("src/main.rs", false, registry.clone());
		let out = code.parse("src/main.rs", b"fn main() {}", "proj", &symbols).unwrap();
		assert!(out.nodes.iter().any(|n| n.label == "Scope"));

		let md = dispatch("README.md", false, registry.clone());
		let out = md.parse("README.md", b"# Hi\n", "proj", &symbols).unwrap();
		assert!(out.nodes.iter().any(|n| n.label == "MarkdownSection"));

		let fallback = dispatch("data.csv", false, registry.clone());
		let out = fallback.parse("data.csv", b"a,b\n1,2\n", "proj", &symbols).unwrap();
		assert!(out.nodes.iter().any(|n| n.label == "File"));
	}

	#[test]
	fn web_source_bypasses_extension_dispatch() {
		let registry = Arc::new(Registry::with_builtins());
		let symbols = SymbolKeyIndex::new();
		let parser = dispatch("https://example.com/index.rs", true, registry);
		let out = parser
			.parse("https://example.com/index.rs", b"not actually rust", "proj", &symbols)
			.unwrap();
		assert!(!out.nodes.iter().any(|n| n.label == "Scope"));
	}
}
