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

//! Pluggable extractor surface for formats the ingestion core treats as
//! opaque text-extractor interfaces rather than built-in parsers. The core ships
//! one concrete implementation, [`PlainTextParser`], covering files it can
//! already read as UTF-8; anything richer is expected to be registered by the
//! embedding application through the same [`super::Parser`] trait.

use super::{Parser, SymbolKeyIndex};
use crate::constants::DEFINED_IN;
use crate::error::{IngestError, Result};
use crate::registry::Registry;
use crate::types::{Node as GraphNode, ParseOutput, Relationship, SymbolKey};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

pub struct PlainTextParser {
	registry: Arc<Registry>,
}

impl PlainTextParser {
	pub fn new(registry: Arc<Registry>) -> Self {
		Self { registry }
	}
}

impl Parser for PlainTextParser {
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
		file_props.insert("language".to_string(), json!("text"));
		let file_uuid = file_def.derive_uuid(&file_props);
		let mut file_node = GraphNode::new(file_uuid, "File");
		file_node.properties = file_props;

		let mut output = ParseOutput::default();
		if !text.trim().is_empty() {
			let mut props = std::collections::BTreeMap::new();
			props.insert("file".to_string(), json!(path));
			props.insert("title".to_string(), json!(path));
			props.insert("content".to_string(), json!(text));
			props.insert("level".to_string(), json!(1));
			// The whole document is one section titled by its path; re-parsing
			// the same file must reclaim the prior uuid so the merger sees the
			// same node instead of a delete-and-recreate.
			let key = SymbolKey::named(path, path);
			let uuid = symbols.get(&key).copied().unwrap_or_else(Uuid::new_v4);
			let mut node = GraphNode::new(uuid, "MarkdownSection");
			node.properties = props;
			output.relationships.push(Relationship::new(uuid, DEFINED_IN, file_uuid));
			output.nodes.push(node);
		}
		output.nodes.push(file_node);
		Ok(output)
	}
}
