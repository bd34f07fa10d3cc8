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

//! Content extractor: turns a parser's "parent" node into the chunk
//! nodes declared by its registry chunking policy, and computes content
//! hashes for both parent and chunk nodes.

pub mod chunking;
pub mod hash;

use crate::error::{IngestError, Result};
use crate::registry::NodeTypeDefinition;
use crate::types::Node;
use serde_json::json;
use uuid::Uuid;

/// Expands a parent node into its content-hashed chunk nodes, linked back to
/// the parent via `DEFINED_IN`. If the registry declares `ChunkingStrategy::None`
/// the parent itself is returned with its content hash computed in place and
/// no chunk nodes are produced.
pub fn extract(
	parent: &Node,
	definition: &NodeTypeDefinition,
) -> Result<(Node, Vec<Node>, Vec<crate::types::Relationship>)> {
	let raw_content = (definition.field_extractors.content)(&parent.properties).unwrap_or_default();

	let mut parent = parent.clone();
	parent.content_hash = Some(hash::content_hash(
		&parent.properties,
		&definition.required_fields,
		&raw_content,
	));

	if matches!(definition.chunking, crate::types::ChunkingStrategy::None) {
		return Ok((parent, Vec::new(), Vec::new()));
	}

	if raw_content.trim().is_empty() {
		return Err(IngestError::ContentHash {
			path: parent
				.property_str(&definition.file_field)
				.unwrap_or_default()
				.to_string(),
			reason: "no content to chunk".to_string(),
		});
	}

	let chunks = chunking::chunk(&raw_content, &definition.chunking);
	// Content that fits in one chunk stays on the parent; a chunk node would
	// just duplicate it.
	if chunks.len() <= 1 {
		return Ok((parent, Vec::new(), Vec::new()));
	}
	let file = parent
		.property_str(&definition.file_field)
		.unwrap_or_default()
		.to_string();

	let mut chunk_nodes = Vec::with_capacity(chunks.len());
	let mut relationships = Vec::with_capacity(chunks.len());

	for (idx, chunk) in chunks.iter().enumerate() {
		// Chunk identity is a function of the parent's identity and position,
		// so re-chunking unchanged content reproduces the same uuids and the
		// merger sees no change.
		let uuid = Uuid::new_v5(&parent.uuid, idx.to_string().as_bytes());
		let mut node = Node::new(uuid, definition.label.clone());
		node.properties = parent.properties.clone();
		node.properties
			.insert("content".to_string(), json!(chunk.content));
		node.properties
			.insert("startLine".to_string(), json!(chunk.start_line));
		node.properties
			.insert("endLine".to_string(), json!(chunk.end_line));
		node.properties
			.insert("startChar".to_string(), json!(chunk.start_char));
		node.properties
			.insert("endChar".to_string(), json!(chunk.end_char));
		node.properties
			.insert("chunkIndex".to_string(), json!(idx));

		node.content_hash = Some(hash::content_hash(
			&node.properties,
			&definition.required_fields,
			&chunk.content,
		));

		relationships.push(crate::types::Relationship::new(
			node.uuid,
			crate::constants::DEFINED_IN,
			parent.uuid,
		));
		chunk_nodes.push(node);
	}

	tracing::debug!(file = %file, chunks = chunk_nodes.len(), "extracted chunk nodes");
	Ok((parent, chunk_nodes, relationships))
}
