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

//! Built-in node-type definitions covering the structural skeleton (File,
//! Directory, Project), code scopes, markdown sections, and the
//! external-library stub label used by the reference linker.

use super::{EmbeddingExtractors, FieldExtractors, NodeTypeDefinition, Registry};
use crate::constants::DEFAULT_MIN_CHUNK_SIZE;
use crate::types::{ChunkingStrategy, UuidStrategy};

pub fn register_builtins(registry: &mut Registry) {
	for def in [
		project(),
		directory(),
		file(),
		scope(),
		markdown_section(),
		external_library(),
		change(),
	] {
		registry
			.register(def)
			.expect("builtin definitions never conflict with each other");
	}
}

fn project() -> NodeTypeDefinition {
	NodeTypeDefinition {
		label: "Project".to_string(),
		required_fields: vec!["path".to_string(), "name".to_string()],
		optional_fields: vec![],
		field_extractors: FieldExtractors::from_fields("name", "name", None, "path"),
		embedding_extractors: EmbeddingExtractors::from_fields("name", "name", None),
		chunking: ChunkingStrategy::None,
		uuid_strategy: UuidStrategy::Deterministic(vec!["path".to_string()]),
		file_field: "path".to_string(),
		structural: true,
		mandatory_links: false,
		track_changes: false,
	}
}

fn directory() -> NodeTypeDefinition {
	NodeTypeDefinition {
		label: "Directory".to_string(),
		required_fields: vec!["path".to_string()],
		optional_fields: vec![],
		field_extractors: FieldExtractors::from_fields("path", "path", None, "path"),
		embedding_extractors: EmbeddingExtractors::from_fields("path", "path", None),
		chunking: ChunkingStrategy::None,
		uuid_strategy: UuidStrategy::Deterministic(vec!["path".to_string()]),
		file_field: "path".to_string(),
		structural: true,
		mandatory_links: false,
		track_changes: false,
	}
}

fn file() -> NodeTypeDefinition {
	NodeTypeDefinition {
		label: "File".to_string(),
		required_fields: vec!["path".to_string(), "language".to_string()],
		optional_fields: vec!["size".to_string(), "mtime".to_string()],
		field_extractors: FieldExtractors::from_fields("path", "path", None, "path"),
		embedding_extractors: EmbeddingExtractors::from_fields("path", "path", None),
		chunking: ChunkingStrategy::None,
		uuid_strategy: UuidStrategy::Deterministic(vec!["path".to_string()]),
		file_field: "path".to_string(),
		structural: true,
		mandatory_links: false,
		track_changes: true,
	}
}

/// A code scope: function, struct, class, module, ... as extracted by the
/// language parsers.
fn scope() -> NodeTypeDefinition {
	NodeTypeDefinition {
		label: "Scope".to_string(),
		required_fields: vec![
			"file".to_string(),
			"name".to_string(),
			"kind".to_string(),
			"content".to_string(),
		],
		optional_fields: vec!["startLine".to_string(), "endLine".to_string()],
		field_extractors: FieldExtractors::from_fields("name", "content", None, "file"),
		embedding_extractors: EmbeddingExtractors::from_fields("name", "content", None),
		chunking: ChunkingStrategy::Fixed {
			chunk_size: 2000,
			overlap: 100,
			min_chunk_size: DEFAULT_MIN_CHUNK_SIZE,
		},
		uuid_strategy: UuidStrategy::Random,
		file_field: "file".to_string(),
		structural: false,
		mandatory_links: false,
		track_changes: true,
	}
}

fn markdown_section() -> NodeTypeDefinition {
	NodeTypeDefinition {
		label: "MarkdownSection".to_string(),
		required_fields: vec![
			"file".to_string(),
			"title".to_string(),
			"content".to_string(),
			"level".to_string(),
		],
		optional_fields: vec!["startLine".to_string(), "endLine".to_string()],
		field_extractors: FieldExtractors::from_fields("title", "content", None, "file"),
		embedding_extractors: EmbeddingExtractors::from_fields("title", "content", None),
		chunking: ChunkingStrategy::Paragraph {
			chunk_size: 1500,
			overlap: 150,
			min_chunk_size: DEFAULT_MIN_CHUNK_SIZE,
		},
		uuid_strategy: UuidStrategy::Random,
		file_field: "file".to_string(),
		structural: false,
		mandatory_links: false,
		track_changes: false,
	}
}

/// Snapshot of a tracked node's previous content hash, chained to the node
/// via `HAS_CHANGE` by the merger whenever the hash moves.
fn change() -> NodeTypeDefinition {
	NodeTypeDefinition {
		label: "Change".to_string(),
		required_fields: vec![
			"of".to_string(),
			"file".to_string(),
			"contentHash".to_string(),
			"changedAt".to_string(),
		],
		optional_fields: vec![],
		field_extractors: FieldExtractors::from_fields("contentHash", "contentHash", None, "file"),
		embedding_extractors: EmbeddingExtractors::from_fields("contentHash", "contentHash", None),
		chunking: ChunkingStrategy::None,
		uuid_strategy: UuidStrategy::Deterministic(vec!["of".to_string(), "contentHash".to_string()]),
		file_field: "file".to_string(),
		structural: false,
		mandatory_links: false,
		track_changes: false,
	}
}

/// Stub node the reference linker resolves external imports against by name.
fn external_library() -> NodeTypeDefinition {
	NodeTypeDefinition {
		label: "ExternalLibrary".to_string(),
		required_fields: vec!["name".to_string()],
		optional_fields: vec!["version".to_string()],
		field_extractors: FieldExtractors::from_fields("name", "name", None, "name"),
		embedding_extractors: EmbeddingExtractors::from_fields("name", "name", None),
		chunking: ChunkingStrategy::None,
		uuid_strategy: UuidStrategy::Deterministic(vec!["name".to_string()]),
		file_field: "name".to_string(),
		structural: false,
		mandatory_links: false,
		track_changes: false,
	}
}
