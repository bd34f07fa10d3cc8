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

//! Node-type registry: the declarative catalog of node labels, consulted
//! by every other component that needs to behave generically across labels.
//!
//! The registry is immutable after startup.
//! Registration is idempotent, but registering two different definitions
//! under the same label is a [`crate::error::IngestError::RegistryConflict`].

mod builtins;

pub use builtins::register_builtins;

use crate::error::{IngestError, Result};
use crate::types::{ChunkingStrategy, UuidStrategy};
use serde_json::Value;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Fixed namespace for deterministic uuid derivation. Any stable constant
/// works; nodes are only compared to each other's derived uuids, never to an
/// external identity space.
const DETERMINISTIC_NAMESPACE: Uuid = Uuid::from_bytes([
	0x52, 0x61, 0x67, 0x46, 0x6f, 0x72, 0x67, 0x65, 0x2d, 0x6e, 0x73, 0x2d, 0x75, 0x75, 0x69, 0x64,
]);

/// Pure field extractor: maps a node's property bag to a display string, or
/// `None` to signal the field is redundant for this type.
pub type FieldExtractor = Arc<dyn Fn(&BTreeMap<String, Value>) -> Option<String> + Send + Sync>;

/// Declares how a label's properties map onto the four display fields.
#[derive(Clone)]
pub struct FieldExtractors {
	pub title: FieldExtractor,
	pub content: FieldExtractor,
	pub description: FieldExtractor,
	pub location: FieldExtractor,
}

/// Declares how a label's properties map onto embedding-input strings; these
/// may differ from the display fields (e.g. a file node embeds its full path).
#[derive(Clone)]
pub struct EmbeddingExtractors {
	pub name: FieldExtractor,
	pub content: FieldExtractor,
	pub description: FieldExtractor,
}

fn extractor_of(field: &'static str) -> FieldExtractor {
	Arc::new(move |props| {
		props
			.get(field)
			.and_then(Value::as_str)
			.map(str::to_string)
	})
}

fn no_field() -> FieldExtractor {
	Arc::new(|_| None)
}

impl FieldExtractors {
	/// Convenience constructor for the common case of reading named string properties.
	pub fn from_fields(
		title: &'static str,
		content: &'static str,
		description: Option<&'static str>,
		location: &'static str,
	) -> Self {
		Self {
			title: extractor_of(title),
			content: extractor_of(content),
			description: description.map(extractor_of).unwrap_or_else(no_field),
			location: extractor_of(location),
		}
	}
}

impl EmbeddingExtractors {
	pub fn from_fields(
		name: &'static str,
		content: &'static str,
		description: Option<&'static str>,
	) -> Self {
		Self {
			name: extractor_of(name),
			content: extractor_of(content),
			description: description.map(extractor_of).unwrap_or_else(no_field),
		}
	}
}

/// Registry entry for a single label.
#[derive(Clone)]
pub struct NodeTypeDefinition {
	pub label: String,
	pub required_fields: Vec<String>,
	pub optional_fields: Vec<String>,
	pub field_extractors: FieldExtractors,
	pub embedding_extractors: EmbeddingExtractors,
	pub chunking: ChunkingStrategy,
	pub uuid_strategy: UuidStrategy,
	/// Name of the property holding the source location (`file`, `url`, `absolutePath`, ...).
	pub file_field: String,
	/// Structural labels are always upserted regardless of content change.
	pub structural: bool,
	/// Whether cross-file links declared by this label are mandatory.
	pub mandatory_links: bool,
	/// Whether this label opts into per-change snapshot chains (`HAS_CHANGE`).
	pub track_changes: bool,
}

impl NodeTypeDefinition {
	/// The stable key used by the merger to identify "the same node" across ingestion
	/// cycles: `path` for structural labels, `name` for libraries,
	/// `uuid` otherwise. We represent this uniformly as the registry declaring which
	/// property (if any) acts as the stable key; `None` means fall back to `uuid`.
	pub fn stable_key_field(&self) -> Option<&str> {
		if self.structural {
			Some(self.file_field.as_str())
		} else if self.label == "ExternalLibrary" {
			Some("name")
		} else {
			None
		}
	}

	/// Derives a node's uuid per the declared [`UuidStrategy`].
	/// Deterministic strategies hash the label plus the named fields' values, so
	/// the same `(label, field values)` always produces the same uuid across
	/// ingestion cycles regardless of which process computed it.
	pub fn derive_uuid(&self, properties: &BTreeMap<String, Value>) -> Uuid {
		match &self.uuid_strategy {
			UuidStrategy::Random => Uuid::new_v4(),
			UuidStrategy::Deterministic(fields) => {
				let mut input = self.label.clone();
				for field in fields {
					input.push('\u{1f}');
					if let Some(value) = properties.get(field) {
						input.push_str(&value.to_string());
					}
				}
				Uuid::new_v5(&DETERMINISTIC_NAMESPACE, input.as_bytes())
			}
		}
	}
}

impl std::fmt::Debug for NodeTypeDefinition {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("NodeTypeDefinition")
			.field("label", &self.label)
			.field("required_fields", &self.required_fields)
			.field("optional_fields", &self.optional_fields)
			.field("structural", &self.structural)
			.finish()
	}
}

/// Immutable, read-only-after-startup table of node-type definitions.
#[derive(Debug, Default)]
pub struct Registry {
	definitions: HashMap<String, Arc<NodeTypeDefinition>>,
}

impl Registry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Build a registry preloaded with the built-in labels (File, Directory, Project,
	/// Scope, MarkdownSection, ExternalLibrary) plus any caller-supplied definitions.
	pub fn with_builtins() -> Self {
		let mut registry = Self::new();
		register_builtins(&mut registry);
		registry
	}

	/// Idempotent registration: re-registering the identical label is a no-op; a second,
	/// differently-shaped definition under the same label is a [`IngestError::RegistryConflict`].
	pub fn register(&mut self, definition: NodeTypeDefinition) -> Result<()> {
		if let Some(existing) = self.definitions.get(&definition.label) {
			if !definitions_equivalent(existing, &definition) {
				return Err(IngestError::RegistryConflict {
					label: definition.label.clone(),
				});
			}
			return Ok(());
		}
		self.definitions
			.insert(definition.label.clone(), Arc::new(definition));
		Ok(())
	}

	pub fn get(&self, label: &str) -> Option<Arc<NodeTypeDefinition>> {
		self.definitions.get(label).cloned()
	}

	pub fn labels(&self) -> impl Iterator<Item = &str> {
		self.definitions.keys().map(String::as_str)
	}

	pub fn len(&self) -> usize {
		self.definitions.len()
	}

	pub fn is_empty(&self) -> bool {
		self.definitions.is_empty()
	}
}

fn definitions_equivalent(a: &NodeTypeDefinition, b: &NodeTypeDefinition) -> bool {
	a.label == b.label
		&& a.required_fields == b.required_fields
		&& a.optional_fields == b.optional_fields
		&& a.file_field == b.file_field
		&& a.structural == b.structural
		&& a.mandatory_links == b.mandatory_links
}
