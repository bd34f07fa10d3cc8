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

//! The property-graph data model shared by every component.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Lifecycle state persisted on every stateful node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
	Pending,
	Parsing,
	Parsed,
	Linking,
	Linked,
	Embedding,
	Ready,
	Skip,
	Error,
}

impl NodeState {
	pub fn as_str(&self) -> &'static str {
		match self {
			NodeState::Pending => "pending",
			NodeState::Parsing => "parsing",
			NodeState::Parsed => "parsed",
			NodeState::Linking => "linking",
			NodeState::Linked => "linked",
			NodeState::Embedding => "embedding",
			NodeState::Ready => "ready",
			NodeState::Skip => "skip",
			NodeState::Error => "error",
		}
	}

	pub fn parse(value: &str) -> Option<Self> {
		match value {
			"pending" => Some(NodeState::Pending),
			"parsing" => Some(NodeState::Parsing),
			"parsed" => Some(NodeState::Parsed),
			"linking" => Some(NodeState::Linking),
			"linked" => Some(NodeState::Linked),
			"embedding" => Some(NodeState::Embedding),
			"ready" => Some(NodeState::Ready),
			"skip" => Some(NodeState::Skip),
			"error" => Some(NodeState::Error),
			_ => None,
		}
	}

	/// `true` if `self -> next` advances the lifecycle in order, excluding the
	/// always-legal resets (`-> pending`, `-> skip`) which callers gate separately.
	pub fn can_advance_to(&self, next: NodeState) -> bool {
		matches!(
			(self, next),
			(NodeState::Pending, NodeState::Parsing)
				| (NodeState::Parsing, NodeState::Parsed)
				| (NodeState::Parsing, NodeState::Error)
				| (NodeState::Parsed, NodeState::Linking)
				| (NodeState::Linking, NodeState::Linked)
				| (NodeState::Linking, NodeState::Error)
				| (NodeState::Linked, NodeState::Embedding)
				| (NodeState::Embedding, NodeState::Ready)
				| (NodeState::Embedding, NodeState::Error)
		)
	}

	/// Transient states that must never survive a crash.
	pub fn is_transient(&self) -> bool {
		matches!(
			self,
			NodeState::Parsing | NodeState::Linking | NodeState::Embedding
		)
	}
}

/// `errorType` taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
	Parse,
	Link,
	Embed,
}

impl ErrorKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			ErrorKind::Parse => "parse",
			ErrorKind::Link => "link",
			ErrorKind::Embed => "embed",
		}
	}
}

/// How a node's `uuid` is derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UuidStrategy {
	Random,
	/// Deterministic hash of the named fields, in declaration order.
	Deterministic(Vec<String>),
}

/// The declared chunking policy for a node label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChunkingStrategy {
	None,
	Fixed {
		chunk_size: usize,
		overlap: usize,
		min_chunk_size: usize,
	},
	Paragraph {
		chunk_size: usize,
		overlap: usize,
		min_chunk_size: usize,
	},
	Sentence {
		chunk_size: usize,
		overlap: usize,
		min_chunk_size: usize,
	},
}

impl ChunkingStrategy {
	pub fn min_chunk_size(&self) -> usize {
		match self {
			ChunkingStrategy::None => 0,
			ChunkingStrategy::Fixed { min_chunk_size, .. }
			| ChunkingStrategy::Paragraph { min_chunk_size, .. }
			| ChunkingStrategy::Sentence { min_chunk_size, .. } => *min_chunk_size,
		}
	}
}

/// A property bag node. `properties` holds every domain field declared
/// by the node's registry entry; lifecycle fields are tracked separately by the
/// state machine so components that only touch lifecycle state don't need to
/// round-trip the whole property bag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
	pub uuid: Uuid,
	pub label: String,
	pub properties: BTreeMap<String, Value>,
	pub content_hash: Option<String>,
	pub embeddings_dirty: bool,
	pub lifecycle: Lifecycle,
}

impl Node {
	pub fn new(uuid: Uuid, label: impl Into<String>) -> Self {
		Self {
			uuid,
			label: label.into(),
			properties: BTreeMap::new(),
			content_hash: None,
			embeddings_dirty: false,
			lifecycle: Lifecycle::default(),
		}
	}

	pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
		self.properties.insert(key.into(), value);
		self
	}

	pub fn property_str(&self, key: &str) -> Option<&str> {
		self.properties.get(key).and_then(Value::as_str)
	}
}

/// Lifecycle properties persisted on every stateful node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lifecycle {
	pub state: NodeState,
	pub state_changed_at: Option<chrono::DateTime<chrono::Utc>>,
	pub error_type: Option<ErrorKind>,
	pub error_message: Option<String>,
	pub retry_count: u32,
	pub detected_at: Option<chrono::DateTime<chrono::Utc>>,
	pub parsed_at: Option<chrono::DateTime<chrono::Utc>>,
	pub linked_at: Option<chrono::DateTime<chrono::Utc>>,
	pub embedded_at: Option<chrono::DateTime<chrono::Utc>>,
	pub embedding_provider: Option<String>,
	pub embedding_model: Option<String>,
	pub embedding_name_hash: Option<String>,
	pub embedding_content_hash: Option<String>,
	pub embedding_description_hash: Option<String>,
}

impl Default for Lifecycle {
	fn default() -> Self {
		Self {
			state: NodeState::Pending,
			state_changed_at: None,
			error_type: None,
			error_message: None,
			retry_count: 0,
			detected_at: None,
			parsed_at: None,
			linked_at: None,
			embedded_at: None,
			embedding_provider: None,
			embedding_model: None,
			embedding_name_hash: None,
			embedding_content_hash: None,
			embedding_description_hash: None,
		}
	}
}

/// A typed directed edge. Identity is `(source, rel_type, target)`; duplicates merge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Relationship {
	pub source: Uuid,
	pub rel_type: String,
	pub target: Uuid,
	#[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
	pub properties: BTreeMap<String, String>,
}

impl Relationship {
	pub fn new(source: Uuid, rel_type: impl Into<String>, target: Uuid) -> Self {
		Self {
			source,
			rel_type: rel_type.into(),
			target,
			properties: BTreeMap::new(),
		}
	}
}

/// A relationship whose target couldn't be resolved to a uuid at parse time;
/// buffered for the reference linker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnresolvedReference {
	pub source_uuid: Uuid,
	pub rel_type: String,
	pub target_symbol: String,
	pub target_label: Option<String>,
	/// `true` if failure to resolve this reference must be recorded as a `link` error
	/// against the source node.
	pub mandatory: bool,
}

/// In-memory, never-persisted identity used to correlate pre- and post-merge
/// nodes. `file` is a normalized path or URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SymbolKey {
	Named { file: String, name: String },
	Anonymous { file: String, start_line: u32 },
	Fallback { file: String, uuid: Uuid },
}

impl SymbolKey {
	pub fn named(file: impl Into<String>, name: impl Into<String>) -> Self {
		SymbolKey::Named {
			file: file.into(),
			name: name.into(),
		}
	}

	pub fn anonymous(file: impl Into<String>, start_line: u32) -> Self {
		SymbolKey::Anonymous {
			file: file.into(),
			start_line,
		}
	}

	pub fn fallback(file: impl Into<String>, uuid: Uuid) -> Self {
		SymbolKey::Fallback {
			file: file.into(),
			uuid,
		}
	}

	/// The canonical string form: `"<file>:<name>"`,
	/// `"<file>:_:<startLine>"`, or `"<file>:<uuid>"`.
	pub fn as_string(&self) -> String {
		match self {
			SymbolKey::Named { file, name } => format!("{file}:{name}"),
			SymbolKey::Anonymous { file, start_line } => format!("{file}:_:{start_line}"),
			SymbolKey::Fallback { file, uuid } => format!("{file}:{uuid}"),
		}
	}
}

/// Transient record captured before deletion so embeddings can be restored
/// onto the replacement node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedMetadata {
	pub uuid: Uuid,
	pub label: String,
	pub file: String,
	pub name: Option<String>,
	pub start_line: Option<u32>,
	pub end_line: Option<u32>,
	pub content_hash: Option<String>,
	pub embedding_name: Option<Vec<f32>>,
	pub embedding_content: Option<Vec<f32>>,
	pub embedding_description: Option<Vec<f32>>,
	pub embedding_name_hash: Option<String>,
	pub embedding_content_hash: Option<String>,
	pub embedding_description_hash: Option<String>,
	pub embedding_provider: Option<String>,
	pub embedding_model: Option<String>,
}

impl CapturedMetadata {
	pub fn symbol_key(&self) -> SymbolKey {
		match (&self.name, self.start_line) {
			(Some(name), _) => SymbolKey::named(&self.file, name),
			(None, Some(line)) => SymbolKey::anonymous(&self.file, line),
			(None, None) => SymbolKey::fallback(&self.file, self.uuid),
		}
	}
}

/// Kind of filesystem/URL change observed by the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
	Added,
	Modified,
	Deleted,
}

/// A single deduplicated path event, post-debounce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
	pub path: String,
	pub kind: ChangeKind,
}

/// An atomic orchestrator unit: a coalesced set of file events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeBatch {
	pub events: Vec<ChangeEvent>,
}

impl ChangeBatch {
	pub fn parse_targets(&self) -> Vec<&str> {
		self.events
			.iter()
			.filter(|e| matches!(e.kind, ChangeKind::Added | ChangeKind::Modified))
			.map(|e| e.path.as_str())
			.collect()
	}

	pub fn delete_targets(&self) -> Vec<&str> {
		self.events
			.iter()
			.filter(|e| matches!(e.kind, ChangeKind::Deleted))
			.map(|e| e.path.as_str())
			.collect()
	}

	pub fn all_paths(&self) -> Vec<&str> {
		self.events.iter().map(|e| e.path.as_str()).collect()
	}
}

/// The output of a parser: nodes plus both resolved and unresolved edges.
/// Parsers never write to the graph and never call an embedding provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseOutput {
	pub nodes: Vec<Node>,
	pub relationships: Vec<Relationship>,
	pub unresolved: Vec<UnresolvedReference>,
}

impl ParseOutput {
	pub fn merge(&mut self, mut other: ParseOutput) {
		self.nodes.append(&mut other.nodes);
		self.relationships.append(&mut other.relationships);
		self.unresolved.append(&mut other.unresolved);
	}
}

/// Per-batch counters the observability surface reports.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchCounters {
	pub files_seen: usize,
	pub nodes_upserted: usize,
	pub nodes_deleted: usize,
	pub relationships_upserted: usize,
	pub embeddings_restored: usize,
	pub embeddings_generated: usize,
	pub provider_mismatch: usize,
	pub errors_parse: usize,
	pub errors_link: usize,
	pub errors_embed: usize,
}
