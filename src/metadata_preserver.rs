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

//! Metadata preserver: captures embeddings and symbol
//! identity for a batch's files before the merger deletes/replaces their
//! nodes, then restores what it can onto the replacement nodes once parsing
//! and merging are done.

use crate::parsers::SymbolKeyIndex;
use crate::registry::Registry;
use crate::store::GraphStore;
use crate::types::{CapturedMetadata, Node, SymbolKey};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// The result of a capture pass: a symbol-key index handed to parsers so
/// renamed-but-identical symbols keep their uuid, plus the raw embedding
/// snapshots the restore pass consults afterward.
#[derive(Default)]
pub struct CapturedIndex {
	pub by_symbol: SymbolKeyIndex,
	by_uuid: HashMap<Uuid, CapturedMetadata>,
}

#[derive(Debug, Clone, Default)]
pub struct RestoreCounts {
	pub embeddings_restored: usize,
	pub embeddings_skipped_provider_mismatch: usize,
	pub unmatched: usize,
}

pub struct MetadataPreserver {
	store: Arc<dyn GraphStore>,
	registry: Arc<Registry>,
	/// Drop embeddings captured under a different provider/model instead of
	/// carrying them forward silently.
	skip_on_provider_mismatch: bool,
}

impl MetadataPreserver {
	pub fn new(store: Arc<dyn GraphStore>, registry: Arc<Registry>) -> Self {
		Self {
			store,
			registry,
			skip_on_provider_mismatch: true,
		}
	}

	pub fn with_skip_on_provider_mismatch(mut self, skip: bool) -> Self {
		self.skip_on_provider_mismatch = skip;
		self
	}

	/// Captures every non-structural node whose `file_field` is one of
	/// `files`, across every registered label, before the merger touches
	/// them.
	pub async fn capture_for_files(&self, files: &[String]) -> crate::error::Result<CapturedIndex> {
		let mut index = CapturedIndex::default();
		for label in self.registry.labels() {
			let Some(def) = self.registry.get(label) else { continue };
			if def.structural {
				continue;
			}
			let nodes = self.store.nodes_by_file(label, &def.file_field, files).await?;
			for node in nodes {
				let captured = capture_one(&node);
				index.by_symbol.insert(captured.symbol_key(), captured.uuid);
				index.by_uuid.insert(captured.uuid, captured);
			}
		}
		Ok(index)
	}

	/// Restores embeddings onto nodes the merger just upserted, matching them
	/// back to captured metadata by uuid (stable identity survived the merge,
	/// the common case since parsers reuse uuids via the symbol index) and,
	/// failing that, by symbol key.
	pub fn restore_metadata(
		&self,
		label: &str,
		nodes: &mut [Node],
		captured: &CapturedIndex,
		current_provider: &str,
		current_model: &str,
	) -> RestoreCounts {
		let mut counts = RestoreCounts::default();
		for node in nodes.iter_mut() {
			let found = captured.by_uuid.get(&node.uuid).or_else(|| {
				let name = node.property_str("name").or_else(|| node.property_str("title"))?;
				let key = SymbolKey::named(node.property_str("file").unwrap_or_default(), name);
				captured.by_symbol.get(&key).and_then(|uuid| captured.by_uuid.get(uuid))
			});
			let Some(captured_meta) = found else {
				counts.unmatched += 1;
				continue;
			};

			let provider_matches = match (&captured_meta.embedding_provider, &captured_meta.embedding_model) {
				(Some(p), Some(m)) => p == current_provider && m == current_model,
				// Legacy rows captured before provider/model were tracked: carry forward.
				(None, None) => true,
				_ => false,
			};

			if !provider_matches && self.skip_on_provider_mismatch {
				counts.embeddings_skipped_provider_mismatch += 1;
				// The stored vectors were produced by a different provider or
				// model: drop every trace of them so the embedding pipeline
				// regenerates all fields rather than skipping "unchanged" ones.
				node.lifecycle.embedding_name_hash = None;
				node.lifecycle.embedding_content_hash = None;
				node.lifecycle.embedding_description_hash = None;
				node.lifecycle.embedding_provider = None;
				node.lifecycle.embedding_model = None;
				node.embeddings_dirty = true;
				node.lifecycle.state = crate::types::NodeState::Pending;
				continue;
			}

			if node.content_hash == captured_meta.content_hash {
				node.lifecycle.embedding_name_hash = captured_meta.embedding_name_hash.clone();
				node.lifecycle.embedding_content_hash = captured_meta.embedding_content_hash.clone();
				node.lifecycle.embedding_description_hash = captured_meta.embedding_description_hash.clone();
				node.lifecycle.embedding_provider = captured_meta.embedding_provider.clone();
				node.lifecycle.embedding_model = captured_meta.embedding_model.clone();
				node.embeddings_dirty = false;
				counts.embeddings_restored += 1;
			} else {
				// Content changed: hashes are stale, the node needs fresh vectors.
				node.embeddings_dirty = true;
				counts.unmatched += 1;
			}
		}
		tracing::debug!(
			label,
			restored = counts.embeddings_restored,
			skipped = counts.embeddings_skipped_provider_mismatch,
			unmatched = counts.unmatched,
			"restored captured metadata"
		);
		counts
	}
}

fn capture_one(node: &Node) -> CapturedMetadata {
	CapturedMetadata {
		uuid: node.uuid,
		label: node.label.clone(),
		file: node.property_str("file").unwrap_or_default().to_string(),
		// Labels without a `name` property (markdown and plain-text sections)
		// key their symbol identity on `title`; parsers derive the matching
		// key the same way when they consult the index.
		name: node
			.property_str("name")
			.or_else(|| node.property_str("title"))
			.map(str::to_string),
		start_line: node.properties.get("startLine").and_then(|v| v.as_u64()).map(|v| v as u32),
		end_line: node.properties.get("endLine").and_then(|v| v.as_u64()).map(|v| v as u32),
		content_hash: node.content_hash.clone(),
		embedding_name: None,
		embedding_content: None,
		embedding_description: None,
		embedding_name_hash: node.lifecycle.embedding_name_hash.clone(),
		embedding_content_hash: node.lifecycle.embedding_content_hash.clone(),
		embedding_description_hash: node.lifecycle.embedding_description_hash.clone(),
		embedding_provider: node.lifecycle.embedding_provider.clone(),
		embedding_model: node.lifecycle.embedding_model.clone(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::registry::Registry;
	use crate::store::test_support::store;
	use serde_json::json;

	fn scope(uuid: Uuid, file: &str, name: &str) -> Node {
		let mut n = Node::new(uuid, "Scope");
		n.properties.insert("file".to_string(), json!(file));
		n.properties.insert("name".to_string(), json!(name));
		n
	}

	#[tokio::test]
	async fn capture_then_restore_same_uuid_keeps_embedding_hashes() {
		let store = store();
		let registry = Arc::new(Registry::with_builtins());
		let uuid = Uuid::new_v4();
		let mut original = scope(uuid, "a.rs", "foo");
		original.content_hash = Some("h1".to_string());
		original.lifecycle.embedding_content_hash = Some("h1".to_string());
		original.lifecycle.embedding_provider = Some("openai".to_string());
		original.lifecycle.embedding_model = Some("text-embedding-3-small".to_string());
		store.upsert_nodes("Scope", vec![original]).await.unwrap();

		let preserver = MetadataPreserver::new(store, registry);
		let captured = preserver.capture_for_files(&["a.rs".to_string()]).await.unwrap();

		let mut replacement = scope(uuid, "a.rs", "foo");
		replacement.content_hash = Some("h1".to_string());
		let counts = preserver.restore_metadata("Scope", &mut [replacement.clone()], &captured, "openai", "text-embedding-3-small");

		assert_eq!(counts.embeddings_restored, 1);
		assert!(!replacement.embeddings_dirty);
	}

	#[tokio::test]
	async fn restore_drops_embeddings_on_provider_mismatch_by_default() {
		let store = store();
		let registry = Arc::new(Registry::with_builtins());
		let uuid = Uuid::new_v4();
		let mut original = scope(uuid, "a.rs", "foo");
		original.content_hash = Some("h1".to_string());
		original.lifecycle.embedding_provider = Some("openai".to_string());
		original.lifecycle.embedding_model = Some("text-embedding-3-small".to_string());
		store.upsert_nodes("Scope", vec![original]).await.unwrap();

		let preserver = MetadataPreserver::new(store, registry);
		let captured = preserver.capture_for_files(&["a.rs".to_string()]).await.unwrap();

		let mut replacement = scope(uuid, "a.rs", "foo");
		replacement.content_hash = Some("h1".to_string());
		let counts = preserver.restore_metadata("Scope", &mut [replacement.clone()], &captured, "voyage", "voyage-3");

		assert_eq!(counts.embeddings_skipped_provider_mismatch, 1);
		assert!(replacement.embeddings_dirty);
	}

	#[tokio::test]
	async fn restore_recovers_via_symbol_key_when_uuid_changed() {
		let store = store();
		let registry = Arc::new(Registry::with_builtins());
		let old_uuid = Uuid::new_v4();
		let mut original = scope(old_uuid, "a.rs", "foo");
		original.content_hash = Some("h1".to_string());
		original.lifecycle.embedding_content_hash = Some("h1".to_string());
		store.upsert_nodes("Scope", vec![original]).await.unwrap();

		let preserver = MetadataPreserver::new(store, registry);
		let captured = preserver.capture_for_files(&["a.rs".to_string()]).await.unwrap();

		let new_uuid = Uuid::new_v4();
		let mut replacement = scope(new_uuid, "a.rs", "foo");
		replacement.content_hash = Some("h1".to_string());
		let counts = preserver.restore_metadata("Scope", &mut [replacement.clone()], &captured, "", "");

		assert_eq!(counts.embeddings_restored, 1);
	}
}
