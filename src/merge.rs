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

//! Graph merger: takes a batch's freshly-parsed nodes and
//! relationships and reconciles them against what's already stored — upsert
//! by stable key, delete what a file no longer produces, flag content
//! changes dirty. One call per batch, scoped to the files the batch touched.

use crate::constants::HAS_CHANGE;
use crate::registry::Registry;
use crate::state_machine::StateMachine;
use crate::store::GraphStore;
use crate::types::{ErrorKind, Node, NodeState, ParseOutput, Relationship};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct MergeSummary {
	pub nodes_upserted: usize,
	pub nodes_deleted: usize,
	pub relationships_upserted: usize,
	pub errors: usize,
}

pub struct GraphMerger {
	pub(crate) store: Arc<dyn GraphStore>,
	registry: Arc<Registry>,
	state_machine: Arc<StateMachine>,
	track_changes: bool,
}

impl GraphMerger {
	pub fn new(store: Arc<dyn GraphStore>, registry: Arc<Registry>, state_machine: Arc<StateMachine>) -> Self {
		Self {
			store,
			registry,
			state_machine,
			track_changes: false,
		}
	}

	/// Record a `HAS_CHANGE` snapshot for labels that opt into change
	/// tracking whenever their content hash moves.
	pub fn with_track_changes(mut self, track_changes: bool) -> Self {
		self.track_changes = track_changes;
		self
	}

	/// Merges one batch's parsed output into the graph:
	/// 1. group nodes by label,
	/// 2. for each label, delete rows belonging to `files` that the new
	///    batch didn't re-produce (the file's content no longer defines them),
	/// 3. upsert the new/changed nodes, marking changed ones dirty via the
	///    state machine rather than writing lifecycle fields directly,
	/// 4. upsert resolved relationships.
	pub async fn merge(&self, output: &ParseOutput, files: &[String]) -> crate::error::Result<MergeSummary> {
		let mut summary = MergeSummary::default();
		let mut change_snapshots: Vec<Node> = Vec::new();
		let mut change_edges: Vec<Relationship> = Vec::new();
		let mut by_label: HashMap<&str, Vec<&Node>> = HashMap::new();
		for node in &output.nodes {
			by_label.entry(node.label.as_str()).or_default().push(node);
		}

		for (label, nodes) in &by_label {
			let Some(def) = self.registry.get(label) else {
				tracing::warn!(label, "parser produced a node for an unregistered label; skipping");
				continue;
			};
			self.store.ensure_indexes(label).await?;

			let existing = self.store.nodes_by_file(label, &def.file_field, files).await?;
			let new_uuids: std::collections::HashSet<_> = nodes.iter().map(|n| n.uuid).collect();
			let stale: Vec<_> = existing.iter().filter(|n| !new_uuids.contains(&n.uuid)).map(|n| n.uuid).collect();
			if !stale.is_empty() {
				self.store.delete_nodes(label, &stale).await?;
				summary.nodes_deleted += stale.len();
			}

			let existing_by_uuid: HashMap<_, _> = existing.iter().map(|n| (n.uuid, n)).collect();
			let mut to_upsert = Vec::with_capacity(nodes.len());
			for node in nodes {
				let mut node = (*node).clone();
				match existing_by_uuid.get(&node.uuid) {
					Some(prior) if prior.content_hash == node.content_hash && !def.structural => {
						// Unchanged content: preserve lifecycle progress instead of
						// resetting it back to `Pending` via `mark_changed`.
						node.lifecycle = prior.lifecycle.clone();
						node.embeddings_dirty = prior.embeddings_dirty;
					}
					Some(prior) => {
						node.lifecycle = prior.lifecycle.clone();
						// This node parsed cleanly this cycle, so a previous
						// parse failure no longer applies even when the stable
						// fields hash the same (structural nodes always do).
						if node.lifecycle.state == NodeState::Error
							&& node.lifecycle.error_type == Some(ErrorKind::Parse)
						{
							node.lifecycle.state = NodeState::Pending;
							node.lifecycle.error_type = None;
							node.lifecycle.error_message = None;
							node.lifecycle.retry_count = 0;
						}
						let new_hash = node.content_hash.clone().unwrap_or_default();
						if self.track_changes && def.track_changes {
							if let Some((snapshot, edge)) = change_snapshot(prior, &new_hash) {
								change_snapshots.push(snapshot);
								change_edges.push(edge);
							}
						}
						let changed = self.state_machine.mark_changed(label, &mut node, &new_hash).await;
						if let Err(e) = changed {
							tracing::warn!(label, uuid = %node.uuid, error = %e, "failed to mark node changed");
							summary.errors += 1;
						}
					}
					None => {
						StateMachine::initialize_state(&mut node);
						node.embeddings_dirty = true;
					}
				}
				to_upsert.push(node);
			}

			self.store.upsert_nodes(label, to_upsert.clone()).await?;
			summary.nodes_upserted += to_upsert.len();
		}

		if !change_snapshots.is_empty() {
			self.store.upsert_nodes("Change", change_snapshots).await?;
			self.store.upsert_relationships(change_edges).await?;
		}

		if !output.relationships.is_empty() {
			self.store.upsert_relationships(dedup(output.relationships.clone())).await?;
			summary.relationships_upserted += output.relationships.len();
		}

		Ok(summary)
	}

	/// Records mandatory link failures the reference linker couldn't resolve
	/// as `link` errors on their source nodes.
	pub async fn record_link_failures(&self, label: &str, mut nodes: Vec<Node>, reason: &str) -> crate::error::Result<()> {
		for node in nodes.iter_mut() {
			self.state_machine.record_error(label, node, ErrorKind::Link, reason).await?;
		}
		Ok(())
	}
}

/// Snapshot of a node's pre-change content hash, chained to the node via
/// `HAS_CHANGE`. Only produced when the hash actually moved.
fn change_snapshot(prior: &Node, new_hash: &str) -> Option<(Node, Relationship)> {
	let old_hash = prior.content_hash.as_deref()?;
	if old_hash == new_hash {
		return None;
	}
	let uuid = Uuid::new_v5(&prior.uuid, old_hash.as_bytes());
	let mut snapshot = Node::new(uuid, "Change");
	snapshot.properties.insert("of".to_string(), json!(prior.uuid.to_string()));
	snapshot.properties.insert(
		"file".to_string(),
		json!(prior.property_str("file").unwrap_or_default()),
	);
	snapshot.properties.insert("contentHash".to_string(), json!(old_hash));
	snapshot
		.properties
		.insert("changedAt".to_string(), json!(chrono::Utc::now().to_rfc3339()));
	let edge = Relationship::new(prior.uuid, HAS_CHANGE, uuid);
	Some((snapshot, edge))
}

fn dedup(mut relationships: Vec<Relationship>) -> Vec<Relationship> {
	relationships.sort_by(|a, b| (a.source, &a.rel_type, a.target).cmp(&(b.source, &b.rel_type, b.target)));
	relationships.dedup_by(|a, b| a.source == b.source && a.rel_type == b.rel_type && a.target == b.target);
	relationships
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::constants::DEFINED_IN;
	use crate::registry::Registry;
	use crate::store::test_support::store;
	use crate::types::NodeState;
	use serde_json::json;
	use uuid::Uuid;

	fn merger() -> GraphMerger {
		let store = store();
		let registry = Arc::new(Registry::with_builtins());
		let state_machine = Arc::new(StateMachine::new(store.clone()));
		GraphMerger::new(store, registry, state_machine)
	}

	fn scope_output(file: &str, uuid: Uuid, content: &str) -> ParseOutput {
		let mut node = Node::new(uuid, "Scope");
		node.properties.insert("file".to_string(), json!(file));
		node.properties.insert("name".to_string(), json!("foo"));
		node.properties.insert("kind".to_string(), json!("function"));
		node.properties.insert("content".to_string(), json!(content));
		node.content_hash = Some(crate::content::hash::content_hash(&node.properties, &["file".to_string(), "name".to_string()], content));
		ParseOutput {
			nodes: vec![node],
			relationships: vec![],
			unresolved: vec![],
		}
	}

	#[tokio::test]
	async fn new_node_starts_pending() {
		let merger = merger();
		let uuid = Uuid::new_v4();
		let output = scope_output("a.rs", uuid, "fn foo() {}");
		let summary = merger.merge(&output, &["a.rs".to_string()]).await.unwrap();
		assert_eq!(summary.nodes_upserted, 1);

		let stored = merger.store.get_nodes("Scope", &[uuid]).await.unwrap();
		assert_eq!(stored[0].lifecycle.state, NodeState::Pending);
	}

	#[tokio::test]
	async fn unchanged_content_preserves_ready_state() {
		let merger = merger();
		let uuid = Uuid::new_v4();
		let output = scope_output("a.rs", uuid, "fn foo() {}");
		merger.merge(&output, &["a.rs".to_string()]).await.unwrap();

		let mut stored = merger.store.get_nodes("Scope", &[uuid]).await.unwrap();
		stored[0].lifecycle.state = NodeState::Ready;
		merger.store.upsert_nodes("Scope", stored).await.unwrap();

		// Re-ingest identical content: state must stay `Ready` (idempotent upsert).
		let output = scope_output("a.rs", uuid, "fn foo() {}");
		merger.merge(&output, &["a.rs".to_string()]).await.unwrap();
		let stored = merger.store.get_nodes("Scope", &[uuid]).await.unwrap();
		assert_eq!(stored[0].lifecycle.state, NodeState::Ready);
	}

	#[tokio::test]
	async fn changed_content_resets_to_pending_and_flags_dirty() {
		let merger = merger();
		let uuid = Uuid::new_v4();
		merger.merge(&scope_output("a.rs", uuid, "fn foo() {}"), &["a.rs".to_string()]).await.unwrap();

		let mut stored = merger.store.get_nodes("Scope", &[uuid]).await.unwrap();
		stored[0].lifecycle.state = NodeState::Ready;
		stored[0].embeddings_dirty = false;
		merger.store.upsert_nodes("Scope", stored).await.unwrap();

		merger.merge(&scope_output("a.rs", uuid, "fn foo() { 1 + 1; }"), &["a.rs".to_string()]).await.unwrap();
		let stored = merger.store.get_nodes("Scope", &[uuid]).await.unwrap();
		assert_eq!(stored[0].lifecycle.state, NodeState::Pending);
		assert!(stored[0].embeddings_dirty);
	}

	#[tokio::test]
	async fn scope_absent_from_new_batch_is_deleted() {
		let merger = merger();
		let uuid = Uuid::new_v4();
		merger.merge(&scope_output("a.rs", uuid, "fn foo() {}"), &["a.rs".to_string()]).await.unwrap();

		let empty = ParseOutput::default();
		let summary = merger.merge(&empty, &["a.rs".to_string()]).await.unwrap();
		assert_eq!(summary.nodes_deleted, 1);
		assert!(merger.store.get_nodes("Scope", &[uuid]).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn content_change_records_has_change_snapshot_when_tracking() {
		let store = store();
		let registry = Arc::new(Registry::with_builtins());
		let state_machine = Arc::new(StateMachine::new(store.clone()));
		let merger = GraphMerger::new(store.clone(), registry, state_machine).with_track_changes(true);
		let uuid = Uuid::new_v4();
		merger.merge(&scope_output("a.rs", uuid, "fn foo() {}"), &["a.rs".to_string()]).await.unwrap();
		merger.merge(&scope_output("a.rs", uuid, "fn foo() { 1; }"), &["a.rs".to_string()]).await.unwrap();

		let snapshots = merger
			.store
			.related_nodes(uuid, HAS_CHANGE, crate::store::Direction::Outgoing, 10)
			.await
			.unwrap();
		assert_eq!(snapshots.len(), 1);
		assert_eq!(snapshots[0].label, "Change");
	}

	#[tokio::test]
	async fn relationships_dedup_across_repeated_merges() {
		let merger = merger();
		let a = Uuid::new_v4();
		let b = Uuid::new_v4();
		let mut output = ParseOutput::default();
		output.relationships.push(Relationship::new(a, DEFINED_IN, b));
		output.relationships.push(Relationship::new(a, DEFINED_IN, b));
		merger.merge(&output, &[]).await.unwrap();
		merger.merge(&output, &[]).await.unwrap();
		let related = merger.store.related_nodes(b, DEFINED_IN, crate::store::Direction::Incoming, 10).await.unwrap();
		assert!(related.is_empty()); // nodes were never upserted, only edges; table lookups return none
	}
}
