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

//! In-process [`GraphStore`] backed by a `parking_lot`-guarded map. Used by
//! this crate's own test suite and viable as a real backend for
//! single-process deployments that don't need Lance's columnar persistence.

use super::{Direction, GraphStore, StateQuery};
use crate::error::Result;
use crate::types::{Node, NodeState, Relationship};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
	nodes: HashMap<String, HashMap<Uuid, Node>>,
	relationships: Vec<Relationship>,
}

#[derive(Default)]
pub struct InMemoryGraphStore {
	tables: RwLock<Tables>,
}

impl InMemoryGraphStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
	async fn upsert_nodes(&self, label: &str, nodes: Vec<Node>) -> Result<()> {
		let mut tables = self.tables.write();
		let table = tables.nodes.entry(label.to_string()).or_default();
		for node in nodes {
			match table.get_mut(&node.uuid) {
				Some(existing) => {
					for (key, value) in node.properties {
						existing.properties.insert(key, value);
					}
					existing.content_hash = node.content_hash.or(existing.content_hash.take());
					existing.embeddings_dirty = node.embeddings_dirty;
					existing.lifecycle = node.lifecycle;
				}
				None => {
					table.insert(node.uuid, node);
				}
			}
		}
		Ok(())
	}

	async fn get_nodes(&self, label: &str, uuids: &[Uuid]) -> Result<Vec<Node>> {
		let tables = self.tables.read();
		Ok(tables
			.nodes
			.get(label)
			.map(|table| uuids.iter().filter_map(|id| table.get(id).cloned()).collect())
			.unwrap_or_default())
	}

	async fn nodes_by_file(&self, label: &str, file_field: &str, files: &[String]) -> Result<Vec<Node>> {
		let tables = self.tables.read();
		Ok(tables
			.nodes
			.get(label)
			.map(|table| {
				table
					.values()
					.filter(|n| n.property_str(file_field).is_some_and(|f| files.iter().any(|x| x == f)))
					.cloned()
					.collect()
			})
			.unwrap_or_default())
	}

	async fn delete_nodes(&self, label: &str, uuids: &[Uuid]) -> Result<()> {
		let mut tables = self.tables.write();
		if let Some(table) = tables.nodes.get_mut(label) {
			for id in uuids {
				table.remove(id);
			}
		}
		let dead: std::collections::HashSet<Uuid> = uuids.iter().copied().collect();
		tables
			.relationships
			.retain(|r| !dead.contains(&r.source) && !dead.contains(&r.target));
		Ok(())
	}

	async fn delete_nodes_by_file(&self, label: &str, file_field: &str, files: &[String]) -> Result<usize> {
		let targets: Vec<Uuid> = {
			let tables = self.tables.read();
			tables
				.nodes
				.get(label)
				.map(|table| {
					table
						.values()
						.filter(|n| n.property_str(file_field).is_some_and(|f| files.iter().any(|x| x == f)))
						.map(|n| n.uuid)
						.collect()
				})
				.unwrap_or_default()
		};
		let count = targets.len();
		self.delete_nodes(label, &targets).await?;
		Ok(count)
	}

	async fn upsert_relationships(&self, relationships: Vec<Relationship>) -> Result<()> {
		let mut tables = self.tables.write();
		for rel in relationships {
			if !tables
				.relationships
				.iter()
				.any(|r| r.source == rel.source && r.rel_type == rel.rel_type && r.target == rel.target)
			{
				tables.relationships.push(rel);
			}
		}
		Ok(())
	}

	async fn known_files(&self, label: &str, file_field: &str) -> Result<Vec<String>> {
		let tables = self.tables.read();
		let mut files: Vec<String> = tables
			.nodes
			.get(label)
			.map(|table| table.values().filter_map(|n| n.property_str(file_field).map(str::to_string)).collect())
			.unwrap_or_default();
		files.sort();
		files.dedup();
		Ok(files)
	}

	async fn nodes_by_state(&self, label: &str, state: NodeState, query: &StateQuery) -> Result<Vec<Node>> {
		let tables = self.tables.read();
		let mut matches: Vec<Node> = tables
			.nodes
			.get(label)
			.map(|table| {
				table
					.values()
					.filter(|n| n.lifecycle.state == state)
					.filter(|n| {
						query
							.project_id
							.as_deref()
							.is_none_or(|p| n.property_str("projectId") == Some(p))
					})
					.cloned()
					.collect()
			})
			.unwrap_or_default();
		matches.sort_by_key(|n| n.uuid);
		let offset = query.offset.min(matches.len());
		let limit = if query.limit == 0 { matches.len() } else { query.limit };
		Ok(matches.into_iter().skip(offset).take(limit).collect())
	}

	async fn dirty_nodes(&self, label: &str, limit: usize) -> Result<Vec<Node>> {
		let tables = self.tables.read();
		let mut matches: Vec<Node> = tables
			.nodes
			.get(label)
			.map(|table| {
				table
					.values()
					.filter(|n| {
						n.embeddings_dirty
							&& matches!(n.lifecycle.state, NodeState::Parsed | NodeState::Linked)
					})
					.cloned()
					.collect()
			})
			.unwrap_or_default();
		matches.sort_by_key(|n| n.uuid);
		matches.truncate(limit);
		Ok(matches)
	}

	async fn related_nodes(&self, uuid: Uuid, rel_type: &str, direction: Direction, max: usize) -> Result<Vec<Node>> {
		let tables = self.tables.read();
		let targets: Vec<Uuid> = tables
			.relationships
			.iter()
			.filter(|r| r.rel_type == rel_type)
			.filter_map(|r| match direction {
				Direction::Outgoing if r.source == uuid => Some(r.target),
				Direction::Incoming if r.target == uuid => Some(r.source),
				_ => None,
			})
			.take(max)
			.collect();
		Ok(tables
			.nodes
			.values()
			.flat_map(|table| targets.iter().filter_map(|id| table.get(id).cloned()))
			.collect())
	}

	async fn labels_in_use(&self) -> Result<Vec<String>> {
		let tables = self.tables.read();
		Ok(tables.nodes.keys().cloned().collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::constants::DEFINED_IN;

	#[tokio::test]
	async fn upsert_then_get_round_trips() {
		let store = InMemoryGraphStore::new();
		let node = Node::new(Uuid::new_v4(), "File").with_property("path", serde_json::json!("a.rs"));
		let uuid = node.uuid;
		store.upsert_nodes("File", vec![node]).await.unwrap();
		let fetched = store.get_nodes("File", &[uuid]).await.unwrap();
		assert_eq!(fetched.len(), 1);
		assert_eq!(fetched[0].property_str("path"), Some("a.rs"));
	}

	#[tokio::test]
	async fn upsert_coalesces_unset_properties() {
		let store = InMemoryGraphStore::new();
		let uuid = Uuid::new_v4();
		let first = Node::new(uuid, "Scope")
			.with_property("name", serde_json::json!("a"))
			.with_property("file", serde_json::json!("x.rs"));
		store.upsert_nodes("Scope", vec![first]).await.unwrap();

		let second = Node::new(uuid, "Scope").with_property("name", serde_json::json!("a-renamed"));
		store.upsert_nodes("Scope", vec![second]).await.unwrap();

		let fetched = store.get_nodes("Scope", &[uuid]).await.unwrap();
		assert_eq!(fetched[0].property_str("name"), Some("a-renamed"));
		assert_eq!(fetched[0].property_str("file"), Some("x.rs"));
	}

	#[tokio::test]
	async fn dirty_nodes_selects_both_parsed_and_linked() {
		let store = InMemoryGraphStore::new();
		let mut parsed = Node::new(Uuid::new_v4(), "Scope");
		parsed.embeddings_dirty = true;
		parsed.lifecycle.state = NodeState::Parsed;
		let mut linked = Node::new(Uuid::new_v4(), "Scope");
		linked.embeddings_dirty = true;
		linked.lifecycle.state = NodeState::Linked;
		let mut pending = Node::new(Uuid::new_v4(), "Scope");
		pending.embeddings_dirty = true;
		pending.lifecycle.state = NodeState::Pending;
		store.upsert_nodes("Scope", vec![parsed, linked, pending]).await.unwrap();

		let dirty = store.dirty_nodes("Scope", 10).await.unwrap();
		assert_eq!(dirty.len(), 2);
	}

	#[tokio::test]
	async fn delete_nodes_by_file_also_drops_dangling_relationships() {
		let store = InMemoryGraphStore::new();
		let file_uuid = Uuid::new_v4();
		let scope_uuid = Uuid::new_v4();
		store
			.upsert_nodes("File", vec![Node::new(file_uuid, "File").with_property("path", serde_json::json!("a.rs"))])
			.await
			.unwrap();
		store
			.upsert_nodes(
				"Scope",
				vec![Node::new(scope_uuid, "Scope").with_property("file", serde_json::json!("a.rs"))],
			)
			.await
			.unwrap();
		store
			.upsert_relationships(vec![Relationship::new(scope_uuid, DEFINED_IN, file_uuid)])
			.await
			.unwrap();

		let deleted = store.delete_nodes_by_file("Scope", "file", &["a.rs".to_string()]).await.unwrap();
		assert_eq!(deleted, 1);
		assert!(store.get_nodes("Scope", &[scope_uuid]).await.unwrap().is_empty());
	}
}
