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

//! Graph store contract: a
//! thin, backend-agnostic trait every other component writes against.
//! [`lance_store::LanceGraphStore`] is the production backend; [`memory`]
//! ships an in-process implementation used by the core's own tests and small
//! single-process deployments that don't need Lance's columnar persistence.

pub mod lance_store;
pub mod memory;

pub use memory::InMemoryGraphStore;

use crate::error::Result;
use crate::types::{Node, NodeState, Relationship};
use async_trait::async_trait;
use uuid::Uuid;

/// Traversal direction for [`GraphStore::related_nodes`], used by the
/// embedding pipeline's bounded context enrichment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
	Outgoing,
	Incoming,
}

/// Filters accepted by [`GraphStore::nodes_by_state`].
#[derive(Debug, Clone, Default)]
pub struct StateQuery {
	pub label: Option<String>,
	pub project_id: Option<String>,
	pub limit: usize,
	pub offset: usize,
}

/// Backend-agnostic graph store contract. Implementations are responsible for
/// their own write-transaction semantics; callers treat a single `upsert_*`
/// or `delete_*` call as atomic for the rows it touches.
#[async_trait]
pub trait GraphStore: Send + Sync {
	/// Upsert by `(label, uuid)`. Non-lifecycle, non-embedding fields present
	/// in `node.properties` overwrite; fields the caller omitted are left
	/// untouched on an existing row.
	async fn upsert_nodes(&self, label: &str, nodes: Vec<Node>) -> Result<()>;

	async fn get_nodes(&self, label: &str, uuids: &[Uuid]) -> Result<Vec<Node>>;

	/// All nodes of `label` whose `file_field` property is one of `files`.
	async fn nodes_by_file(&self, label: &str, file_field: &str, files: &[String]) -> Result<Vec<Node>>;

	async fn delete_nodes(&self, label: &str, uuids: &[Uuid]) -> Result<()>;

	/// Delete every node of `label` whose `file_field` property is in `files`.
	/// Used for `DELETE` events.
	async fn delete_nodes_by_file(&self, label: &str, file_field: &str, files: &[String]) -> Result<usize>;

	async fn upsert_relationships(&self, relationships: Vec<Relationship>) -> Result<()>;

	/// Distinct values of `file_field` across every node of `label` currently
	/// stored, used by the orphan watcher to diff the graph's view of "known
	/// files" against the filesystem.
	async fn known_files(&self, label: &str, file_field: &str) -> Result<Vec<String>>;

	async fn nodes_by_state(&self, label: &str, state: NodeState, query: &StateQuery) -> Result<Vec<Node>>;

	/// Nodes with `embeddingsDirty = true` and a lifecycle state of `Parsed`
	/// or `Linked`. Both states select so a node persisted between the parse
	/// and link phases is still picked up after a crash.
	async fn dirty_nodes(&self, label: &str, limit: usize) -> Result<Vec<Node>>;

	async fn related_nodes(
		&self,
		uuid: Uuid,
		rel_type: &str,
		direction: Direction,
		max: usize,
	) -> Result<Vec<Node>>;

	/// Every label currently holding at least one row, for components that
	/// must scan "every stateful label" generically.
	async fn labels_in_use(&self) -> Result<Vec<String>>;

	/// Installs the label's uniqueness constraint and secondary indexes on
	/// first use; index names follow `<label>_<field>` in lowercase. Backends
	/// whose write path already enforces key uniqueness may no-op.
	async fn ensure_indexes(&self, _label: &str) -> Result<()> {
		Ok(())
	}
}

#[cfg(test)]
pub(crate) mod test_support {
	use super::*;
	use std::sync::Arc;

	pub fn store() -> Arc<dyn GraphStore> {
		Arc::new(InMemoryGraphStore::new())
	}
}
