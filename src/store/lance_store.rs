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

//! Lance-backed [`GraphStore`]: two tables per project database, `nodes`
//! (one row per label+uuid, lifecycle columns plus a JSON `properties` blob)
//! and `relationships` (source/type/target). A generic two-table schema lets
//! any registry-declared label flow through one code path, so registering a
//! new label never needs a schema migration.

use super::{Direction, GraphStore, StateQuery};
use crate::error::{IngestError, Result};
use crate::types::{ErrorKind, Lifecycle, Node, NodeState, Relationship};
use arrow::array::{
	Array, BooleanArray, BooleanBuilder, RecordBatch, StringArray, StringBuilder, UInt32Array, UInt32Builder,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatchIterator;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

const NODES_TABLE: &str = "nodes";
const RELATIONSHIPS_TABLE: &str = "relationships";

/// Flattened row shape persisted in the `nodes` table. The property bag is
/// carried as a JSON-encoded string rather than native Arrow struct columns
/// so every label shares one schema regardless of how many domain fields it
/// declares. Embedding vectors are
/// stored separately by a vector index the production deployment layers on
/// top of this table; this core only tracks their per-field content hashes
/// here to decide when a vector needs regenerating.
#[derive(Debug, Clone)]
struct NodeRow {
	uuid: String,
	label: String,
	properties_json: String,
	content_hash: Option<String>,
	embeddings_dirty: bool,
	state: String,
	state_changed_at: Option<String>,
	error_type: Option<String>,
	error_message: Option<String>,
	retry_count: u32,
	detected_at: Option<String>,
	parsed_at: Option<String>,
	linked_at: Option<String>,
	embedded_at: Option<String>,
	embedding_provider: Option<String>,
	embedding_model: Option<String>,
	embedding_name_hash: Option<String>,
	embedding_content_hash: Option<String>,
	embedding_description_hash: Option<String>,
}

fn nodes_schema() -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("uuid", DataType::Utf8, false),
		Field::new("label", DataType::Utf8, false),
		Field::new("properties_json", DataType::Utf8, false),
		Field::new("content_hash", DataType::Utf8, true),
		Field::new("embeddings_dirty", DataType::Boolean, false),
		Field::new("state", DataType::Utf8, false),
		Field::new("state_changed_at", DataType::Utf8, true),
		Field::new("error_type", DataType::Utf8, true),
		Field::new("error_message", DataType::Utf8, true),
		Field::new("retry_count", DataType::UInt32, false),
		Field::new("detected_at", DataType::Utf8, true),
		Field::new("parsed_at", DataType::Utf8, true),
		Field::new("linked_at", DataType::Utf8, true),
		Field::new("embedded_at", DataType::Utf8, true),
		Field::new("embedding_provider", DataType::Utf8, true),
		Field::new("embedding_model", DataType::Utf8, true),
		Field::new("embedding_name_hash", DataType::Utf8, true),
		Field::new("embedding_content_hash", DataType::Utf8, true),
		Field::new("embedding_description_hash", DataType::Utf8, true),
	]))
}

fn relationships_schema() -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("source", DataType::Utf8, false),
		Field::new("rel_type", DataType::Utf8, false),
		Field::new("target", DataType::Utf8, false),
	]))
}

impl NodeRow {
	fn from_node(node: &Node) -> Self {
		let lc = &node.lifecycle;
		Self {
			uuid: node.uuid.to_string(),
			label: node.label.clone(),
			properties_json: serde_json::to_string(&node.properties).unwrap_or_default(),
			content_hash: node.content_hash.clone(),
			embeddings_dirty: node.embeddings_dirty,
			state: lc.state.as_str().to_string(),
			state_changed_at: lc.state_changed_at.map(|t| t.to_rfc3339()),
			error_type: lc.error_type.map(|e| e.as_str().to_string()),
			error_message: lc.error_message.clone(),
			retry_count: lc.retry_count,
			detected_at: lc.detected_at.map(|t| t.to_rfc3339()),
			parsed_at: lc.parsed_at.map(|t| t.to_rfc3339()),
			linked_at: lc.linked_at.map(|t| t.to_rfc3339()),
			embedded_at: lc.embedded_at.map(|t| t.to_rfc3339()),
			embedding_provider: lc.embedding_provider.clone(),
			embedding_model: lc.embedding_model.clone(),
			embedding_name_hash: lc.embedding_name_hash.clone(),
			embedding_content_hash: lc.embedding_content_hash.clone(),
			embedding_description_hash: lc.embedding_description_hash.clone(),
		}
	}

	fn into_node(self) -> Result<Node> {
		let uuid = Uuid::parse_str(&self.uuid).map_err(|e| IngestError::Store(e.to_string()))?;
		let properties: BTreeMap<String, serde_json::Value> =
			serde_json::from_str(&self.properties_json).unwrap_or_default();
		let parse_time = |s: Option<String>| {
			s.and_then(|v| chrono::DateTime::parse_from_rfc3339(&v).ok())
				.map(|t| t.with_timezone(&chrono::Utc))
		};
		let lifecycle = Lifecycle {
			state: NodeState::parse(&self.state).unwrap_or(NodeState::Pending),
			state_changed_at: parse_time(self.state_changed_at),
			error_type: self.error_type.as_deref().and_then(|e| match e {
				"parse" => Some(ErrorKind::Parse),
				"link" => Some(ErrorKind::Link),
				"embed" => Some(ErrorKind::Embed),
				_ => None,
			}),
			error_message: self.error_message,
			retry_count: self.retry_count,
			detected_at: parse_time(self.detected_at),
			parsed_at: parse_time(self.parsed_at),
			linked_at: parse_time(self.linked_at),
			embedded_at: parse_time(self.embedded_at),
			embedding_provider: self.embedding_provider,
			embedding_model: self.embedding_model,
			embedding_name_hash: self.embedding_name_hash,
			embedding_content_hash: self.embedding_content_hash,
			embedding_description_hash: self.embedding_description_hash,
		};
		Ok(Node {
			uuid,
			label: self.label,
			properties,
			content_hash: self.content_hash,
			embeddings_dirty: self.embeddings_dirty,
			lifecycle,
		})
	}
}

fn rows_to_batch(rows: &[NodeRow]) -> Result<RecordBatch> {
	let mut uuid = StringBuilder::new();
	let mut label = StringBuilder::new();
	let mut properties_json = StringBuilder::new();
	let mut content_hash = StringBuilder::new();
	let mut embeddings_dirty = BooleanBuilder::new();
	let mut state = StringBuilder::new();
	let mut state_changed_at = StringBuilder::new();
	let mut error_type = StringBuilder::new();
	let mut error_message = StringBuilder::new();
	let mut retry_count = UInt32Builder::new();
	let mut detected_at = StringBuilder::new();
	let mut parsed_at = StringBuilder::new();
	let mut linked_at = StringBuilder::new();
	let mut embedded_at = StringBuilder::new();
	let mut embedding_provider = StringBuilder::new();
	let mut embedding_model = StringBuilder::new();
	let mut embedding_name_hash = StringBuilder::new();
	let mut embedding_content_hash = StringBuilder::new();
	let mut embedding_description_hash = StringBuilder::new();

	for row in rows {
		uuid.append_value(&row.uuid);
		label.append_value(&row.label);
		properties_json.append_value(&row.properties_json);
		content_hash.append_option(row.content_hash.as_deref());
		embeddings_dirty.append_value(row.embeddings_dirty);
		state.append_value(&row.state);
		state_changed_at.append_option(row.state_changed_at.as_deref());
		error_type.append_option(row.error_type.as_deref());
		error_message.append_option(row.error_message.as_deref());
		retry_count.append_value(row.retry_count);
		detected_at.append_option(row.detected_at.as_deref());
		parsed_at.append_option(row.parsed_at.as_deref());
		linked_at.append_option(row.linked_at.as_deref());
		embedded_at.append_option(row.embedded_at.as_deref());
		embedding_provider.append_option(row.embedding_provider.as_deref());
		embedding_model.append_option(row.embedding_model.as_deref());
		embedding_name_hash.append_option(row.embedding_name_hash.as_deref());
		embedding_content_hash.append_option(row.embedding_content_hash.as_deref());
		embedding_description_hash.append_option(row.embedding_description_hash.as_deref());
	}

	RecordBatch::try_new(
		nodes_schema(),
		vec![
			Arc::new(uuid.finish()),
			Arc::new(label.finish()),
			Arc::new(properties_json.finish()),
			Arc::new(content_hash.finish()),
			Arc::new(embeddings_dirty.finish()),
			Arc::new(state.finish()),
			Arc::new(state_changed_at.finish()),
			Arc::new(error_type.finish()),
			Arc::new(error_message.finish()),
			Arc::new(retry_count.finish()),
			Arc::new(detected_at.finish()),
			Arc::new(parsed_at.finish()),
			Arc::new(linked_at.finish()),
			Arc::new(embedded_at.finish()),
			Arc::new(embedding_provider.finish()),
			Arc::new(embedding_model.finish()),
			Arc::new(embedding_name_hash.finish()),
			Arc::new(embedding_content_hash.finish()),
			Arc::new(embedding_description_hash.finish()),
		],
	)
	.map_err(|e| IngestError::Store(format!("failed to build node batch: {e}")))
}

fn batch_to_rows(batch: &RecordBatch) -> Result<Vec<NodeRow>> {
	let col = |name: &str| -> Result<&StringArray> {
		batch
			.column_by_name(name)
			.and_then(|c| c.as_any().downcast_ref::<StringArray>())
			.ok_or_else(|| IngestError::Store(format!("missing/mistyped column {name}")))
	};
	let uuid = col("uuid")?;
	let label = col("label")?;
	let properties_json = col("properties_json")?;
	let content_hash = col("content_hash")?;
	let state = col("state")?;
	let state_changed_at = col("state_changed_at")?;
	let error_type = col("error_type")?;
	let error_message = col("error_message")?;
	let detected_at = col("detected_at")?;
	let parsed_at = col("parsed_at")?;
	let linked_at = col("linked_at")?;
	let embedded_at = col("embedded_at")?;
	let embedding_provider = col("embedding_provider")?;
	let embedding_model = col("embedding_model")?;
	let embedding_name_hash = col("embedding_name_hash")?;
	let embedding_content_hash = col("embedding_content_hash")?;
	let embedding_description_hash = col("embedding_description_hash")?;
	let embeddings_dirty = batch
		.column_by_name("embeddings_dirty")
		.and_then(|c| c.as_any().downcast_ref::<BooleanArray>())
		.ok_or_else(|| IngestError::Store("missing/mistyped column embeddings_dirty".to_string()))?;
	let retry_count = batch
		.column_by_name("retry_count")
		.and_then(|c| c.as_any().downcast_ref::<UInt32Array>())
		.ok_or_else(|| IngestError::Store("missing/mistyped column retry_count".to_string()))?;

	let opt = |arr: &StringArray, i: usize| -> Option<String> {
		if arr.is_null(i) {
			None
		} else {
			Some(arr.value(i).to_string())
		}
	};

	let mut rows = Vec::with_capacity(batch.num_rows());
	for i in 0..batch.num_rows() {
		rows.push(NodeRow {
			uuid: uuid.value(i).to_string(),
			label: label.value(i).to_string(),
			properties_json: properties_json.value(i).to_string(),
			content_hash: opt(content_hash, i),
			embeddings_dirty: embeddings_dirty.value(i),
			state: state.value(i).to_string(),
			state_changed_at: opt(state_changed_at, i),
			error_type: opt(error_type, i),
			error_message: opt(error_message, i),
			retry_count: retry_count.value(i),
			detected_at: opt(detected_at, i),
			parsed_at: opt(parsed_at, i),
			linked_at: opt(linked_at, i),
			embedded_at: opt(embedded_at, i),
			embedding_provider: opt(embedding_provider, i),
			embedding_model: opt(embedding_model, i),
			embedding_name_hash: opt(embedding_name_hash, i),
			embedding_content_hash: opt(embedding_content_hash, i),
			embedding_description_hash: opt(embedding_description_hash, i),
		});
	}
	Ok(rows)
}

fn in_list(values: impl Iterator<Item = String>) -> String {
	values.map(|v| format!("'{}'", v.replace('\'', "''"))).collect::<Vec<_>>().join(", ")
}

/// Opens (or creates) the two-table Lance database at `db_path`.
pub struct LanceGraphStore {
	connection: Connection,
	// Serializes create-vs-open races on first write to either table.
	write_lock: Mutex<()>,
	indexed_labels: parking_lot::Mutex<std::collections::HashSet<String>>,
}

impl LanceGraphStore {
	pub async fn open(db_path: impl AsRef<Path>) -> Result<Self> {
		let connection = lancedb::connect(&db_path.as_ref().to_string_lossy())
			.execute()
			.await
			.map_err(|e| IngestError::Store(format!("failed to open lance db: {e}")))?;
		Ok(Self {
			connection,
			write_lock: Mutex::new(()),
			indexed_labels: parking_lot::Mutex::new(std::collections::HashSet::new()),
		})
	}

	async fn nodes_table(&self, batch: Option<RecordBatch>) -> Result<lancedb::table::Table> {
		match self.connection.open_table(NODES_TABLE).execute().await {
			Ok(table) => Ok(table),
			Err(_) => {
				let batch = batch.ok_or_else(|| {
					IngestError::Store("nodes table does not exist and no seed batch was given".to_string())
				})?;
				let schema = batch.schema();
				let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);
				self.connection
					.create_table(NODES_TABLE, Box::new(reader))
					.execute()
					.await
					.map_err(|e| IngestError::Store(format!("failed to create nodes table: {e}")))
			}
		}
	}

	async fn relationships_table(&self, batch: Option<RecordBatch>) -> Result<lancedb::table::Table> {
		match self.connection.open_table(RELATIONSHIPS_TABLE).execute().await {
			Ok(table) => Ok(table),
			Err(_) => {
				let batch = batch.ok_or_else(|| {
					IngestError::Store("relationships table does not exist and no seed batch was given".to_string())
				})?;
				let schema = batch.schema();
				let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);
				self.connection
					.create_table(RELATIONSHIPS_TABLE, Box::new(reader))
					.execute()
					.await
					.map_err(|e| IngestError::Store(format!("failed to create relationships table: {e}")))
			}
		}
	}

	async fn query_nodes(&self, predicate: String) -> Result<Vec<Node>> {
		let table = match self.connection.open_table(NODES_TABLE).execute().await {
			Ok(table) => table,
			Err(_) => return Ok(Vec::new()),
		};
		let mut stream = table
			.query()
			.only_if(predicate)
			.execute()
			.await
			.map_err(|e| IngestError::Store(format!("node query failed: {e}")))?;
		let mut nodes = Vec::new();
		while let Some(batch) = stream
			.try_next()
			.await
			.map_err(|e| IngestError::Store(format!("node query stream failed: {e}")))?
		{
			for row in batch_to_rows(&batch)? {
				nodes.push(row.into_node()?);
			}
		}
		Ok(nodes)
	}
}

#[async_trait]
impl GraphStore for LanceGraphStore {
	async fn upsert_nodes(&self, label: &str, nodes: Vec<Node>) -> Result<()> {
		if nodes.is_empty() {
			return Ok(());
		}
		let _guard = self.write_lock.lock().await;
		let rows: Vec<NodeRow> = nodes.iter().map(NodeRow::from_node).collect();
		let batch = rows_to_batch(&rows)?;
		let table = self.nodes_table(Some(batch.clone())).await?;
		let schema = batch.schema();
		let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);
		// MERGE-by-uuid: new rows insert, existing rows overwrite their columns
		// (the coalesce-for-unset-fields contract lives in `Node::properties`
		// construction upstream — callers only pass the fields they computed).
		let mut builder = table.merge_insert(&["uuid"]);
		builder.when_matched_update_all(None).when_not_matched_insert_all();
		builder
			.execute(Box::new(reader))
			.await
			.map_err(|e| IngestError::Store(format!("merge_insert failed for label {label}: {e}")))?;
		Ok(())
	}

	async fn get_nodes(&self, label: &str, uuids: &[Uuid]) -> Result<Vec<Node>> {
		if uuids.is_empty() {
			return Ok(Vec::new());
		}
		let ids = in_list(uuids.iter().map(Uuid::to_string));
		self.query_nodes(format!("label = '{label}' AND uuid IN ({ids})")).await
	}

	async fn nodes_by_file(&self, label: &str, file_field: &str, files: &[String]) -> Result<Vec<Node>> {
		if files.is_empty() {
			return Ok(Vec::new());
		}
		let nodes = self.query_nodes(format!("label = '{label}'")).await?;
		Ok(nodes
			.into_iter()
			.filter(|n| n.property_str(file_field).is_some_and(|f| files.iter().any(|x| x == f)))
			.collect())
	}

	async fn delete_nodes(&self, label: &str, uuids: &[Uuid]) -> Result<()> {
		if uuids.is_empty() {
			return Ok(());
		}
		let _guard = self.write_lock.lock().await;
		let table = match self.connection.open_table(NODES_TABLE).execute().await {
			Ok(table) => table,
			Err(_) => return Ok(()),
		};
		let ids = in_list(uuids.iter().map(Uuid::to_string));
		table
			.delete(&format!("label = '{label}' AND uuid IN ({ids})"))
			.await
			.map(|_| ())
			.map_err(|e| IngestError::Store(format!("delete failed: {e}")))
	}

	async fn delete_nodes_by_file(&self, label: &str, file_field: &str, files: &[String]) -> Result<usize> {
		let matching = self.nodes_by_file(label, file_field, files).await?;
		let uuids: Vec<Uuid> = matching.iter().map(|n| n.uuid).collect();
		self.delete_nodes(label, &uuids).await?;
		Ok(uuids.len())
	}

	async fn upsert_relationships(&self, relationships: Vec<Relationship>) -> Result<()> {
		if relationships.is_empty() {
			return Ok(());
		}
		let _guard = self.write_lock.lock().await;
		let mut source = StringBuilder::new();
		let mut rel_type = StringBuilder::new();
		let mut target = StringBuilder::new();
		for rel in &relationships {
			source.append_value(rel.source.to_string());
			rel_type.append_value(&rel.rel_type);
			target.append_value(rel.target.to_string());
		}
		let batch = RecordBatch::try_new(
			relationships_schema(),
			vec![Arc::new(source.finish()), Arc::new(rel_type.finish()), Arc::new(target.finish())],
		)
		.map_err(|e| IngestError::Store(format!("failed to build relationship batch: {e}")))?;
		let table = self.relationships_table(Some(batch.clone())).await?;
		let schema = batch.schema();
		let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);
		table
			.add(Box::new(reader))
			.execute()
			.await
			.map_err(|e| IngestError::Store(format!("relationship insert failed: {e}")))?;
		Ok(())
	}

	async fn known_files(&self, label: &str, file_field: &str) -> Result<Vec<String>> {
		let nodes = self.query_nodes(format!("label = '{label}'")).await?;
		let mut files: Vec<String> = nodes.iter().filter_map(|n| n.property_str(file_field).map(str::to_string)).collect();
		files.sort();
		files.dedup();
		Ok(files)
	}

	async fn nodes_by_state(&self, label: &str, state: NodeState, query: &StateQuery) -> Result<Vec<Node>> {
		let mut nodes = self
			.query_nodes(format!("label = '{label}' AND state = '{}'", state.as_str()))
			.await?;
		if let Some(project_id) = &query.project_id {
			nodes.retain(|n| n.property_str("projectId") == Some(project_id.as_str()));
		}
		nodes.sort_by_key(|n| n.uuid);
		let offset = query.offset.min(nodes.len());
		let limit = if query.limit == 0 { nodes.len() } else { query.limit };
		Ok(nodes.into_iter().skip(offset).take(limit).collect())
	}

	async fn dirty_nodes(&self, label: &str, limit: usize) -> Result<Vec<Node>> {
		let mut nodes = self
			.query_nodes(format!(
				"label = '{label}' AND embeddings_dirty = true AND state IN ('parsed', 'linked')"
			))
			.await?;
		nodes.sort_by_key(|n| n.uuid);
		nodes.truncate(limit);
		Ok(nodes)
	}

	async fn related_nodes(&self, uuid: Uuid, rel_type: &str, direction: Direction, max: usize) -> Result<Vec<Node>> {
		let table = match self.connection.open_table(RELATIONSHIPS_TABLE).execute().await {
			Ok(table) => table,
			Err(_) => return Ok(Vec::new()),
		};
		let predicate = match direction {
			Direction::Outgoing => format!("rel_type = '{rel_type}' AND source = '{uuid}'"),
			Direction::Incoming => format!("rel_type = '{rel_type}' AND target = '{uuid}'"),
		};
		let mut stream = table
			.query()
			.only_if(predicate)
			.execute()
			.await
			.map_err(|e| IngestError::Store(format!("relationship query failed: {e}")))?;
		let column = if direction == Direction::Outgoing { "target" } else { "source" };
		let mut neighbor_ids = Vec::new();
		while let Some(batch) = stream
			.try_next()
			.await
			.map_err(|e| IngestError::Store(format!("relationship query stream failed: {e}")))?
		{
			let array = batch
				.column_by_name(column)
				.and_then(|c| c.as_any().downcast_ref::<StringArray>())
				.ok_or_else(|| IngestError::Store(format!("missing/mistyped column {column}")))?;
			for i in 0..array.len() {
				if let Ok(id) = Uuid::parse_str(array.value(i)) {
					neighbor_ids.push(id);
				}
			}
			if neighbor_ids.len() >= max {
				break;
			}
		}
		neighbor_ids.truncate(max);
		let ids = in_list(neighbor_ids.iter().map(Uuid::to_string));
		if ids.is_empty() {
			return Ok(Vec::new());
		}
		self.query_nodes(format!("uuid IN ({ids})")).await
	}

	async fn labels_in_use(&self) -> Result<Vec<String>> {
		let nodes = self.query_nodes("1 = 1".to_string()).await?;
		let mut labels: Vec<String> = nodes.into_iter().map(|n| n.label).collect();
		labels.sort();
		labels.dedup();
		Ok(labels)
	}

	async fn ensure_indexes(&self, label: &str) -> Result<()> {
		if !self.indexed_labels.lock().insert(label.to_string()) {
			return Ok(());
		}
		let table = match self.connection.open_table(NODES_TABLE).execute().await {
			Ok(table) => table,
			// Nothing written yet; the first upsert seeds the table and a
			// later merge retries the index.
			Err(_) => {
				self.indexed_labels.lock().remove(label);
				return Ok(());
			}
		};
		// Uniqueness on (label, uuid) is enforced by the merge-insert key; a
		// scalar index keeps the per-label scans this core issues cheap.
		if let Err(e) = table
			.create_index(&["uuid"], lancedb::index::Index::Auto)
			.execute()
			.await
		{
			tracing::debug!(label, error = %e, "uuid index creation skipped");
		}
		Ok(())
	}
}
