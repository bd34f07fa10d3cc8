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

//! Top-level ingestion loop: consumes flushed change batches and drives each
//! one through capture, parse, merge, delete, restore, link, lifecycle
//! transitions, and (optionally) the embedding pipeline. One batch at a time;
//! parsing fans out across files, everything else is sequential per batch.

use crate::config::{IngestionConfig, SourceType};
use crate::constants::{DEFAULT_GRAPH_WRITE_TIMEOUT_SECS, DEFAULT_PARSER_TIMEOUT_SECS};
use crate::content;
use crate::embedding::{EmbeddingPipeline, EmbeddingProvider};
use crate::error::{IngestError, Result};
use crate::linker::ReferenceLinker;
use crate::merge::GraphMerger;
use crate::metadata_preserver::{CapturedIndex, MetadataPreserver};
use crate::parsers;
use crate::state_machine::StateMachine;
use crate::store::{GraphStore, StateQuery};
use crate::types::{BatchCounters, ChangeBatch, ErrorKind, Node, NodeState, ParseOutput};
use crate::watch::{ChangeQueue, OrphanWatcher};
use futures::stream::{self, StreamExt};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Orphan sweeps run every this many flush intervals.
const ORPHAN_TICK_INTERVALS: u64 = 30;

pub struct Orchestrator {
	config: Arc<IngestionConfig>,
	registry: Arc<crate::registry::Registry>,
	store: Arc<dyn GraphStore>,
	state_machine: Arc<StateMachine>,
	preserver: MetadataPreserver,
	merger: GraphMerger,
	linker: ReferenceLinker,
	pipeline: EmbeddingPipeline,
	cancel: CancellationToken,
}

impl Orchestrator {
	pub fn new(
		config: Arc<IngestionConfig>,
		registry: Arc<crate::registry::Registry>,
		store: Arc<dyn GraphStore>,
		provider: Arc<dyn EmbeddingProvider>,
	) -> Self {
		let state_machine = Arc::new(StateMachine::new(store.clone()).with_max_retries(config.embedding.max_retries));
		let preserver = MetadataPreserver::new(store.clone(), registry.clone())
			.with_skip_on_provider_mismatch(config.embedding.skip_on_provider_mismatch);
		let merger = GraphMerger::new(store.clone(), registry.clone(), state_machine.clone())
			.with_track_changes(config.source.track_changes);
		let linker = ReferenceLinker::new(store.clone(), registry.clone());
		let pipeline = EmbeddingPipeline::new(store.clone(), registry.clone(), state_machine.clone(), provider)
			.with_batch_size(config.embedding.batch_size)
			.with_max_tokens_per_batch(config.embedding.max_tokens_per_batch)
			.with_concurrency(config.embedding.concurrency)
			.with_max_retries(config.embedding.max_retries)
			.with_retry_delay(Duration::from_millis(config.embedding.retry_delay_ms))
			.with_provider_identity(&config.embedding.provider, &config.embedding.model);
		Self {
			config,
			registry,
			store,
			state_machine,
			preserver,
			merger,
			linker,
			pipeline,
			cancel: CancellationToken::new(),
		}
	}

	/// Token observed at every suspension point; cancel it to stop the run
	/// loop and abort in-flight batches at their next checkpoint.
	pub fn cancel_token(&self) -> CancellationToken {
		self.cancel.clone()
	}

	/// Startup recovery: any node left in a transient state by a crash
	/// restarts from `Pending`. Call before the first batch.
	pub async fn recover(&self) -> Result<usize> {
		let mut recovered = 0;
		for label in self.store.labels_in_use().await? {
			recovered += self.state_machine.recover_transient_states(&label).await?;
		}
		if recovered > 0 {
			tracing::info!(nodes = recovered, "recovered nodes stuck in transient states");
		}
		Ok(recovered)
	}

	/// Processes one flushed batch through the full pipeline. Returns the
	/// per-batch counters; a cancelled batch returns the counters accumulated
	/// so far after resetting any transient states it created.
	pub async fn process_batch(&self, batch: &ChangeBatch) -> Result<BatchCounters> {
		let mut counters = BatchCounters {
			files_seen: batch.events.len(),
			..Default::default()
		};
		let parse_targets: Vec<String> = batch.parse_targets().iter().map(|s| s.to_string()).collect();
		let delete_targets: Vec<String> = batch.delete_targets().iter().map(|s| s.to_string()).collect();
		let all_paths: Vec<String> = batch.all_paths().iter().map(|s| s.to_string()).collect();

		let captured = self.preserver.capture_for_files(&all_paths).await?;
		if self.check_cancelled(&counters).await? {
			return Ok(counters);
		}

		let combined = self.parse_files(&parse_targets, &captured, &mut counters).await?;
		if self.check_cancelled(&counters).await? {
			return Ok(counters);
		}

		let summary = tokio::time::timeout(
			Duration::from_secs(DEFAULT_GRAPH_WRITE_TIMEOUT_SECS),
			self.merger.merge(&combined, &parse_targets),
		)
		.await
		.map_err(|_| IngestError::Store("graph write timed out".to_string()))??;
		counters.nodes_upserted += summary.nodes_upserted;
		counters.nodes_deleted += summary.nodes_deleted;
		counters.relationships_upserted += summary.relationships_upserted;

		if !delete_targets.is_empty() {
			counters.nodes_deleted += self.delete_for_files(&delete_targets).await?;
		}

		self.restore_captured(&combined, &captured, &mut counters).await?;
		if self.check_cancelled(&counters).await? {
			return Ok(counters);
		}

		self.link_references(&combined, &mut counters).await?;
		self.sweep_pending().await?;
		if self.check_cancelled(&counters).await? {
			return Ok(counters);
		}

		if self.config.watch.auto_embed {
			self.embed_all(&mut counters).await?;
		}

		tracing::info!(
			files_seen = counters.files_seen,
			nodes_upserted = counters.nodes_upserted,
			nodes_deleted = counters.nodes_deleted,
			relationships_upserted = counters.relationships_upserted,
			embeddings_restored = counters.embeddings_restored,
			embeddings_generated = counters.embeddings_generated,
			provider_mismatch = counters.provider_mismatch,
			errors_parse = counters.errors_parse,
			errors_link = counters.errors_link,
			errors_embed = counters.errors_embed,
			"batch complete"
		);
		Ok(counters)
	}

	/// The watch loop: flush the change queue every `batch_interval_ms`,
	/// process whatever accumulated, and sweep for orphans periodically.
	/// Returns when the cancellation token fires.
	pub async fn run(&self, queue: Arc<ChangeQueue>, orphans: &OrphanWatcher) -> Result<()> {
		let interval = Duration::from_millis(self.config.watch.batch_interval_ms);
		let mut ticks = 0u64;
		loop {
			tokio::select! {
				_ = self.cancel.cancelled() => break,
				_ = tokio::time::sleep(interval) => {}
			}
			ticks += 1;
			if ticks % ORPHAN_TICK_INTERVALS == 0 {
				if let Err(e) = orphans.tick().await {
					tracing::warn!(error = %e, "orphan sweep failed");
				}
			}
			if queue.is_empty() {
				continue;
			}
			let batch = queue.flush();
			let span = tracing::info_span!("batch", files = batch.events.len(), project = %self.config.source.root);
			if let Err(e) = self.process_batch(&batch).instrument(span).await {
				tracing::warn!(error = %e, "batch failed");
			}
		}
		Ok(())
	}

	/// Resets qualifying `Error` nodes across every label back to `Pending`.
	pub async fn retry_errors(&self, error_type: Option<ErrorKind>) -> Result<usize> {
		let mut retried = 0;
		for label in self.store.labels_in_use().await? {
			retried += self.state_machine.retry_errors(&label, error_type).await?;
		}
		Ok(retried)
	}

	/// Runs the embedding pipeline over every registered label.
	pub async fn embed_all(&self, counters: &mut BatchCounters) -> Result<()> {
		let labels: Vec<String> = self.registry.labels().map(str::to_string).collect();
		for label in labels {
			let outcome = self.pipeline.embed_dirty(&label).await?;
			counters.embeddings_generated += outcome.embeddings_generated;
			counters.errors_embed += outcome.errors;
		}
		Ok(())
	}

	async fn check_cancelled(&self, _counters: &BatchCounters) -> Result<bool> {
		if !self.cancel.is_cancelled() {
			return Ok(false);
		}
		// Leave no node stranded mid-phase: anything this batch moved into a
		// transient state restarts from `Pending` next run.
		self.recover().await?;
		tracing::info!("batch cancelled");
		Ok(true)
	}

	/// Parse fan-out: each file is read and parsed on the blocking pool so
	/// CPU-bound parsers run concurrently. A parser that panics is caught by
	/// the task boundary and recorded as a parse error on the File node.
	async fn parse_files(
		&self,
		parse_targets: &[String],
		captured: &CapturedIndex,
		counters: &mut BatchCounters,
	) -> Result<ParseOutput> {
		let is_web = matches!(self.config.source.source_type, SourceType::Web);
		let project_id = self.config.source.root.clone();
		let concurrency = num_cpus::get().max(1);

		let handles = stream::iter(parse_targets.iter().cloned())
			.map(|path| {
				let registry = self.registry.clone();
				let symbols = captured.by_symbol.clone();
				let project_id = project_id.clone();
				let timeout_path = path.clone();
				let handle = tokio::task::spawn_blocking(move || {
					let result = std::fs::read(&path)
						.map_err(|e| IngestError::Parse {
							path: path.clone(),
							reason: e.to_string(),
						})
						.and_then(|bytes| {
							parsers::dispatch(&path, is_web, registry).parse(&path, &bytes, &project_id, &symbols)
						});
					(path, result)
				});
				async move {
					match tokio::time::timeout(Duration::from_secs(DEFAULT_PARSER_TIMEOUT_SECS), handle).await {
						Ok(joined) => joined,
						Err(_) => Ok((
							timeout_path.clone(),
							Err(IngestError::Parse {
								path: timeout_path,
								reason: "parser timed out".to_string(),
							}),
						)),
					}
				}
			})
			.buffer_unordered(concurrency)
			.collect::<Vec<_>>()
			.await;

		let mut combined = ParseOutput::default();
		for handle in handles {
			let (path, result) = match handle {
				Ok(pair) => pair,
				Err(join_error) => {
					tracing::warn!(error = %join_error, "parser task panicked");
					counters.errors_parse += 1;
					continue;
				}
			};
			match result {
				Ok(output) => self.extract_content(path, output, &mut combined, counters).await?,
				Err(e) => {
					tracing::warn!(path = %path, error = %e, "parse failed");
					self.record_parse_error(&path, &e.to_string()).await?;
					counters.errors_parse += 1;
				}
			}
		}
		Ok(combined)
	}

	/// Runs the content extractor over a parser's output: computes content
	/// hashes for every node and expands chunkable parents into chunk nodes.
	async fn extract_content(
		&self,
		path: String,
		output: ParseOutput,
		combined: &mut ParseOutput,
		counters: &mut BatchCounters,
	) -> Result<()> {
		for node in output.nodes {
			let Some(def) = self.registry.get(&node.label) else {
				tracing::warn!(label = %node.label, "parser produced a node for an unregistered label");
				continue;
			};
			match content::extract(&node, &def) {
				Ok((parent, chunks, rels)) => {
					combined.nodes.push(parent);
					combined.nodes.extend(chunks);
					combined.relationships.extend(rels);
				}
				Err(e) => {
					tracing::warn!(path = %path, error = %e, "content extraction failed");
					self.record_parse_error(&path, &e.to_string()).await?;
					counters.errors_parse += 1;
				}
			}
		}
		combined.relationships.extend(output.relationships);
		combined.unresolved.extend(output.unresolved);
		Ok(())
	}

	/// Records a `parse` error against the File node owning `path`, creating
	/// the node if the failure happened before it ever parsed cleanly.
	async fn record_parse_error(&self, path: &str, reason: &str) -> Result<()> {
		let def = self
			.registry
			.get("File")
			.ok_or_else(|| IngestError::Config("File label is not registered".to_string()))?;
		let mut props = std::collections::BTreeMap::new();
		props.insert("path".to_string(), json!(path));
		props.insert("language".to_string(), json!("unknown"));
		let uuid = def.derive_uuid(&props);

		let mut node = match self.store.get_nodes("File", &[uuid]).await?.pop() {
			Some(existing) => existing,
			None => {
				let mut node = Node::new(uuid, "File");
				node.properties = props;
				StateMachine::initialize_state(&mut node);
				node
			}
		};
		self.state_machine
			.record_error("File", &mut node, ErrorKind::Parse, reason)
			.await
	}

	/// Cascades a `deleted` file event across every label scoped to files.
	async fn delete_for_files(&self, delete_targets: &[String]) -> Result<usize> {
		let mut deleted = 0;
		let labels: Vec<String> = self.registry.labels().map(str::to_string).collect();
		for label in labels {
			// External libraries aren't owned by any file; they only leave the
			// graph when nothing references them anymore.
			if label == "ExternalLibrary" {
				continue;
			}
			let Some(def) = self.registry.get(&label) else { continue };
			deleted += self
				.store
				.delete_nodes_by_file(&label, &def.file_field, delete_targets)
				.await?;
		}
		Ok(deleted)
	}

	async fn restore_captured(
		&self,
		combined: &ParseOutput,
		captured: &CapturedIndex,
		counters: &mut BatchCounters,
	) -> Result<()> {
		let mut by_label: HashMap<&str, Vec<Uuid>> = HashMap::new();
		for node in &combined.nodes {
			by_label.entry(node.label.as_str()).or_default().push(node.uuid);
		}
		for (label, uuids) in by_label {
			let mut nodes = self.store.get_nodes(label, &uuids).await?;
			if nodes.is_empty() {
				continue;
			}
			let counts = self.preserver.restore_metadata(
				label,
				&mut nodes,
				captured,
				&self.config.embedding.provider,
				&self.config.embedding.model,
			);
			counters.embeddings_restored += counts.embeddings_restored;
			counters.provider_mismatch += counts.embeddings_skipped_provider_mismatch;
			self.store.upsert_nodes(label, nodes).await?;
		}
		Ok(())
	}

	async fn link_references(&self, combined: &ParseOutput, counters: &mut BatchCounters) -> Result<()> {
		if combined.unresolved.is_empty() {
			return Ok(());
		}
		let mut file_of: HashMap<Uuid, String> = HashMap::new();
		let mut label_of: HashMap<Uuid, String> = HashMap::new();
		for node in &combined.nodes {
			label_of.insert(node.uuid, node.label.clone());
			if let Some(def) = self.registry.get(&node.label) {
				if let Some(file) = node.property_str(&def.file_field) {
					file_of.insert(node.uuid, file.to_string());
				}
			}
		}

		let outcome = self
			.linker
			.link(combined.unresolved.clone(), |uuid| file_of.get(&uuid).cloned())
			.await?;

		if !outcome.created_nodes.is_empty() {
			let mut stubs = outcome.created_nodes;
			for stub in stubs.iter_mut() {
				StateMachine::initialize_state(stub);
				stub.embeddings_dirty = true;
			}
			self.store.upsert_nodes("ExternalLibrary", stubs).await?;
		}
		counters.relationships_upserted += outcome.relationships.len();
		self.store.upsert_relationships(outcome.relationships).await?;

		for uuid in outcome.mandatory_failures {
			let Some(label) = label_of.get(&uuid) else { continue };
			if let Some(mut node) = self.store.get_nodes(label, &[uuid]).await?.pop() {
				self.state_machine
					.record_error(label, &mut node, ErrorKind::Link, "unresolved mandatory reference")
					.await?;
				counters.errors_link += 1;
			}
		}
		Ok(())
	}

	/// Advances every `Pending` node that already has a content hash through
	/// the parse and link phases. Covers both freshly-merged nodes and nodes
	/// reset by `retry_errors` or a provider swap; nodes without a hash never
	/// parsed cleanly and wait for their file to be re-ingested.
	async fn sweep_pending(&self) -> Result<()> {
		let labels: Vec<String> = self.store.labels_in_use().await?;
		for label in labels {
			// A node cut off mid-sweep is either reset by the caller's
			// cancellation checkpoint (transient states) or re-selected by the
			// embedding pass (dirty at `Parsed`/`Linked`).
			if self.cancel.is_cancelled() {
				return Ok(());
			}
			let pending = self
				.state_machine
				.query_by_state(&label, NodeState::Pending, StateQuery::default())
				.await?;
			for mut node in pending {
				if node.content_hash.is_none() {
					continue;
				}
				// Dirty nodes stop at `Linked` for the embedding pipeline to
				// pick up; nodes with restored embeddings go straight through.
				let states: &[NodeState] = if node.embeddings_dirty {
					&[NodeState::Parsing, NodeState::Parsed, NodeState::Linking, NodeState::Linked]
				} else {
					&[
						NodeState::Parsing,
						NodeState::Parsed,
						NodeState::Linking,
						NodeState::Linked,
						NodeState::Embedding,
						NodeState::Ready,
					]
				};
				for state in states {
					self.state_machine.transition(&label, &mut node, *state).await?;
				}
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::IngestionConfig;
	use crate::embedding::provider::tests::FixedDimensionProvider;
	use crate::registry::Registry;
	use crate::store::test_support::store;
	use crate::types::{ChangeEvent, ChangeKind};

	fn orchestrator_for(root: &std::path::Path) -> Orchestrator {
		let mut config = IngestionConfig::default();
		config.source.root = root.to_string_lossy().to_string();
		Orchestrator::new(
			Arc::new(config),
			Arc::new(Registry::with_builtins()),
			store(),
			Arc::new(FixedDimensionProvider::new(8)),
		)
	}

	fn batch_for(path: &std::path::Path, kind: ChangeKind) -> ChangeBatch {
		ChangeBatch {
			events: vec![ChangeEvent {
				path: path.to_string_lossy().to_string(),
				kind,
			}],
		}
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn first_ingestion_drives_scopes_to_ready() {
		let dir = tempfile::tempdir().unwrap();
		let file = dir.path().join("lib.rs");
		std::fs::write(&file, "fn a() { b(); }\nfn b() {}\nfn c() {}\n").unwrap();

		let orchestrator = orchestrator_for(dir.path());
		let counters = orchestrator
			.process_batch(&batch_for(&file, ChangeKind::Added))
			.await
			.unwrap();

		assert_eq!(counters.files_seen, 1);
		assert!(counters.nodes_upserted >= 4, "one File node plus three scopes");
		assert!(counters.embeddings_generated > 0);
		assert_eq!(counters.errors_parse, 0);

		let path = file.to_string_lossy().to_string();
		let scopes = orchestrator
			.store
			.nodes_by_file("Scope", "file", &[path])
			.await
			.unwrap();
		assert_eq!(scopes.len(), 3);
		for scope in &scopes {
			assert_eq!(scope.lifecycle.state, NodeState::Ready);
			assert!(!scope.embeddings_dirty);
			assert_eq!(scope.lifecycle.retry_count, 0);
		}
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn re_ingesting_unchanged_file_generates_no_embeddings() {
		let dir = tempfile::tempdir().unwrap();
		let file = dir.path().join("lib.rs");
		std::fs::write(&file, "fn a() {}\nfn b() {}\n").unwrap();

		let orchestrator = orchestrator_for(dir.path());
		orchestrator.process_batch(&batch_for(&file, ChangeKind::Added)).await.unwrap();
		let second = orchestrator
			.process_batch(&batch_for(&file, ChangeKind::Modified))
			.await
			.unwrap();

		assert_eq!(second.embeddings_generated, 0);
		assert!(second.embeddings_restored > 0);
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn deleted_file_removes_its_nodes() {
		let dir = tempfile::tempdir().unwrap();
		let file = dir.path().join("lib.rs");
		std::fs::write(&file, "fn a() {}\n").unwrap();

		let orchestrator = orchestrator_for(dir.path());
		orchestrator.process_batch(&batch_for(&file, ChangeKind::Added)).await.unwrap();
		std::fs::remove_file(&file).unwrap();
		let counters = orchestrator
			.process_batch(&batch_for(&file, ChangeKind::Deleted))
			.await
			.unwrap();
		assert!(counters.nodes_deleted >= 2, "File node and its scope are gone");

		let path = file.to_string_lossy().to_string();
		let scopes = orchestrator.store.nodes_by_file("Scope", "file", &[path]).await.unwrap();
		assert!(scopes.is_empty());
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn unreadable_file_records_parse_error_without_aborting() {
		let dir = tempfile::tempdir().unwrap();
		let missing = dir.path().join("never_existed.rs");
		let good = dir.path().join("good.rs");
		std::fs::write(&good, "fn a() {}\n").unwrap();

		let orchestrator = orchestrator_for(dir.path());
		let batch = ChangeBatch {
			events: vec![
				ChangeEvent {
					path: missing.to_string_lossy().to_string(),
					kind: ChangeKind::Added,
				},
				ChangeEvent {
					path: good.to_string_lossy().to_string(),
					kind: ChangeKind::Added,
				},
			],
		};
		let counters = orchestrator.process_batch(&batch).await.unwrap();
		assert_eq!(counters.errors_parse, 1);

		let good_path = good.to_string_lossy().to_string();
		let scopes = orchestrator.store.nodes_by_file("Scope", "file", &[good_path]).await.unwrap();
		assert_eq!(scopes.len(), 1, "the rest of the batch still lands");

		let missing_path = missing.to_string_lossy().to_string();
		let files = orchestrator.store.nodes_by_file("File", "path", &[missing_path]).await.unwrap();
		assert_eq!(files[0].lifecycle.state, NodeState::Error);
		assert_eq!(files[0].lifecycle.error_type, Some(ErrorKind::Parse));
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn cancelled_batch_leaves_no_transient_states() {
		let dir = tempfile::tempdir().unwrap();
		let file = dir.path().join("lib.rs");
		std::fs::write(&file, "fn a() {}\n").unwrap();

		let orchestrator = orchestrator_for(dir.path());
		orchestrator.cancel_token().cancel();
		orchestrator.process_batch(&batch_for(&file, ChangeKind::Added)).await.unwrap();

		for label in orchestrator.store.labels_in_use().await.unwrap() {
			for state in [NodeState::Parsing, NodeState::Linking, NodeState::Embedding] {
				let stuck = orchestrator
					.store
					.nodes_by_state(&label, state, &StateQuery::default())
					.await
					.unwrap();
				assert!(stuck.is_empty());
			}
		}
	}
}
