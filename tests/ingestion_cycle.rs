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

//! End-to-end ingestion cycles against an in-memory store and a deterministic
//! embedding provider: first ingestion, idempotent re-ingestion, partial
//! edits, renames, provider swaps, and rate-limit storms.

use ragforge_ingest::config::IngestionConfig;
use ragforge_ingest::embedding::EmbeddingProvider;
use ragforge_ingest::orchestrator::Orchestrator;
use ragforge_ingest::registry::Registry;
use ragforge_ingest::store::{Direction, GraphStore, InMemoryGraphStore};
use ragforge_ingest::types::{ChangeBatch, ChangeEvent, ChangeKind, ErrorKind, Node, NodeState};
use std::path::Path;
use std::sync::Arc;

struct MockProvider {
	dimensions: usize,
}

#[async_trait::async_trait]
impl EmbeddingProvider for MockProvider {
	async fn embed(&self, texts: &[String]) -> ragforge_ingest::Result<Vec<Vec<f32>>> {
		Ok(texts.iter().map(|t| vec![t.len() as f32; self.dimensions]).collect())
	}

	fn dimensions(&self) -> usize {
		self.dimensions
	}

	fn name(&self) -> &str {
		"mock-embedder"
	}
}

/// Fails every call with a rate-limit-shaped error.
struct StormProvider;

#[async_trait::async_trait]
impl EmbeddingProvider for StormProvider {
	async fn embed(&self, _texts: &[String]) -> ragforge_ingest::Result<Vec<Vec<f32>>> {
		Err(ragforge_ingest::IngestError::Embed {
			attempts: 1,
			reason: "429 rate limit exceeded".to_string(),
		})
	}

	fn dimensions(&self) -> usize {
		8
	}

	fn name(&self) -> &str {
		"storm"
	}
}

/// Claims one dimension, returns another.
struct WrongDimensionProvider;

#[async_trait::async_trait]
impl EmbeddingProvider for WrongDimensionProvider {
	async fn embed(&self, texts: &[String]) -> ragforge_ingest::Result<Vec<Vec<f32>>> {
		Ok(texts.iter().map(|_| vec![0.0; 4]).collect())
	}

	fn dimensions(&self) -> usize {
		8
	}

	fn name(&self) -> &str {
		"wrong-dimension"
	}
}

fn config_for(root: &Path) -> IngestionConfig {
	let mut config = IngestionConfig::default();
	config.source.root = root.to_string_lossy().to_string();
	config.embedding.retry_delay_ms = 1;
	config
}

fn orchestrator_with(
	config: IngestionConfig,
	store: Arc<dyn GraphStore>,
	provider: Arc<dyn EmbeddingProvider>,
) -> Orchestrator {
	Orchestrator::new(Arc::new(config), Arc::new(Registry::with_builtins()), store, provider)
}

fn batch(path: &Path, kind: ChangeKind) -> ChangeBatch {
	ChangeBatch {
		events: vec![ChangeEvent {
			path: path.to_string_lossy().to_string(),
			kind,
		}],
	}
}

async fn scopes_for(store: &Arc<dyn GraphStore>, path: &Path) -> Vec<Node> {
	let mut scopes = store
		.nodes_by_file("Scope", "file", &[path.to_string_lossy().to_string()])
		.await
		.unwrap();
	scopes.sort_by(|a, b| a.property_str("name").cmp(&b.property_str("name")));
	scopes
}

const THREE_SCOPES: &str = "fn a() { b(); }\nfn b() { 1 + 1; }\nfn c() {}\n";

#[tokio::test(flavor = "multi_thread")]
async fn first_ingestion_of_a_single_file() {
	let dir = tempfile::tempdir().unwrap();
	let file = dir.path().join("lib.rs");
	std::fs::write(&file, THREE_SCOPES).unwrap();

	let store: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
	let orchestrator = orchestrator_with(config_for(dir.path()), store.clone(), Arc::new(MockProvider { dimensions: 8 }));
	let counters = orchestrator.process_batch(&batch(&file, ChangeKind::Added)).await.unwrap();

	let path_str = file.to_string_lossy().to_string();
	let files = store.nodes_by_file("File", "path", &[path_str]).await.unwrap();
	assert_eq!(files.len(), 1);

	let scopes = scopes_for(&store, &file).await;
	assert_eq!(scopes.len(), 3);
	for scope in &scopes {
		assert_eq!(scope.lifecycle.state, NodeState::Ready);
		assert!(!scope.embeddings_dirty);
		assert_eq!(scope.lifecycle.retry_count, 0);
		assert!(scope.lifecycle.embedding_content_hash.is_some());
	}

	let defined_in = store
		.related_nodes(files[0].uuid, "DEFINED_IN", Direction::Incoming, 10)
		.await
		.unwrap();
	assert_eq!(defined_in.len(), 3, "every scope hangs off the file");

	let a = scopes.iter().find(|s| s.property_str("name") == Some("a")).unwrap();
	let consumed = store.related_nodes(a.uuid, "CONSUMES", Direction::Outgoing, 10).await.unwrap();
	assert_eq!(consumed.len(), 1);
	assert_eq!(consumed[0].property_str("name"), Some("b"));

	assert!(counters.embeddings_generated > 0);
	assert_eq!(counters.errors_parse, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn cross_file_reference_resolves_to_a_scope_in_another_file() {
	let dir = tempfile::tempdir().unwrap();
	let main = dir.path().join("main.rs");
	let util = dir.path().join("util.rs");
	std::fs::write(&main, "fn caller() { helper(); }\n").unwrap();
	std::fs::write(&util, "fn helper() {}\n").unwrap();

	let store: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
	let orchestrator = orchestrator_with(config_for(dir.path()), store.clone(), Arc::new(MockProvider { dimensions: 8 }));
	let batch = ChangeBatch {
		events: vec![
			ChangeEvent {
				path: main.to_string_lossy().to_string(),
				kind: ChangeKind::Added,
			},
			ChangeEvent {
				path: util.to_string_lossy().to_string(),
				kind: ChangeKind::Added,
			},
		],
	};
	orchestrator.process_batch(&batch).await.unwrap();

	let caller = &scopes_for(&store, &main).await[0];
	let consumed = store.related_nodes(caller.uuid, "CONSUMES", Direction::Outgoing, 10).await.unwrap();
	assert_eq!(consumed.len(), 1);
	assert_eq!(consumed[0].property_str("name"), Some("helper"));
	assert_eq!(
		consumed[0].property_str("file"),
		Some(util.to_string_lossy().as_ref()),
		"the call edge crosses into the other file's scope"
	);
}

#[tokio::test(flavor = "multi_thread")]
async fn idempotent_re_ingestion_generates_nothing() {
	let dir = tempfile::tempdir().unwrap();
	let file = dir.path().join("lib.rs");
	std::fs::write(&file, THREE_SCOPES).unwrap();

	let store: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
	let orchestrator = orchestrator_with(config_for(dir.path()), store.clone(), Arc::new(MockProvider { dimensions: 8 }));
	orchestrator.process_batch(&batch(&file, ChangeKind::Added)).await.unwrap();

	let before = scopes_for(&store, &file).await;
	let second = orchestrator.process_batch(&batch(&file, ChangeKind::Modified)).await.unwrap();
	let after = scopes_for(&store, &file).await;

	assert_eq!(second.embeddings_generated, 0);
	assert_eq!(before.len(), after.len(), "no additional nodes");
	for (b, a) in before.iter().zip(after.iter()) {
		assert_eq!(b.uuid, a.uuid, "uuids survive re-ingestion via the symbol index");
		assert_eq!(b.lifecycle.embedding_content_hash, a.lifecycle.embedding_content_hash);
	}
}

#[tokio::test(flavor = "multi_thread")]
async fn plain_text_re_ingestion_is_idempotent() {
	let dir = tempfile::tempdir().unwrap();
	let file = dir.path().join("notes.txt");
	std::fs::write(&file, "plain notes, no markup at all\n").unwrap();

	let store: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
	let orchestrator = orchestrator_with(config_for(dir.path()), store.clone(), Arc::new(MockProvider { dimensions: 8 }));
	orchestrator.process_batch(&batch(&file, ChangeKind::Added)).await.unwrap();

	let path_str = file.to_string_lossy().to_string();
	let before = store.nodes_by_file("MarkdownSection", "file", &[path_str.clone()]).await.unwrap();
	assert_eq!(before.len(), 1);

	let second = orchestrator.process_batch(&batch(&file, ChangeKind::Modified)).await.unwrap();
	let after = store.nodes_by_file("MarkdownSection", "file", &[path_str]).await.unwrap();

	assert_eq!(second.embeddings_generated, 0);
	assert_eq!(second.nodes_deleted, 0, "the unchanged section is not replaced");
	assert_eq!(after.len(), 1);
	assert_eq!(before[0].uuid, after[0].uuid, "the section keeps its identity across runs");
	assert_eq!(before[0].lifecycle.embedding_content_hash, after[0].lifecycle.embedding_content_hash);
}

#[tokio::test(flavor = "multi_thread")]
async fn editing_one_scope_regenerates_only_that_scope() {
	let dir = tempfile::tempdir().unwrap();
	let file = dir.path().join("lib.rs");
	std::fs::write(&file, THREE_SCOPES).unwrap();

	let store: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
	let orchestrator = orchestrator_with(config_for(dir.path()), store.clone(), Arc::new(MockProvider { dimensions: 8 }));
	orchestrator.process_batch(&batch(&file, ChangeKind::Added)).await.unwrap();

	let before = scopes_for(&store, &file).await;
	let hash_of = |nodes: &[Node], name: &str| {
		nodes
			.iter()
			.find(|n| n.property_str("name") == Some(name))
			.unwrap()
			.lifecycle
			.embedding_content_hash
			.clone()
	};
	let a_before = hash_of(&before, "a");
	let c_before = hash_of(&before, "c");

	std::fs::write(&file, "fn a() { b(); }\nfn b() { 2 + 2; }\nfn c() {}\n").unwrap();
	let counters = orchestrator.process_batch(&batch(&file, ChangeKind::Modified)).await.unwrap();

	let after = scopes_for(&store, &file).await;
	assert_eq!(counters.embeddings_generated, 1, "only b's content re-embeds");
	assert_eq!(hash_of(&after, "a"), a_before);
	assert_eq!(hash_of(&after, "c"), c_before);
	assert_ne!(hash_of(&after, "b"), hash_of(&before, "b"));
	for scope in &after {
		assert_eq!(scope.lifecycle.state, NodeState::Ready);
	}
}

#[tokio::test(flavor = "multi_thread")]
async fn renaming_a_scope_replaces_the_node_and_retargets_edges() {
	let dir = tempfile::tempdir().unwrap();
	let file = dir.path().join("lib.rs");
	std::fs::write(&file, THREE_SCOPES).unwrap();

	let store: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
	let orchestrator = orchestrator_with(config_for(dir.path()), store.clone(), Arc::new(MockProvider { dimensions: 8 }));
	orchestrator.process_batch(&batch(&file, ChangeKind::Added)).await.unwrap();

	let before = scopes_for(&store, &file).await;
	let old_b = before.iter().find(|s| s.property_str("name") == Some("b")).unwrap().uuid;

	std::fs::write(&file, "fn a() { renamed(); }\nfn renamed() { 1 + 1; }\nfn c() {}\n").unwrap();
	orchestrator.process_batch(&batch(&file, ChangeKind::Modified)).await.unwrap();

	let after = scopes_for(&store, &file).await;
	assert_eq!(after.len(), 3);
	assert!(store.get_nodes("Scope", &[old_b]).await.unwrap().is_empty(), "old b is deleted");
	let renamed = after.iter().find(|s| s.property_str("name") == Some("renamed")).unwrap();
	assert_ne!(renamed.uuid, old_b, "a renamed symbol gets a fresh identity");
	assert_eq!(renamed.lifecycle.state, NodeState::Ready);

	let a = after.iter().find(|s| s.property_str("name") == Some("a")).unwrap();
	let consumed = store.related_nodes(a.uuid, "CONSUMES", Direction::Outgoing, 10).await.unwrap();
	assert!(consumed.iter().any(|n| n.uuid == renamed.uuid), "a's call edge targets the new node");
}

#[tokio::test(flavor = "multi_thread")]
async fn provider_swap_discards_and_regenerates_all_embeddings() {
	let dir = tempfile::tempdir().unwrap();
	let file = dir.path().join("lib.rs");
	std::fs::write(&file, THREE_SCOPES).unwrap();

	let store: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
	let first = orchestrator_with(config_for(dir.path()), store.clone(), Arc::new(MockProvider { dimensions: 8 }));
	first.process_batch(&batch(&file, ChangeKind::Added)).await.unwrap();

	let mut swapped = config_for(dir.path());
	swapped.embedding.provider = "voyage".to_string();
	swapped.embedding.model = "voyage-3".to_string();
	let second = orchestrator_with(swapped, store.clone(), Arc::new(MockProvider { dimensions: 8 }));
	let counters = second.process_batch(&batch(&file, ChangeKind::Modified)).await.unwrap();

	assert!(counters.provider_mismatch >= 3, "every scope's stored vectors are stale");
	assert!(counters.embeddings_generated > 0);
	for scope in scopes_for(&store, &file).await {
		assert_eq!(scope.lifecycle.state, NodeState::Ready);
		assert!(!scope.embeddings_dirty);
		assert_eq!(scope.lifecycle.embedding_provider.as_deref(), Some("voyage"));
		assert_eq!(scope.lifecycle.embedding_model.as_deref(), Some("voyage-3"));
	}
}

#[tokio::test(flavor = "multi_thread")]
async fn rate_limit_storm_then_retry_drives_nodes_to_ready() {
	let dir = tempfile::tempdir().unwrap();
	let file = dir.path().join("lib.rs");
	std::fs::write(&file, THREE_SCOPES).unwrap();

	let store: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
	let mut config = config_for(dir.path());
	config.embedding.max_retries = 1;
	let storm = orchestrator_with(config, store.clone(), Arc::new(StormProvider));
	let counters = storm.process_batch(&batch(&file, ChangeKind::Added)).await.unwrap();
	assert!(counters.errors_embed > 0);

	let scopes = scopes_for(&store, &file).await;
	assert_eq!(scopes.len(), 3, "the graph itself is untouched by embed failures");
	for scope in &scopes {
		assert_eq!(scope.lifecycle.state, NodeState::Error);
		assert_eq!(scope.lifecycle.error_type, Some(ErrorKind::Embed));
	}

	// Provider recovers; an operator retry plus one cycle finishes the job.
	// The default retry budget admits the one recorded failure.
	let recovered = orchestrator_with(config_for(dir.path()), store.clone(), Arc::new(MockProvider { dimensions: 8 }));
	let retried = recovered.retry_errors(Some(ErrorKind::Embed)).await.unwrap();
	assert!(retried >= 3);
	recovered.process_batch(&ChangeBatch::default()).await.unwrap();

	for scope in scopes_for(&store, &file).await {
		assert_eq!(scope.lifecycle.state, NodeState::Ready);
		assert!(!scope.embeddings_dirty);
	}
}

#[tokio::test(flavor = "multi_thread")]
async fn wrong_dimension_response_is_an_embed_error() {
	let dir = tempfile::tempdir().unwrap();
	let file = dir.path().join("lib.rs");
	std::fs::write(&file, "fn a() {}\n").unwrap();

	let store: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
	let orchestrator = orchestrator_with(config_for(dir.path()), store.clone(), Arc::new(WrongDimensionProvider));
	let counters = orchestrator.process_batch(&batch(&file, ChangeKind::Added)).await.unwrap();

	assert!(counters.errors_embed > 0);
	for scope in scopes_for(&store, &file).await {
		assert_eq!(scope.lifecycle.state, NodeState::Error);
		assert!(scope.lifecycle.embedding_content_hash.is_none(), "no vector metadata is written on mismatch");
	}
}

#[tokio::test(flavor = "multi_thread")]
async fn crash_recovery_resets_transient_states() {
	let dir = tempfile::tempdir().unwrap();
	let file = dir.path().join("lib.rs");
	std::fs::write(&file, "fn a() {}\n").unwrap();

	let store: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
	let orchestrator = orchestrator_with(config_for(dir.path()), store.clone(), Arc::new(MockProvider { dimensions: 8 }));
	orchestrator.process_batch(&batch(&file, ChangeKind::Added)).await.unwrap();

	// Simulate a crash mid-embed: force a scope into a transient state.
	let mut scopes = scopes_for(&store, &file).await;
	scopes[0].lifecycle.state = NodeState::Embedding;
	scopes[0].embeddings_dirty = true;
	store.upsert_nodes("Scope", scopes).await.unwrap();

	let restarted = orchestrator_with(config_for(dir.path()), store.clone(), Arc::new(MockProvider { dimensions: 8 }));
	let recovered = restarted.recover().await.unwrap();
	assert_eq!(recovered, 1);

	restarted.process_batch(&ChangeBatch::default()).await.unwrap();
	for scope in scopes_for(&store, &file).await {
		assert_eq!(scope.lifecycle.state, NodeState::Ready);
	}
}
