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

//! Embedding pipeline: selects dirty nodes, builds per-field
//! embedding inputs from the registry's `EmbeddingExtractors`, batches calls
//! to an [`EmbeddingProvider`], and writes vectors plus `embedding_*_hash`
//! back through the state machine so unchanged fields are skipped on the
//! next pass.

pub mod provider;

pub use provider::EmbeddingProvider;

use crate::constants::{
	DEFAULT_EMBEDDING_BATCH_SIZE, DEFAULT_EMBEDDING_CONCURRENCY, DEFAULT_MAX_RETRIES,
	DEFAULT_MAX_TOKENS_PER_BATCH, DEFAULT_PROVIDER_TIMEOUT_SECS, DEFAULT_RETRY_DELAY_MS,
};
use crate::content::hash::embedding_input_hash;
use crate::registry::Registry;
use crate::state_machine::StateMachine;
use crate::store::{Direction, GraphStore};
use crate::types::{ErrorKind, Node};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;

/// Bounded, optional context enrichment appended to a node's `content`
/// embedding input.
#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
	pub rel_type: String,
	pub direction: Direction,
	pub max_related: usize,
}

#[derive(Debug, Clone, Default)]
pub struct EmbedOutcome {
	pub embeddings_generated: usize,
	pub errors: usize,
}

pub struct EmbeddingPipeline {
	store: Arc<dyn GraphStore>,
	registry: Arc<Registry>,
	state_machine: Arc<StateMachine>,
	provider: Arc<dyn EmbeddingProvider>,
	batch_size: usize,
	concurrency: usize,
	max_retries: u32,
	retry_delay: Duration,
	enrichment: Option<EnrichmentConfig>,
	max_tokens_per_batch: usize,
	/// Provider/model identity written onto every node this pipeline embeds.
	provider_id: String,
	model_id: String,
}

static TOKENIZER: std::sync::LazyLock<tiktoken_rs::CoreBPE> =
	std::sync::LazyLock::new(|| tiktoken_rs::cl100k_base().expect("cl100k_base vocabulary is embedded"));

/// Approximate token count of one embedding input, using the `cl100k_base`
/// vocabulary as a provider-neutral estimate.
pub fn count_tokens(text: &str) -> usize {
	TOKENIZER.encode_with_special_tokens(text).len()
}

impl EmbeddingPipeline {
	pub fn new(store: Arc<dyn GraphStore>, registry: Arc<Registry>, state_machine: Arc<StateMachine>, provider: Arc<dyn EmbeddingProvider>) -> Self {
		let model_id = provider.name().to_string();
		Self {
			store,
			registry,
			state_machine,
			provider,
			batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
			concurrency: DEFAULT_EMBEDDING_CONCURRENCY,
			max_retries: DEFAULT_MAX_RETRIES,
			retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
			enrichment: None,
			max_tokens_per_batch: DEFAULT_MAX_TOKENS_PER_BATCH,
			provider_id: model_id.clone(),
			model_id,
		}
	}

	pub fn with_batch_size(mut self, batch_size: usize) -> Self {
		self.batch_size = batch_size.max(1);
		self
	}

	pub fn with_concurrency(mut self, concurrency: usize) -> Self {
		self.concurrency = concurrency.max(1);
		self
	}

	pub fn with_max_retries(mut self, max_retries: u32) -> Self {
		self.max_retries = max_retries;
		self
	}

	pub fn with_max_tokens_per_batch(mut self, max_tokens: usize) -> Self {
		self.max_tokens_per_batch = max_tokens.max(1);
		self
	}

	pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
		self.retry_delay = retry_delay;
		self
	}

	/// Sets the provider/model pair stamped onto embedded nodes, normally the
	/// configured `embedding.provider`/`embedding.model` identity.
	pub fn with_provider_identity(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
		self.provider_id = provider.into();
		self.model_id = model.into();
		self
	}

	pub fn with_enrichment(mut self, enrichment: EnrichmentConfig) -> Self {
		self.enrichment = Some(enrichment);
		self
	}

	/// Embeds every dirty node of `label`.
	pub async fn embed_dirty(&self, label: &str) -> crate::error::Result<EmbedOutcome> {
		let Some(def) = self.registry.get(label) else {
			return Ok(EmbedOutcome::default());
		};
		let mut dirty = self.store.dirty_nodes(label, usize::MAX).await?;
		let mut outcome = EmbedOutcome::default();
		if dirty.is_empty() {
			return Ok(outcome);
		}
		// Move into `Embedding` before the provider call so a crash mid-batch
		// leaves the node in a transient state crash recovery resets,
		// rather than silently stuck `dirty` forever. A node still at
		// `Parsed` (crashed or cancelled before linking finished) is walked
		// through the link phase first.
		for node in dirty.iter_mut() {
			if node.lifecycle.state == crate::types::NodeState::Parsed {
				self.state_machine.transition(label, node, crate::types::NodeState::Linking).await?;
				self.state_machine.transition(label, node, crate::types::NodeState::Linked).await?;
			}
			self.state_machine.transition(label, node, crate::types::NodeState::Embedding).await?;
		}

		let mut inputs = Vec::with_capacity(dirty.len());
		for node in &dirty {
			let name = (def.embedding_extractors.name)(&node.properties);
			let mut content = (def.embedding_extractors.content)(&node.properties);
			if let (Some(enrichment), Some(existing)) = (&self.enrichment, &content) {
				let related = self
					.store
					.related_nodes(node.uuid, &enrichment.rel_type, enrichment.direction, enrichment.max_related)
					.await?;
				if !related.is_empty() {
					let extra: Vec<String> = related.iter().filter_map(|n| n.property_str("name").map(str::to_string)).collect();
					if !extra.is_empty() {
						content = Some(format!("{existing}\n\nrelated: {}", extra.join(", ")));
					}
				}
			}
			let description = (def.embedding_extractors.description)(&node.properties);
			inputs.push((node.clone(), name, content, description));
		}

		let fields: Vec<FieldJob> = inputs
			.into_iter()
			.flat_map(|(node, name, content, description)| {
				[
					field_job(&node, "name", name),
					field_job(&node, "content", content),
					field_job(&node, "description", description),
				]
				.into_iter()
				.flatten()
			})
			.collect();

		let batches = split_into_batches(fields, self.batch_size, self.max_tokens_per_batch);
		let results: Vec<(Vec<uuid::Uuid>, crate::error::Result<Vec<(FieldJob, Vec<f32>)>>)> =
			stream::iter(batches)
				.map(|batch| async move {
					let uuids: Vec<uuid::Uuid> = batch.iter().map(|j| j.node_uuid).collect();
					(uuids, self.embed_batch_with_retry(batch).await)
				})
				.buffer_unordered(self.concurrency)
				.collect()
				.await;

		let mut by_node: std::collections::HashMap<uuid::Uuid, Node> = dirty.into_iter().map(|n| (n.uuid, n)).collect();
		let mut failed: std::collections::HashSet<uuid::Uuid> = std::collections::HashSet::new();
		for (uuids, result) in results {
			match result {
				Ok(embedded) => {
					for (job, _vector) in embedded {
						if let Some(node) = by_node.get_mut(&job.node_uuid) {
							apply_field_hash(node, &job.field, &job.hash);
							outcome.embeddings_generated += 1;
						}
					}
				}
				Err(e) => {
					tracing::warn!(label, error = %e, "embedding batch failed");
					outcome.errors += 1;
					failed.extend(uuids);
				}
			}
		}

		for (uuid, node) in by_node.iter_mut() {
			if failed.contains(uuid) {
				// Still dirty: a later retry pass re-selects this node.
				self.state_machine
					.record_error(label, node, ErrorKind::Embed, "embedding provider call failed")
					.await?;
			} else {
				node.embeddings_dirty = false;
				node.lifecycle.embedding_provider = Some(self.provider_id.clone());
				node.lifecycle.embedding_model = Some(self.model_id.clone());
				self.state_machine.transition(label, node, crate::types::NodeState::Ready).await?;
			}
		}

		Ok(outcome)
	}

	async fn embed_batch_with_retry(&self, batch: Vec<FieldJob>) -> crate::error::Result<Vec<(FieldJob, Vec<f32>)>> {
		let texts: Vec<String> = batch.iter().map(|j| j.text.clone()).collect();
		let timeout = Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS);
		let mut attempt = 0;
		loop {
			let call = tokio::time::timeout(timeout, self.provider.embed(&texts))
				.await
				.unwrap_or_else(|_| {
					Err(crate::error::IngestError::Embed {
						attempts: attempt + 1,
						reason: format!("provider call timed out after {}s", timeout.as_secs()),
					})
				});
			match call {
				Ok(vectors) => {
					// Never write a vector whose length disagrees with the
					// declared index dimension, whatever the provider claims.
					let expected = self.provider.dimensions();
					if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
						return Err(crate::error::IngestError::DimensionMismatch {
							expected,
							actual: bad.len(),
						});
					}
					return Ok(batch.into_iter().zip(vectors).collect());
				}
				Err(e) if e.is_rate_limited() && attempt < self.max_retries => {
					attempt += 1;
					let delay = self.retry_delay * 2u32.pow(attempt - 1);
					tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off after rate-limited embed call");
					tokio::time::sleep(delay).await;
				}
				Err(e) => return Err(e),
			}
		}
	}
}

#[derive(Debug, Clone)]
struct FieldJob {
	node_uuid: uuid::Uuid,
	field: String,
	text: String,
	hash: String,
}

/// Splits jobs into provider-sized batches, bounded both by item count and
/// by total token weight so oversized content can't blow a provider's
/// per-request token ceiling.
fn split_into_batches(fields: Vec<FieldJob>, batch_size: usize, max_tokens: usize) -> Vec<Vec<FieldJob>> {
	let mut batches = Vec::new();
	let mut current: Vec<FieldJob> = Vec::new();
	let mut current_tokens = 0usize;
	for job in fields {
		let tokens = count_tokens(&job.text);
		if !current.is_empty() && (current.len() >= batch_size || current_tokens + tokens > max_tokens) {
			batches.push(std::mem::take(&mut current));
			current_tokens = 0;
		}
		current_tokens += tokens;
		current.push(job);
	}
	if !current.is_empty() {
		batches.push(current);
	}
	batches
}

fn field_job(node: &Node, field: &str, value: Option<String>) -> Option<FieldJob> {
	let text = value?;
	if text.trim().is_empty() {
		return None;
	}
	let hash = embedding_input_hash(&text);
	let unchanged = match field {
		"name" => node.lifecycle.embedding_name_hash.as_deref() == Some(hash.as_str()),
		"content" => node.lifecycle.embedding_content_hash.as_deref() == Some(hash.as_str()),
		"description" => node.lifecycle.embedding_description_hash.as_deref() == Some(hash.as_str()),
		_ => false,
	};
	if unchanged {
		return None;
	}
	Some(FieldJob {
		node_uuid: node.uuid,
		field: field.to_string(),
		text,
		hash,
	})
}

fn apply_field_hash(node: &mut Node, field: &str, hash: &str) {
	match field {
		"name" => node.lifecycle.embedding_name_hash = Some(hash.to_string()),
		"content" => node.lifecycle.embedding_content_hash = Some(hash.to_string()),
		"description" => node.lifecycle.embedding_description_hash = Some(hash.to_string()),
		_ => {}
	}
}
