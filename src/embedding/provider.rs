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

//! Embedding provider contract plus the two concrete implementations the
//! core ships: a local `fastembed` model with no network dependency, and a
//! generic OpenAI-compatible HTTP API covering OpenAI/Voyage/Jina-shaped
//! endpoints.

use crate::error::{IngestError, Result};
use async_trait::async_trait;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
	async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
	fn dimensions(&self) -> usize;
	fn name(&self) -> &str;
}

/// Thin wrapper over an HTTP embeddings endpoint shaped like OpenAI's
/// `/embeddings` API (`{"input": [...], "model": "..."}` ->
/// `{"data": [{"embedding": [...]}]}`), which Voyage and Jina's APIs also
/// follow closely enough to share this client.
pub struct HttpEmbeddingProvider {
	client: reqwest::Client,
	endpoint: String,
	api_key: String,
	model: String,
	dimensions: usize,
}

impl HttpEmbeddingProvider {
	pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>, dimensions: usize) -> Self {
		Self {
			client: reqwest::Client::new(),
			endpoint: endpoint.into(),
			api_key: api_key.into(),
			model: model.into(),
			dimensions,
		}
	}
}

#[derive(serde::Serialize)]
struct EmbedRequest<'a> {
	input: &'a [String],
	model: &'a str,
}

#[derive(serde::Deserialize)]
struct EmbedResponse {
	data: Vec<EmbedDatum>,
}

#[derive(serde::Deserialize)]
struct EmbedDatum {
	embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
	async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
		let response = self
			.client
			.post(&self.endpoint)
			.bearer_auth(&self.api_key)
			.json(&EmbedRequest { input: texts, model: &self.model })
			.send()
			.await
			.map_err(|e| IngestError::Embed {
				attempts: 1,
				reason: e.to_string(),
			})?;

		if !response.status().is_success() {
			let status = response.status();
			let body = response.text().await.unwrap_or_default();
			return Err(IngestError::Embed {
				attempts: 1,
				reason: format!("http {status}: {body}"),
			});
		}

		let parsed: EmbedResponse = response.json().await.map_err(|e| IngestError::Embed {
			attempts: 1,
			reason: format!("failed to decode response: {e}"),
		})?;

		for vector in &parsed.data {
			if vector.embedding.len() != self.dimensions {
				return Err(IngestError::DimensionMismatch {
					expected: self.dimensions,
					actual: vector.embedding.len(),
				});
			}
		}

		Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
	}

	fn dimensions(&self) -> usize {
		self.dimensions
	}

	fn name(&self) -> &str {
		&self.model
	}
}

/// Local embedding model via `fastembed`, avoiding a network round-trip for
/// deployments that don't want to send source content to a third party.
#[cfg(feature = "fastembed")]
pub struct FastEmbedProvider {
	model: parking_lot::Mutex<fastembed::TextEmbedding>,
	dimensions: usize,
	model_name: String,
}

#[cfg(feature = "fastembed")]
impl FastEmbedProvider {
	pub fn new(model_name: impl Into<String>, dimensions: usize) -> Result<Self> {
		let model_name = model_name.into();
		let model = fastembed::TextEmbedding::try_new(fastembed::InitOptions::default())
			.map_err(|e| IngestError::Config(format!("failed to load fastembed model: {e}")))?;
		Ok(Self {
			model: parking_lot::Mutex::new(model),
			dimensions,
			model_name,
		})
	}
}

#[cfg(feature = "fastembed")]
#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
	async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
		let texts = texts.to_vec();
		let model = &self.model;
		// fastembed's inference is CPU-bound and synchronous; running it on
		// the blocking pool keeps the async embedding loop from stalling.
		let dims = self.dimensions;
		tokio::task::block_in_place(move || {
			let mut model = model.lock();
			model
				.embed(texts, None)
				.map_err(|e| IngestError::Embed {
					attempts: 1,
					reason: e.to_string(),
				})
				.and_then(|vectors| {
					for v in &vectors {
						if v.len() != dims {
							return Err(IngestError::DimensionMismatch { expected: dims, actual: v.len() });
						}
					}
					Ok(vectors)
				})
		})
	}

	fn dimensions(&self) -> usize {
		self.dimensions
	}

	fn name(&self) -> &str {
		&self.model_name
	}
}
