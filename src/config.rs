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

//! Ingestion configuration: the only configurable surface of the core.
//! Defaults come from `impl Default`, a TOML file is merged on top, and a
//! small set of `RAGFORGE_*` environment variables takes final precedence.
//! The loaded config is immutable; components receive it by `Arc` at
//! construction and never mutate it afterward.

use crate::constants::{
	DEFAULT_BATCH_INTERVAL_MS, DEFAULT_EMBEDDING_BATCH_SIZE, DEFAULT_EMBEDDING_CONCURRENCY,
	DEFAULT_MAX_RETRIES, DEFAULT_MAX_TOKENS_PER_BATCH, DEFAULT_RETRY_DELAY_MS,
};
use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
	Files,
	Database,
	Api,
	Web,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
	#[serde(rename = "type")]
	pub source_type: SourceType,

	/// Root directory (or base URL for web sources) the include/exclude
	/// globs are evaluated against.
	pub root: String,

	pub include: Vec<String>,
	pub exclude: Vec<String>,

	/// Record a per-change snapshot chain for node types that opt in.
	pub track_changes: bool,
}

impl Default for SourceConfig {
	fn default() -> Self {
		Self {
			source_type: SourceType::Files,
			root: ".".to_string(),
			include: vec!["**/*".to_string()],
			exclude: vec![
				".git/**".to_string(),
				"target/**".to_string(),
				"node_modules/**".to_string(),
			],
			track_changes: false,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
	/// Provider identity stored alongside every vector; a stored vector whose
	/// provider or model differs from this is treated as stale.
	pub provider: String,
	pub model: String,
	pub dimensions: usize,

	/// Endpoint for HTTP providers; ignored by local providers.
	pub endpoint: Option<String>,
	pub api_key: Option<String>,

	pub batch_size: usize,
	/// Token ceiling per submitted batch; prevents provider-side "max allowed
	/// tokens per batch" rejections on large inputs.
	pub max_tokens_per_batch: usize,
	pub concurrency: usize,
	pub max_retries: u32,
	pub retry_delay_ms: u64,

	/// When false, embeddings captured under a different provider/model are
	/// carried forward on restore instead of being dropped.
	pub skip_on_provider_mismatch: bool,
}

impl Default for EmbeddingConfig {
	fn default() -> Self {
		Self {
			provider: "fastembed".to_string(),
			model: "all-MiniLM-L6-v2".to_string(),
			dimensions: 384,
			endpoint: None,
			api_key: None,
			batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
			max_tokens_per_batch: DEFAULT_MAX_TOKENS_PER_BATCH,
			concurrency: DEFAULT_EMBEDDING_CONCURRENCY,
			max_retries: DEFAULT_MAX_RETRIES,
			retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
			skip_on_provider_mismatch: true,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
	pub enabled: bool,
	pub batch_interval_ms: u64,

	/// Run the embedding pipeline after every flushed batch rather than
	/// waiting for an explicit embed pass.
	pub auto_embed: bool,

	/// Queue size at which the watcher pauses event emission.
	pub high_water_mark: usize,
	/// Queue size the orchestrator must drain below before emission resumes.
	pub low_water_mark: usize,
}

impl Default for WatchConfig {
	fn default() -> Self {
		Self {
			enabled: false,
			batch_interval_ms: DEFAULT_BATCH_INTERVAL_MS,
			auto_embed: true,
			high_water_mark: 10_000,
			low_water_mark: 1_000,
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestionConfig {
	#[serde(default)]
	pub source: SourceConfig,

	#[serde(default)]
	pub embedding: EmbeddingConfig,

	#[serde(default)]
	pub watch: WatchConfig,
}

impl IngestionConfig {
	/// Loads from a TOML file if it exists, falling back to defaults, then
	/// applies environment-variable overrides.
	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let mut config = if path.exists() {
			let content = std::fs::read_to_string(path)
				.map_err(|e| IngestError::Config(format!("failed to read {}: {e}", path.display())))?;
			toml::from_str(&content)
				.map_err(|e| IngestError::Config(format!("failed to parse {}: {e}", path.display())))?
		} else {
			Self::default()
		};
		config.apply_env_overrides();
		Ok(config)
	}

	fn apply_env_overrides(&mut self) {
		if let Ok(provider) = std::env::var("RAGFORGE_EMBEDDING_PROVIDER") {
			self.embedding.provider = provider;
		}
		if let Ok(model) = std::env::var("RAGFORGE_EMBEDDING_MODEL") {
			self.embedding.model = model;
		}
		if let Ok(api_key) = std::env::var("RAGFORGE_EMBEDDING_API_KEY") {
			self.embedding.api_key = Some(api_key);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_config_is_sane() {
		let config = IngestionConfig::default();
		assert_eq!(config.source.source_type, SourceType::Files);
		assert_eq!(config.embedding.batch_size, 16);
		assert_eq!(config.embedding.concurrency, 1);
		assert_eq!(config.watch.batch_interval_ms, 1000);
		assert!(config.embedding.skip_on_provider_mismatch);
	}

	#[test]
	fn toml_file_overrides_defaults() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("ragforge.toml");
		std::fs::write(
			&path,
			r#"
[source]
type = "web"
root = "https://example.com"
include = ["**/*.html"]
exclude = []
track_changes = true

[embedding]
provider = "voyage"
model = "voyage-3"
dimensions = 1024
"#,
		)
		.unwrap();

		let config = IngestionConfig::load(&path).unwrap();
		assert_eq!(config.source.source_type, SourceType::Web);
		assert!(config.source.track_changes);
		assert_eq!(config.embedding.provider, "voyage");
		assert_eq!(config.embedding.dimensions, 1024);
		// Sections absent from the file keep their defaults.
		assert_eq!(config.watch.batch_interval_ms, 1000);
	}

	#[test]
	fn missing_file_falls_back_to_defaults() {
		let config = IngestionConfig::load("/nonexistent/ragforge.toml").unwrap();
		assert_eq!(config.embedding.provider, "fastembed");
	}

	#[test]
	fn malformed_toml_is_a_config_error() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("ragforge.toml");
		std::fs::write(&path, "[source\ntype=").unwrap();
		let err = IngestionConfig::load(&path).unwrap_err();
		assert!(matches!(err, IngestError::Config(_)));
	}
}
