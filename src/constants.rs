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

//! Ingestion-wide constants and defaults, collected here so retry caps,
//! batch sizes, and chunking thresholds are tuned in one place.

/// Default per-file parser retry cap.
pub const DEFAULT_PARSE_RETRY_CAP: u32 = 3;

/// Default node-level embed/link retry cap.
pub const DEFAULT_MAX_RETRIES: u32 = 4;

/// Default change-queue debounce interval in milliseconds.
pub const DEFAULT_BATCH_INTERVAL_MS: u64 = 1000;

/// Default embedding batch size.
pub const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 16;

/// Default embedding worker concurrency.
pub const DEFAULT_EMBEDDING_CONCURRENCY: usize = 1;

/// Default base delay for exponential backoff on rate-limit errors, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;

/// Token ceiling per submitted embedding batch, guarding against provider
/// "max allowed tokens per batch" rejections.
pub const DEFAULT_MAX_TOKENS_PER_BATCH: usize = 100_000;

/// Default minimum chunk size below which a chunk is merged into its predecessor.
pub const DEFAULT_MIN_CHUNK_SIZE: usize = 64;

/// Paragraphs longer than `1.5 * chunk_size` are recursively split into sentences.
pub const PARAGRAPH_OVERFLOW_FACTOR: f64 = 1.5;

/// Sentences shorter than this are combined with neighbors during sentence chunking.
pub const MIN_SENTENCE_CHARS: usize = 100;

/// Default parser timeout.
pub const DEFAULT_PARSER_TIMEOUT_SECS: u64 = 30;

/// Default graph write timeout.
pub const DEFAULT_GRAPH_WRITE_TIMEOUT_SECS: u64 = 60;

/// Default provider call timeout.
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 30;

/// Substrings that mark a provider error as rate-limit-like.
pub const RATE_LIMIT_MARKERS: &[&str] = &["quota", "429", "rate limit", "exhausted"];

/// Reserved relationship types, beyond user-declared ones.
pub const HAS_CHANGE: &str = "HAS_CHANGE";
pub const DEFINED_IN: &str = "DEFINED_IN";
pub const HAS_PARENT: &str = "HAS_PARENT";
pub const HAS_SECTION: &str = "HAS_SECTION";
pub const CONSUMES: &str = "CONSUMES";
pub const USES_LIBRARY: &str = "USES_LIBRARY";
pub const INHERITS_FROM: &str = "INHERITS_FROM";
pub const CHILD_OF: &str = "CHILD_OF";
