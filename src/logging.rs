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

//! Tracing setup: structured stderr output for the whole crate plus one
//! newline-delimited human-readable log file per run for the embedding
//! pipeline, written through a non-blocking rolling appender.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;

/// Tracing target the embedding pipeline logs under; only events with this
/// target reach the per-run log file.
pub const EMBEDDING_LOG_TARGET: &str = "ragforge_ingest::embedding";

/// Initializes the global subscriber. Returns the appender guard, which the
/// caller must hold for the lifetime of the process — dropping it flushes and
/// closes the log file.
///
/// `RUST_LOG` overrides the default `info` level filter as usual. Safe to
/// call once per process; a second call returns `None` without reconfiguring.
pub fn init(embedding_log_dir: Option<&Path>) -> Option<WorkerGuard> {
	let env_filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::default().add_directive(LevelFilter::INFO.into()));

	let stderr_layer = tracing_subscriber::fmt::layer()
		.with_writer(std::io::stderr)
		.with_target(true);

	let (file_layer, guard) = match embedding_log_dir {
		Some(dir) => {
			let appender = RollingFileAppender::new(Rotation::NEVER, dir, "embedding.log");
			let (writer, guard) = tracing_appender::non_blocking(appender);
			let layer = tracing_subscriber::fmt::layer()
				.with_writer(writer)
				.with_ansi(false)
				.with_target(true)
				.with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
					metadata.target().starts_with(EMBEDDING_LOG_TARGET)
				}));
			(Some(layer), Some(guard))
		}
		None => (None, None),
	};

	let registry = tracing_subscriber::registry()
		.with(env_filter)
		.with(stderr_layer)
		.with(file_layer);

	if registry.try_init().is_err() {
		// A subscriber is already installed (another component, or a test
		// harness); keep it rather than failing.
		return None;
	}
	guard
}
