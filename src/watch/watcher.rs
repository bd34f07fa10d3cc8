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

//! Filesystem watcher: evaluates include/exclude globs against the source
//! root, performs the initial full scan, and bridges debounced filesystem
//! events into the [`ChangeQueue`]. Emission pauses while the queue sits at
//! its high-water mark and resumes once the orchestrator drains it below the
//! low-water mark.

use super::queue::ChangeQueue;
use crate::config::SourceConfig;
use crate::error::{IngestError, Result};
use crate::types::{ChangeEvent, ChangeKind};
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, Debouncer};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub struct FileWatcher {
	root: std::path::PathBuf,
	include: GlobSet,
	exclude: GlobSet,
	queue: Arc<ChangeQueue>,
	low_water_mark: usize,
}

impl FileWatcher {
	pub fn new(source: &SourceConfig, queue: Arc<ChangeQueue>, low_water_mark: usize) -> Result<Self> {
		Ok(Self {
			root: std::path::PathBuf::from(&source.root),
			include: build_globset(&source.include)?,
			exclude: build_globset(&source.exclude)?,
			queue,
			low_water_mark,
		})
	}

	/// `true` if `path` (relative to the source root) passes the include and
	/// exclude globs. An empty include set admits everything.
	pub fn matches(&self, path: &Path) -> bool {
		let relative = path.strip_prefix(&self.root).unwrap_or(path);
		if self.exclude.is_match(relative) {
			return false;
		}
		self.include.is_empty() || self.include.is_match(relative)
	}

	/// Walks the source root once, pushing an `Added` event for every
	/// matching file. Returns the number of files seen.
	pub fn initial_scan(&self) -> usize {
		let mut seen = 0;
		let walker = ignore::WalkBuilder::new(&self.root).hidden(false).build();
		for entry in walker.flatten() {
			if !entry.file_type().is_some_and(|t| t.is_file()) {
				continue;
			}
			let path = entry.path();
			if !self.matches(path) {
				continue;
			}
			self.queue.push(ChangeEvent {
				path: path.to_string_lossy().to_string(),
				kind: ChangeKind::Added,
			});
			seen += 1;
		}
		tracing::info!(root = %self.root.display(), files = seen, "initial scan complete");
		seen
	}

	/// Starts the debounced filesystem watcher. The returned guard must be
	/// kept alive for as long as events should flow; dropping it stops the
	/// watcher.
	pub fn spawn(&self, debounce: Duration) -> Result<Debouncer<notify::RecommendedWatcher>> {
		let queue = self.queue.clone();
		let root = self.root.clone();
		let include = self.include.clone();
		let exclude = self.exclude.clone();
		let low_water_mark = self.low_water_mark;

		let mut debouncer = new_debouncer(debounce, move |result: std::result::Result<Vec<DebouncedEvent>, notify::Error>| {
			let events = match result {
				Ok(events) => events,
				Err(e) => {
					tracing::warn!(error = %e, "filesystem watcher error");
					return;
				}
			};
			for event in events {
				let relative = event.path.strip_prefix(&root).unwrap_or(&event.path);
				if exclude.is_match(relative) || !(include.is_empty() || include.is_match(relative)) {
					continue;
				}
				// Pause emission while the queue is backed up; resume only once
				// the orchestrator has drained it below the low-water mark.
				if queue.is_saturated() {
					while queue.len() >= low_water_mark {
						std::thread::sleep(Duration::from_millis(50));
					}
				}
				let kind = if event.path.exists() {
					ChangeKind::Modified
				} else {
					ChangeKind::Deleted
				};
				queue.push(ChangeEvent {
					path: event.path.to_string_lossy().to_string(),
					kind,
				});
			}
		})
		.map_err(|e| IngestError::Config(format!("failed to start watcher: {e}")))?;

		debouncer
			.watcher()
			.watch(&self.root, notify::RecursiveMode::Recursive)
			.map_err(|e| IngestError::Config(format!("failed to watch {}: {e}", self.root.display())))?;

		tracing::info!(root = %self.root.display(), "watching for changes");
		Ok(debouncer)
	}
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
	let mut builder = GlobSetBuilder::new();
	for pattern in patterns {
		let glob = Glob::new(pattern)
			.map_err(|e| IngestError::Config(format!("invalid glob {pattern}: {e}")))?;
		builder.add(glob);
	}
	builder
		.build()
		.map_err(|e| IngestError::Config(format!("failed to build glob set: {e}")))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::SourceConfig;

	fn watcher_for(root: &Path, include: &[&str], exclude: &[&str]) -> FileWatcher {
		let source = SourceConfig {
			root: root.to_string_lossy().to_string(),
			include: include.iter().map(|s| s.to_string()).collect(),
			exclude: exclude.iter().map(|s| s.to_string()).collect(),
			..SourceConfig::default()
		};
		let queue = Arc::new(ChangeQueue::new(1000));
		FileWatcher::new(&source, queue, 100).unwrap()
	}

	#[test]
	fn include_and_exclude_globs_filter_paths() {
		let dir = tempfile::tempdir().unwrap();
		let watcher = watcher_for(dir.path(), &["**/*.rs"], &["target/**"]);
		assert!(watcher.matches(&dir.path().join("src/main.rs")));
		assert!(!watcher.matches(&dir.path().join("target/debug/main.rs")));
		assert!(!watcher.matches(&dir.path().join("README.md")));
	}

	#[test]
	fn empty_include_set_admits_everything_not_excluded() {
		let dir = tempfile::tempdir().unwrap();
		let watcher = watcher_for(dir.path(), &[], &[".git/**"]);
		assert!(watcher.matches(&dir.path().join("anything.txt")));
		assert!(!watcher.matches(&dir.path().join(".git/HEAD")));
	}

	#[test]
	fn initial_scan_pushes_added_events_for_matching_files() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::create_dir_all(dir.path().join("src")).unwrap();
		std::fs::write(dir.path().join("src/lib.rs"), "fn a() {}").unwrap();
		std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

		let watcher = watcher_for(dir.path(), &["**/*.rs"], &[]);
		let seen = watcher.initial_scan();
		assert_eq!(seen, 1);

		let batch = watcher.queue.flush();
		assert_eq!(batch.events.len(), 1);
		assert_eq!(batch.events[0].kind, ChangeKind::Added);
		assert!(batch.events[0].path.ends_with("lib.rs"));
	}

	#[test]
	fn invalid_glob_is_a_config_error() {
		let source = SourceConfig {
			include: vec!["[".to_string()],
			..SourceConfig::default()
		};
		let queue = Arc::new(ChangeQueue::new(1000));
		assert!(FileWatcher::new(&source, queue, 100).is_err());
	}
}
