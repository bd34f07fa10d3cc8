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

//! Orphan watcher: diffs the graph's view of "known files" against the
//! filesystem and emits `Deleted` events for owners that no longer exist.
//! Deletion then cascades through the normal batch path, so orphaned content
//! nodes are removed by the same code that handles an observed delete event.

use super::queue::ChangeQueue;
use crate::store::GraphStore;
use crate::types::{ChangeEvent, ChangeKind};
use std::path::Path;
use std::sync::Arc;

pub struct OrphanWatcher {
	store: Arc<dyn GraphStore>,
	queue: Arc<ChangeQueue>,
}

impl OrphanWatcher {
	pub fn new(store: Arc<dyn GraphStore>, queue: Arc<ChangeQueue>) -> Self {
		Self { store, queue }
	}

	/// One sweep: every path owning a `File` node that no longer exists on
	/// disk is pushed as a `Deleted` event. Returns the number of orphans found.
	pub async fn tick(&self) -> crate::error::Result<usize> {
		let known = self.store.known_files("File", "path").await?;
		let mut orphans = 0;
		for path in known {
			if Path::new(&path).exists() {
				continue;
			}
			self.queue.push(ChangeEvent {
				path: path.clone(),
				kind: ChangeKind::Deleted,
			});
			orphans += 1;
			tracing::debug!(path = %path, "orphaned file detected");
		}
		Ok(orphans)
	}
}
