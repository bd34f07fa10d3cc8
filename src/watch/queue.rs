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

//! Debounced change queue: per-path dedup with last-event-wins, except a
//! `Deleted` observed after an `Added` for the same path within the same
//! debounce window cancels the pair entirely. Pure, synchronous, and easy to
//! unit test; the async watcher loop just calls [`ChangeQueue::push`] and
//! periodically [`ChangeQueue::flush`].

use crate::types::{ChangeBatch, ChangeEvent, ChangeKind};
use parking_lot::Mutex;
use std::collections::HashMap;

struct Entry {
	kind: ChangeKind,
	/// `true` if this path was newly `Added` earlier in the same window —
	/// needed to detect the "deleted after added" cancellation case.
	seen_added: bool,
}

pub struct ChangeQueue {
	entries: Mutex<HashMap<String, Entry>>,
	/// Soft cap before the queue is considered backed up; exposed via
	/// [`Self::is_saturated`] for the watcher loop to pause event consumption.
	high_water_mark: usize,
}

impl ChangeQueue {
	pub fn new(high_water_mark: usize) -> Self {
		Self {
			entries: Mutex::new(HashMap::new()),
			high_water_mark,
		}
	}

	pub fn push(&self, event: ChangeEvent) {
		let mut entries = self.entries.lock();
		match entries.get_mut(&event.path) {
			Some(existing) if existing.seen_added && event.kind == ChangeKind::Deleted => {
				entries.remove(&event.path);
			}
			Some(existing) => {
				existing.kind = event.kind;
				if event.kind == ChangeKind::Added {
					existing.seen_added = true;
				}
			}
			None => {
				entries.insert(
					event.path,
					Entry {
						kind: event.kind,
						seen_added: event.kind == ChangeKind::Added,
					},
				);
			}
		}
	}

	/// Drains every pending event into a batch, clearing the queue.
	pub fn flush(&self) -> ChangeBatch {
		let mut entries = self.entries.lock();
		let events = entries
			.drain()
			.map(|(path, entry)| ChangeEvent { path, kind: entry.kind })
			.collect();
		ChangeBatch { events }
	}

	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn is_saturated(&self) -> bool {
		self.len() >= self.high_water_mark
	}
}
