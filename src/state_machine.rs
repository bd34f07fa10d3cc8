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

//! Node lifecycle state machine. Every lifecycle write in
//! the pipeline — advancing a node, recording an error, flagging it dirty —
//! goes through here so no other component mutates `Lifecycle` directly.

use crate::constants::{DEFAULT_MAX_RETRIES, DEFAULT_PARSE_RETRY_CAP};
use crate::error::{IngestError, Result};
use crate::store::{GraphStore, StateQuery};
use crate::types::{ErrorKind, Node, NodeState};
use std::sync::Arc;

pub struct StateMachine {
	pub(crate) store: Arc<dyn GraphStore>,
	max_retries: u32,
	/// Parse failures get their own, tighter budget: re-running a parser that
	/// keeps crashing is more expensive than re-submitting an embed call.
	parse_retry_cap: u32,
}

impl StateMachine {
	pub fn new(store: Arc<dyn GraphStore>) -> Self {
		Self {
			store,
			max_retries: DEFAULT_MAX_RETRIES,
			parse_retry_cap: DEFAULT_PARSE_RETRY_CAP,
		}
	}

	pub fn with_max_retries(mut self, max_retries: u32) -> Self {
		self.max_retries = max_retries;
		self
	}

	/// Advances `node` to `next`, rejecting transitions outside the
	/// lifecycle order. `-> pending` and `-> skip` are always legal resets
	/// and bypass the transition table.
	pub async fn transition(&self, label: &str, node: &mut Node, next: NodeState) -> Result<()> {
		let allowed = matches!(next, NodeState::Pending | NodeState::Skip) || node.lifecycle.state.can_advance_to(next);
		if !allowed {
			return Err(IngestError::Store(format!(
				"illegal transition for {}: {:?} -> {:?}",
				node.uuid, node.lifecycle.state, next
			)));
		}
		node.lifecycle.state = next;
		node.lifecycle.state_changed_at = Some(chrono::Utc::now());
		match next {
			NodeState::Parsed => node.lifecycle.parsed_at = Some(chrono::Utc::now()),
			NodeState::Linked => node.lifecycle.linked_at = Some(chrono::Utc::now()),
			NodeState::Ready => node.lifecycle.embedded_at = Some(chrono::Utc::now()),
			NodeState::Pending => {
				node.lifecycle.detected_at = Some(chrono::Utc::now());
				node.lifecycle.retry_count = 0;
			}
			_ => {}
		}
		if !matches!(next, NodeState::Error) {
			node.lifecycle.error_type = None;
			node.lifecycle.error_message = None;
		}
		self.store.upsert_nodes(label, vec![node.clone()]).await
	}

	pub async fn transition_batch(&self, label: &str, nodes: &mut [Node], next: NodeState) -> Result<()> {
		for node in nodes.iter_mut() {
			self.transition(label, node, next).await?;
		}
		Ok(())
	}

	/// Records a pipeline failure against `node`, advancing it to `Error` and
	/// bumping `retry_count`. Retries beyond [`Self::max_retries`] stay in
	/// `Error` until [`Self::retry_errors`] is called explicitly.
	pub async fn record_error(&self, label: &str, node: &mut Node, kind: ErrorKind, message: impl Into<String>) -> Result<()> {
		node.lifecycle.state = NodeState::Error;
		node.lifecycle.state_changed_at = Some(chrono::Utc::now());
		node.lifecycle.error_type = Some(kind);
		node.lifecycle.error_message = Some(message.into());
		node.lifecycle.retry_count += 1;
		self.store.upsert_nodes(label, vec![node.clone()]).await
	}

	/// Flags `node` dirty and resets it to `Pending` because its content hash
	/// changed. No-op if the hash is the
	/// same as last time: re-ingesting unchanged content must not reset state.
	pub async fn mark_changed(&self, label: &str, node: &mut Node, new_hash: &str) -> Result<bool> {
		if node.content_hash.as_deref() == Some(new_hash) {
			return Ok(false);
		}
		node.content_hash = Some(new_hash.to_string());
		node.embeddings_dirty = true;
		node.lifecycle.state = NodeState::Pending;
		node.lifecycle.state_changed_at = Some(chrono::Utc::now());
		node.lifecycle.detected_at = Some(chrono::Utc::now());
		node.lifecycle.error_type = None;
		node.lifecycle.error_message = None;
		node.lifecycle.retry_count = 0;
		node.lifecycle.parsed_at = None;
		node.lifecycle.linked_at = None;
		node.lifecycle.embedded_at = None;
		self.store.upsert_nodes(label, vec![node.clone()]).await?;
		Ok(true)
	}

	pub async fn query_by_state(&self, label: &str, state: NodeState, query: StateQuery) -> Result<Vec<Node>> {
		self.store.nodes_by_state(label, state, &query).await
	}

	/// Resets every node of `label` in `Error` state with `retry_count <
	/// max_retries` back to `Pending`, optionally restricted to one error
	/// kind so an operator can retry embed failures without touching parse
	/// failures.
	pub async fn retry_errors(&self, label: &str, error_type: Option<ErrorKind>) -> Result<usize> {
		let errored = self.store.nodes_by_state(label, NodeState::Error, &StateQuery::default()).await?;
		let mut retried = Vec::new();
		for mut node in errored {
			if error_type.is_some() && node.lifecycle.error_type != error_type {
				continue;
			}
			let cap = match node.lifecycle.error_type {
				Some(ErrorKind::Parse) => self.parse_retry_cap,
				_ => self.max_retries,
			};
			if node.lifecycle.retry_count < cap {
				node.lifecycle.state = NodeState::Pending;
				node.lifecycle.state_changed_at = Some(chrono::Utc::now());
				node.lifecycle.error_type = None;
				node.lifecycle.error_message = None;
				node.lifecycle.retry_count = 0;
				retried.push(node);
			}
		}
		let count = retried.len();
		if count > 0 {
			self.store.upsert_nodes(label, retried).await?;
		}
		Ok(count)
	}

	/// Crash recovery: any node left in a transient state
	/// (`Parsing`/`Linking`/`Embedding`) when the process last stopped didn't
	/// finish its step and must restart from `Pending`.
	pub async fn recover_transient_states(&self, label: &str) -> Result<usize> {
		let mut recovered = 0;
		for state in [NodeState::Parsing, NodeState::Linking, NodeState::Embedding] {
			let stuck = self.store.nodes_by_state(label, state, &StateQuery::default()).await?;
			let mut reset = Vec::with_capacity(stuck.len());
			for mut node in stuck {
				node.lifecycle.state = NodeState::Pending;
				node.lifecycle.state_changed_at = Some(chrono::Utc::now());
				reset.push(node);
			}
			recovered += reset.len();
			if !reset.is_empty() {
				self.store.upsert_nodes(label, reset).await?;
			}
		}
		Ok(recovered)
	}

	/// Seeds lifecycle state on freshly-parsed, not-yet-merged nodes: every
	/// new node starts `Pending` with `detectedAt` set.
	pub fn initialize_state(node: &mut Node) {
		node.lifecycle.state = NodeState::Pending;
		node.lifecycle.detected_at = Some(chrono::Utc::now());
		node.lifecycle.state_changed_at = Some(chrono::Utc::now());
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::test_support::store;
	use uuid::Uuid;

	fn node() -> Node {
		Node::new(Uuid::new_v4(), "Scope")
	}

	#[tokio::test]
	async fn legal_transitions_advance_state() {
		let machine = StateMachine::new(store());
		let mut n = node();
		machine.transition("Scope", &mut n, NodeState::Parsing).await.unwrap();
		machine.transition("Scope", &mut n, NodeState::Parsed).await.unwrap();
		assert_eq!(n.lifecycle.state, NodeState::Parsed);
		assert!(n.lifecycle.parsed_at.is_some());
	}

	#[tokio::test]
	async fn illegal_transition_is_rejected() {
		let machine = StateMachine::new(store());
		let mut n = node();
		let err = machine.transition("Scope", &mut n, NodeState::Ready).await.unwrap_err();
		assert!(matches!(err, IngestError::Store(_)));
	}

	#[tokio::test]
	async fn mark_changed_is_noop_for_identical_hash() {
		let machine = StateMachine::new(store());
		let mut n = node();
		n.content_hash = Some("abc".to_string());
		n.lifecycle.state = NodeState::Ready;
		let changed = machine.mark_changed("Scope", &mut n, "abc").await.unwrap();
		assert!(!changed);
		assert_eq!(n.lifecycle.state, NodeState::Ready);
	}

	#[tokio::test]
	async fn mark_changed_resets_to_pending_on_new_hash() {
		let machine = StateMachine::new(store());
		let mut n = node();
		n.content_hash = Some("abc".to_string());
		n.lifecycle.state = NodeState::Ready;
		let changed = machine.mark_changed("Scope", &mut n, "def").await.unwrap();
		assert!(changed);
		assert_eq!(n.lifecycle.state, NodeState::Pending);
		assert!(n.embeddings_dirty);
	}

	#[tokio::test]
	async fn retry_errors_respects_max_retries() {
		let machine = StateMachine::new(store()).with_max_retries(1);
		let mut under = node();
		under.lifecycle.state = NodeState::Error;
		under.lifecycle.retry_count = 0;
		let mut over = node();
		over.lifecycle.state = NodeState::Error;
		over.lifecycle.retry_count = 1;
		machine.store.upsert_nodes("Scope", vec![under.clone(), over.clone()]).await.unwrap();

		let retried = machine.retry_errors("Scope", None).await.unwrap();
		assert_eq!(retried, 1);
	}

	#[tokio::test]
	async fn retry_errors_filters_by_error_kind() {
		let machine = StateMachine::new(store());
		let mut parse_failed = node();
		parse_failed.lifecycle.state = NodeState::Error;
		parse_failed.lifecycle.error_type = Some(ErrorKind::Parse);
		let mut embed_failed = node();
		embed_failed.lifecycle.state = NodeState::Error;
		embed_failed.lifecycle.error_type = Some(ErrorKind::Embed);
		machine.store.upsert_nodes("Scope", vec![parse_failed, embed_failed]).await.unwrap();

		let retried = machine.retry_errors("Scope", Some(ErrorKind::Embed)).await.unwrap();
		assert_eq!(retried, 1);
	}

	#[tokio::test]
	async fn recover_transient_states_resets_to_pending() {
		let machine = StateMachine::new(store());
		let mut stuck = node();
		stuck.lifecycle.state = NodeState::Embedding;
		machine.store.upsert_nodes("Scope", vec![stuck]).await.unwrap();

		let recovered = machine.recover_transient_states("Scope").await.unwrap();
		assert_eq!(recovered, 1);
	}
}
