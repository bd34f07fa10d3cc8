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

//! Reference linker: resolves the `UnresolvedReference`s
//! parsers buffer for cross-file or cross-label targets into real
//! relationships. Resolution order: exact `(file, name)` match, then
//! `(name, label)` match across the whole project, then an external-library
//! match by name (auto-vivifying the `ExternalLibrary` stub node).

use crate::registry::Registry;
use crate::store::GraphStore;
use crate::types::{Node, Relationship, UnresolvedReference};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct LinkOutcome {
	pub relationships: Vec<Relationship>,
	/// Nodes created to stand in for a resolved external library.
	pub created_nodes: Vec<Node>,
	/// Source uuids whose mandatory reference failed to resolve; the caller
	/// records these as `link` errors via the state machine.
	pub mandatory_failures: Vec<Uuid>,
}

pub struct ReferenceLinker {
	store: Arc<dyn GraphStore>,
	registry: Arc<Registry>,
}

impl ReferenceLinker {
	pub fn new(store: Arc<dyn GraphStore>, registry: Arc<Registry>) -> Self {
		Self { store, registry }
	}

	pub async fn link(&self, unresolved: Vec<UnresolvedReference>, file_of: impl Fn(Uuid) -> Option<String>) -> crate::error::Result<LinkOutcome> {
		let mut outcome = LinkOutcome::default();

		for reference in unresolved {
			if let Some(target) = self.resolve(&reference, file_of(reference.source_uuid).as_deref(), &mut outcome).await? {
				outcome
					.relationships
					.push(Relationship::new(reference.source_uuid, reference.rel_type.clone(), target));
				continue;
			}
			if reference.mandatory {
				outcome.mandatory_failures.push(reference.source_uuid);
			}
		}

		Ok(outcome)
	}

	async fn resolve(&self, reference: &UnresolvedReference, source_file: Option<&str>, outcome: &mut LinkOutcome) -> crate::error::Result<Option<Uuid>> {
		// 1. exact (file, name) match within the source's own file.
		if let Some(file) = source_file {
			for label in candidate_labels(reference, &self.registry) {
				let nodes = self.store.nodes_by_file(&label, "file", &[file.to_string()]).await?;
				if let Some(found) = nodes.iter().find(|n| n.property_str("name") == Some(reference.target_symbol.as_str())) {
					return Ok(Some(found.uuid));
				}
			}
		}

		// 2. (name, label) match anywhere in the project.
		for label in candidate_labels(reference, &self.registry) {
			if let Some(found) = self.find_by_name(&label, &reference.target_symbol).await? {
				return Ok(Some(found));
			}
		}

		// 3. external-library match by name; create the stub if it doesn't exist.
		if reference.target_label.as_deref() == Some("ExternalLibrary") {
			return Ok(Some(self.resolve_external_library(&reference.target_symbol, outcome).await?));
		}

		Ok(None)
	}

	async fn find_by_name(&self, label: &str, name: &str) -> crate::error::Result<Option<Uuid>> {
		// The store has no generic "scan by property" primitive beyond
		// file-scoping, so a project-wide name match walks every known file
		// for the label. Name resolution is a per-batch pass, not a hot path.
		let Some(def) = self.registry.get(label) else { return Ok(None) };
		let files = self.store.known_files(label, &def.file_field).await?;
		let nodes = self.store.nodes_by_file(label, &def.file_field, &files).await?;
		Ok(nodes.into_iter().find(|n| n.property_str("name") == Some(name)).map(|n| n.uuid))
	}

	async fn resolve_external_library(&self, name: &str, outcome: &mut LinkOutcome) -> crate::error::Result<Uuid> {
		let def = self
			.registry
			.get("ExternalLibrary")
			.expect("ExternalLibrary is a builtin registry label");
		let mut props = std::collections::BTreeMap::new();
		props.insert("name".to_string(), serde_json::json!(name));
		let uuid = def.derive_uuid(&props);

		let existing = self.store.get_nodes("ExternalLibrary", &[uuid]).await?;
		if existing.is_empty() {
			let mut node = Node::new(uuid, "ExternalLibrary");
			node.content_hash = Some(crate::content::hash::content_hash(&props, &def.required_fields, name));
			node.properties = props;
			outcome.created_nodes.push(node);
		}
		Ok(uuid)
	}
}

fn candidate_labels(reference: &UnresolvedReference, registry: &Registry) -> Vec<String> {
	if let Some(label) = &reference.target_label {
		if label != "ExternalLibrary" {
			return vec![label.clone()];
		}
		return vec![];
	}
	registry.labels().filter(|l| *l != "ExternalLibrary").map(str::to_string).collect()
}
