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

//! Content hash: `hash(requiredFieldsJSONSorted || "\n" || rawContent)`.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Hash the declared required fields (sorted by key, since `properties` is a
/// `BTreeMap`) plus the raw content. Two nodes with the same hash are
/// content-equivalent.
pub fn content_hash(
	properties: &BTreeMap<String, Value>,
	required_fields: &[String],
	raw_content: &str,
) -> String {
	let mut required: BTreeMap<&str, &Value> = BTreeMap::new();
	for field in required_fields {
		if let Some(value) = properties.get(field) {
			required.insert(field.as_str(), value);
		}
	}
	let required_json = serde_json::to_string(&required).unwrap_or_default();

	let mut hasher = Sha256::new();
	hasher.update(required_json.as_bytes());
	hasher.update(b"\n");
	hasher.update(raw_content.as_bytes());
	format!("{:x}", hasher.finalize())
}

/// Hash of a single embedding input string, used to detect whether an
/// embedding needs to be regenerated.
pub fn embedding_input_hash(input: &str) -> String {
	let mut hasher = Sha256::new();
	hasher.update(input.as_bytes());
	format!("{:x}", hasher.finalize())
}
