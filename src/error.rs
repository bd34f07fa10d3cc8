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

//! Typed error surface for the ingestion core.
//!
//! Every fallible operation in the pipeline resolves to one of the variants
//! below so the state machine can record `errorType` without string
//! sniffing. Errors that don't map to a pipeline phase (I/O, serialization,
//! store-driver plumbing) fall through to [`IngestError::Other`].

use crate::types::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
	#[error("parser failed for {path}: {reason}")]
	Parse { path: String, reason: String },

	#[error("content hash could not be computed for {path}: {reason}")]
	ContentHash { path: String, reason: String },

	#[error("reference link from {source_uuid} to {target_symbol} could not be resolved: {reason}")]
	Link {
		source_uuid: String,
		target_symbol: String,
		reason: String,
	},

	#[error("embedding call failed after {attempts} attempt(s): {reason}")]
	Embed { attempts: u32, reason: String },

	#[error("embedding dimension mismatch: expected {expected}, got {actual}")]
	DimensionMismatch { expected: usize, actual: usize },

	#[error("graph store operation failed: {0}")]
	Store(String),

	#[error("registry conflict: label {label} is already registered with a different definition")]
	RegistryConflict { label: String },

	#[error("configuration error: {0}")]
	Config(String),

	#[error(transparent)]
	Other(#[from] anyhow::Error),
}

impl IngestError {
	/// Map this error onto the persisted `errorType` taxonomy, if applicable.
	pub fn error_kind(&self) -> Option<ErrorKind> {
		match self {
			IngestError::Parse { .. } | IngestError::ContentHash { .. } => Some(ErrorKind::Parse),
			IngestError::Link { .. } => Some(ErrorKind::Link),
			IngestError::Embed { .. } | IngestError::DimensionMismatch { .. } => {
				Some(ErrorKind::Embed)
			}
			IngestError::Store(_) | IngestError::RegistryConflict { .. } | IngestError::Config(_) => {
				None
			}
			IngestError::Other(_) => None,
		}
	}

	pub fn is_rate_limited(&self) -> bool {
		let message = self.to_string().to_lowercase();
		crate::constants::RATE_LIMIT_MARKERS
			.iter()
			.any(|marker| message.contains(marker))
	}
}

pub type Result<T> = std::result::Result<T, IngestError>;
