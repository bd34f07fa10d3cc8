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

//! Configuration-driven ingestion core: parses heterogeneous sources into a
//! property graph with vector embeddings, change tracking, and crash
//! recovery. See `DESIGN.md` for how each module is grounded.

pub mod config;
pub mod constants;
pub mod content;
pub mod embedding;
pub mod error;
pub mod linker;
pub mod logging;
pub mod merge;
pub mod metadata_preserver;
pub mod orchestrator;
pub mod parsers;
pub mod registry;
pub mod state_machine;
pub mod store;
pub mod types;
pub mod watch;

pub use config::IngestionConfig;
pub use error::{IngestError, Result};
pub use orchestrator::Orchestrator;
pub use registry::Registry;
pub use store::GraphStore;
pub use types::{Node, ParseOutput, Relationship};
