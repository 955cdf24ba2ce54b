/*
 *  Copyright 2025-2026 ContentFlow Authors
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Vault registry record.

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// A vault binds a pipeline to a concrete scheduling target. A pipeline
/// without any enabled vault is inert; the scheduler crawls per
/// `(pipeline, vault)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vault {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub pipeline_id: String,
    /// Denormalized for display; the pipeline record is authoritative.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// When set, full executor outputs are persisted on the execution
    /// record; otherwise only item summaries are kept.
    #[serde(default)]
    pub save_execution_output: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}
