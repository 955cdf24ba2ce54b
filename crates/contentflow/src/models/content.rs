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

//! Content item: the unit of work flowing through a pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifies one piece of content across its source system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentIdentifier {
    /// Stable id across re-discoveries of the same content.
    pub canonical_id: String,
    /// Unique per discovered instance (e.g. includes a version or etag).
    pub unique_id: String,
    pub source_name: String,
    pub source_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Processing state of a single content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One content item with its accumulated payload and event trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: ContentIdentifier,
    /// Full extracted/transformed payload, keyed by field name.
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Compact summary fields safe to persist even when full output saving
    /// is disabled for the vault.
    #[serde(default)]
    pub summary_data: Map<String, Value>,
    #[serde(default)]
    pub status: ContentStatus,
    #[serde(default)]
    pub events: Vec<Value>,
}

impl ContentItem {
    pub fn new(id: ContentIdentifier) -> Self {
        Self {
            id,
            data: Map::new(),
            summary_data: Map::new(),
            status: ContentStatus::Pending,
            events: Vec::new(),
        }
    }

    /// A copy with the full `data` payload stripped, keeping only summary
    /// fields. Used when the vault's `save_execution_output` is off.
    pub fn summary(&self) -> ContentItem {
        ContentItem {
            id: self.id.clone(),
            data: Map::new(),
            summary_data: self.summary_data.clone(),
            status: self.status,
            events: self.events.clone(),
        }
    }
}
