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

//! Crawl checkpoint: the per-`(pipeline, vault, input executor)` watermark
//! that makes crawls incremental.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Deterministic checkpoint document id.
pub fn checkpoint_id(pipeline_id: &str, vault_id: &str, executor_id: &str) -> String {
    format!("{pipeline_id}:{vault_id}:{executor_id}")
}

/// Watermark written after a successful crawl and read at the start of the
/// next one. Only advanced once every processing task for the crawl has been
/// enqueued; a failed crawl leaves it untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultCrawlCheckpoint {
    pub id: String,
    pub pipeline_id: String,
    pub vault_id: String,
    pub executor_id: String,
    pub checkpoint_timestamp: DateTime<Utc>,
    pub worker_id: String,
}

impl VaultCrawlCheckpoint {
    pub fn new(
        pipeline_id: &str,
        vault_id: &str,
        executor_id: &str,
        checkpoint_timestamp: DateTime<Utc>,
        worker_id: &str,
    ) -> Self {
        Self {
            id: checkpoint_id(pipeline_id, vault_id, executor_id),
            pipeline_id: pipeline_id.to_string(),
            vault_id: vault_id.to_string(),
            executor_id: executor_id.to_string(),
            checkpoint_timestamp,
            worker_id: worker_id.to_string(),
        }
    }
}
