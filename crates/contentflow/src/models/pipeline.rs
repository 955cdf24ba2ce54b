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

//! Pipeline registry record.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_true() -> bool {
    true
}

fn default_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    5
}

fn default_timeout() -> u64 {
    600
}

fn default_version() -> String {
    "1.0".to_string()
}

/// A content-processing pipeline as stored in the registry.
///
/// The `yaml` field holds the opaque graph definition; it is parsed into a
/// [`PipelineGraph`](crate::graph::PipelineGraph) by whoever needs the
/// structure. The retry/timeout fields govern individual executor
/// invocations at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub yaml: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-executor retry attempts on retriable failures.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Base delay between executor retries, in seconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
    /// Per-executor invocation timeout, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Pipeline {
    pub fn retry_delay_duration(&self) -> Duration {
        Duration::from_secs(self.retry_delay)
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_defaults() {
        let pipeline: Pipeline = serde_json::from_str(
            r#"{"id": "p1", "name": "ingest", "yaml": "executors: []"}"#,
        )
        .unwrap();
        assert!(pipeline.enabled);
        assert_eq!(pipeline.retries, 3);
        assert_eq!(pipeline.retry_delay, 5);
        assert_eq!(pipeline.timeout, 600);
        assert_eq!(pipeline.version, "1.0");
    }
}
