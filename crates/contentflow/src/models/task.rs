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

//! Queue message envelope and task payloads.
//!
//! A queue message is a versioned envelope `{"task_type": ..., "payload":
//! {...}}` encoded as UTF-8 JSON. Receivers parse `task_type` first; unknown
//! or retired types are deleted as poison rather than retried.
//!
//! The `input_source_loading` type belongs to the retired queue-driven
//! source model. Source workers poll the registry directly now; the tag is
//! kept only so stray legacy senders get drained instead of cycling through
//! visibility timeouts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::content::ContentItem;
use super::pipeline::Pipeline;

/// Discriminator carried in the message envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    ContentProcessing,
    /// Retired; recognized for poison protection only.
    InputSourceLoading,
}

/// Relative processing priority for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// A batch of content items to push through the remainder of a pipeline.
///
/// Produced by the source scheduler after running the input executor;
/// consumed by processing workers, which must skip the node named in
/// `executed_input_executor` and resume at its successors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentProcessingTask {
    pub task_id: String,
    #[serde(default = "content_processing_type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub priority: TaskPriority,
    pub pipeline_id: String,
    pub pipeline_name: String,
    pub execution_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault_id: Option<String>,
    pub content: Vec<ContentItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_input_executor: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn content_processing_type() -> TaskType {
    TaskType::ContentProcessing
}

fn default_max_retries() -> u32 {
    3
}

impl ContentProcessingTask {
    pub fn new(
        pipeline: &Pipeline,
        execution_id: &str,
        vault_id: Option<&str>,
        content: Vec<ContentItem>,
        executed_input_executor: Option<&str>,
        max_retries: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            task_type: TaskType::ContentProcessing,
            priority: TaskPriority::Normal,
            pipeline_id: pipeline.id.clone(),
            pipeline_name: pipeline.name.clone(),
            execution_id: execution_id.to_string(),
            vault_id: vault_id.map(str::to_owned),
            content,
            executed_input_executor: executed_input_executor.map(str::to_owned),
            created_at,
            retry_count: 0,
            max_retries,
        }
    }

    /// A copy scheduled for the next delivery attempt.
    pub fn next_attempt(&self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            ..self.clone()
        }
    }

    pub fn retries_remaining(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// The wire envelope wrapping every queue message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task_type: TaskType,
    pub payload: Value,
}

impl TaskMessage {
    pub fn content_processing(task: &ContentProcessingTask) -> Result<Self, serde_json::Error> {
        Ok(Self {
            task_type: TaskType::ContentProcessing,
            payload: serde_json::to_value(task)?,
        })
    }

    /// Parses an envelope from a raw message body.
    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes the payload as a content-processing task.
    pub fn processing_task(&self) -> Result<ContentProcessingTask, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}
