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

//! Vault execution record: one crawl-and-fan-out episode of a
//! `(pipeline, vault)` pair.
//!
//! Executions are created by the source scheduler when a crawl begins and
//! appended to by the processing workers handling the fanned-out tasks.
//! Status advances monotonically `pending → running → {completed | failed}`;
//! the store layer enforces the ordering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use super::pipeline::Pipeline;
use super::vault::Vault;

/// Lifecycle state of a vault execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }

    /// Monotonic transition rule. `Completed → Failed` is permitted: when
    /// several tasks feed one execution, a later failing task makes the
    /// execution failed overall. The reverse never holds.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        match (self, next) {
            (Pending, Running) | (Pending, Failed) | (Pending, Completed) => true,
            (Running, Completed) | (Running, Failed) => true,
            (Completed, Failed) => true,
            (current, next) => *current == next,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome state of one executor invocation within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorOutputStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Per-executor output recorded on the execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorOutput {
    pub executor_id: String,
    pub status: ExecutorOutputStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
}

/// An event appended to the execution's trail.
///
/// Events are append-ordered per emitting worker; there is no global order
/// across workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionEvent {
    pub fn new(event_type: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_type: event_type.into(),
            executor_id: None,
            timestamp,
            data: None,
            error: None,
        }
    }

    pub fn for_executor(
        event_type: impl Into<String>,
        executor_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            executor_id: Some(executor_id.into()),
            ..Self::new(event_type, timestamp)
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// One scheduler-initiated crawl of a vault, persisted in the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultExecution {
    pub id: String,
    pub pipeline_id: String,
    pub pipeline_name: String,
    pub vault_id: String,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_worker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_worker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub executor_outputs: HashMap<String, ExecutorOutput>,
    #[serde(default)]
    pub events: Vec<ExecutionEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_items: Option<u64>,
}

impl VaultExecution {
    /// A `running` execution reconstructed from a task's own fields, used
    /// when a processing worker must persist results but the scheduler's
    /// record is not (or never became) visible.
    pub fn for_task(task: &super::task::ContentProcessingTask) -> Self {
        Self {
            id: task.execution_id.clone(),
            pipeline_id: task.pipeline_id.clone(),
            pipeline_name: task.pipeline_name.clone(),
            vault_id: task.vault_id.clone().unwrap_or_default(),
            status: ExecutionStatus::Running,
            status_message: None,
            source_worker_id: None,
            processing_worker_id: None,
            error: None,
            executor_outputs: HashMap::new(),
            events: Vec::new(),
            started_at: None,
            completed_at: None,
            number_of_items: None,
        }
    }

    /// A fresh `pending` execution for one crawl of `vault`.
    pub fn new(pipeline: &Pipeline, vault: &Vault, source_worker_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            pipeline_id: pipeline.id.clone(),
            pipeline_name: pipeline.name.clone(),
            vault_id: vault.id.clone(),
            status: ExecutionStatus::Pending,
            status_message: None,
            source_worker_id: Some(source_worker_id.to_string()),
            processing_worker_id: None,
            error: None,
            executor_outputs: HashMap::new(),
            events: Vec::new(),
            started_at: None,
            completed_at: None,
            number_of_items: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_are_monotonic() {
        use ExecutionStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Completed.can_transition_to(Failed));

        assert!(!Failed.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Running.can_transition_to(Pending));
    }

    #[test]
    fn status_wire_format_is_lowercase() {
        assert_eq!(
            serde_json::to_string(&ExecutionStatus::Running).unwrap(),
            "\"running\""
        );
        let parsed: ExecutionStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(parsed, ExecutionStatus::Failed);
    }
}
