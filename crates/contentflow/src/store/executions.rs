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

//! Vault execution record access.
//!
//! Execution records are appended to concurrently by every processing worker
//! that handles a task of the same crawl, so all updates are
//! read-modify-replace under the registry's ETag with bounded retry.

use tracing::warn;

use super::{Stores, MAX_CONFLICT_RETRIES};
use crate::capabilities::{Clock, Registry, ReplaceOutcome};
use crate::error::StoreError;
use crate::models::{
    ContentProcessingTask, ExecutionEvent, ExecutionStatus, ExecutorOutput, VaultExecution,
};

/// A batch of results appended by a processing worker after running a task.
#[derive(Debug, Default)]
pub struct ExecutionUpdate {
    pub events: Vec<ExecutionEvent>,
    pub outputs: Vec<ExecutorOutput>,
    pub processing_worker_id: Option<String>,
    /// Terminal status to apply, with an optional error message. Ignored
    /// (with a warning) when the monotonic transition rule refuses it.
    pub terminal: Option<(ExecutionStatus, Option<String>)>,
}

#[derive(Clone)]
pub struct ExecutionStore<'a> {
    stores: &'a Stores,
}

impl<'a> ExecutionStore<'a> {
    pub fn new(stores: &'a Stores) -> Self {
        Self { stores }
    }

    pub async fn create(&self, execution: &VaultExecution) -> Result<(), StoreError> {
        let container = &self.stores.containers.executions;
        let body = serde_json::to_value(execution)?;
        self.stores.registry.upsert(container, body).await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<VaultExecution>, StoreError> {
        let container = &self.stores.containers.executions;
        let doc = self.stores.registry.get(container, id).await?;
        match doc {
            Some(doc) => Ok(Some(doc.to_record()?)),
            None => Ok(None),
        }
    }

    /// Read-modify-replace with ETag retry.
    async fn update_with<F>(&self, id: &str, mutate: F) -> Result<VaultExecution, StoreError>
    where
        F: Fn(&mut VaultExecution) -> Result<(), StoreError>,
    {
        let container = &self.stores.containers.executions;
        for _ in 0..MAX_CONFLICT_RETRIES {
            let doc = self
                .stores
                .registry
                .get(container, id)
                .await?
                .ok_or_else(|| StoreError::NotFound {
                    container: container.clone(),
                    id: id.to_string(),
                })?;
            let mut execution: VaultExecution = doc.to_record()?;
            mutate(&mut execution)?;

            let body = serde_json::to_value(&execution)?;
            match self
                .stores
                .registry
                .replace_if(container, body, &doc.etag)
                .await?
            {
                ReplaceOutcome::Replaced(_) => return Ok(execution),
                ReplaceOutcome::EtagMismatch => continue,
                ReplaceOutcome::Missing => {
                    return Err(StoreError::NotFound {
                        container: container.clone(),
                        id: id.to_string(),
                    })
                }
            }
        }
        Err(StoreError::Conflict {
            container: container.clone(),
            id: id.to_string(),
        })
    }

    /// Transitions `pending → running` and stamps `started_at`.
    ///
    /// The scheduler is the sole writer at this point, so a refused
    /// transition is a logic error and surfaces as such.
    pub async fn mark_running(&self, id: &str) -> Result<(), StoreError> {
        let now = self.stores.clock.now();
        self.update_with(id, |execution| {
            if !execution.status.can_transition_to(ExecutionStatus::Running) {
                return Err(StoreError::InvalidTransition {
                    from: execution.status.to_string(),
                    to: ExecutionStatus::Running.to_string(),
                });
            }
            execution.status = ExecutionStatus::Running;
            execution.started_at = Some(now);
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Marks an existing execution failed.
    pub async fn mark_failed(&self, id: &str, error: &str) -> Result<(), StoreError> {
        let now = self.stores.clock.now();
        let error = error.to_string();
        self.update_with(id, move |execution| {
            apply_terminal(execution, ExecutionStatus::Failed, Some(error.clone()));
            execution.completed_at = Some(now);
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Marks an existing execution completed.
    pub async fn mark_completed(&self, id: &str) -> Result<(), StoreError> {
        let now = self.stores.clock.now();
        self.update_with(id, move |execution| {
            apply_terminal(execution, ExecutionStatus::Completed, None);
            execution.completed_at = Some(now);
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub async fn set_item_count(&self, id: &str, count: u64) -> Result<(), StoreError> {
        self.update_with(id, move |execution| {
            execution.number_of_items = Some(count);
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Appends a worker's events and executor outputs, optionally applying a
    /// terminal status.
    pub async fn append_results(&self, id: &str, update: &ExecutionUpdate) -> Result<(), StoreError> {
        let now = self.stores.clock.now();
        self.update_with(id, move |execution| {
            execution.events.extend(update.events.iter().cloned());
            for output in &update.outputs {
                execution
                    .executor_outputs
                    .insert(output.executor_id.clone(), output.clone());
            }
            if let Some(worker_id) = &update.processing_worker_id {
                execution.processing_worker_id = Some(worker_id.clone());
            }
            if let Some((status, error)) = &update.terminal {
                apply_terminal(execution, *status, error.clone());
                execution.completed_at = Some(now);
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Records a terminal failure for the execution referenced by a task.
    ///
    /// When the record does not exist yet (it may never have been created,
    /// e.g. a task forged against a missing pipeline), a failed record is
    /// created from the task's own fields so the failure is observable.
    pub async fn fail_from_task(
        &self,
        task: &ContentProcessingTask,
        error: &str,
    ) -> Result<(), StoreError> {
        if self.get(&task.execution_id).await?.is_some() {
            return self.mark_failed(&task.execution_id, error).await;
        }

        let now = self.stores.clock.now();
        let execution = VaultExecution {
            id: task.execution_id.clone(),
            pipeline_id: task.pipeline_id.clone(),
            pipeline_name: task.pipeline_name.clone(),
            vault_id: task.vault_id.clone().unwrap_or_default(),
            status: ExecutionStatus::Failed,
            status_message: None,
            source_worker_id: None,
            processing_worker_id: None,
            error: Some(error.to_string()),
            executor_outputs: Default::default(),
            events: Vec::new(),
            started_at: None,
            completed_at: Some(now),
            number_of_items: None,
        };
        self.create(&execution).await
    }
}

/// Applies a terminal status if the monotonic rule allows it; otherwise the
/// record keeps its current status and the refusal is logged.
fn apply_terminal(execution: &mut VaultExecution, status: ExecutionStatus, error: Option<String>) {
    if execution.status.can_transition_to(status) {
        execution.status = status;
        if error.is_some() {
            execution.error = error;
        }
    } else {
        warn!(
            execution_id = %execution.id,
            from = %execution.status,
            to = %status,
            "refusing backwards execution status transition"
        );
    }
}
