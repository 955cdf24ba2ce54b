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

//! Content processing worker.
//!
//! Drains the task queue and executes the remaining pipeline stages on each
//! task's content items. Per-task handling follows the failure taxonomy:
//! poison messages are deleted, missing/invalid pipelines fail the execution
//! terminally, retriable failures re-enqueue the task with `retry_count + 1`
//! and a backoff visibility, and everything else marks the execution failed.
//!
//! A message is deleted only after a terminal status has been persisted for
//! it or it has been explicitly rescheduled. While a task runs, a heartbeat
//! extends the queue lease so peers do not see the message reappear.

use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::capabilities::{Clock, Queue, QueueLease};
use crate::context::AppContext;
use crate::error::{ExecutorFailure, FailureKind, StoreError, WorkerError};
use crate::executor::runtime::RunPolicy;
use crate::executor::{ExecutionContext, PipelineRunner, StageOutcome};
use crate::graph::PipelineGraph;
use crate::models::{
    ContentProcessingTask, ExecutionStatus, TaskMessage, TaskType, VaultExecution,
};
use crate::store::executions::ExecutionUpdate;
use crate::store::Stores;

/// Re-enqueue visibility backoff never exceeds this.
const MAX_RETRY_VISIBILITY: Duration = Duration::from_secs(300);

/// Consumes content-processing tasks from the shared queue.
pub struct ProcessingWorker {
    ctx: AppContext,
    stores: Stores,
    worker_id: String,
    stop: watch::Receiver<bool>,
    runner: PipelineRunner,
    /// How long a mid-flight task may keep running after a stop signal
    /// before its lease is surrendered.
    shutdown_grace: Duration,
    /// Bounded read-retry for the queue/registry visibility race.
    read_retry_attempts: usize,
    read_retry_delay: Duration,
}

impl ProcessingWorker {
    pub fn new(ctx: AppContext, worker_id: impl Into<String>, stop: watch::Receiver<bool>) -> Self {
        let stores = ctx.stores();
        let runner = PipelineRunner::new(ctx.clock.clone(), stop.clone());
        Self {
            ctx,
            stores,
            worker_id: worker_id.into(),
            stop,
            runner,
            shutdown_grace: Duration::from_secs(30),
            read_retry_attempts: 3,
            read_retry_delay: Duration::from_secs(1),
        }
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_read_retry(mut self, attempts: usize, delay: Duration) -> Self {
        self.read_retry_attempts = attempts;
        self.read_retry_delay = delay;
        self
    }

    fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Main loop: poll, process, idle-sleep when the queue is empty.
    pub async fn run(&self) -> Result<(), WorkerError> {
        info!(worker_id = %self.worker_id, "processing worker started");
        while !self.is_stopped() {
            match self.poll_once().await {
                Ok(0) => self.idle_sleep().await,
                Ok(handled) => debug!(worker_id = %self.worker_id, handled, "processed task batch"),
                Err(e) => {
                    error!(worker_id = %self.worker_id, error = %e, "poll cycle failed");
                    self.idle_sleep().await;
                }
            }
        }
        info!(worker_id = %self.worker_id, "processing worker stopped");
        Ok(())
    }

    async fn idle_sleep(&self) {
        let mut stop = self.stop.clone();
        tokio::select! {
            _ = self.ctx.clock.sleep(self.ctx.settings.queue_poll_interval) => {}
            _ = super::stopped(&mut stop) => {}
        }
    }

    /// Receives and handles at most one batch of messages. Returns the
    /// number of messages received.
    pub async fn poll_once(&self) -> Result<usize, WorkerError> {
        let leases = self
            .ctx
            .queue
            .receive(
                self.ctx.settings.queue_max_messages,
                self.ctx.settings.queue_visibility_timeout,
            )
            .await?;
        let received = leases.len();

        for lease in leases {
            // Stop dequeuing on shutdown: messages not yet started become
            // visible again for peers once their hold lapses.
            if self.is_stopped() {
                break;
            }
            if let Err(e) = self.handle_with_grace(lease).await {
                error!(worker_id = %self.worker_id, error = %e, "task handling failed");
            }
        }
        Ok(received)
    }

    /// Runs one message to completion, but gives up (surrendering the queue
    /// lease) if a stop signal arrives and the grace period lapses.
    async fn handle_with_grace(&self, lease: QueueLease) -> Result<(), WorkerError> {
        let message_id = lease.message_id.clone();
        let handle = self.handle_message(lease);
        tokio::pin!(handle);

        let mut stop = self.stop.clone();
        let grace = self.shutdown_grace;
        tokio::select! {
            result = &mut handle => result,
            _ = async {
                super::stopped(&mut stop).await;
                tokio::time::sleep(grace).await;
            } => {
                warn!(
                    worker_id = %self.worker_id,
                    message_id = %message_id,
                    "shutdown grace exceeded, surrendering task lease"
                );
                Ok(())
            }
        }
    }

    async fn handle_message(&self, lease: QueueLease) -> Result<(), WorkerError> {
        let envelope = match TaskMessage::parse(&lease.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(message_id = %lease.message_id, error = %e, "malformed task envelope, deleting");
                counter!("contentflow_poison_messages_total").increment(1);
                self.ctx.queue.delete(&lease).await?;
                return Ok(());
            }
        };

        if envelope.task_type == TaskType::InputSourceLoading {
            warn!(
                message_id = %lease.message_id,
                "retired input_source_loading task received, deleting"
            );
            counter!("contentflow_poison_messages_total").increment(1);
            self.ctx.queue.delete(&lease).await?;
            return Ok(());
        }

        let task = match envelope.processing_task() {
            Ok(task) => task,
            Err(e) => {
                warn!(message_id = %lease.message_id, error = %e, "malformed task payload, deleting");
                counter!("contentflow_poison_messages_total").increment(1);
                self.ctx.queue.delete(&lease).await?;
                return Ok(());
            }
        };

        self.process_task(task, lease).await
    }

    async fn process_task(&self, task: ContentProcessingTask, lease: QueueLease) -> Result<(), WorkerError> {
        debug!(
            worker_id = %self.worker_id,
            task_id = %task.task_id,
            pipeline_id = %task.pipeline_id,
            retry_count = task.retry_count,
            "processing task"
        );

        let pipeline = self
            .stores
            .pipelines()
            .get_with_retry(&task.pipeline_id, self.read_retry_attempts, self.read_retry_delay)
            .await?
            .filter(|pipeline| pipeline.enabled);
        let Some(pipeline) = pipeline else {
            return self
                .fail_terminally(
                    &task,
                    &lease,
                    FailureKind::PipelineMissing,
                    &format!("pipeline '{}' not found or disabled", task.pipeline_id),
                )
                .await;
        };

        let graph = match PipelineGraph::parse(&pipeline.yaml) {
            Ok(graph) => graph,
            Err(e) => {
                return self
                    .fail_terminally(&task, &lease, FailureKind::InvalidPipeline, &e.to_string())
                    .await;
            }
        };

        let save_output = match &task.vault_id {
            Some(vault_id) => self
                .stores
                .vaults()
                .get(vault_id)
                .await?
                .map(|vault| vault.save_execution_output)
                .unwrap_or(false),
            None => false,
        };
        let policy = RunPolicy::from_pipeline(&pipeline).with_capture_output(save_output);

        let exec_ctx = ExecutionContext {
            pipeline_id: task.pipeline_id.clone(),
            pipeline_name: task.pipeline_name.clone(),
            execution_id: task.execution_id.clone(),
            vault_id: task.vault_id.clone(),
            worker_id: self.worker_id.clone(),
            blob: self.ctx.blob.clone(),
            clock: self.ctx.clock.clone(),
            identity: self.ctx.identity.clone(),
        };

        // The heartbeat and the completion path both need the newest
        // receipt, so the in-flight lease lives behind a mutex.
        let shared_lease = Arc::new(Mutex::new(lease));
        let heartbeat = self.spawn_heartbeat(shared_lease.clone());

        let outcome = match tokio::time::timeout(
            self.ctx.settings.task_timeout,
            self.runner.run_from(
                &graph,
                &policy,
                task.executed_input_executor.as_deref(),
                task.content.clone(),
                &exec_ctx,
            ),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_elapsed) => StageOutcome {
                failure: Some(ExecutorFailure::new(
                    "pipeline",
                    FailureKind::Timeout,
                    format!(
                        "task processing exceeded {:?}",
                        self.ctx.settings.task_timeout
                    ),
                )),
                ..StageOutcome::default()
            },
        };
        heartbeat.abort();

        let lease = shared_lease.lock().await.clone();
        self.finish_task(task, lease, outcome, policy.retry_delay).await
    }

    async fn finish_task(
        &self,
        task: ContentProcessingTask,
        lease: QueueLease,
        outcome: StageOutcome,
        retry_base: Duration,
    ) -> Result<(), WorkerError> {
        let mut update = ExecutionUpdate {
            events: outcome.events,
            outputs: outcome.outputs,
            processing_worker_id: Some(self.worker_id.clone()),
            terminal: None,
        };

        match outcome.failure {
            None => {
                update.terminal = Some((ExecutionStatus::Completed, None));
                self.append_results(&task, &update).await?;
                self.ctx.queue.delete(&lease).await?;
                counter!("contentflow_tasks_completed_total").increment(1);
                info!(
                    worker_id = %self.worker_id,
                    task_id = %task.task_id,
                    items = outcome.items.len(),
                    "task completed"
                );
            }
            Some(failure) if failure.kind.is_retriable() && task.retries_remaining() => {
                // Keep the execution running and hand the task to a future
                // attempt; the original message is deleted only after the
                // replacement is on the queue.
                self.append_results(&task, &update).await?;
                let retry = task.next_attempt();
                let visibility = retry_visibility(retry_base, retry.retry_count);
                let body = TaskMessage::content_processing(&retry)
                    .and_then(|message| message.encode())
                    .map_err(StoreError::Serialization)?;
                self.ctx.queue.send(&body, Some(visibility)).await?;
                self.ctx.queue.delete(&lease).await?;
                counter!("contentflow_tasks_retried_total").increment(1);
                warn!(
                    worker_id = %self.worker_id,
                    task_id = %task.task_id,
                    retry_count = retry.retry_count,
                    max_retries = retry.max_retries,
                    error = %failure,
                    "task failed, re-enqueued for retry"
                );
            }
            Some(failure) => {
                update.terminal = Some((ExecutionStatus::Failed, Some(failure.to_string())));
                self.append_results(&task, &update).await?;
                self.ctx.queue.delete(&lease).await?;
                counter!("contentflow_tasks_failed_total").increment(1);
                error!(
                    worker_id = %self.worker_id,
                    task_id = %task.task_id,
                    kind = %failure.kind,
                    error = %failure,
                    "task failed terminally"
                );
            }
        }
        Ok(())
    }

    /// Non-retriable dead end: persist the failure, then delete the message.
    async fn fail_terminally(
        &self,
        task: &ContentProcessingTask,
        lease: &QueueLease,
        kind: FailureKind,
        message: &str,
    ) -> Result<(), WorkerError> {
        error!(
            worker_id = %self.worker_id,
            task_id = %task.task_id,
            kind = %kind,
            message,
            "task rejected"
        );
        self.stores
            .executions()
            .fail_from_task(task, &format!("{kind}: {message}"))
            .await?;
        self.ctx.queue.delete(lease).await?;
        counter!("contentflow_tasks_failed_total").increment(1);
        Ok(())
    }

    /// Appends results to the execution record, reconstructing the record
    /// from the task when it is not visible (it may never have been created
    /// or may lag behind the queue).
    async fn append_results(
        &self,
        task: &ContentProcessingTask,
        update: &ExecutionUpdate,
    ) -> Result<(), WorkerError> {
        match self
            .stores
            .executions()
            .append_results(&task.execution_id, update)
            .await
        {
            Err(StoreError::NotFound { .. }) => {
                warn!(
                    execution_id = %task.execution_id,
                    "execution record missing, creating from task"
                );
                self.stores
                    .executions()
                    .create(&VaultExecution::for_task(task))
                    .await?;
                self.stores
                    .executions()
                    .append_results(&task.execution_id, update)
                    .await?;
                Ok(())
            }
            other => Ok(other?),
        }
    }

    fn spawn_heartbeat(&self, shared_lease: Arc<Mutex<QueueLease>>) -> tokio::task::JoinHandle<()> {
        let queue = self.ctx.queue.clone();
        let clock = self.ctx.clock.clone();
        let visibility = self.ctx.settings.queue_visibility_timeout;
        let interval = self.ctx.settings.heartbeat_interval();
        let worker_id = self.worker_id.clone();
        tokio::spawn(async move {
            loop {
                clock.sleep(interval).await;
                let current = shared_lease.lock().await.clone();
                match queue.extend(&current, visibility).await {
                    Ok(renewed) => {
                        debug!(worker_id = %worker_id, message_id = %renewed.message_id, "extended task lease");
                        *shared_lease.lock().await = renewed;
                    }
                    Err(e) => {
                        warn!(worker_id = %worker_id, error = %e, "failed to extend task lease");
                        break;
                    }
                }
            }
        })
    }
}

/// Exponential backoff visibility for a re-enqueued attempt.
fn retry_visibility(base: Duration, retry_count: u32) -> Duration {
    let exponent = retry_count.saturating_sub(1).min(16);
    let scaled = base.as_secs_f64() * f64::from(1u32 << exponent);
    Duration::from_secs_f64(scaled.min(MAX_RETRY_VISIBILITY.as_secs_f64()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_visibility_grows_and_caps() {
        let base = Duration::from_secs(5);
        assert_eq!(retry_visibility(base, 1), Duration::from_secs(5));
        assert_eq!(retry_visibility(base, 2), Duration::from_secs(10));
        assert_eq!(retry_visibility(base, 3), Duration::from_secs(20));
        assert_eq!(retry_visibility(base, 20), MAX_RETRY_VISIBILITY);
    }
}
