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

//! Source scheduler.
//!
//! Each source worker runs this loop: enumerate enabled pipelines and their
//! enabled vaults, decide which pairs are due to crawl from their checkpoint
//! and polling interval, lease each due vault under the distributed lock,
//! run the pipeline's input executor, and fan the discovered items out as
//! processing tasks.
//!
//! While the lease is held this worker is the sole writer of tasks for the
//! `(pipeline, vault)` pair and the sole updater of its checkpoint. The
//! checkpoint is advanced only after every task of the crawl has been
//! enqueued; a crawl that aborts mid-iteration leaves it untouched, so the
//! next holder re-crawls from the previous watermark (at-least-once).

use metrics::counter;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use futures::StreamExt;

use crate::capabilities::clock::chrono_duration;
use crate::capabilities::{Clock, Queue};
use crate::context::AppContext;
use crate::error::{CrawlError, ExecutorFailure, FailureKind, StoreError, WorkerError};
use crate::executor::runtime::RunPolicy;
use crate::executor::{ExecutionContext, PipelineRunner};
use crate::graph::PipelineGraph;
use crate::models::{
    vault_lock_key, ContentItem, ContentProcessingTask, Pipeline, TaskMessage, Vault,
    VaultCrawlCheckpoint, VaultExecution,
};
use crate::store::Stores;
use crate::worker::lease::VaultLease;

/// Items per fanned-out task. One item per task preserves maximal
/// work-stealing across processing workers.
const TASK_BATCH_SIZE: usize = 1;

/// What one scheduler pass over the registry did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub pipelines: usize,
    pub vaults_considered: usize,
    pub crawls: usize,
    pub lock_conflicts: usize,
    pub failures: usize,
}

/// Result of one completed crawl.
#[derive(Debug, Clone)]
pub struct CrawlSummary {
    pub execution_id: String,
    pub enqueued: u64,
}

/// Periodically crawls due `(pipeline, vault)` pairs and fans out tasks.
pub struct SourceScheduler {
    ctx: AppContext,
    stores: Stores,
    worker_id: String,
    stop: watch::Receiver<bool>,
    runner: PipelineRunner,
}

impl SourceScheduler {
    pub fn new(ctx: AppContext, worker_id: impl Into<String>, stop: watch::Receiver<bool>) -> Self {
        let stores = ctx.stores();
        let runner = PipelineRunner::new(ctx.clock.clone(), stop.clone());
        Self {
            ctx,
            stores,
            worker_id: worker_id.into(),
            stop,
            runner,
        }
    }

    fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Main loop: tick, then sleep the scheduler interval (woken early by a
    /// stop signal).
    pub async fn run(&self) -> Result<(), WorkerError> {
        info!(worker_id = %self.worker_id, "source scheduler started");
        while !self.is_stopped() {
            match self.tick().await {
                Ok(summary) => debug!(
                    worker_id = %self.worker_id,
                    pipelines = summary.pipelines,
                    crawls = summary.crawls,
                    lock_conflicts = summary.lock_conflicts,
                    "scheduler tick complete"
                ),
                Err(e) => error!(worker_id = %self.worker_id, error = %e, "scheduler tick failed"),
            }

            let mut stop = self.stop.clone();
            tokio::select! {
                _ = self.ctx.clock.sleep(self.ctx.settings.scheduler_sleep_interval) => {}
                _ = super::stopped(&mut stop) => {}
            }
        }
        info!(worker_id = %self.worker_id, "source scheduler stopped");
        Ok(())
    }

    /// One pass over every enabled `(pipeline, vault)` pair.
    pub async fn tick(&self) -> Result<TickSummary, WorkerError> {
        let mut summary = TickSummary::default();
        let pipelines = self.stores.pipelines().list_enabled().await?;
        summary.pipelines = pipelines.len();

        'pipelines: for pipeline in &pipelines {
            let graph = match PipelineGraph::parse(&pipeline.yaml) {
                Ok(graph) => graph,
                Err(e) => {
                    warn!(pipeline_id = %pipeline.id, error = %e, "skipping invalid pipeline");
                    continue;
                }
            };

            let vaults = self.stores.vaults().list_enabled_for(&pipeline.id).await?;
            for vault in &vaults {
                if self.is_stopped() {
                    break 'pipelines;
                }
                summary.vaults_considered += 1;

                if !self.due_for_crawl(pipeline, &graph, vault).await? {
                    continue;
                }

                match self.crawl_vault(pipeline, &graph, vault).await {
                    Ok(crawl) => {
                        summary.crawls += 1;
                        counter!("contentflow_crawls_total").increment(1);
                        info!(
                            worker_id = %self.worker_id,
                            pipeline_id = %pipeline.id,
                            vault_id = %vault.id,
                            execution_id = %crawl.execution_id,
                            enqueued = crawl.enqueued,
                            "crawl complete"
                        );
                    }
                    Err(CrawlError::LockConflict) => {
                        summary.lock_conflicts += 1;
                        counter!("contentflow_lock_conflicts_total").increment(1);
                        debug!(
                            worker_id = %self.worker_id,
                            vault_id = %vault.id,
                            "vault leased by another worker, skipping"
                        );
                    }
                    Err(CrawlError::Interrupted) => {
                        warn!(
                            worker_id = %self.worker_id,
                            vault_id = %vault.id,
                            "crawl interrupted by shutdown"
                        );
                        break 'pipelines;
                    }
                    Err(e) => {
                        summary.failures += 1;
                        counter!("contentflow_crawl_failures_total").increment(1);
                        error!(
                            worker_id = %self.worker_id,
                            pipeline_id = %pipeline.id,
                            vault_id = %vault.id,
                            error = %e,
                            "crawl failed"
                        );
                    }
                }
            }
        }
        Ok(summary)
    }

    /// Due when no checkpoint exists, or when `checkpoint + interval` has
    /// passed. The interval comes from the input executor's settings.
    async fn due_for_crawl(
        &self,
        pipeline: &Pipeline,
        graph: &PipelineGraph,
        vault: &Vault,
    ) -> Result<bool, WorkerError> {
        let interval = graph.polling_interval(self.ctx.settings.default_polling_interval);
        let checkpoint = self
            .stores
            .checkpoints()
            .get(&pipeline.id, &vault.id, &graph.input_node().id)
            .await?;
        Ok(match checkpoint {
            None => true,
            Some(checkpoint) => {
                let next_due = checkpoint.checkpoint_timestamp + chrono_duration(interval);
                self.ctx.clock.now() >= next_due
            }
        })
    }

    /// Leases the vault and runs one crawl; the lease is released on every
    /// path so peers can pick up the next due interval promptly.
    async fn crawl_vault(
        &self,
        pipeline: &Pipeline,
        graph: &PipelineGraph,
        vault: &Vault,
    ) -> Result<CrawlSummary, CrawlError> {
        let lock_key = vault_lock_key(&vault.id);
        let Some(lease) = VaultLease::acquire(
            &self.stores,
            &lock_key,
            &self.worker_id,
            self.ctx.settings.lock_ttl,
        )
        .await?
        else {
            return Err(CrawlError::LockConflict);
        };

        let result = self.crawl_locked(pipeline, graph, vault).await;
        if let Err(e) = lease.release().await {
            warn!(vault_id = %vault.id, error = %e, "failed to release vault lease");
        }
        result
    }

    async fn crawl_locked(
        &self,
        pipeline: &Pipeline,
        graph: &PipelineGraph,
        vault: &Vault,
    ) -> Result<CrawlSummary, CrawlError> {
        let input_id = graph.input_node().id.clone();
        let execution = VaultExecution::new(pipeline, vault, &self.worker_id);
        self.stores.executions().create(&execution).await?;
        self.stores.executions().mark_running(&execution.id).await?;

        let checkpoint = self
            .stores
            .checkpoints()
            .get(&pipeline.id, &vault.id, &input_id)
            .await?;
        let policy = RunPolicy::from_pipeline(pipeline);
        let exec_ctx = ExecutionContext {
            pipeline_id: pipeline.id.clone(),
            pipeline_name: pipeline.name.clone(),
            execution_id: execution.id.clone(),
            vault_id: Some(vault.id.clone()),
            worker_id: self.worker_id.clone(),
            blob: self.ctx.blob.clone(),
            clock: self.ctx.clock.clone(),
            identity: self.ctx.identity.clone(),
        };

        let batch = match self
            .runner
            .run_input_only(graph, &policy, &exec_ctx, checkpoint.as_ref())
            .await
        {
            Ok(batch) => batch,
            Err(failure) => {
                self.stores
                    .executions()
                    .mark_failed(&execution.id, &format!("crawl_aborted: {failure}"))
                    .await?;
                return Err(CrawlError::Aborted(ExecutorFailure::new(
                    &input_id,
                    FailureKind::CrawlAborted,
                    failure.message,
                )));
            }
        };

        // Drain the lazy stream, fanning out tasks as batches fill. Tasks
        // already enqueued stay valid whatever happens afterwards.
        let watermark = batch.watermark;
        let mut stream = batch.items;
        let mut pending: Vec<ContentItem> = Vec::new();
        let mut enqueued: u64 = 0;
        let mut abort: Option<CrawlError> = None;

        while let Some(next) = stream.next().await {
            if self.is_stopped() {
                abort = Some(CrawlError::Interrupted);
                break;
            }
            match next {
                Ok(item) => {
                    pending.push(item);
                    if pending.len() >= TASK_BATCH_SIZE {
                        enqueued += self
                            .send_task(pipeline, vault, &execution.id, &input_id, std::mem::take(&mut pending))
                            .await?;
                    }
                }
                Err(error) => {
                    abort = Some(CrawlError::Aborted(ExecutorFailure::new(
                        &input_id,
                        FailureKind::CrawlAborted,
                        error.to_string(),
                    )));
                    break;
                }
            }
        }
        drop(stream);

        if abort.is_none() && !pending.is_empty() {
            enqueued += self
                .send_task(pipeline, vault, &execution.id, &input_id, std::mem::take(&mut pending))
                .await?;
        }

        if let Some(abort) = abort {
            // The checkpoint is NOT advanced; the next holder re-crawls from
            // the previous watermark.
            self.stores
                .executions()
                .mark_failed(&execution.id, &abort.to_string())
                .await?;
            return Err(abort);
        }

        let new_checkpoint = VaultCrawlCheckpoint::new(
            &pipeline.id,
            &vault.id,
            &input_id,
            watermark,
            &self.worker_id,
        );
        self.stores.checkpoints().advance(&new_checkpoint).await?;
        self.stores
            .executions()
            .set_item_count(&execution.id, enqueued)
            .await?;

        // With nothing enqueued no processing worker will ever touch this
        // execution, so its terminal status is set here.
        if enqueued == 0 {
            self.stores.executions().mark_completed(&execution.id).await?;
        }

        counter!("contentflow_tasks_enqueued_total").increment(enqueued);
        Ok(CrawlSummary {
            execution_id: execution.id.clone(),
            enqueued,
        })
    }

    async fn send_task(
        &self,
        pipeline: &Pipeline,
        vault: &Vault,
        execution_id: &str,
        input_id: &str,
        items: Vec<ContentItem>,
    ) -> Result<u64, CrawlError> {
        let count = items.len() as u64;
        let task = ContentProcessingTask::new(
            pipeline,
            execution_id,
            Some(&vault.id),
            items,
            Some(input_id),
            self.ctx.settings.max_task_retries,
            self.ctx.clock.now(),
        );
        let body = TaskMessage::content_processing(&task)
            .and_then(|message| message.encode())
            .map_err(StoreError::Serialization)?;
        self.ctx.queue.send(&body, None).await?;
        debug!(
            worker_id = %self.worker_id,
            execution_id = %execution_id,
            task_id = %task.task_id,
            items = count,
            "enqueued processing task"
        );
        Ok(count)
    }
}
