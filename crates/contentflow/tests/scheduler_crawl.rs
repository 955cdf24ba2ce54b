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

//! Source scheduler integration tests: crawl fan-out, lock exclusion,
//! lease stealing, and checkpoint semantics.

mod common;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Barrier};

use contentflow::capabilities::{Clock, Queue, Registry};
use contentflow::error::ExecutorError;
use contentflow::executor::{registry, ExecutionContext, InputBatch, InputExecutor};
use contentflow::models::{
    vault_lock_key, ContentItem, ExecutionStatus, VaultCrawlCheckpoint, VaultExecution,
};
use contentflow::worker::SourceScheduler;

use common::{fast_settings, seeded_context, test_item, test_pipeline, test_vault};

fn stop_rx() -> watch::Receiver<bool> {
    let (_tx, rx) = watch::channel(false);
    rx
}

async fn executions(ctx: &contentflow::context::AppContext) -> Vec<VaultExecution> {
    ctx.registry
        .query(
            &ctx.settings.containers.executions,
            &contentflow::capabilities::DocumentFilter::new(),
        )
        .await
        .unwrap()
        .iter()
        .map(|doc| doc.to_record().unwrap())
        .collect()
}

const STATIC_PIPELINE: &str = r#"
name: static-crawl
executors:
  - id: source
    type: static_source
    settings:
      polling_interval_seconds: 60
      items:
        - canonical_id: doc-1
        - canonical_id: doc-2
  - id: tagger
    type: content_tagger
    settings:
      tags:
        stage: tagged
"#;

/// S1: a fresh `(pipeline, vault)` with no checkpoint is crawled within one
/// tick: one execution record, one checkpoint, and one queued task per
/// emitted item.
#[tokio::test]
async fn fresh_pair_is_crawled_in_one_tick() {
    let pipeline = test_pipeline("p1", STATIC_PIPELINE);
    let vault = test_vault("v1", "p1");
    let ctx = seeded_context(fast_settings(), &pipeline, &vault).await;

    let scheduler = SourceScheduler::new(ctx.clone(), "source-0", stop_rx());
    let summary = scheduler.tick().await.unwrap();

    assert_eq!(summary.pipelines, 1);
    assert_eq!(summary.crawls, 1);
    assert_eq!(summary.lock_conflicts, 0);

    // One execution, running (its tasks are still queued), two items.
    let execs = executions(&ctx).await;
    assert_eq!(execs.len(), 1);
    assert!(matches!(
        execs[0].status,
        ExecutionStatus::Running | ExecutionStatus::Completed | ExecutionStatus::Failed
    ));
    assert_eq!(execs[0].number_of_items, Some(2));
    assert_eq!(execs[0].source_worker_id.as_deref(), Some("source-0"));

    // Checkpoint written for (pipeline, vault, input executor).
    let checkpoint = ctx
        .stores()
        .checkpoints()
        .get("p1", "v1", "source")
        .await
        .unwrap()
        .expect("checkpoint should exist after a successful crawl");
    assert_eq!(checkpoint.worker_id, "source-0");

    // At-least-once: every emitted item has a queued task.
    assert_eq!(ctx.queue.approx_len().await.unwrap(), 2);
    let tasks = common::peek_tasks(&ctx).await;
    assert_eq!(tasks.len(), 2);
    for task in &tasks {
        assert_eq!(task.pipeline_id, "p1");
        assert_eq!(task.vault_id.as_deref(), Some("v1"));
        assert_eq!(task.executed_input_executor.as_deref(), Some("source"));
        assert_eq!(task.execution_id, execs[0].id);
    }

    // The lock was released after the crawl.
    let lock = ctx
        .stores()
        .locks()
        .get(&vault_lock_key("v1"))
        .await
        .unwrap();
    assert!(lock.is_none());

    // Same tick again: the checkpoint makes the pair not due.
    let summary = scheduler.tick().await.unwrap();
    assert_eq!(summary.crawls, 0);
    assert_eq!(executions(&ctx).await.len(), 1);
}

struct SlowSource {
    delay: Duration,
}

#[async_trait]
impl InputExecutor for SlowSource {
    fn executor_type(&self) -> &str {
        "it_slow_source"
    }

    async fn fetch(
        &self,
        ctx: &ExecutionContext,
        _checkpoint: Option<&VaultCrawlCheckpoint>,
    ) -> Result<InputBatch, ExecutorError> {
        tokio::time::sleep(self.delay).await;
        let items: Vec<Result<ContentItem, ExecutorError>> = vec![Ok(test_item("slow-doc"))];
        Ok(InputBatch {
            items: Box::pin(futures::stream::iter(items)),
            watermark: ctx.clock.now(),
        })
    }
}

/// S2: two schedulers racing for the same vault: exactly one performs the
/// crawl, the other observes a lock conflict.
#[tokio::test]
async fn concurrent_schedulers_exclude_each_other() {
    registry::register_input_executor("it_slow_source", |_settings| {
        Ok(Arc::new(SlowSource {
            delay: Duration::from_millis(300),
        }))
    });

    let yaml = r#"
executors:
  - id: source
    type: it_slow_source
"#;
    let pipeline = test_pipeline("p2", yaml);
    let vault = test_vault("v2", "p2");
    let mut settings = fast_settings();
    settings.lock_ttl = Duration::from_secs(30);
    let ctx = seeded_context(settings, &pipeline, &vault).await;

    let scheduler_a = SourceScheduler::new(ctx.clone(), "source-0", stop_rx());
    let scheduler_b = SourceScheduler::new(ctx.clone(), "source-1", stop_rx());

    let barrier = Arc::new(Barrier::new(2));
    let barrier_a = barrier.clone();
    let a = tokio::spawn(async move {
        barrier_a.wait().await;
        scheduler_a.tick().await.unwrap()
    });
    let b = tokio::spawn(async move {
        barrier.wait().await;
        scheduler_b.tick().await.unwrap()
    });

    let (summary_a, summary_b) = (a.await.unwrap(), b.await.unwrap());

    assert_eq!(summary_a.crawls + summary_b.crawls, 1, "exactly one crawl");
    assert_eq!(
        summary_a.lock_conflicts + summary_b.lock_conflicts,
        1,
        "the loser observes a lock conflict"
    );
    assert_eq!(executions(&ctx).await.len(), 1);
}

/// S5 / property 3: an expired lease may be stolen; a live one must not be.
#[tokio::test]
async fn lease_is_stolen_only_after_expiry() {
    let pipeline = test_pipeline("p3", STATIC_PIPELINE);
    let vault = test_vault("v3", "p3");
    let mut settings = fast_settings();
    settings.lock_ttl = Duration::from_millis(200);
    let ctx = seeded_context(settings, &pipeline, &vault).await;

    // A crashed worker's lease: acquired directly, never refreshed or
    // released.
    let key = vault_lock_key("v3");
    let stores = ctx.stores();
    let acquired = stores
        .locks()
        .try_acquire(&key, "source-dead", Duration::from_millis(200))
        .await
        .unwrap();
    assert!(acquired.is_some());

    let scheduler = SourceScheduler::new(ctx.clone(), "source-1", stop_rx());

    // While the lease is live, the vault must not be crawled.
    let summary = scheduler.tick().await.unwrap();
    assert_eq!(summary.crawls, 0);
    assert_eq!(summary.lock_conflicts, 1);

    // After the TTL lapses the lease is stolen and the crawl proceeds.
    tokio::time::sleep(Duration::from_millis(250)).await;
    let summary = scheduler.tick().await.unwrap();
    assert_eq!(summary.crawls, 1);
    assert_eq!(summary.lock_conflicts, 0);

    let execs = executions(&ctx).await;
    assert_eq!(execs.len(), 1);
    assert_eq!(execs[0].source_worker_id.as_deref(), Some("source-1"));
}

struct AbortingSource;

#[async_trait]
impl InputExecutor for AbortingSource {
    fn executor_type(&self) -> &str {
        "it_aborting_source"
    }

    async fn fetch(
        &self,
        ctx: &ExecutionContext,
        _checkpoint: Option<&VaultCrawlCheckpoint>,
    ) -> Result<InputBatch, ExecutorError> {
        let items: Vec<Result<ContentItem, ExecutorError>> = vec![
            Ok(test_item("before-failure")),
            Err(ExecutorError::Domain("listing page 2 failed".into())),
        ];
        Ok(InputBatch {
            items: Box::pin(futures::stream::iter(items)),
            watermark: ctx.clock.now(),
        })
    }
}

/// Property 4 failure half: an aborted crawl leaves the checkpoint
/// untouched, marks the execution failed, and keeps already-enqueued tasks.
#[tokio::test]
async fn aborted_crawl_keeps_checkpoint_and_enqueued_tasks() {
    registry::register_input_executor("it_aborting_source", |_settings| Ok(Arc::new(AbortingSource)));

    let yaml = r#"
executors:
  - id: source
    type: it_aborting_source
"#;
    let pipeline = test_pipeline("p4", yaml);
    let vault = test_vault("v4", "p4");
    let ctx = seeded_context(fast_settings(), &pipeline, &vault).await;

    let scheduler = SourceScheduler::new(ctx.clone(), "source-0", stop_rx());
    let summary = scheduler.tick().await.unwrap();
    assert_eq!(summary.crawls, 0);
    assert_eq!(summary.failures, 1);

    // No checkpoint was written.
    let checkpoint = ctx
        .stores()
        .checkpoints()
        .get("p4", "v4", "source")
        .await
        .unwrap();
    assert!(checkpoint.is_none());

    // The execution is failed with the crawl-abort kind recorded.
    let execs = executions(&ctx).await;
    assert_eq!(execs.len(), 1);
    assert_eq!(execs[0].status, ExecutionStatus::Failed);
    assert!(execs[0].error.as_deref().unwrap_or_default().contains("crawl_aborted"));

    // The item emitted before the failure was already fanned out and stays.
    assert_eq!(ctx.queue.approx_len().await.unwrap(), 1);

    // With no checkpoint, the pair is immediately due again (re-crawl from
    // the previous watermark).
    let summary = scheduler.tick().await.unwrap();
    assert_eq!(summary.failures, 1);
}

/// Property 4 success half: a successful re-crawl advances the watermark
/// monotonically.
#[tokio::test]
async fn successful_crawls_advance_the_watermark() {
    let yaml = r#"
executors:
  - id: source
    type: static_source
    settings:
      polling_interval_seconds: 0
      items:
        - canonical_id: doc-1
"#;
    let pipeline = test_pipeline("p5", yaml);
    let vault = test_vault("v5", "p5");
    let ctx = seeded_context(fast_settings(), &pipeline, &vault).await;

    let scheduler = SourceScheduler::new(ctx.clone(), "source-0", stop_rx());

    scheduler.tick().await.unwrap();
    let first = ctx
        .stores()
        .checkpoints()
        .get("p5", "v5", "source")
        .await
        .unwrap()
        .unwrap();

    // Zero polling interval: due again immediately.
    tokio::time::sleep(Duration::from_millis(20)).await;
    scheduler.tick().await.unwrap();
    let second = ctx
        .stores()
        .checkpoints()
        .get("p5", "v5", "source")
        .await
        .unwrap()
        .unwrap();

    assert!(second.checkpoint_timestamp >= first.checkpoint_timestamp);
}

/// A vault bound to a disabled pipeline is never crawled; disabling the
/// vault has the same effect.
#[tokio::test]
async fn disabled_records_are_ignored() {
    let mut pipeline = test_pipeline("p6", STATIC_PIPELINE);
    pipeline.enabled = false;
    let vault = test_vault("v6", "p6");
    let ctx = seeded_context(fast_settings(), &pipeline, &vault).await;

    let scheduler = SourceScheduler::new(ctx.clone(), "source-0", stop_rx());
    let summary = scheduler.tick().await.unwrap();
    assert_eq!(summary.pipelines, 0);
    assert_eq!(summary.crawls, 0);

    // Enabled pipeline, disabled vault.
    let pipeline = test_pipeline("p7", STATIC_PIPELINE);
    let mut vault = test_vault("v7", "p7");
    vault.enabled = false;
    let stores = ctx.stores();
    stores.pipelines().upsert(&pipeline).await.unwrap();
    stores.vaults().upsert(&vault).await.unwrap();

    let summary = scheduler.tick().await.unwrap();
    assert_eq!(summary.pipelines, 1);
    assert_eq!(summary.vaults_considered, 0);
    assert_eq!(summary.crawls, 0);
}
