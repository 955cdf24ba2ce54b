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

//! Processing worker integration tests: poison protection, missing
//! pipelines, executor skip, the retry cap, and lease heartbeat handoff.

mod common;

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use contentflow::capabilities::memory::ManualClock;
use contentflow::capabilities::{BlobStore, Clock, Queue};
use contentflow::context::AppContext;
use contentflow::error::ExecutorError;
use contentflow::executor::{registry, ExecutionContext, Executor};
use contentflow::models::{
    ContentItem, ContentProcessingTask, ExecutionStatus, TaskMessage, TaskType, VaultExecution,
};
use contentflow::worker::ProcessingWorker;

use common::{fast_settings, seeded_context, test_item, test_pipeline, test_vault};

fn stop_rx() -> watch::Receiver<bool> {
    let (_tx, rx) = watch::channel(false);
    rx
}

async fn enqueue_task(ctx: &AppContext, task: &ContentProcessingTask) {
    let body = TaskMessage::content_processing(task)
        .unwrap()
        .encode()
        .unwrap();
    ctx.queue.send(&body, None).await.unwrap();
}

/// S3: a task referencing a missing pipeline fails its execution with the
/// pipeline-missing kind and the message does not reappear.
#[tokio::test]
async fn missing_pipeline_fails_execution_and_drains_message() {
    let unseeded = test_pipeline("missing", "executors: []");
    let vault = test_vault("v1", "p1");
    // Seed an unrelated pipeline so only the referenced one is missing.
    let seeded = test_pipeline("p1", "executors: []");
    let ctx = seeded_context(fast_settings(), &seeded, &vault).await;

    let task = ContentProcessingTask::new(
        &unseeded,
        "E",
        Some("v1"),
        vec![test_item("doc-1")],
        Some("source"),
        2,
        Utc::now(),
    );
    enqueue_task(&ctx, &task).await;

    let worker = ProcessingWorker::new(ctx.clone(), "processing-0", stop_rx())
        .with_read_retry(2, Duration::from_millis(10));
    assert_eq!(worker.poll_once().await.unwrap(), 1);

    let execution: VaultExecution = ctx
        .stores()
        .executions()
        .get("E")
        .await
        .unwrap()
        .expect("failure must be recorded on execution E");
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("pipeline_missing"));

    assert_eq!(ctx.queue.approx_len().await.unwrap(), 0);
    assert_eq!(worker.poll_once().await.unwrap(), 0);
}

struct CountingInput {
    type_name: String,
    invocations: Arc<AtomicU32>,
}

#[async_trait]
impl contentflow::executor::InputExecutor for CountingInput {
    fn executor_type(&self) -> &str {
        &self.type_name
    }

    async fn fetch(
        &self,
        ctx: &ExecutionContext,
        _checkpoint: Option<&contentflow::models::VaultCrawlCheckpoint>,
    ) -> Result<contentflow::executor::InputBatch, ExecutorError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(contentflow::executor::InputBatch {
            items: Box::pin(futures::stream::empty()),
            watermark: ctx.clock.now(),
        })
    }
}

/// Property 6 + happy path: the worker resumes at the input node's
/// successors, runs them, persists results, and completes the execution.
#[tokio::test]
async fn task_skips_input_node_and_completes() {
    let input_calls = Arc::new(AtomicU32::new(0));
    let calls = input_calls.clone();
    registry::register_input_executor("it_counting_input", move |_settings| {
        Ok(Arc::new(CountingInput {
            type_name: "it_counting_input".into(),
            invocations: calls.clone(),
        }))
    });

    let yaml = r#"
executors:
  - id: source
    type: it_counting_input
  - id: tagger
    type: content_tagger
    settings:
      tags:
        stage: done
  - id: sink
    type: blob_sink
    settings:
      prefix: "processed/"
"#;
    let pipeline = test_pipeline("p10", yaml);
    let vault = test_vault("v10", "p10");
    let ctx = seeded_context(fast_settings(), &pipeline, &vault).await;

    // The execution record exists, as the scheduler would have left it.
    let execution = VaultExecution::new(&pipeline, &vault, "source-0");
    let execution_id = execution.id.clone();
    ctx.stores().executions().create(&execution).await.unwrap();
    ctx.stores()
        .executions()
        .mark_running(&execution_id)
        .await
        .unwrap();

    let task = ContentProcessingTask::new(
        &pipeline,
        &execution_id,
        Some("v10"),
        vec![test_item("doc-9")],
        Some("source"),
        2,
        Utc::now(),
    );
    enqueue_task(&ctx, &task).await;

    let worker = ProcessingWorker::new(ctx.clone(), "processing-0", stop_rx());
    assert_eq!(worker.poll_once().await.unwrap(), 1);

    // The input executor was never invoked.
    assert_eq!(input_calls.load(Ordering::SeqCst), 0);

    let execution: VaultExecution = ctx
        .stores()
        .executions()
        .get(&execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.processing_worker_id.as_deref(), Some("processing-0"));
    assert!(execution.executor_outputs.contains_key("tagger"));
    assert!(execution.executor_outputs.contains_key("sink"));
    assert!(!execution.events.is_empty());

    // The sink actually wrote the item.
    assert!(ctx.blob.get("processed/doc-9.json").await.is_ok());
    assert_eq!(ctx.queue.approx_len().await.unwrap(), 0);
}

struct FlakyStage {
    invocations: Arc<AtomicU32>,
}

#[async_trait]
impl Executor for FlakyStage {
    fn executor_type(&self) -> &str {
        "it_flaky_stage"
    }

    async fn process(
        &self,
        _items: Vec<ContentItem>,
        _ctx: &ExecutionContext,
    ) -> Result<Vec<ContentItem>, ExecutorError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Err(ExecutorError::Transient("downstream throttled".into()))
    }
}

/// S4 / property 5: a task whose every attempt fails retriably is delivered
/// `max_retries + 1` times, then its execution is marked failed.
#[tokio::test]
async fn retriable_failures_respect_the_retry_cap() {
    let attempts = Arc::new(AtomicU32::new(0));
    let calls = attempts.clone();
    registry::register_executor("it_flaky_stage", move |_settings| {
        Ok(Arc::new(FlakyStage {
            invocations: calls.clone(),
        }))
    });
    registry::register_input_executor("it_flaky_input", |_settings| {
        Ok(Arc::new(CountingInput {
            type_name: "it_flaky_input".into(),
            invocations: Arc::new(AtomicU32::new(0)),
        }))
    });

    let yaml = r#"
executors:
  - id: source
    type: it_flaky_input
  - id: stage
    type: it_flaky_stage
"#;
    // Pipeline-level retries are zero, so every failure escalates straight
    // to the task level.
    let pipeline = test_pipeline("p11", yaml);
    let vault = test_vault("v11", "p11");

    contentflow::executor::builtins::register_builtin_executors();
    let clock = Arc::new(ManualClock::default());
    let ctx = AppContext::in_memory_with_clock(fast_settings(), clock.clone());
    let stores = ctx.stores();
    stores.pipelines().upsert(&pipeline).await.unwrap();
    stores.vaults().upsert(&vault).await.unwrap();

    let task = ContentProcessingTask::new(
        &pipeline,
        "E11",
        Some("v11"),
        vec![test_item("doc-1")],
        Some("source"),
        2,
        clock.now(),
    );
    enqueue_task(&ctx, &task).await;

    let worker = ProcessingWorker::new(ctx.clone(), "processing-0", stop_rx());

    // Attempt 1: fails, re-enqueued with retry_count = 1 behind a backoff.
    assert_eq!(worker.poll_once().await.unwrap(), 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.queue.approx_len().await.unwrap(), 1);

    // Attempt 2 becomes visible after the backoff.
    clock.advance(Duration::from_millis(1500));
    assert_eq!(worker.poll_once().await.unwrap(), 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    // Attempt 3 is the last (retry_count == max_retries): terminal failure.
    clock.advance(Duration::from_millis(2500));
    assert_eq!(worker.poll_once().await.unwrap(), 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    assert_eq!(ctx.queue.approx_len().await.unwrap(), 0);
    let execution: VaultExecution = stores.executions().get("E11").await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);

    // No further deliveries.
    clock.advance(Duration::from_secs(60));
    assert_eq!(worker.poll_once().await.unwrap(), 0);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

/// Poison protection: malformed bodies and retired task types are logged
/// and deleted, never retried.
#[tokio::test]
async fn poison_messages_are_deleted() {
    let pipeline = test_pipeline("p12", "executors: []");
    let vault = test_vault("v12", "p12");
    let ctx = seeded_context(fast_settings(), &pipeline, &vault).await;

    ctx.queue.send("{not json", None).await.unwrap();
    let legacy = TaskMessage {
        task_type: TaskType::InputSourceLoading,
        payload: serde_json::json!({"source_type": "blob", "source_name": "legacy"}),
    };
    ctx.queue.send(&legacy.encode().unwrap(), None).await.unwrap();

    let worker = ProcessingWorker::new(ctx.clone(), "processing-0", stop_rx());
    assert_eq!(worker.poll_once().await.unwrap(), 2);

    assert_eq!(ctx.queue.approx_len().await.unwrap(), 0);
    assert_eq!(worker.poll_once().await.unwrap(), 0);
}

struct SlowStage;

#[async_trait]
impl Executor for SlowStage {
    fn executor_type(&self) -> &str {
        "it_slow_stage"
    }

    async fn process(
        &self,
        items: Vec<ContentItem>,
        _ctx: &ExecutionContext,
    ) -> Result<Vec<ContentItem>, ExecutorError> {
        tokio::time::sleep(Duration::from_millis(900)).await;
        Ok(items)
    }
}

/// While a slow task runs, the heartbeat renews the queue lease; the final
/// delete must use the renewed receipt or the message would linger.
#[tokio::test]
async fn heartbeat_extends_lease_and_delete_uses_fresh_receipt() {
    registry::register_executor("it_slow_stage", |_settings| Ok(Arc::new(SlowStage)));
    registry::register_input_executor("it_slow_stage_input", |_settings| {
        Ok(Arc::new(CountingInput {
            type_name: "it_slow_stage_input".into(),
            invocations: Arc::new(AtomicU32::new(0)),
        }))
    });

    let yaml = r#"
executors:
  - id: source
    type: it_slow_stage_input
  - id: stage
    type: it_slow_stage
"#;
    let pipeline = test_pipeline("p13", yaml);
    let vault = test_vault("v13", "p13");
    let mut settings = fast_settings();
    // Visibility shorter than the stage duration: only the heartbeat keeps
    // the lease alive.
    settings.queue_visibility_timeout = Duration::from_millis(600);
    let ctx = seeded_context(settings, &pipeline, &vault).await;

    let task = ContentProcessingTask::new(
        &pipeline,
        "E13",
        Some("v13"),
        vec![test_item("doc-1")],
        Some("source"),
        2,
        Utc::now(),
    );
    enqueue_task(&ctx, &task).await;

    let worker = ProcessingWorker::new(ctx.clone(), "processing-0", stop_rx());
    assert_eq!(worker.poll_once().await.unwrap(), 1);

    assert_eq!(ctx.queue.approx_len().await.unwrap(), 0);
    let execution: VaultExecution = ctx
        .stores()
        .executions()
        .get("E13")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
}

/// The vault's `save_execution_output` decides whether full stage outputs
/// or only item counts are persisted.
#[tokio::test]
async fn save_execution_output_controls_persisted_data() {
    let yaml = r#"
executors:
  - id: source
    type: static_source
  - id: tagger
    type: content_tagger
    settings:
      tags:
        stage: tagged
"#;
    let pipeline = test_pipeline("p14", yaml);
    let mut vault = test_vault("v14", "p14");
    vault.save_execution_output = true;
    let ctx = seeded_context(fast_settings(), &pipeline, &vault).await;

    let task = ContentProcessingTask::new(
        &pipeline,
        "E14",
        Some("v14"),
        vec![test_item("doc-1")],
        Some("source"),
        2,
        Utc::now(),
    );
    enqueue_task(&ctx, &task).await;

    let worker = ProcessingWorker::new(ctx.clone(), "processing-0", stop_rx());
    worker.poll_once().await.unwrap();

    let execution: VaultExecution = ctx
        .stores()
        .executions()
        .get("E14")
        .await
        .unwrap()
        .unwrap();
    let output = &execution.executor_outputs["tagger"];
    // Full output: the serialized item list, not just a count.
    assert!(output.data.as_ref().unwrap().is_array());

    // Same pipeline, output saving off.
    let mut vault_off = test_vault("v15", "p14");
    vault_off.save_execution_output = false;
    ctx.stores().vaults().upsert(&vault_off).await.unwrap();
    let task = ContentProcessingTask::new(
        &pipeline,
        "E15",
        Some("v15"),
        vec![test_item("doc-2")],
        Some("source"),
        2,
        Utc::now(),
    );
    enqueue_task(&ctx, &task).await;
    worker.poll_once().await.unwrap();

    let execution: VaultExecution = ctx
        .stores()
        .executions()
        .get("E15")
        .await
        .unwrap()
        .unwrap();
    let output = &execution.executor_outputs["tagger"];
    assert_eq!(
        output.data.as_ref().unwrap().get("item_count"),
        Some(&serde_json::json!(1))
    );
}
