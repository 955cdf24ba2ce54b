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

//! Pipeline runtime.
//!
//! [`PipelineRunner`] advances content items through a parsed
//! [`PipelineGraph`]: `run_from` executes every stage after the already-run
//! input node, `run_input_only` executes just the input node. Per-invocation
//! timeout and retry policy comes from the pipeline record via [`RunPolicy`].
//!
//! Stages execute in dependency order. Nodes whose predecessors have all
//! completed run concurrently, bounded by the graph's `max_parallel`; a join
//! node sees the concatenated output of all its predecessors. Cancellation
//! is honored between waves of executor invocations.

use futures::StreamExt;
use metrics::counter;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::{registry, ExecutionContext, InputBatch};
use crate::capabilities::Clock;
use crate::error::{ExecutorFailure, FailureKind};
use crate::graph::{PipelineGraph, PipelineNode};
use crate::models::{
    ContentItem, ExecutionEvent, ExecutorOutput, ExecutorOutputStatus, Pipeline,
    VaultCrawlCheckpoint,
};

/// Event type tags appended to execution records.
pub mod event_types {
    pub const EXECUTOR_STARTED: &str = "executor_started";
    pub const EXECUTOR_COMPLETED: &str = "executor_completed";
    pub const EXECUTOR_FAILED: &str = "executor_failed";
    pub const EXECUTOR_RETRYING: &str = "executor_retrying";
    pub const PIPELINE_COMPLETED: &str = "pipeline_completed";
    pub const PIPELINE_FAILED: &str = "pipeline_failed";
}

/// Retry backoff never exceeds this, whatever the pipeline's delay says.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Per-invocation execution policy, read from the pipeline record.
#[derive(Debug, Clone)]
pub struct RunPolicy {
    /// Retry attempts per executor invocation on retriable failures.
    pub retries: u32,
    /// Base delay for exponential backoff between attempts.
    pub retry_delay: Duration,
    /// Wall-clock bound per executor invocation.
    pub timeout: Duration,
    /// Whether full stage outputs are captured onto the execution record
    /// (the vault's `save_execution_output`); otherwise only counts.
    pub capture_output: bool,
}

impl RunPolicy {
    pub fn from_pipeline(pipeline: &Pipeline) -> Self {
        Self {
            retries: pipeline.retries,
            retry_delay: pipeline.retry_delay_duration(),
            timeout: pipeline.timeout_duration(),
            capture_output: false,
        }
    }

    pub fn with_capture_output(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }

    /// Exponential backoff with jitter: `retry_delay * 2^(attempt-1)`,
    /// capped, plus up to 25% random spread.
    pub(crate) fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self.retry_delay.as_secs_f64() * f64::from(1u32 << exponent);
        let capped = base.min(MAX_BACKOFF.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(1.0..1.25);
        Duration::from_secs_f64(capped * jitter)
    }
}

/// The result of driving one task's items through the pipeline stages.
#[derive(Debug, Default)]
pub struct StageOutcome {
    /// Output of the terminal (sink) nodes.
    pub items: Vec<ContentItem>,
    /// Events in emission order.
    pub events: Vec<ExecutionEvent>,
    /// One output entry per executed node.
    pub outputs: Vec<ExecutorOutput>,
    /// The first failure, if any; stages scheduled after it do not run.
    pub failure: Option<ExecutorFailure>,
}

struct NodeRun {
    node_id: String,
    result: Result<Vec<ContentItem>, ExecutorFailure>,
    events: Vec<ExecutionEvent>,
    output: ExecutorOutput,
}

/// Drives pipeline graphs over content items.
pub struct PipelineRunner {
    clock: Arc<dyn Clock>,
    stop: watch::Receiver<bool>,
}

impl PipelineRunner {
    pub fn new(clock: Arc<dyn Clock>, stop: watch::Receiver<bool>) -> Self {
        Self { clock, stop }
    }

    fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Executes every stage after the input node on `items`.
    ///
    /// `executed_input` is the node the task reports as already run; it is
    /// never invoked here. A task naming a node other than the graph's input
    /// node is invalid.
    pub async fn run_from(
        &self,
        graph: &PipelineGraph,
        policy: &RunPolicy,
        executed_input: Option<&str>,
        items: Vec<ContentItem>,
        ctx: &ExecutionContext,
    ) -> StageOutcome {
        let mut outcome = StageOutcome::default();
        let input_id = graph.input_node().id.clone();

        if let Some(executed) = executed_input {
            if executed != input_id {
                outcome.failure = Some(ExecutorFailure::new(
                    "pipeline",
                    FailureKind::InvalidPipeline,
                    format!(
                        "task reports executed input '{executed}' but the pipeline's input node is '{input_id}'"
                    ),
                ));
                return outcome;
            }
        }

        // The input node's output is the task's item batch.
        let mut node_outputs: HashMap<String, Vec<ContentItem>> = HashMap::new();
        node_outputs.insert(input_id.clone(), items);
        let mut completed: HashSet<String> = HashSet::new();
        completed.insert(input_id.clone());
        let mut remaining: Vec<String> = graph
            .topo_order()
            .iter()
            .filter(|id| **id != input_id)
            .cloned()
            .collect();

        while !remaining.is_empty() && outcome.failure.is_none() {
            if self.is_stopped() {
                outcome.failure = Some(ExecutorFailure::new(
                    "pipeline",
                    FailureKind::Transient,
                    "processing interrupted by shutdown",
                ));
                break;
            }

            let ready: Vec<&PipelineNode> = remaining
                .iter()
                .filter_map(|id| graph.node(id))
                .filter(|node| {
                    graph
                        .predecessors(&node.id)
                        .iter()
                        .all(|pred| completed.contains(&pred.id))
                })
                .collect();
            if ready.is_empty() {
                outcome.failure = Some(ExecutorFailure::new(
                    "pipeline",
                    FailureKind::InvalidPipeline,
                    "pipeline contains executors unreachable from the input node",
                ));
                break;
            }

            let wave = ready.into_iter().map(|node| {
                // A join node sees the concatenation of its predecessors'
                // outputs, in predecessor order.
                let inputs: Vec<ContentItem> = graph
                    .predecessors(&node.id)
                    .iter()
                    .flat_map(|pred| node_outputs.get(&pred.id).cloned().unwrap_or_default())
                    .collect();
                self.invoke_node(node, policy, inputs, ctx)
            });
            let runs: Vec<NodeRun> = futures::stream::iter(wave)
                .buffer_unordered(graph.max_parallel())
                .collect()
                .await;

            for run in runs {
                outcome.events.extend(run.events);
                outcome.outputs.push(run.output);
                match run.result {
                    Ok(processed) => {
                        remaining.retain(|id| id != &run.node_id);
                        node_outputs.insert(run.node_id.clone(), processed);
                        completed.insert(run.node_id);
                    }
                    Err(failure) if outcome.failure.is_none() => {
                        outcome.failure = Some(failure);
                    }
                    Err(_) => {}
                }
            }
        }

        // Final items are whatever the sink nodes (no successors) produced.
        for id in graph.topo_order() {
            if graph.successors(id).is_empty() && completed.contains(id) {
                if let Some(items) = node_outputs.get(id) {
                    outcome.items.extend(items.iter().cloned());
                }
            }
        }

        let now = self.clock.now();
        match &outcome.failure {
            None => outcome
                .events
                .push(ExecutionEvent::new(event_types::PIPELINE_COMPLETED, now)),
            Some(failure) => outcome.events.push(
                ExecutionEvent::new(event_types::PIPELINE_FAILED, now)
                    .with_error(failure.to_string()),
            ),
        }
        outcome
    }

    /// Executes only the input node, returning its lazy item stream and
    /// watermark. The per-invocation policy applies to the `fetch` call.
    pub async fn run_input_only(
        &self,
        graph: &PipelineGraph,
        policy: &RunPolicy,
        ctx: &ExecutionContext,
        checkpoint: Option<&VaultCrawlCheckpoint>,
    ) -> Result<InputBatch, ExecutorFailure> {
        let node = graph.input_node();
        let executor = match registry::build_input_executor(&node.executor_type, node.settings.clone())
        {
            None => {
                return Err(ExecutorFailure::new(
                    &node.id,
                    FailureKind::InvalidPipeline,
                    format!("unknown input executor type '{}'", node.executor_type),
                ))
            }
            Some(Err(error)) => return Err(error.into_failure(&node.id)),
            Some(Ok(executor)) => executor,
        };

        let mut attempt: u32 = 0;
        loop {
            match tokio::time::timeout(policy.timeout, executor.fetch(ctx, checkpoint)).await {
                Ok(Ok(batch)) => return Ok(batch),
                Ok(Err(error)) => {
                    let kind = error.kind();
                    if kind.is_retriable() && attempt < policy.retries {
                        attempt += 1;
                        counter!("contentflow_executor_retries_total").increment(1);
                        debug!(executor = %node.id, attempt, error = %error, "retrying input fetch");
                        self.clock.sleep(policy.backoff(attempt)).await;
                        continue;
                    }
                    return Err(error.into_failure(&node.id));
                }
                Err(_elapsed) => {
                    if attempt < policy.retries {
                        attempt += 1;
                        counter!("contentflow_executor_retries_total").increment(1);
                        debug!(executor = %node.id, attempt, "input fetch timed out, retrying");
                        self.clock.sleep(policy.backoff(attempt)).await;
                        continue;
                    }
                    return Err(ExecutorFailure::new(
                        &node.id,
                        FailureKind::Timeout,
                        format!("input fetch timed out after {:?}", policy.timeout),
                    ));
                }
            }
        }
    }

    /// Runs one node to completion: instantiate, attempt with
    /// timeout/retries, teardown, and report events plus output.
    async fn invoke_node(
        &self,
        node: &PipelineNode,
        policy: &RunPolicy,
        items: Vec<ContentItem>,
        ctx: &ExecutionContext,
    ) -> NodeRun {
        let started_at = self.clock.now();
        let started = std::time::Instant::now();
        let mut events = vec![ExecutionEvent::for_executor(
            event_types::EXECUTOR_STARTED,
            &node.id,
            started_at,
        )];

        let executor = match registry::build_executor(&node.executor_type, node.settings.clone()) {
            None => {
                let failure = ExecutorFailure::new(
                    &node.id,
                    FailureKind::InvalidPipeline,
                    format!("unknown executor type '{}'", node.executor_type),
                );
                return self.failed_run(node, events, failure, started_at, started);
            }
            Some(Err(error)) => {
                let failure = error.into_failure(&node.id);
                return self.failed_run(node, events, failure, started_at, started);
            }
            Some(Ok(executor)) => executor,
        };

        let mut attempt: u32 = 0;
        let result = loop {
            match tokio::time::timeout(policy.timeout, executor.process(items.clone(), ctx)).await {
                Ok(Ok(processed)) => break Ok(processed),
                Ok(Err(error)) => {
                    let kind = error.kind();
                    if kind.is_retriable() && attempt < policy.retries {
                        attempt += 1;
                        counter!("contentflow_executor_retries_total").increment(1);
                        events.push(
                            ExecutionEvent::for_executor(
                                event_types::EXECUTOR_RETRYING,
                                &node.id,
                                self.clock.now(),
                            )
                            .with_error(error.to_string()),
                        );
                        self.clock.sleep(policy.backoff(attempt)).await;
                        continue;
                    }
                    break Err(error.into_failure(&node.id));
                }
                Err(_elapsed) => {
                    if attempt < policy.retries {
                        attempt += 1;
                        counter!("contentflow_executor_retries_total").increment(1);
                        events.push(
                            ExecutionEvent::for_executor(
                                event_types::EXECUTOR_RETRYING,
                                &node.id,
                                self.clock.now(),
                            )
                            .with_error(format!("timed out after {:?}", policy.timeout)),
                        );
                        self.clock.sleep(policy.backoff(attempt)).await;
                        continue;
                    }
                    break Err(ExecutorFailure::new(
                        &node.id,
                        FailureKind::Timeout,
                        format!("executor timed out after {:?}", policy.timeout),
                    ));
                }
            }
        };

        if let Err(error) = executor.teardown().await {
            warn!(executor = %node.id, error = %error, "executor teardown failed");
        }

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        match result {
            Ok(processed) => {
                events.push(ExecutionEvent::for_executor(
                    event_types::EXECUTOR_COMPLETED,
                    &node.id,
                    self.clock.now(),
                ));
                let data = if policy.capture_output {
                    serde_json::to_value(&processed).ok()
                } else {
                    Some(serde_json::json!({ "item_count": processed.len() }))
                };
                NodeRun {
                    node_id: node.id.clone(),
                    result: Ok(processed),
                    events,
                    output: ExecutorOutput {
                        executor_id: node.id.clone(),
                        status: ExecutorOutputStatus::Completed,
                        timestamp: started_at,
                        data,
                        error: None,
                        duration_ms: Some(duration_ms),
                    },
                }
            }
            Err(failure) => {
                events.push(
                    ExecutionEvent::for_executor(
                        event_types::EXECUTOR_FAILED,
                        &node.id,
                        self.clock.now(),
                    )
                    .with_error(failure.to_string()),
                );
                NodeRun {
                    node_id: node.id.clone(),
                    result: Err(failure.clone()),
                    events,
                    output: ExecutorOutput {
                        executor_id: node.id.clone(),
                        status: ExecutorOutputStatus::Failed,
                        timestamp: started_at,
                        data: None,
                        error: Some(failure.message),
                        duration_ms: Some(duration_ms),
                    },
                }
            }
        }
    }

    fn failed_run(
        &self,
        node: &PipelineNode,
        mut events: Vec<ExecutionEvent>,
        failure: ExecutorFailure,
        started_at: chrono::DateTime<chrono::Utc>,
        started: std::time::Instant,
    ) -> NodeRun {
        events.push(
            ExecutionEvent::for_executor(event_types::EXECUTOR_FAILED, &node.id, self.clock.now())
                .with_error(failure.to_string()),
        );
        NodeRun {
            node_id: node.id.clone(),
            result: Err(failure.clone()),
            events,
            output: ExecutorOutput {
                executor_id: node.id.clone(),
                status: ExecutorOutputStatus::Failed,
                timestamp: started_at,
                data: None,
                error: Some(failure.message),
                duration_ms: Some(started.elapsed().as_secs_f64() * 1000.0),
            },
        }
    }
}
