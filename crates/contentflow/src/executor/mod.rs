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

//! Executor contract and runtime.
//!
//! An executor is a unit of pipeline work: it is constructed from the
//! settings of its pipeline node and processes batches of content items.
//! Input executors are the special case that *produce* items from an
//! external source instead of transforming them; every pipeline has exactly
//! one.
//!
//! Executor implementations are looked up through the compile-time
//! [`registry`]: a mapping from `executor_type` string to a factory
//! function, populated at program init. The [`runtime`] module drives a
//! parsed [`PipelineGraph`](crate::graph::PipelineGraph) over items using
//! these traits.

pub mod builtins;
pub mod registry;
pub mod runtime;

pub use runtime::{PipelineRunner, RunPolicy, StageOutcome};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::capabilities::{BlobStore, Clock, Identity};
use crate::error::ExecutorError;
use crate::models::{ContentItem, VaultCrawlCheckpoint};

/// Free-form settings attached to a pipeline node, with typed accessors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorSettings(pub Map<String, Value>);

impl ExecutorSettings {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    pub fn array(&self, key: &str) -> Option<&Vec<Value>> {
        self.0.get(key).and_then(Value::as_array)
    }

    /// A mandatory string setting, or a settings error naming the key.
    pub fn require_str(&self, key: &str) -> Result<&str, ExecutorError> {
        self.str(key)
            .ok_or_else(|| ExecutorError::Settings(format!("missing required setting '{key}'")))
    }
}

/// Capabilities and identity available to an executor invocation.
///
/// Executors reach the blob store and clock through here; the queue and
/// registry are deliberately absent (they belong to the workers).
#[derive(Clone)]
pub struct ExecutionContext {
    pub pipeline_id: String,
    pub pipeline_name: String,
    pub execution_id: String,
    pub vault_id: Option<String>,
    pub worker_id: String,
    pub blob: Arc<dyn BlobStore>,
    pub clock: Arc<dyn Clock>,
    pub identity: Arc<dyn Identity>,
}

/// A transformation or sink stage.
#[async_trait]
pub trait Executor: Send + Sync {
    fn executor_type(&self) -> &str;

    /// Processes a batch of items, returning the transformed batch.
    async fn process(
        &self,
        items: Vec<ContentItem>,
        ctx: &ExecutionContext,
    ) -> Result<Vec<ContentItem>, ExecutorError>;

    /// Releases any resources held by the instance. Called once per
    /// invocation after the final attempt.
    async fn teardown(&self) -> Result<(), ExecutorError> {
        Ok(())
    }
}

/// Lazily produced items from one input-executor crawl, plus the watermark
/// that becomes the next checkpoint once the caller has drained the stream
/// (or otherwise knows the fan-out is safe).
pub struct InputBatch {
    pub items: BoxStream<'static, Result<ContentItem, ExecutorError>>,
    pub watermark: DateTime<Utc>,
}

/// The one item-producing stage of a pipeline.
#[async_trait]
pub trait InputExecutor: Send + Sync {
    fn executor_type(&self) -> &str;

    /// Discovers content since `checkpoint`. The stream may be abandoned
    /// early by the caller; no checkpoint is advanced in that case.
    async fn fetch(
        &self,
        ctx: &ExecutionContext,
        checkpoint: Option<&VaultCrawlCheckpoint>,
    ) -> Result<InputBatch, ExecutorError>;
}
