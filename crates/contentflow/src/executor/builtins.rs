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

//! Built-in executors.
//!
//! A deliberately small set: two input executors (`static_source`,
//! `blob_source`), two transforms (`field_mapper`, `content_tagger`) and one
//! sink (`blob_sink`). The full extractor/chunker/embedder library lives
//! outside this crate; these cover local runs, demos and the test suite, and
//! exercise the blob-store capability end to end.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::sync::Once;

use super::registry::{register_executor, register_input_executor};
use super::{ExecutionContext, Executor, ExecutorSettings, InputBatch, InputExecutor};
use crate::capabilities::{BlobStore, Clock};
use crate::error::ExecutorError;
use crate::models::{ContentIdentifier, ContentItem, ContentStatus, VaultCrawlCheckpoint};

static REGISTER: Once = Once::new();

/// Installs the built-in executor types into the global registry. Safe to
/// call more than once.
pub fn register_builtin_executors() {
    REGISTER.call_once(|| {
        register_input_executor("static_source", |settings| {
            Ok(Arc::new(StaticSource::from_settings(&settings)?))
        });
        register_input_executor("blob_source", |settings| {
            Ok(Arc::new(BlobSource::from_settings(&settings)?))
        });
        register_executor("field_mapper", |settings| {
            Ok(Arc::new(FieldMapper::from_settings(&settings)?))
        });
        register_executor("content_tagger", |settings| {
            Ok(Arc::new(ContentTagger::from_settings(&settings)?))
        });
        register_executor("blob_sink", |settings| {
            Ok(Arc::new(BlobSink::from_settings(&settings)?))
        });
    });
}

fn checkpoint_ts(checkpoint: Option<&VaultCrawlCheckpoint>) -> Option<DateTime<Utc>> {
    checkpoint.map(|cp| cp.checkpoint_timestamp)
}

/// Input executor emitting items declared in its settings.
///
/// ```yaml
/// type: static_source
/// settings:
///   source_name: fixtures
///   items:
///     - canonical_id: doc-1
///       path: docs/a.pdf
///       available_at: "2026-01-01T00:00:00Z"   # optional watermark filter
/// ```
///
/// Items carrying `available_at` are emitted only when newer than the
/// checkpoint; items without it are emitted on every crawl.
pub struct StaticSource {
    source_name: String,
    items: Vec<Value>,
}

impl StaticSource {
    pub fn from_settings(settings: &ExecutorSettings) -> Result<Self, ExecutorError> {
        Ok(Self {
            source_name: settings.str("source_name").unwrap_or("static").to_string(),
            items: settings.array("items").cloned().unwrap_or_default(),
        })
    }
}

#[async_trait]
impl InputExecutor for StaticSource {
    fn executor_type(&self) -> &str {
        "static_source"
    }

    async fn fetch(
        &self,
        ctx: &ExecutionContext,
        checkpoint: Option<&VaultCrawlCheckpoint>,
    ) -> Result<InputBatch, ExecutorError> {
        let since = checkpoint_ts(checkpoint);
        let mut items = Vec::new();
        for entry in &self.items {
            let canonical_id = entry
                .get("canonical_id")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    ExecutorError::Settings("static_source items require 'canonical_id'".into())
                })?;

            if let (Some(since), Some(available_raw)) =
                (since, entry.get("available_at").and_then(Value::as_str))
            {
                let available: DateTime<Utc> = available_raw.parse().map_err(|_| {
                    ExecutorError::Settings(format!(
                        "invalid available_at timestamp on item '{canonical_id}'"
                    ))
                })?;
                if available <= since {
                    continue;
                }
            }

            let mut item = ContentItem::new(ContentIdentifier {
                canonical_id: canonical_id.to_string(),
                unique_id: entry
                    .get("unique_id")
                    .and_then(Value::as_str)
                    .unwrap_or(canonical_id)
                    .to_string(),
                source_name: self.source_name.clone(),
                source_type: "static".to_string(),
                path: entry.get("path").and_then(Value::as_str).map(str::to_owned),
            });
            if let Some(Value::Object(data)) = entry.get("data") {
                item.data = data.clone();
            }
            items.push(Ok(item));
        }

        Ok(InputBatch {
            items: Box::pin(futures::stream::iter(items)),
            watermark: ctx.clock.now(),
        })
    }
}

/// Input executor discovering content from the blob store.
///
/// Lists blobs under `prefix` and emits one item per blob modified after
/// the checkpoint watermark.
pub struct BlobSource {
    prefix: String,
    source_name: String,
}

impl BlobSource {
    pub fn from_settings(settings: &ExecutorSettings) -> Result<Self, ExecutorError> {
        Ok(Self {
            prefix: settings.str("prefix").unwrap_or_default().to_string(),
            source_name: settings.str("source_name").unwrap_or("blob").to_string(),
        })
    }
}

#[async_trait]
impl InputExecutor for BlobSource {
    fn executor_type(&self) -> &str {
        "blob_source"
    }

    async fn fetch(
        &self,
        ctx: &ExecutionContext,
        checkpoint: Option<&VaultCrawlCheckpoint>,
    ) -> Result<InputBatch, ExecutorError> {
        // The watermark is taken before listing: anything modified after it
        // will be picked up by the next crawl.
        let watermark = ctx.clock.now();
        let since = checkpoint_ts(checkpoint);
        let entries = ctx.blob.list(&self.prefix).await?;

        let source_name = self.source_name.clone();
        let items: Vec<Result<ContentItem, ExecutorError>> = entries
            .into_iter()
            .filter(|entry| since.map_or(true, |since| entry.last_modified > since))
            .map(|entry| {
                let mut item = ContentItem::new(ContentIdentifier {
                    canonical_id: entry.path.clone(),
                    unique_id: format!("{}@{}", entry.path, entry.last_modified.timestamp()),
                    source_name: source_name.clone(),
                    source_type: "blob".to_string(),
                    path: Some(entry.path.clone()),
                });
                item.data
                    .insert("path".to_string(), Value::String(entry.path));
                item.data
                    .insert("size_bytes".to_string(), Value::from(entry.len));
                item.data.insert(
                    "last_modified".to_string(),
                    Value::String(entry.last_modified.to_rfc3339()),
                );
                Ok(item)
            })
            .collect();

        Ok(InputBatch {
            items: Box::pin(futures::stream::iter(items)),
            watermark,
        })
    }
}

/// Copies or renames fields inside each item's `data` map.
///
/// ```yaml
/// type: field_mapper
/// settings:
///   remove_source: true
///   mappings:
///     - { from: "path", to: "source_path" }
/// ```
pub struct FieldMapper {
    mappings: Vec<(String, String)>,
    remove_source: bool,
}

impl FieldMapper {
    pub fn from_settings(settings: &ExecutorSettings) -> Result<Self, ExecutorError> {
        let raw = settings
            .array("mappings")
            .ok_or_else(|| ExecutorError::Settings("field_mapper requires 'mappings'".into()))?;

        let mut mappings = Vec::with_capacity(raw.len());
        for entry in raw {
            let from = entry.get("from").and_then(Value::as_str);
            let to = entry.get("to").and_then(Value::as_str);
            match (from, to) {
                (Some(from), Some(to)) => mappings.push((from.to_string(), to.to_string())),
                _ => {
                    return Err(ExecutorError::Settings(
                        "field_mapper mappings require 'from' and 'to'".into(),
                    ))
                }
            }
        }
        Ok(Self {
            mappings,
            remove_source: settings.bool("remove_source").unwrap_or(false),
        })
    }
}

#[async_trait]
impl Executor for FieldMapper {
    fn executor_type(&self) -> &str {
        "field_mapper"
    }

    async fn process(
        &self,
        mut items: Vec<ContentItem>,
        _ctx: &ExecutionContext,
    ) -> Result<Vec<ContentItem>, ExecutorError> {
        for item in &mut items {
            for (from, to) in &self.mappings {
                let value = if self.remove_source {
                    item.data.remove(from)
                } else {
                    item.data.get(from).cloned()
                };
                if let Some(value) = value {
                    item.data.insert(to.clone(), value);
                }
            }
        }
        Ok(items)
    }
}

/// Stamps static tags into each item's summary data.
pub struct ContentTagger {
    tags: serde_json::Map<String, Value>,
}

impl ContentTagger {
    pub fn from_settings(settings: &ExecutorSettings) -> Result<Self, ExecutorError> {
        let tags = match settings.get("tags") {
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(ExecutorError::Settings(
                    "content_tagger 'tags' must be a mapping".into(),
                ))
            }
            None => serde_json::Map::new(),
        };
        Ok(Self { tags })
    }
}

#[async_trait]
impl Executor for ContentTagger {
    fn executor_type(&self) -> &str {
        "content_tagger"
    }

    async fn process(
        &self,
        mut items: Vec<ContentItem>,
        _ctx: &ExecutionContext,
    ) -> Result<Vec<ContentItem>, ExecutorError> {
        for item in &mut items {
            for (key, value) in &self.tags {
                item.summary_data.insert(key.clone(), value.clone());
            }
        }
        Ok(items)
    }
}

/// Writes each item as JSON to the blob store and records the output path.
pub struct BlobSink {
    prefix: String,
    content_type: String,
}

impl BlobSink {
    pub fn from_settings(settings: &ExecutorSettings) -> Result<Self, ExecutorError> {
        Ok(Self {
            prefix: settings.str("prefix").unwrap_or("output/").to_string(),
            content_type: settings
                .str("content_type")
                .unwrap_or("application/json")
                .to_string(),
        })
    }
}

#[async_trait]
impl Executor for BlobSink {
    fn executor_type(&self) -> &str {
        "blob_sink"
    }

    async fn process(
        &self,
        mut items: Vec<ContentItem>,
        ctx: &ExecutionContext,
    ) -> Result<Vec<ContentItem>, ExecutorError> {
        for item in &mut items {
            let path = format!("{}{}.json", self.prefix, item.id.canonical_id);
            let bytes = serde_json::to_vec(&item)
                .map_err(|e| ExecutorError::Domain(format!("item serialization failed: {e}")))?;
            ctx.blob.put(&path, bytes, Some(&self.content_type)).await?;

            item.summary_data
                .insert("output_path".to_string(), Value::String(path));
            item.status = ContentStatus::Completed;
        }
        Ok(items)
    }
}
