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

//! Shared fixtures for the integration tests: an in-memory application
//! context plus registry seeding helpers.

#![allow(dead_code)]

use std::time::Duration;

use contentflow::capabilities::Queue;
use contentflow::config::WorkerSettings;
use contentflow::context::AppContext;
use contentflow::executor::builtins::register_builtin_executors;
use contentflow::models::{ContentIdentifier, ContentItem, Pipeline, TaskMessage, Vault};

/// Settings tuned for fast tests: short poll/tick intervals and a small
/// lock TTL.
pub fn fast_settings() -> WorkerSettings {
    WorkerSettings {
        num_processing_workers: 1,
        num_source_workers: 1,
        queue_poll_interval: Duration::from_millis(20),
        queue_visibility_timeout: Duration::from_secs(30),
        scheduler_sleep_interval: Duration::from_millis(20),
        lock_ttl: Duration::from_millis(400),
        max_task_retries: 2,
        ..WorkerSettings::default()
    }
}

pub fn test_pipeline(id: &str, yaml: &str) -> Pipeline {
    Pipeline {
        id: id.to_string(),
        name: format!("{id}-pipeline"),
        description: String::new(),
        yaml: yaml.to_string(),
        enabled: true,
        retries: 0,
        retry_delay: 1,
        timeout: 5,
        version: "1.0".to_string(),
        tags: Vec::new(),
    }
}

pub fn test_vault(id: &str, pipeline_id: &str) -> Vault {
    Vault {
        id: id.to_string(),
        name: format!("{id}-vault"),
        description: String::new(),
        pipeline_id: pipeline_id.to_string(),
        pipeline_name: None,
        enabled: true,
        save_execution_output: false,
        tags: Vec::new(),
    }
}

pub fn test_item(id: &str) -> ContentItem {
    ContentItem::new(ContentIdentifier {
        canonical_id: id.to_string(),
        unique_id: id.to_string(),
        source_name: "test".to_string(),
        source_type: "static".to_string(),
        path: None,
    })
}

/// In-memory context with the builtin executors registered and the given
/// pipeline/vault seeded.
pub async fn seeded_context(
    settings: WorkerSettings,
    pipeline: &Pipeline,
    vault: &Vault,
) -> AppContext {
    register_builtin_executors();
    let ctx = AppContext::in_memory(settings);
    let stores = ctx.stores();
    stores.pipelines().upsert(pipeline).await.unwrap();
    stores.vaults().upsert(vault).await.unwrap();
    ctx
}

/// Receives every visible queue message (without deleting) and parses the
/// processing-task payloads.
pub async fn peek_tasks(ctx: &AppContext) -> Vec<contentflow::models::ContentProcessingTask> {
    let leases = ctx
        .queue
        .receive(128, Duration::from_millis(1))
        .await
        .unwrap();
    // The tiny visibility hold lapses immediately, so peeking does not
    // steal messages from the code under test.
    tokio::time::sleep(Duration::from_millis(5)).await;
    leases
        .iter()
        .map(|lease| {
            TaskMessage::parse(&lease.body)
                .unwrap()
                .processing_task()
                .unwrap()
        })
        .collect()
}
