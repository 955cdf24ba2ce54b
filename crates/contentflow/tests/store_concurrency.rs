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

//! Concurrency tests for the store layer.
//!
//! These verify the optimistic-concurrency contracts: concurrent execution
//! appends all survive via ETag retry, and an expired lock is stolen by at
//! most one contender.

mod common;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

use contentflow::context::AppContext;
use contentflow::models::{ExecutionEvent, ExecutionStatus, VaultExecution};
use contentflow::store::executions::ExecutionUpdate;

use common::{fast_settings, test_pipeline, test_vault};

/// Concurrent appends from several "workers" must not lose events: every
/// append lands through the ETag-conditional replace retry.
#[tokio::test]
async fn concurrent_execution_appends_all_survive() {
    let ctx = AppContext::in_memory(fast_settings());
    let pipeline = test_pipeline("p1", "executors: []");
    let vault = test_vault("v1", "p1");

    let execution = VaultExecution::new(&pipeline, &vault, "source-0");
    let execution_id = execution.id.clone();
    ctx.stores().executions().create(&execution).await.unwrap();

    const NUM_WORKERS: usize = 4;
    const EVENTS_PER_WORKER: usize = 5;
    let barrier = Arc::new(Barrier::new(NUM_WORKERS));
    let mut handles = Vec::new();

    for worker in 0..NUM_WORKERS {
        let ctx = ctx.clone();
        let execution_id = execution_id.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            for event in 0..EVENTS_PER_WORKER {
                let update = ExecutionUpdate {
                    events: vec![ExecutionEvent::new(
                        format!("worker-{worker}-event-{event}"),
                        Utc::now(),
                    )],
                    outputs: Vec::new(),
                    processing_worker_id: Some(format!("processing-{worker}")),
                    terminal: None,
                };
                ctx.stores()
                    .executions()
                    .append_results(&execution_id, &update)
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stored: VaultExecution = ctx
        .stores()
        .executions()
        .get(&execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.events.len(), NUM_WORKERS * EVENTS_PER_WORKER);
}

/// A failed terminal status sticks even when a completed append races it
/// afterwards (monotonic merge).
#[tokio::test]
async fn terminal_status_never_goes_backwards() {
    let ctx = AppContext::in_memory(fast_settings());
    let pipeline = test_pipeline("p2", "executors: []");
    let vault = test_vault("v2", "p2");

    let execution = VaultExecution::new(&pipeline, &vault, "source-0");
    let id = execution.id.clone();
    let stores = ctx.stores();
    stores.executions().create(&execution).await.unwrap();
    stores.executions().mark_running(&id).await.unwrap();
    stores.executions().mark_failed(&id, "item 2 exploded").await.unwrap();

    // A straggling worker reporting success must not overwrite the failure.
    let update = ExecutionUpdate {
        events: Vec::new(),
        outputs: Vec::new(),
        processing_worker_id: None,
        terminal: Some((ExecutionStatus::Completed, None)),
    };
    stores.executions().append_results(&id, &update).await.unwrap();

    let stored: VaultExecution = stores.executions().get(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, ExecutionStatus::Failed);
    assert_eq!(stored.error.as_deref(), Some("item 2 exploded"));
}

/// Exactly one of several concurrent contenders steals an expired lock.
#[tokio::test]
async fn expired_lock_is_stolen_by_exactly_one_contender() {
    let ctx = AppContext::in_memory(fast_settings());
    let stores = ctx.stores();

    // A lease that already lapsed (zero TTL).
    let acquired = stores
        .locks()
        .try_acquire("lock-key", "source-dead", Duration::ZERO)
        .await
        .unwrap();
    assert!(acquired.is_some());
    tokio::time::sleep(Duration::from_millis(5)).await;

    const NUM_CONTENDERS: usize = 6;
    let barrier = Arc::new(Barrier::new(NUM_CONTENDERS));
    let mut handles = Vec::new();
    for contender in 0..NUM_CONTENDERS {
        let ctx = ctx.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            ctx.stores()
                .locks()
                .try_acquire("lock-key", &format!("source-{contender}"), Duration::from_secs(30))
                .await
                .unwrap()
                .is_some()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1, "exactly one contender may steal an expired lock");
}

/// Refresh keeps a lease alive for its holder only.
#[tokio::test]
async fn refresh_is_holder_scoped() {
    let ctx = AppContext::in_memory(fast_settings());
    let stores = ctx.stores();

    stores
        .locks()
        .try_acquire("lock-key-2", "source-0", Duration::from_secs(30))
        .await
        .unwrap()
        .unwrap();

    assert!(stores
        .locks()
        .refresh("lock-key-2", "source-0", Duration::from_secs(30))
        .await
        .unwrap());
    assert!(!stores
        .locks()
        .refresh("lock-key-2", "source-1", Duration::from_secs(30))
        .await
        .unwrap());

    // Release by a non-holder is a no-op; by the holder it frees the key.
    stores.locks().release("lock-key-2", "source-1").await.unwrap();
    assert!(stores.locks().get("lock-key-2").await.unwrap().is_some());
    stores.locks().release("lock-key-2", "source-0").await.unwrap();
    assert!(stores.locks().get("lock-key-2").await.unwrap().is_none());
}
