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

//! Worker roles.
//!
//! Two long-running loops, each run in its own OS process by the
//! supervisor:
//!
//! - [`ProcessingWorker`] drains the task queue and executes pipeline
//!   stages on content items;
//! - [`SourceScheduler`] polls the registry for due `(pipeline, vault)`
//!   pairs, leases them, runs the input executor and fans out tasks.
//!
//! Both receive an [`AppContext`](crate::context::AppContext) clone and a
//! read-only stop signal; they own nothing of each other.

pub mod lease;
pub mod processing;
pub mod source;

pub use lease::VaultLease;
pub use processing::ProcessingWorker;
pub use source::{CrawlSummary, SourceScheduler, TickSummary};

use tokio::sync::watch;

/// Resolves once the stop signal is set. If the sender is gone without ever
/// requesting a stop, this pends forever rather than firing spuriously.
pub(crate) async fn stopped(stop: &mut watch::Receiver<bool>) {
    if *stop.borrow() {
        return;
    }
    loop {
        if stop.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
        if *stop.borrow() {
            return;
        }
    }
}
