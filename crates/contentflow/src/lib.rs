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

//! # ContentFlow
//!
//! Worker-side execution fabric for ContentFlow content-processing
//! pipelines: user-defined graphs of executors applied to content
//! discovered from external sources.
//!
//! ## Architecture
//!
//! Coordination happens entirely through two shared substrates (a task
//! queue with visibility timeouts and a partitioned document registry with
//! optimistic concurrency), both expressed as narrow [`capabilities`]
//! traits. On top of them:
//!
//! - [`models`] defines the persisted records and the queue envelope;
//! - [`store`] provides typed accessors (executions, locks, checkpoints,
//!   pipelines, vaults) with ETag-conditional writes;
//! - [`graph`] parses pipeline YAML into a validated DAG;
//! - [`executor`] holds the executor traits, the compile-time type
//!   registry, the built-ins, and the [`PipelineRunner`] that drives a
//!   graph over content items with per-invocation timeout and retries;
//! - [`worker`] implements the two long-running roles: the
//!   [`SourceScheduler`] (lease, crawl, fan-out, checkpoint) and the
//!   [`ProcessingWorker`] (dequeue, execute, persist, retry).
//!
//! Process management (supervisor, health API, preflight) lives in the
//! `contentflow-worker` binary crate; this crate is runnable entirely
//! in-process, which is how the test suite exercises it.
//!
//! ## Delivery guarantees
//!
//! At-least-once end to end: every item emitted by a successful crawl is
//! enqueued at least once, a task is deleted from the queue only after a
//! terminal status is persisted or a retry is re-enqueued, and a crawl that
//! dies mid-fan-out is repeated from the previous checkpoint by the next
//! lease holder.
//!
//! ## Example
//!
//! ```rust,no_run
//! use contentflow::config::WorkerSettings;
//! use contentflow::context::AppContext;
//! use contentflow::executor::builtins::register_builtin_executors;
//! use contentflow::worker::SourceScheduler;
//! use tokio::sync::watch;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! register_builtin_executors();
//! let settings = WorkerSettings::from_env()?;
//! let ctx = AppContext::from_settings(settings);
//! let (_stop_tx, stop_rx) = watch::channel(false);
//! SourceScheduler::new(ctx, "source-0", stop_rx).run().await?;
//! # Ok(())
//! # }
//! ```

pub mod capabilities;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod models;
pub mod store;
pub mod worker;

pub use context::AppContext;
pub use error::{ExecutorFailure, FailureKind};
pub use executor::{PipelineRunner, RunPolicy};
pub use graph::PipelineGraph;
pub use worker::{ProcessingWorker, SourceScheduler};
