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

//! Capability interfaces the execution fabric depends on.
//!
//! The core never talks to a cloud SDK directly. Everything it needs from
//! the outside world is expressed as one of five narrow traits:
//!
//! - [`Queue`]: at-least-once task queue with visibility timeouts
//! - [`Registry`]: partitioned document store with optimistic concurrency
//! - [`BlobStore`]: flat byte store used by executors
//! - [`Clock`]: time source and sleeping, injectable for tests
//! - [`Identity`]: credential producer for the above
//!
//! These traits are the only observable side channels of the core. The
//! [`memory`] module provides complete in-process implementations used by
//! tests and single-process local runs (their state does not span OS
//! processes); provider-backed implementations live outside this crate.

pub mod blob;
pub mod clock;
pub mod identity;
pub mod memory;
pub mod queue;
pub mod registry;

pub use blob::{BlobEntry, BlobStore};
pub use clock::{Clock, SystemClock};
pub use identity::{Credential, Identity};
pub use queue::{Queue, QueueLease};
pub use registry::{CreateOutcome, Document, DocumentFilter, Registry, ReplaceOutcome};
