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

//! Persistent records and queue message types.
//!
//! Everything in this module is a plain serde record whose JSON shape is the
//! wire/storage contract: registry documents (pipelines, vaults, executions,
//! locks, checkpoints), content items, and the versioned task envelope.

pub mod checkpoint;
pub mod content;
pub mod execution;
pub mod lock;
pub mod pipeline;
pub mod task;
pub mod vault;

pub use checkpoint::{checkpoint_id, VaultCrawlCheckpoint};
pub use content::{ContentIdentifier, ContentItem, ContentStatus};
pub use execution::{
    ExecutionEvent, ExecutionStatus, ExecutorOutput, ExecutorOutputStatus, VaultExecution,
};
pub use lock::{vault_lock_key, VaultExecutionLock};
pub use pipeline::Pipeline;
pub use task::{ContentProcessingTask, TaskMessage, TaskPriority, TaskType};
pub use vault::Vault;
