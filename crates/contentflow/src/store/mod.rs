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

//! Typed store accessors over the document registry.
//!
//! [`Stores`] is the entry point: cheap to clone, one accessor per record
//! family. All writes that can race between workers (execution appends, lock
//! acquisition/steal, checkpoint advance) go through the registry's
//! ETag-conditional primitives with bounded retry.
//!
//! ```rust,ignore
//! let stores = ctx.stores();
//! let pipelines = stores.pipelines().list_enabled().await?;
//! stores.executions().mark_running(&execution_id).await?;
//! ```

pub mod checkpoints;
pub mod executions;
pub mod locks;
pub mod pipelines;
pub mod vaults;

pub use checkpoints::CheckpointStore;
pub use executions::ExecutionStore;
pub use locks::LockStore;
pub use pipelines::PipelineStore;
pub use vaults::VaultStore;

use std::sync::Arc;

use crate::capabilities::{Clock, Registry};
use crate::config::ContainerNames;

/// How many times a conditional replace is retried before giving up.
pub(crate) const MAX_CONFLICT_RETRIES: usize = 8;

/// Registry handle plus container layout; the root of all typed accessors.
#[derive(Clone)]
pub struct Stores {
    pub(crate) registry: Arc<dyn Registry>,
    pub(crate) containers: ContainerNames,
    pub(crate) clock: Arc<dyn Clock>,
}

impl Stores {
    pub fn new(registry: Arc<dyn Registry>, containers: ContainerNames, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry,
            containers,
            clock,
        }
    }

    pub fn pipelines(&self) -> PipelineStore<'_> {
        PipelineStore::new(self)
    }

    pub fn vaults(&self) -> VaultStore<'_> {
        VaultStore::new(self)
    }

    pub fn executions(&self) -> ExecutionStore<'_> {
        ExecutionStore::new(self)
    }

    pub fn locks(&self) -> LockStore<'_> {
        LockStore::new(self)
    }

    pub fn checkpoints(&self) -> CheckpointStore<'_> {
        CheckpointStore::new(self)
    }
}
