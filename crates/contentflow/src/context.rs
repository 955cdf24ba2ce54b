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

//! Application context: the one bundle of capabilities handed to workers.
//!
//! There are no global singletons. The context is constructed once per
//! process from settings and cloned into each worker; every handle inside is
//! an `Arc`, so clones are cheap.

use std::sync::Arc;

use crate::capabilities::memory::{MemoryBlobStore, MemoryQueue, MemoryRegistry, StaticIdentity};
use crate::capabilities::{BlobStore, Clock, Identity, Queue, Registry, SystemClock};
use crate::config::{BackendKind, WorkerSettings};
use crate::store::Stores;

/// Capability bundle shared by all workers in a process.
#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<WorkerSettings>,
    pub queue: Arc<dyn Queue>,
    pub registry: Arc<dyn Registry>,
    pub blob: Arc<dyn BlobStore>,
    pub identity: Arc<dyn Identity>,
    pub clock: Arc<dyn Clock>,
}

impl AppContext {
    pub fn new(
        settings: WorkerSettings,
        queue: Arc<dyn Queue>,
        registry: Arc<dyn Registry>,
        blob: Arc<dyn BlobStore>,
        identity: Arc<dyn Identity>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            queue,
            registry,
            blob,
            identity,
            clock,
        }
    }

    /// Builds the context for the configured backend.
    pub fn from_settings(settings: WorkerSettings) -> Self {
        match settings.backend {
            BackendKind::Memory => Self::in_memory(settings),
        }
    }

    /// A fully in-process context: the test fixture and the backend for
    /// single-process local runs. Its state is confined to this process;
    /// worker roles spawned as separate processes each get their own
    /// disconnected instance (settings validation warns when that topology
    /// is configured).
    pub fn in_memory(settings: WorkerSettings) -> Self {
        Self::in_memory_with_clock(settings, Arc::new(SystemClock))
    }

    /// In-process context over an injected clock; tests pass a
    /// [`ManualClock`](crate::capabilities::memory::ManualClock) here.
    pub fn in_memory_with_clock(settings: WorkerSettings, clock: Arc<dyn Clock>) -> Self {
        let registry = MemoryRegistry::with_containers(settings.containers.all());
        Self {
            queue: Arc::new(MemoryQueue::new(clock.clone())),
            registry: Arc::new(registry),
            blob: Arc::new(MemoryBlobStore::new(clock.clone())),
            identity: Arc::new(StaticIdentity::default()),
            settings: Arc::new(settings),
            clock,
        }
    }

    /// Typed store accessors over this context's registry.
    pub fn stores(&self) -> Stores {
        Stores::new(
            self.registry.clone(),
            self.settings.containers.clone(),
            self.clock.clone(),
        )
    }
}
