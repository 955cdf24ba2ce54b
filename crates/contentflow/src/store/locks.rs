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

//! Distributed lock access.
//!
//! Acquisition is `create_if_absent`; on conflict the existing lock may be
//! stolen only when its `expires_at` is in the past, via an ETag-conditional
//! replace so two stealers cannot both win. Holder identity never grants a
//! steal.

use std::time::Duration;
use tracing::debug;

use super::Stores;
use crate::capabilities::clock::chrono_duration;
use crate::capabilities::{Clock, CreateOutcome, Registry, ReplaceOutcome};
use crate::error::StoreError;
use crate::models::VaultExecutionLock;

#[derive(Clone)]
pub struct LockStore<'a> {
    stores: &'a Stores,
}

impl<'a> LockStore<'a> {
    pub fn new(stores: &'a Stores) -> Self {
        Self { stores }
    }

    pub async fn get(&self, key: &str) -> Result<Option<VaultExecutionLock>, StoreError> {
        let container = &self.stores.containers.locks;
        let doc = self.stores.registry.get(container, key).await?;
        match doc {
            Some(doc) => Ok(Some(doc.to_record()?)),
            None => Ok(None),
        }
    }

    /// Attempts to take the lock for `holder` with the given TTL.
    ///
    /// Returns `None` when another worker holds a live lease. An expired
    /// lease is stolen with a conditional replace; losing that race also
    /// yields `None`.
    pub async fn try_acquire(
        &self,
        key: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<Option<VaultExecutionLock>, StoreError> {
        let container = &self.stores.containers.locks;
        let now = self.stores.clock.now();
        let lock = VaultExecutionLock::new(key, holder, now, now + chrono_duration(ttl));
        let body = serde_json::to_value(&lock)?;

        match self
            .stores
            .registry
            .create_if_absent(container, body.clone())
            .await?
        {
            CreateOutcome::Created => return Ok(Some(lock)),
            CreateOutcome::Conflict => {}
        }

        let Some(existing_doc) = self.stores.registry.get(container, key).await? else {
            // Released between our create attempt and this read; treat as
            // contended and come back next tick.
            return Ok(None);
        };
        let existing: VaultExecutionLock = existing_doc.to_record()?;
        if !existing.is_expired(now) {
            return Ok(None);
        }

        debug!(
            key,
            previous_holder = %existing.holder_worker_id,
            "stealing expired vault lock"
        );
        match self
            .stores
            .registry
            .replace_if(container, body, &existing_doc.etag)
            .await?
        {
            ReplaceOutcome::Replaced(_) => Ok(Some(lock)),
            ReplaceOutcome::EtagMismatch | ReplaceOutcome::Missing => Ok(None),
        }
    }

    /// Extends the lease's expiry. Returns `false` when the lock is gone or
    /// held by someone else (the refresher should stop in that case).
    pub async fn refresh(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool, StoreError> {
        let container = &self.stores.containers.locks;
        let Some(doc) = self.stores.registry.get(container, key).await? else {
            return Ok(false);
        };
        let mut lock: VaultExecutionLock = doc.to_record()?;
        if lock.holder_worker_id != holder {
            return Ok(false);
        }

        lock.expires_at = self.stores.clock.now() + chrono_duration(ttl);
        let body = serde_json::to_value(&lock)?;
        match self
            .stores
            .registry
            .replace_if(container, body, &doc.etag)
            .await?
        {
            ReplaceOutcome::Replaced(_) => Ok(true),
            ReplaceOutcome::EtagMismatch | ReplaceOutcome::Missing => Ok(false),
        }
    }

    /// Releases the lock if still held by `holder`. The holder check keeps a
    /// late release from deleting a lease that was stolen after expiry.
    pub async fn release(&self, key: &str, holder: &str) -> Result<(), StoreError> {
        let container = &self.stores.containers.locks;
        let Some(doc) = self.stores.registry.get(container, key).await? else {
            return Ok(());
        };
        let lock: VaultExecutionLock = doc.to_record()?;
        if lock.holder_worker_id == holder {
            self.stores.registry.delete(container, key).await?;
        }
        Ok(())
    }
}
