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

//! Held vault lease with background renewal.
//!
//! While a crawl runs, the lease's `expires_at` is renewed every `TTL/3` so
//! a healthy holder is never stolen from; a crashed holder stops renewing
//! and the lease becomes stealable after the TTL.

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::capabilities::Clock;
use crate::error::StoreError;
use crate::store::Stores;

/// An acquired vault lock plus its refresher task. Must be released
/// explicitly; dropping without release leaves the lock to expire by TTL
/// (which is exactly the crash behavior peers recover from).
pub struct VaultLease {
    key: String,
    holder: String,
    stores: Stores,
    refresher: JoinHandle<()>,
}

impl VaultLease {
    /// Tries to acquire the lease; `None` means another worker holds it.
    pub async fn acquire(
        stores: &Stores,
        key: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<Option<Self>, StoreError> {
        if stores.locks().try_acquire(key, holder, ttl).await?.is_none() {
            return Ok(None);
        }

        let refresher = spawn_refresher(stores.clone(), key.to_string(), holder.to_string(), ttl);
        Ok(Some(Self {
            key: key.to_string(),
            holder: holder.to_string(),
            stores: stores.clone(),
            refresher,
        }))
    }

    /// Stops renewal and deletes the lock so peers can proceed before the
    /// TTL would have lapsed.
    pub async fn release(self) -> Result<(), StoreError> {
        self.refresher.abort();
        self.stores.locks().release(&self.key, &self.holder).await
    }
}

fn spawn_refresher(stores: Stores, key: String, holder: String, ttl: Duration) -> JoinHandle<()> {
    let interval = ttl / 3;
    tokio::spawn(async move {
        loop {
            stores.clock.sleep(interval).await;
            match stores.locks().refresh(&key, &holder, ttl).await {
                Ok(true) => debug!(key = %key, "renewed vault lease"),
                Ok(false) => {
                    warn!(key = %key, "vault lease no longer held, stopping renewal");
                    break;
                }
                Err(error) => {
                    warn!(key = %key, error = %error, "vault lease renewal failed");
                }
            }
        }
    })
}
