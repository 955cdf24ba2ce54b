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

//! TTL-based distributed lock record for vault crawls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Deterministic lock document id for a vault.
pub fn vault_lock_key(vault_id: &str) -> String {
    let digest = Sha256::digest(format!("vault:{vault_id}").as_bytes());
    hex::encode(digest)
}

/// A lease over one `(pipeline, vault)` crawl slot. At most one live lock
/// exists per key; expiry makes the key stealable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultExecutionLock {
    pub id: String,
    pub holder_worker_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl VaultExecutionLock {
    pub fn new(
        key: &str,
        holder_worker_id: &str,
        acquired_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: key.to_string(),
            holder_worker_id: holder_worker_id.to_string(),
            acquired_at,
            expires_at,
        }
    }

    /// Whether the lease has lapsed. Stealing is permitted only on expiry,
    /// never based on holder identity.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_key_is_stable_and_distinct() {
        assert_eq!(vault_lock_key("v1"), vault_lock_key("v1"));
        assert_ne!(vault_lock_key("v1"), vault_lock_key("v2"));
    }
}
