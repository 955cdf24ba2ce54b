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

//! In-process capability backend.
//!
//! Complete implementations of every capability trait, holding state in
//! process memory. This backend serves two purposes:
//!
//! - the reference implementation for tests, including a [`ManualClock`]
//!   that makes visibility timeouts and lease expiry deterministic;
//! - the default backend for single-process local runs (one worker role
//!   driven inside one process).
//!
//! State here never leaves the owning process. Worker roles launched by the
//! supervisor are separate OS processes, so two roles on this backend
//! cannot see each other's queue, registry, or blobs; settings validation
//! warns about that topology. Coordinated multi-process fleets need a
//! provider-backed implementation of these traits (cloud queue/document/blob
//! SDKs), which lives outside this crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::blob::{BlobEntry, BlobStore};
use super::clock::{chrono_duration, Clock};
use super::identity::{Credential, Identity};
use super::queue::{Queue, QueueLease};
use super::registry::{
    document_id, CreateOutcome, Document, DocumentFilter, Registry, ReplaceOutcome,
};
use crate::error::{BlobError, IdentityError, QueueError, RegistryError};

/// A clock whose time only moves when told to.
///
/// `sleep` advances the clock by the requested duration and yields, so
/// worker loops that idle-wait make progress instantly under test.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock();
        *now += chrono_duration(duration);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    body: String,
    receipt: String,
    visible_at: DateTime<Utc>,
    dequeue_count: u32,
}

/// In-memory queue with visibility-timeout semantics.
pub struct MemoryQueue {
    clock: Arc<dyn Clock>,
    messages: Mutex<Vec<StoredMessage>>,
}

impl MemoryQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            messages: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn send(&self, body: &str, visibility: Option<Duration>) -> Result<String, QueueError> {
        let now = self.clock.now();
        let visible_at = match visibility {
            Some(delay) => now + chrono_duration(delay),
            None => now,
        };
        let id = Uuid::new_v4().to_string();
        self.messages.lock().push(StoredMessage {
            id: id.clone(),
            body: body.to_string(),
            receipt: Uuid::new_v4().to_string(),
            visible_at,
            dequeue_count: 0,
        });
        Ok(id)
    }

    async fn receive(&self, max: usize, visibility: Duration) -> Result<Vec<QueueLease>, QueueError> {
        let now = self.clock.now();
        let hold = chrono_duration(visibility);
        let mut messages = self.messages.lock();
        let mut leases = Vec::new();
        for message in messages.iter_mut() {
            if leases.len() >= max {
                break;
            }
            if message.visible_at > now {
                continue;
            }
            message.visible_at = now + hold;
            message.receipt = Uuid::new_v4().to_string();
            message.dequeue_count += 1;
            leases.push(QueueLease {
                message_id: message.id.clone(),
                receipt: message.receipt.clone(),
                body: message.body.clone(),
                dequeue_count: message.dequeue_count,
            });
        }
        Ok(leases)
    }

    async fn delete(&self, lease: &QueueLease) -> Result<(), QueueError> {
        let mut messages = self.messages.lock();
        let position = messages
            .iter()
            .position(|m| m.id == lease.message_id)
            .ok_or_else(|| QueueError::MessageNotFound(lease.message_id.clone()))?;
        if messages[position].receipt != lease.receipt {
            return Err(QueueError::ReceiptExpired);
        }
        messages.remove(position);
        Ok(())
    }

    async fn extend(&self, lease: &QueueLease, visibility: Duration) -> Result<QueueLease, QueueError> {
        let now = self.clock.now();
        let mut messages = self.messages.lock();
        let message = messages
            .iter_mut()
            .find(|m| m.id == lease.message_id)
            .ok_or_else(|| QueueError::MessageNotFound(lease.message_id.clone()))?;
        if message.receipt != lease.receipt {
            return Err(QueueError::ReceiptExpired);
        }
        message.visible_at = now + chrono_duration(visibility);
        message.receipt = Uuid::new_v4().to_string();
        Ok(QueueLease {
            message_id: message.id.clone(),
            receipt: message.receipt.clone(),
            body: message.body.clone(),
            dequeue_count: message.dequeue_count,
        })
    }

    async fn approx_len(&self) -> Result<usize, QueueError> {
        Ok(self.messages.lock().len())
    }
}

#[derive(Debug, Clone)]
struct StoredDocument {
    body: Value,
    etag: String,
}

/// In-memory document registry with ETag-conditional operations.
///
/// Containers must be created up front; operations against an unknown
/// container fail the way a missing provider container would.
#[derive(Default)]
pub struct MemoryRegistry {
    containers: Mutex<HashMap<String, BTreeMap<String, StoredDocument>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_containers<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let registry = Self::new();
        {
            let mut containers = registry.containers.lock();
            for name in names {
                containers.entry(name.into()).or_default();
            }
        }
        registry
    }

    pub fn create_container(&self, name: &str) {
        self.containers.lock().entry(name.to_string()).or_default();
    }

    fn with_container<T>(
        &self,
        container: &str,
        f: impl FnOnce(&mut BTreeMap<String, StoredDocument>) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        let mut containers = self.containers.lock();
        let docs = containers
            .get_mut(container)
            .ok_or_else(|| RegistryError::ContainerNotFound(container.to_string()))?;
        f(docs)
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn get(&self, container: &str, id: &str) -> Result<Option<Document>, RegistryError> {
        self.with_container(container, |docs| {
            Ok(docs.get(id).map(|stored| Document {
                body: stored.body.clone(),
                etag: stored.etag.clone(),
            }))
        })
    }

    async fn query(
        &self,
        container: &str,
        filter: &DocumentFilter,
    ) -> Result<Vec<Document>, RegistryError> {
        self.with_container(container, |docs| {
            Ok(docs
                .values()
                .filter(|stored| filter.matches(&stored.body))
                .map(|stored| Document {
                    body: stored.body.clone(),
                    etag: stored.etag.clone(),
                })
                .collect())
        })
    }

    async fn upsert(&self, container: &str, body: Value) -> Result<Document, RegistryError> {
        let id = document_id(&body)?;
        self.with_container(container, |docs| {
            let etag = Uuid::new_v4().to_string();
            docs.insert(
                id,
                StoredDocument {
                    body: body.clone(),
                    etag: etag.clone(),
                },
            );
            Ok(Document { body, etag })
        })
    }

    async fn create_if_absent(
        &self,
        container: &str,
        body: Value,
    ) -> Result<CreateOutcome, RegistryError> {
        let id = document_id(&body)?;
        self.with_container(container, |docs| {
            if docs.contains_key(&id) {
                return Ok(CreateOutcome::Conflict);
            }
            docs.insert(
                id,
                StoredDocument {
                    body,
                    etag: Uuid::new_v4().to_string(),
                },
            );
            Ok(CreateOutcome::Created)
        })
    }

    async fn replace_if(
        &self,
        container: &str,
        body: Value,
        etag: &str,
    ) -> Result<ReplaceOutcome, RegistryError> {
        let id = document_id(&body)?;
        self.with_container(container, |docs| {
            let Some(stored) = docs.get_mut(&id) else {
                return Ok(ReplaceOutcome::Missing);
            };
            if stored.etag != etag {
                return Ok(ReplaceOutcome::EtagMismatch);
            }
            let new_etag = Uuid::new_v4().to_string();
            stored.body = body;
            stored.etag = new_etag.clone();
            Ok(ReplaceOutcome::Replaced(new_etag))
        })
    }

    async fn delete(&self, container: &str, id: &str) -> Result<(), RegistryError> {
        self.with_container(container, |docs| {
            docs.remove(id);
            Ok(())
        })
    }

    async fn container_exists(&self, container: &str) -> Result<bool, RegistryError> {
        Ok(self.containers.lock().contains_key(container))
    }
}

#[derive(Debug, Clone)]
struct StoredBlob {
    bytes: Vec<u8>,
    last_modified: DateTime<Utc>,
}

/// In-memory blob store, last-writer-wins per path.
pub struct MemoryBlobStore {
    clock: Arc<dyn Clock>,
    blobs: Mutex<BTreeMap<String, StoredBlob>>,
}

impl MemoryBlobStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            blobs: Mutex::new(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        _content_type: Option<&str>,
    ) -> Result<(), BlobError> {
        self.blobs.lock().insert(
            path.to_string(),
            StoredBlob {
                bytes,
                last_modified: self.clock.now(),
            },
        );
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, BlobError> {
        self.blobs
            .lock()
            .get(path)
            .map(|blob| blob.bytes.clone())
            .ok_or_else(|| BlobError::NotFound(path.to_string()))
    }

    async fn delete(&self, path: &str) -> Result<(), BlobError> {
        self.blobs.lock().remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>, BlobError> {
        Ok(self
            .blobs
            .lock()
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(path, blob)| BlobEntry {
                path: path.clone(),
                len: blob.bytes.len() as u64,
                last_modified: blob.last_modified,
            })
            .collect())
    }
}

/// Identity that hands out a fixed token; sufficient for the in-process
/// backend where no capability actually checks credentials.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    token: String,
}

impl StaticIdentity {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl Default for StaticIdentity {
    fn default() -> Self {
        Self::new("local-dev-credential")
    }
}

#[async_trait]
impl Identity for StaticIdentity {
    async fn credential(&self, _scope: &str) -> Result<Credential, IdentityError> {
        Ok(Credential {
            token: self.token.clone(),
            expires_at: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manual_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::default())
    }

    #[tokio::test]
    async fn queue_visibility_hides_and_reappears() {
        let clock = manual_clock();
        let queue = MemoryQueue::new(clock.clone());

        queue.send("task-1", None).await.unwrap();

        let first = queue.receive(10, Duration::from_secs(30)).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].dequeue_count, 1);

        // Hidden while the hold is active.
        let hidden = queue.receive(10, Duration::from_secs(30)).await.unwrap();
        assert!(hidden.is_empty());

        // Visible again after the hold lapses, with a bumped dequeue count.
        clock.advance(Duration::from_secs(31));
        let second = queue.receive(10, Duration::from_secs(30)).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].dequeue_count, 2);
    }

    #[tokio::test]
    async fn queue_delete_requires_current_receipt() {
        let clock = manual_clock();
        let queue = MemoryQueue::new(clock.clone());
        queue.send("task-1", None).await.unwrap();

        let lease = queue
            .receive(1, Duration::from_secs(30))
            .await
            .unwrap()
            .remove(0);
        let extended = queue.extend(&lease, Duration::from_secs(60)).await.unwrap();

        // The pre-extend receipt is stale.
        assert!(matches!(
            queue.delete(&lease).await,
            Err(QueueError::ReceiptExpired)
        ));
        queue.delete(&extended).await.unwrap();
        assert_eq!(queue.approx_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn queue_send_with_delay_stays_hidden() {
        let clock = manual_clock();
        let queue = MemoryQueue::new(clock.clone());
        queue
            .send("delayed", Some(Duration::from_secs(120)))
            .await
            .unwrap();

        assert!(queue
            .receive(1, Duration::from_secs(5))
            .await
            .unwrap()
            .is_empty());
        clock.advance(Duration::from_secs(121));
        assert_eq!(queue.receive(1, Duration::from_secs(5)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn registry_conditional_create_and_replace() {
        let registry = MemoryRegistry::with_containers(["locks"]);

        let outcome = registry
            .create_if_absent("locks", json!({"id": "k1", "holder": "a"}))
            .await
            .unwrap();
        assert_eq!(outcome, CreateOutcome::Created);

        let outcome = registry
            .create_if_absent("locks", json!({"id": "k1", "holder": "b"}))
            .await
            .unwrap();
        assert_eq!(outcome, CreateOutcome::Conflict);

        let stored = registry.get("locks", "k1").await.unwrap().unwrap();
        let replaced = registry
            .replace_if("locks", json!({"id": "k1", "holder": "b"}), &stored.etag)
            .await
            .unwrap();
        assert!(matches!(replaced, ReplaceOutcome::Replaced(_)));

        // The old etag no longer matches.
        let stale = registry
            .replace_if("locks", json!({"id": "k1", "holder": "c"}), &stored.etag)
            .await
            .unwrap();
        assert_eq!(stale, ReplaceOutcome::EtagMismatch);
    }

    #[tokio::test]
    async fn registry_query_filters_on_fields() {
        let registry = MemoryRegistry::with_containers(["pipelines"]);
        registry
            .upsert("pipelines", json!({"id": "p1", "enabled": true}))
            .await
            .unwrap();
        registry
            .upsert("pipelines", json!({"id": "p2", "enabled": false}))
            .await
            .unwrap();

        let enabled = registry
            .query("pipelines", &DocumentFilter::new().eq("enabled", true))
            .await
            .unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id(), Some("p1"));
    }

    #[tokio::test]
    async fn registry_unknown_container_errors() {
        let registry = MemoryRegistry::new();
        assert!(matches!(
            registry.get("nope", "x").await,
            Err(RegistryError::ContainerNotFound(_))
        ));
        assert!(!registry.container_exists("nope").await.unwrap());
    }

    #[tokio::test]
    async fn blob_store_roundtrip_and_prefix_list() {
        let clock = manual_clock();
        let store = MemoryBlobStore::new(clock.clone());
        store.put("docs/a.txt", b"alpha".to_vec(), None).await.unwrap();
        store.put("docs/b.txt", b"beta".to_vec(), None).await.unwrap();
        store.put("other/c.txt", b"gamma".to_vec(), None).await.unwrap();

        assert_eq!(store.get("docs/a.txt").await.unwrap(), b"alpha");
        let listed = store.list("docs/").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].path, "docs/a.txt");
    }
}
