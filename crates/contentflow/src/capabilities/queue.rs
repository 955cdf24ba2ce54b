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

//! Task queue capability.
//!
//! Messages are opaque UTF-8 strings. Delivery is at-least-once: a received
//! message becomes invisible for the requested visibility window and
//! reappears unless deleted or extended. The `(message_id, receipt)` pair in
//! a [`QueueLease`] is the proof of the current hold; `extend` invalidates
//! the old receipt and returns a fresh lease.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::QueueError;

/// A held message: the body plus the receipt required to delete or extend it.
#[derive(Debug, Clone)]
pub struct QueueLease {
    pub message_id: String,
    /// Opaque proof of the current visibility hold. Stale after `extend`.
    pub receipt: String,
    pub body: String,
    /// How many times this message has been received (1 on first delivery).
    pub dequeue_count: u32,
}

/// At-least-once message queue.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Enqueues a message. With `visibility`, the message stays hidden for
    /// that long before first delivery (used for retry backoff).
    ///
    /// Returns the message id.
    async fn send(&self, body: &str, visibility: Option<Duration>) -> Result<String, QueueError>;

    /// Receives up to `max` visible messages, hiding each for `visibility`.
    ///
    /// Returns an empty vector when the queue has no visible messages.
    async fn receive(&self, max: usize, visibility: Duration) -> Result<Vec<QueueLease>, QueueError>;

    /// Deletes a held message. Fails with [`QueueError::ReceiptExpired`] if
    /// the receipt is no longer current.
    async fn delete(&self, lease: &QueueLease) -> Result<(), QueueError>;

    /// Extends the visibility hold, returning a lease with a fresh receipt.
    async fn extend(&self, lease: &QueueLease, visibility: Duration) -> Result<QueueLease, QueueError>;

    /// Approximate total message count (visible and hidden).
    async fn approx_len(&self) -> Result<usize, QueueError>;
}
