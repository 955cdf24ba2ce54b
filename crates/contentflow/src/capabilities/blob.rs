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

//! Blob store capability.
//!
//! A flat path-addressed byte store, last-writer-wins per path. Used by
//! executors (input discovery and sinks), never by the scheduler itself.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::BlobError;

/// A listed blob.
#[derive(Debug, Clone)]
pub struct BlobEntry {
    pub path: String,
    pub len: u64,
    pub last_modified: DateTime<Utc>,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), BlobError>;

    async fn get(&self, path: &str) -> Result<Vec<u8>, BlobError>;

    async fn delete(&self, path: &str) -> Result<(), BlobError>;

    /// Lists blobs whose path starts with `prefix`, in path order.
    async fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>, BlobError>;
}
