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

//! Document registry capability.
//!
//! Containers hold JSON documents partitioned by their mandatory string
//! `id` field. Every read returns an opaque ETag; `replace_if` and
//! `create_if_absent` are the optimistic-concurrency primitives on which the
//! lock and execution stores are built.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RegistryError;

/// A stored document plus its concurrency token.
#[derive(Debug, Clone)]
pub struct Document {
    pub body: Value,
    pub etag: String,
}

impl Document {
    /// The document's `id` field, if present.
    pub fn id(&self) -> Option<&str> {
        self.body.get("id").and_then(Value::as_str)
    }

    /// Deserializes the body into a typed record.
    pub fn to_record<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.body.clone())
    }
}

/// Equality filter over top-level document fields.
///
/// This is deliberately minimal: the schedulers only ever need
/// `enabled = true` and `pipeline_id = X` style predicates.
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    terms: Vec<(String, Value)>,
}

impl DocumentFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.terms.push((field.into(), value.into()));
        self
    }

    /// Whether a document satisfies every term.
    pub fn matches(&self, body: &Value) -> bool {
        self.terms
            .iter()
            .all(|(field, expected)| body.get(field) == Some(expected))
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// Outcome of a conditional create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// A document with the same id already exists.
    Conflict,
}

/// Outcome of an ETag-conditional replace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// Replaced; carries the new ETag.
    Replaced(String),
    /// The stored ETag no longer matches.
    EtagMismatch,
    /// The document no longer exists.
    Missing,
}

/// Partitioned document store with optimistic concurrency.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn get(&self, container: &str, id: &str) -> Result<Option<Document>, RegistryError>;

    async fn query(
        &self,
        container: &str,
        filter: &DocumentFilter,
    ) -> Result<Vec<Document>, RegistryError>;

    /// Creates or replaces unconditionally, returning the stored document.
    async fn upsert(&self, container: &str, body: Value) -> Result<Document, RegistryError>;

    /// Creates the document only if no document with its id exists.
    async fn create_if_absent(
        &self,
        container: &str,
        body: Value,
    ) -> Result<CreateOutcome, RegistryError>;

    /// Replaces the document only if its current ETag matches `etag`.
    async fn replace_if(
        &self,
        container: &str,
        body: Value,
        etag: &str,
    ) -> Result<ReplaceOutcome, RegistryError>;

    async fn delete(&self, container: &str, id: &str) -> Result<(), RegistryError>;

    /// Whether the named container exists (preflight check surface).
    async fn container_exists(&self, container: &str) -> Result<bool, RegistryError>;
}

/// Extracts the mandatory `id` field from a document body.
pub(crate) fn document_id(body: &Value) -> Result<String, RegistryError> {
    body.get("id")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or(RegistryError::MissingId)
}
