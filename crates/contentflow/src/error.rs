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

//! Error types for the ContentFlow execution fabric.
//!
//! Each layer of the system has its own error enum so callers can match on
//! exactly the failures that layer produces:
//!
//! - Capability errors: [`QueueError`], [`RegistryError`], [`BlobError`],
//!   [`IdentityError`]
//! - Persistence: [`StoreError`]
//! - Pipeline definitions: [`PipelineError`]
//! - Executor invocations: [`ExecutorError`] and the task-level
//!   [`ExecutorFailure`] / [`FailureKind`] taxonomy
//! - Worker loops: [`WorkerError`], [`CrawlError`]
//! - Configuration: [`SettingsError`]
//!
//! The [`FailureKind`] taxonomy is the contract between the executor runtime
//! and the workers: it decides whether a failed task is re-enqueued or marked
//! terminally failed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the [`Queue`](crate::capabilities::Queue) capability.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The lease receipt no longer matches the message (visibility expired
    /// or the message was extended/deleted by another holder).
    #[error("message receipt is stale or expired")]
    ReceiptExpired,

    /// The referenced message no longer exists.
    #[error("message not found: {0}")]
    MessageNotFound(String),

    /// A transient transport failure (throttling, network, 5xx).
    #[error("transient queue failure: {0}")]
    Transient(String),
}

/// Errors from the [`Registry`](crate::capabilities::Registry) capability.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The named container does not exist.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// A document was submitted without a string `id` field.
    #[error("document is missing a string 'id' field")]
    MissingId,

    /// The document body could not be (de)serialized.
    #[error("document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A transient transport failure (throttling, network, 5xx).
    #[error("transient registry failure: {0}")]
    Transient(String),
}

/// Errors from the [`BlobStore`](crate::capabilities::BlobStore) capability.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("transient blob store failure: {0}")]
    Transient(String),
}

/// Errors from the [`Identity`](crate::capabilities::Identity) capability.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("credential unavailable for scope '{scope}': {reason}")]
    CredentialUnavailable { scope: String, reason: String },
}

/// Errors from the typed store layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Optimistic-concurrency retries were exhausted.
    #[error("concurrent update conflict on {container}/{id}")]
    Conflict { container: String, id: String },

    #[error("document not found: {container}/{id}")]
    NotFound { container: String, id: String },

    /// A status update would move an execution backwards.
    #[error("invalid execution status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while parsing or validating a pipeline definition.
///
/// All variants map to the non-retriable `InvalidPipeline` failure kind.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline definition is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("pipeline has no executors")]
    Empty,

    #[error("duplicate executor id: {0}")]
    DuplicateNode(String),

    #[error("edge references unknown executor: {0}")]
    UnknownEdgeNode(String),

    #[error("unknown executor type: {0}")]
    UnknownExecutorType(String),

    #[error("executor '{0}' settings are not a mapping")]
    InvalidSettings(String),

    #[error("pipeline graph contains a cycle")]
    Cycle,

    #[error("pipeline has no input executor")]
    NoInputNode,

    /// The executor-skip contract names exactly one input node; graphs with
    /// more are rejected outright.
    #[error("pipeline has multiple input executors: {0:?}")]
    MultipleInputNodes(Vec<String>),

    #[error("input executor '{0}' has upstream executors")]
    InputNodeHasPredecessors(String),
}

/// Classification of task-level failures.
///
/// This is the §7 taxonomy: the kind alone decides the handling policy
/// (delete, retry, or terminal failure).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Pipeline definition cannot be parsed or references unknown executors.
    InvalidPipeline,
    /// Referenced pipeline not found or disabled.
    PipelineMissing,
    /// Envelope malformed or unknown task type.
    PoisonMessage,
    /// Registry/queue/blob transient failure.
    Transient,
    /// Executor or task exceeded its time bound.
    Timeout,
    /// Executor raised a domain error.
    Domain,
    /// Input executor failed mid-iteration.
    CrawlAborted,
    /// Another scheduler holds the vault lease.
    LockConflict,
}

impl FailureKind {
    /// Whether a task failing with this kind may be re-enqueued.
    pub fn is_retriable(&self) -> bool {
        matches!(self, FailureKind::Transient | FailureKind::Timeout)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InvalidPipeline => "invalid_pipeline",
            FailureKind::PipelineMissing => "pipeline_missing",
            FailureKind::PoisonMessage => "poison_message",
            FailureKind::Transient => "transient",
            FailureKind::Timeout => "timeout",
            FailureKind::Domain => "domain",
            FailureKind::CrawlAborted => "crawl_aborted",
            FailureKind::LockConflict => "lock_conflict",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure surfaced from the pipeline runtime to a worker.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("executor '{executor_id}' failed ({kind}): {message}")]
pub struct ExecutorFailure {
    /// Id of the executor node that failed, or a pseudo-id such as
    /// `"pipeline"` for failures outside any single node.
    pub executor_id: String,
    pub kind: FailureKind,
    pub message: String,
}

impl ExecutorFailure {
    pub fn new(executor_id: impl Into<String>, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            executor_id: executor_id.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Errors raised inside an executor's `process`/`fetch` implementation.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The executor's settings are missing or malformed.
    #[error("invalid executor settings: {0}")]
    Settings(String),

    /// A transient dependency failure; eligible for retry.
    #[error("transient failure: {0}")]
    Transient(String),

    /// A domain-level processing failure.
    #[error("{0}")]
    Domain(String),

    #[error(transparent)]
    Blob(#[from] BlobError),
}

impl ExecutorError {
    /// Maps an executor error to its task-level failure kind.
    pub fn kind(&self) -> FailureKind {
        match self {
            ExecutorError::Settings(_) => FailureKind::InvalidPipeline,
            ExecutorError::Transient(_) => FailureKind::Transient,
            ExecutorError::Domain(_) => FailureKind::Domain,
            ExecutorError::Blob(BlobError::NotFound(_)) => FailureKind::Domain,
            ExecutorError::Blob(BlobError::Transient(_)) => FailureKind::Transient,
        }
    }

    pub fn into_failure(self, executor_id: &str) -> ExecutorFailure {
        ExecutorFailure::new(executor_id, self.kind(), self.to_string())
    }
}

/// Fatal errors in a worker loop (not per-task failures, which are handled
/// through the [`FailureKind`] policy table).
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome classification for one crawl attempt of a `(pipeline, vault)`.
///
/// `LockConflict` is a normal outcome, not an error condition; the §9
/// redesign replaces exception-driven control flow with this sum so every
/// caller dispatches on it explicitly.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Another worker holds the vault lease; skip this tick.
    #[error("vault lease is held by another worker")]
    LockConflict,

    /// The input executor failed mid-iteration; the checkpoint was not
    /// advanced.
    #[error(transparent)]
    Aborted(ExecutorFailure),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("crawl interrupted by shutdown")]
    Interrupted,
}

/// Errors raised while loading or validating worker configuration.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_kinds() {
        assert!(FailureKind::Transient.is_retriable());
        assert!(FailureKind::Timeout.is_retriable());
        assert!(!FailureKind::InvalidPipeline.is_retriable());
        assert!(!FailureKind::PipelineMissing.is_retriable());
        assert!(!FailureKind::PoisonMessage.is_retriable());
        assert!(!FailureKind::Domain.is_retriable());
    }

    #[test]
    fn failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::CrawlAborted).unwrap();
        assert_eq!(json, "\"crawl_aborted\"");
    }

    #[test]
    fn executor_error_kind_mapping() {
        assert_eq!(
            ExecutorError::Transient("throttled".into()).kind(),
            FailureKind::Transient
        );
        assert_eq!(
            ExecutorError::Settings("missing prefix".into()).kind(),
            FailureKind::InvalidPipeline
        );
        assert_eq!(
            ExecutorError::Blob(BlobError::Transient("503".into())).kind(),
            FailureKind::Transient
        );
    }
}
