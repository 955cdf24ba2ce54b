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

//! # Executor Registry
//!
//! Global registry mapping `executor_type` strings to factory functions.
//! Pipeline definitions reference executors by type name; the registry is
//! populated at program init (see
//! [`builtins::register_builtin_executors`](super::builtins::register_builtin_executors))
//! and consulted both at parse time (type validation) and at run time
//! (instantiation with the node's settings).
//!
//! Transformation executors and input executors live in separate tables: a
//! type name resolving in the input table is what makes a node the
//! pipeline's input node.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::{Executor, ExecutorSettings, InputExecutor};
use crate::error::ExecutorError;

/// Factory for a transformation executor instance.
type ExecutorFactory =
    Box<dyn Fn(ExecutorSettings) -> Result<Arc<dyn Executor>, ExecutorError> + Send + Sync>;

/// Factory for an input executor instance.
type InputExecutorFactory =
    Box<dyn Fn(ExecutorSettings) -> Result<Arc<dyn InputExecutor>, ExecutorError> + Send + Sync>;

static EXECUTOR_REGISTRY: Lazy<RwLock<HashMap<String, ExecutorFactory>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

static INPUT_EXECUTOR_REGISTRY: Lazy<RwLock<HashMap<String, InputExecutorFactory>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers a transformation executor factory under `executor_type`.
/// Re-registering a name replaces the previous factory.
pub fn register_executor<F>(executor_type: impl Into<String>, factory: F)
where
    F: Fn(ExecutorSettings) -> Result<Arc<dyn Executor>, ExecutorError> + Send + Sync + 'static,
{
    let executor_type = executor_type.into();
    EXECUTOR_REGISTRY
        .write()
        .insert(executor_type.clone(), Box::new(factory));
    tracing::debug!("registered executor type: {executor_type}");
}

/// Registers an input executor factory under `executor_type`.
pub fn register_input_executor<F>(executor_type: impl Into<String>, factory: F)
where
    F: Fn(ExecutorSettings) -> Result<Arc<dyn InputExecutor>, ExecutorError> + Send + Sync + 'static,
{
    let executor_type = executor_type.into();
    INPUT_EXECUTOR_REGISTRY
        .write()
        .insert(executor_type.clone(), Box::new(factory));
    tracing::debug!("registered input executor type: {executor_type}");
}

/// Whether `executor_type` resolves in either table.
pub fn is_registered(executor_type: &str) -> bool {
    EXECUTOR_REGISTRY.read().contains_key(executor_type)
        || INPUT_EXECUTOR_REGISTRY.read().contains_key(executor_type)
}

/// Whether `executor_type` names an input executor.
pub fn is_input_type(executor_type: &str) -> bool {
    INPUT_EXECUTOR_REGISTRY.read().contains_key(executor_type)
}

/// Instantiates a transformation executor; `None` if the type is unknown.
pub fn build_executor(
    executor_type: &str,
    settings: ExecutorSettings,
) -> Option<Result<Arc<dyn Executor>, ExecutorError>> {
    let registry = EXECUTOR_REGISTRY.read();
    registry.get(executor_type).map(|factory| factory(settings))
}

/// Instantiates an input executor; `None` if the type is unknown.
pub fn build_input_executor(
    executor_type: &str,
    settings: ExecutorSettings,
) -> Option<Result<Arc<dyn InputExecutor>, ExecutorError>> {
    let registry = INPUT_EXECUTOR_REGISTRY.read();
    registry.get(executor_type).map(|factory| factory(settings))
}

/// All registered type names (both tables), for diagnostics.
pub fn executor_types() -> Vec<String> {
    let mut names: Vec<String> = EXECUTOR_REGISTRY.read().keys().cloned().collect();
    names.extend(INPUT_EXECUTOR_REGISTRY.read().keys().cloned());
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Clock;
    use crate::models::{ContentItem, VaultCrawlCheckpoint};
    use async_trait::async_trait;
    use serial_test::serial;

    struct Passthrough;

    #[async_trait]
    impl Executor for Passthrough {
        fn executor_type(&self) -> &str {
            "registry_test_passthrough"
        }

        async fn process(
            &self,
            items: Vec<ContentItem>,
            _ctx: &super::super::ExecutionContext,
        ) -> Result<Vec<ContentItem>, ExecutorError> {
            Ok(items)
        }
    }

    struct EmptySource;

    #[async_trait]
    impl InputExecutor for EmptySource {
        fn executor_type(&self) -> &str {
            "registry_test_empty_source"
        }

        async fn fetch(
            &self,
            ctx: &super::super::ExecutionContext,
            _checkpoint: Option<&VaultCrawlCheckpoint>,
        ) -> Result<super::super::InputBatch, ExecutorError> {
            Ok(super::super::InputBatch {
                items: Box::pin(futures::stream::empty()),
                watermark: ctx.clock.now(),
            })
        }
    }

    #[test]
    #[serial]
    fn register_and_resolve_executor() {
        register_executor("registry_test_passthrough", |_settings| Ok(Arc::new(Passthrough)));

        assert!(is_registered("registry_test_passthrough"));
        assert!(!is_input_type("registry_test_passthrough"));
        assert!(build_executor("registry_test_passthrough", ExecutorSettings::default())
            .unwrap()
            .is_ok());
    }

    #[test]
    #[serial]
    fn register_and_resolve_input_executor() {
        register_input_executor("registry_test_empty_source", |_settings| Ok(Arc::new(EmptySource)));

        assert!(is_registered("registry_test_empty_source"));
        assert!(is_input_type("registry_test_empty_source"));
        assert!(build_executor("registry_test_empty_source", ExecutorSettings::default()).is_none());
        assert!(
            build_input_executor("registry_test_empty_source", ExecutorSettings::default()).is_some()
        );
    }

    #[test]
    fn unknown_type_resolves_to_none() {
        assert!(!is_registered("registry_test_unknown"));
        assert!(build_executor("registry_test_unknown", ExecutorSettings::default()).is_none());
    }
}
