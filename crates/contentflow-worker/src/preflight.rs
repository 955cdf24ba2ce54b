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

//! Preflight checks run before the worker fleet starts.
//!
//! Every check must pass or the process aborts with exit code 1: settings
//! consistency, queue reachability, registry reachability and required
//! containers, blob store reachability, and credential acquisition.

use tracing::{error, info};

use contentflow::capabilities::{BlobStore, Identity, Queue, Registry};
use contentflow::context::AppContext;

/// Outcome of one named check.
#[derive(Debug)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
    pub message: String,
}

impl CheckResult {
    fn pass(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            passed: true,
            message: message.into(),
        }
    }

    fn fail(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            passed: false,
            message: message.into(),
        }
    }
}

/// Runs every preflight check, logging each outcome. Returns `true` when
/// all passed.
pub async fn run_checks(ctx: &AppContext) -> bool {
    info!("running startup validation checks");
    let results = vec![
        check_settings(ctx),
        check_queue(ctx).await,
        check_registry_containers(ctx).await,
        check_blob(ctx).await,
        check_identity(ctx).await,
    ];

    let mut all_passed = true;
    for result in &results {
        if result.passed {
            info!(check = result.name, "{}", result.message);
        } else {
            error!(check = result.name, "{}", result.message);
            all_passed = false;
        }
    }

    if all_passed {
        info!("all startup validation checks passed");
    } else {
        error!("startup validation failed, fix the errors above before starting");
    }
    all_passed
}

fn check_settings(ctx: &AppContext) -> CheckResult {
    match ctx.settings.validate() {
        Ok(warnings) => {
            for warning in &warnings {
                tracing::warn!("{warning}");
            }
            CheckResult::pass(
                "settings",
                format!(
                    "settings valid (processing workers: {}, source workers: {})",
                    ctx.settings.num_processing_workers, ctx.settings.num_source_workers
                ),
            )
        }
        Err(e) => CheckResult::fail("settings", e.to_string()),
    }
}

async fn check_queue(ctx: &AppContext) -> CheckResult {
    match ctx.queue.approx_len().await {
        Ok(len) => CheckResult::pass(
            "queue",
            format!(
                "connected to queue '{}' ({len} messages)",
                ctx.settings.queue_name
            ),
        ),
        Err(e) => CheckResult::fail("queue", format!("queue unreachable: {e}")),
    }
}

async fn check_registry_containers(ctx: &AppContext) -> CheckResult {
    let mut missing = Vec::new();
    for container in ctx.settings.containers.all() {
        match ctx.registry.container_exists(container).await {
            Ok(true) => {}
            Ok(false) => missing.push(container.to_string()),
            Err(e) => {
                return CheckResult::fail("registry", format!("registry unreachable: {e}"));
            }
        }
    }
    if missing.is_empty() {
        CheckResult::pass("registry", "all required containers exist")
    } else {
        CheckResult::fail(
            "registry",
            format!("missing required containers: {}", missing.join(", ")),
        )
    }
}

async fn check_blob(ctx: &AppContext) -> CheckResult {
    match ctx.blob.list("").await {
        Ok(entries) => CheckResult::pass(
            "blob",
            format!(
                "connected to blob container '{}' ({} blobs visible)",
                ctx.settings.blob_container,
                entries.len()
            ),
        ),
        Err(e) => CheckResult::fail("blob", format!("blob store unreachable: {e}")),
    }
}

async fn check_identity(ctx: &AppContext) -> CheckResult {
    match ctx.identity.credential(&ctx.settings.registry_endpoint).await {
        Ok(_) => CheckResult::pass("identity", "credential acquired"),
        Err(e) => CheckResult::fail("identity", format!("credential acquisition failed: {e}")),
    }
}
