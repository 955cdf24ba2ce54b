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

//! Tracing subscriber setup for the worker processes.

use tracing_subscriber::EnvFilter;

use contentflow::config::WorkerSettings;

/// Initializes the global tracing subscriber from `LOG_LEVEL`/`DEBUG`.
/// `RUST_LOG` still wins when set, so operators can scope filters per
/// module the usual way.
pub fn init_tracing(settings: &WorkerSettings) {
    let level = if settings.debug {
        "debug".to_string()
    } else {
        settings.log_level.to_lowercase()
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // try_init: child roles and tests may have installed one already.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
