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

//! ContentFlow worker service entry point.
//!
//! `contentflow-worker run` starts the supervisor: preflight checks, the
//! worker fleet (N processing + M source child processes), and the status
//! API sidecar. The hidden `worker` subcommand is what those child
//! processes execute.
//!
//! Exit codes: 0 on clean shutdown, 1 on preflight failure, 2 on an
//! unhandled fatal error.

mod api;
mod logging;
mod preflight;
mod supervisor;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use contentflow::config::WorkerSettings;
use contentflow::context::AppContext;
use contentflow::executor::builtins::register_builtin_executors;
use contentflow::worker::{ProcessingWorker, SourceScheduler};

use crate::supervisor::{ProcessSpawner, Supervisor, WorkerRole};

#[derive(Debug, Parser)]
#[command(name = "contentflow-worker", version, about = "ContentFlow worker service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the supervisor and its worker fleet.
    Run,
    /// Run a single worker role in this process (spawned by the supervisor).
    #[command(hide = true)]
    Worker {
        #[arg(long, value_enum)]
        role: WorkerRole,
        #[arg(long)]
        index: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run => run_supervisor().await,
        Command::Worker { role, index } => run_worker(role, index).await,
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            // The subscriber may not be installed yet (settings failures),
            // so the fatal error goes to stderr as well.
            eprintln!("fatal: {e:?}");
            error!(error = ?e, "fatal error");
            ExitCode::from(2)
        }
    }
}

fn load_settings() -> Result<WorkerSettings> {
    let settings = WorkerSettings::from_env()?;
    logging::init_tracing(&settings);
    register_builtin_executors();
    Ok(settings)
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                let _ = ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

async fn run_supervisor() -> Result<ExitCode> {
    let settings = load_settings()?;
    info!(
        worker_name = %settings.worker_name,
        version = env!("CARGO_PKG_VERSION"),
        "starting ContentFlow worker service"
    );

    let ctx = AppContext::from_settings(settings.clone());
    if !preflight::run_checks(&ctx).await {
        return Ok(ExitCode::from(1));
    }

    let settings = Arc::new(settings);
    let supervisor = Arc::new(Supervisor::new(settings.clone(), Arc::new(ProcessSpawner)));

    // Status surface sidecar.
    let (api_stop_tx, api_stop_rx) = watch::channel(false);
    let api_task = if settings.api_enabled {
        let state = api::ApiState {
            worker_name: settings.worker_name.clone(),
            supervisor: supervisor.clone(),
        };
        Some(tokio::spawn(api::serve(
            state,
            settings.api_host.clone(),
            settings.api_port,
            api_stop_rx,
        )))
    } else {
        None
    };

    // Signal handling: first signal requests a graceful stop.
    {
        let supervisor = supervisor.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            supervisor.request_stop();
        });
    }

    supervisor.run().await?;

    let _ = api_stop_tx.send(true);
    if let Some(task) = api_task {
        let _ = task.await;
    }
    info!("ContentFlow worker service stopped");
    Ok(ExitCode::SUCCESS)
}

/// Child-process entry: one worker role until a stop signal.
///
/// Each child builds its own capability connections from settings rather
/// than inheriting handles from the supervisor.
async fn run_worker(role: WorkerRole, index: usize) -> Result<ExitCode> {
    let settings = load_settings()?;
    let worker_id = role.worker_id(index);
    info!(worker_id = %worker_id, "worker process starting");

    let ctx = AppContext::from_settings(settings);
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = stop_tx.send(true);
    });

    match role {
        WorkerRole::Processing => {
            ProcessingWorker::new(ctx, worker_id, stop_rx).run().await?;
        }
        WorkerRole::Source => {
            SourceScheduler::new(ctx, worker_id, stop_rx).run().await?;
        }
    }
    Ok(ExitCode::SUCCESS)
}
