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

//! Multi-process worker supervisor.
//!
//! Spawns the configured number of processing and source worker processes
//! (re-executions of this binary's hidden `worker` subcommand), monitors
//! their liveness every health interval, restarts crashed children under
//! the same `{role}-{index}` identity, and tears everything down on
//! SIGINT/SIGTERM: stop request, 30 s join grace, force kill, 5 s, abandon.
//!
//! Child processes are reached only through the [`ChildHandle`] /
//! [`ChildSpawner`] traits; the supervisor state machine itself never
//! touches the OS, which is what makes it testable with stub children.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use contentflow::config::WorkerSettings;

/// Which worker loop a child process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum WorkerRole {
    Processing,
    Source,
}

impl WorkerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerRole::Processing => "processing",
            WorkerRole::Source => "source",
        }
    }

    /// Stable child identity: `{role}-{index}`.
    pub fn worker_id(&self, index: usize) -> String {
        format!("{}-{}", self.as_str(), index)
    }
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A spawned child process as the supervisor sees it.
#[async_trait]
pub trait ChildHandle: Send {
    fn pid(&self) -> Option<u32>;

    fn is_alive(&mut self) -> bool;

    /// Asks the child to stop (SIGTERM on unix).
    fn request_stop(&mut self);

    /// Waits up to `timeout` for the child to exit; `true` when it did.
    async fn wait_with_timeout(&mut self, timeout: Duration) -> bool;

    /// Force-terminates the child.
    async fn kill(&mut self);
}

/// Spawns children for a role/index pair.
pub trait ChildSpawner: Send + Sync {
    fn spawn(&self, role: WorkerRole, index: usize) -> Result<Box<dyn ChildHandle>>;
}

/// Spawns real OS processes by re-executing the current binary.
pub struct ProcessSpawner;

impl ChildSpawner for ProcessSpawner {
    fn spawn(&self, role: WorkerRole, index: usize) -> Result<Box<dyn ChildHandle>> {
        let exe = std::env::current_exe().context("cannot resolve current executable")?;
        let child = tokio::process::Command::new(exe)
            .arg("worker")
            .arg("--role")
            .arg(role.as_str())
            .arg("--index")
            .arg(index.to_string())
            .kill_on_drop(false)
            .spawn()
            .with_context(|| format!("failed to spawn {} worker {index}", role))?;
        Ok(Box::new(ProcessChild { child }))
    }
}

struct ProcessChild {
    child: tokio::process::Child,
}

#[async_trait]
impl ChildHandle for ProcessChild {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn request_stop(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            // SIGTERM lets the worker finish its current item gracefully.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            return;
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
        }
    }

    async fn wait_with_timeout(&mut self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.child.wait()).await.is_ok()
    }

    async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!(error = %e, "failed to kill child process");
        }
    }
}

struct ChildSlot {
    role: WorkerRole,
    index: usize,
    handle: Box<dyn ChildHandle>,
}

/// Per-role slice of a [`SupervisorStatus`].
#[derive(Debug, Clone, Serialize)]
pub struct RoleStatus {
    pub configured: usize,
    pub active: usize,
    pub workers: Vec<WorkerProcessStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerProcessStatus {
    pub id: usize,
    pub pid: Option<u32>,
    pub alive: bool,
}

/// Live snapshot served by the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    pub running: bool,
    pub processing_workers: RoleStatus,
    pub source_workers: RoleStatus,
}

/// Owns the worker child processes. Workers receive only their identity and
/// configuration; nothing points back from a child to the supervisor.
pub struct Supervisor {
    settings: Arc<WorkerSettings>,
    spawner: Arc<dyn ChildSpawner>,
    children: Mutex<Vec<ChildSlot>>,
    stop: watch::Sender<bool>,
    running: AtomicBool,
    health_interval: Duration,
    join_grace: Duration,
    kill_grace: Duration,
}

impl Supervisor {
    pub fn new(settings: Arc<WorkerSettings>, spawner: Arc<dyn ChildSpawner>) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            settings,
            spawner,
            children: Mutex::new(Vec::new()),
            stop,
            running: AtomicBool::new(false),
            health_interval: Duration::from_secs(30),
            join_grace: Duration::from_secs(30),
            kill_grace: Duration::from_secs(5),
        }
    }

    /// Shortens the supervision timers; test hook.
    pub fn with_timers(mut self, health: Duration, join_grace: Duration, kill_grace: Duration) -> Self {
        self.health_interval = health;
        self.join_grace = join_grace;
        self.kill_grace = kill_grace;
        self
    }

    pub fn is_stopping(&self) -> bool {
        *self.stop.borrow()
    }

    /// Asks the supervisor (and, transitively, every child) to shut down.
    pub fn request_stop(&self) {
        let _ = self.stop.send(true);
    }

    /// Spawns the configured worker fleet.
    pub async fn start(&self) -> Result<()> {
        info!(
            worker_name = %self.settings.worker_name,
            processing = self.settings.num_processing_workers,
            source = self.settings.num_source_workers,
            "starting worker fleet"
        );

        let mut children = self.children.lock().await;
        for index in 0..self.settings.num_processing_workers {
            children.push(self.spawn_slot(WorkerRole::Processing, index)?);
        }
        for index in 0..self.settings.num_source_workers {
            children.push(self.spawn_slot(WorkerRole::Source, index)?);
        }
        drop(children);

        self.running.store(true, Ordering::SeqCst);
        info!("worker fleet started");
        Ok(())
    }

    fn spawn_slot(&self, role: WorkerRole, index: usize) -> Result<ChildSlot> {
        let handle = self.spawner.spawn(role, index)?;
        info!(
            worker_id = %role.worker_id(index),
            pid = handle.pid(),
            "started worker process"
        );
        Ok(ChildSlot { role, index, handle })
    }

    /// Runs the fleet until a stop request, then shuts it down.
    pub async fn run(&self) -> Result<()> {
        self.start().await?;

        let mut stop = self.stop.subscribe();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.health_interval) => {
                    self.health_check_once().await;
                }
                _ = stop.changed() => break,
            }
            if self.is_stopping() {
                break;
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// One pass of the health loop: replace every dead child with a fresh
    /// process under the same worker id.
    pub async fn health_check_once(&self) {
        if self.is_stopping() {
            return;
        }
        let mut children = self.children.lock().await;
        for slot in children.iter_mut() {
            if slot.handle.is_alive() {
                continue;
            }
            let worker_id = slot.role.worker_id(slot.index);
            warn!(worker_id = %worker_id, "worker process died, restarting");
            match self.spawner.spawn(slot.role, slot.index) {
                Ok(handle) => {
                    info!(worker_id = %worker_id, pid = handle.pid(), "restarted worker process");
                    slot.handle = handle;
                }
                Err(e) => error!(worker_id = %worker_id, error = %e, "failed to restart worker"),
            }
        }
    }

    /// Graceful teardown: stop request to every child, bounded join, force
    /// kill, short wait, abandon with an error log.
    pub async fn shutdown(&self) {
        info!("stopping worker fleet");
        self.request_stop();

        let mut children = self.children.lock().await;
        for slot in children.iter_mut() {
            slot.handle.request_stop();
        }
        for slot in children.iter_mut() {
            let worker_id = slot.role.worker_id(slot.index);
            if slot.handle.wait_with_timeout(self.join_grace).await {
                continue;
            }
            warn!(worker_id = %worker_id, "worker did not stop gracefully, terminating");
            slot.handle.kill().await;
            if !slot.handle.wait_with_timeout(self.kill_grace).await {
                error!(worker_id = %worker_id, "worker could not be terminated");
            }
        }
        children.clear();

        self.running.store(false, Ordering::SeqCst);
        info!("worker fleet stopped");
    }

    /// Live status snapshot; `active` counts reflect this very moment.
    pub async fn status(&self) -> SupervisorStatus {
        let mut children = self.children.lock().await;
        let mut processing = RoleStatus {
            configured: self.settings.num_processing_workers,
            active: 0,
            workers: Vec::new(),
        };
        let mut source = RoleStatus {
            configured: self.settings.num_source_workers,
            active: 0,
            workers: Vec::new(),
        };

        for slot in children.iter_mut() {
            let alive = slot.handle.is_alive();
            let status = WorkerProcessStatus {
                id: slot.index,
                pid: slot.handle.pid(),
                alive,
            };
            let role_status = match slot.role {
                WorkerRole::Processing => &mut processing,
                WorkerRole::Source => &mut source,
            };
            if alive {
                role_status.active += 1;
            }
            role_status.workers.push(status);
        }

        SupervisorStatus {
            running: self.running.load(Ordering::SeqCst),
            processing_workers: processing,
            source_workers: source,
        }
    }
}
