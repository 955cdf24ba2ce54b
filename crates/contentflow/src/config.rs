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

//! Worker configuration.
//!
//! Settings load from environment variables (a `.env` file is honored via
//! `dotenvy`), with the defaults the service has always shipped with. The
//! struct is built once at startup and shared read-only; nothing reads the
//! environment after that.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::SettingsError;

/// Registry container names, one per record family (partition key `/id`).
#[derive(Debug, Clone)]
pub struct ContainerNames {
    pub pipelines: String,
    pub vaults: String,
    pub executions: String,
    pub locks: String,
    pub checkpoints: String,
}

impl ContainerNames {
    pub fn all(&self) -> [&str; 5] {
        [
            &self.pipelines,
            &self.vaults,
            &self.executions,
            &self.locks,
            &self.checkpoints,
        ]
    }
}

impl Default for ContainerNames {
    fn default() -> Self {
        Self {
            pipelines: "pipelines".into(),
            vaults: "vaults".into(),
            executions: "vault_executions".into(),
            locks: "vault_exec_locks".into(),
            checkpoints: "vault_crawl_checkpoints".into(),
        }
    }
}

/// Which capability backend to construct.
///
/// Only the in-process backend ships in this crate; provider-backed
/// implementations register their own kind out of tree. The in-process
/// backend is per-OS-process: it cannot coordinate a source worker with a
/// processing worker across the supervisor's child processes (see
/// [`WorkerSettings::validate`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Memory,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            other => Err(format!("unknown backend '{other}'")),
        }
    }
}

/// Complete worker-side configuration.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Identity stamped into logs, status responses and lock records.
    pub worker_name: String,
    pub num_processing_workers: usize,
    pub num_source_workers: usize,
    pub backend: BackendKind,

    pub queue_url: String,
    pub queue_name: String,
    pub registry_endpoint: String,
    pub registry_database: String,
    pub containers: ContainerNames,
    pub blob_account: String,
    pub blob_container: String,

    /// Dequeue idle wait when the queue is empty.
    pub queue_poll_interval: Duration,
    /// At-least-once invisibility window per received message.
    pub queue_visibility_timeout: Duration,
    pub queue_max_messages: usize,
    pub max_task_retries: u32,
    /// Wall-clock bound for processing one task.
    pub task_timeout: Duration,
    /// Crawl interval when an input executor does not declare one.
    pub default_polling_interval: Duration,
    pub scheduler_sleep_interval: Duration,
    pub lock_ttl: Duration,

    pub api_enabled: bool,
    pub api_host: String,
    pub api_port: u16,

    pub log_level: String,
    pub debug: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            worker_name: "contentflow-worker".into(),
            num_processing_workers: 0,
            num_source_workers: 1,
            backend: BackendKind::Memory,
            queue_url: String::new(),
            queue_name: "contentflow-execution-requests".into(),
            registry_endpoint: String::new(),
            registry_database: "contentflow".into(),
            containers: ContainerNames::default(),
            blob_account: String::new(),
            blob_container: "content".into(),
            queue_poll_interval: Duration::from_secs(5),
            queue_visibility_timeout: Duration::from_secs(300),
            queue_max_messages: 32,
            max_task_retries: 3,
            task_timeout: Duration::from_secs(600),
            default_polling_interval: Duration::from_secs(300),
            scheduler_sleep_interval: Duration::from_secs(5),
            lock_ttl: Duration::from_secs(300),
            api_enabled: true,
            api_host: "0.0.0.0".into(),
            api_port: 8099,
            log_level: "INFO".into(),
            debug: false,
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &'static str, default: T) -> Result<T, SettingsError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| SettingsError::Invalid {
            key,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => matches!(raw.to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
        Err(_) => default,
    }
}

fn env_secs(key: &'static str, default: Duration) -> Result<Duration, SettingsError> {
    Ok(Duration::from_secs(env_parse(key, default.as_secs())?))
}

impl WorkerSettings {
    /// Loads settings from the environment (and a `.env` file when present).
    pub fn from_env() -> Result<Self, SettingsError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let backend = match env::var("CONTENTFLOW_BACKEND") {
            Ok(raw) => raw.parse().map_err(|reason| SettingsError::Invalid {
                key: "CONTENTFLOW_BACKEND",
                reason,
            })?,
            Err(_) => BackendKind::Memory,
        };

        Ok(Self {
            worker_name: env_string("WORKER_NAME", &defaults.worker_name),
            num_processing_workers: env_parse(
                "NUM_PROCESSING_WORKERS",
                defaults.num_processing_workers,
            )?,
            num_source_workers: env_parse("NUM_SOURCE_WORKERS", defaults.num_source_workers)?,
            backend,
            queue_url: env_string("STORAGE_ACCOUNT_WORKER_QUEUE_URL", ""),
            queue_name: env_string("STORAGE_WORKER_QUEUE_NAME", &defaults.queue_name),
            registry_endpoint: env_string("COSMOS_DB_ENDPOINT", ""),
            registry_database: env_string("COSMOS_DB_NAME", &defaults.registry_database),
            containers: ContainerNames {
                pipelines: env_string("COSMOS_DB_CONTAINER_PIPELINES", "pipelines"),
                vaults: env_string("COSMOS_DB_CONTAINER_VAULTS", "vaults"),
                executions: env_string("COSMOS_DB_CONTAINER_VAULT_EXECUTIONS", "vault_executions"),
                locks: env_string("COSMOS_DB_CONTAINER_VAULT_EXECUTION_LOCKS", "vault_exec_locks"),
                checkpoints: env_string(
                    "COSMOS_DB_CONTAINER_CRAWL_CHECKPOINTS",
                    "vault_crawl_checkpoints",
                ),
            },
            blob_account: env_string("BLOB_STORAGE_ACCOUNT_NAME", ""),
            blob_container: env_string("BLOB_STORAGE_CONTAINER_NAME", &defaults.blob_container),
            queue_poll_interval: env_secs("QUEUE_POLL_INTERVAL_SECONDS", defaults.queue_poll_interval)?,
            queue_visibility_timeout: env_secs(
                "QUEUE_VISIBILITY_TIMEOUT_SECONDS",
                defaults.queue_visibility_timeout,
            )?,
            queue_max_messages: env_parse("QUEUE_MAX_MESSAGES", defaults.queue_max_messages)?,
            max_task_retries: env_parse("MAX_TASK_RETRIES", defaults.max_task_retries)?,
            task_timeout: env_secs("TASK_TIMEOUT_SECONDS", defaults.task_timeout)?,
            default_polling_interval: env_secs(
                "DEFAULT_POLLING_INTERVAL_SECONDS",
                defaults.default_polling_interval,
            )?,
            scheduler_sleep_interval: env_secs(
                "SCHEDULER_SLEEP_INTERVAL_SECONDS",
                defaults.scheduler_sleep_interval,
            )?,
            lock_ttl: env_secs("LOCK_TTL_SECONDS", defaults.lock_ttl)?,
            api_enabled: env_bool("API_ENABLED", defaults.api_enabled),
            api_host: env_string("API_HOST", &defaults.api_host),
            api_port: env_parse("API_PORT", defaults.api_port)?,
            log_level: env_string("LOG_LEVEL", &defaults.log_level),
            debug: env_bool("DEBUG", defaults.debug),
        })
    }

    /// Validates cross-field constraints; returns non-fatal warnings.
    pub fn validate(&self) -> Result<Vec<String>, SettingsError> {
        if self.num_processing_workers == 0 && self.num_source_workers == 0 {
            return Err(SettingsError::Invalid {
                key: "NUM_PROCESSING_WORKERS",
                reason: "at least one of NUM_PROCESSING_WORKERS or NUM_SOURCE_WORKERS must be > 0"
                    .into(),
            });
        }
        if self.queue_name.is_empty() {
            return Err(SettingsError::Missing("STORAGE_WORKER_QUEUE_NAME"));
        }
        if self.queue_max_messages == 0 {
            return Err(SettingsError::Invalid {
                key: "QUEUE_MAX_MESSAGES",
                reason: "must be > 0".into(),
            });
        }
        // Provider backends need real endpoints; the in-process backend does
        // not, so local runs work with an empty environment.
        if self.backend != BackendKind::Memory {
            if self.queue_url.is_empty() {
                return Err(SettingsError::Missing("STORAGE_ACCOUNT_WORKER_QUEUE_URL"));
            }
            if self.registry_endpoint.is_empty() {
                return Err(SettingsError::Missing("COSMOS_DB_ENDPOINT"));
            }
            if self.blob_account.is_empty() {
                return Err(SettingsError::Missing("BLOB_STORAGE_ACCOUNT_NAME"));
            }
        }

        let mut warnings = Vec::new();
        if self.num_processing_workers == 0 {
            warnings.push("NUM_PROCESSING_WORKERS is 0 - no content processing will occur".into());
        }
        if self.num_source_workers == 0 {
            warnings.push("NUM_SOURCE_WORKERS is 0 - no source scanning will occur".into());
        }
        // The memory backend lives inside one process. Worker roles run as
        // separate OS processes, so a source worker's queue and registry
        // writes would be invisible to every processing worker.
        if self.backend == BackendKind::Memory
            && self.num_processing_workers > 0
            && self.num_source_workers > 0
        {
            warnings.push(
                "CONTENTFLOW_BACKEND=memory is process-local: source and processing workers \
                 run in separate OS processes and will NOT share a queue or registry, so \
                 crawled tasks can never reach a processing worker - use a shared backend \
                 for coordinated multi-role deployments"
                    .into(),
            );
        }
        Ok(warnings)
    }

    /// Heartbeat period for extending in-flight task leases.
    pub fn heartbeat_interval(&self) -> Duration {
        self.queue_visibility_timeout / 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_contract() {
        let settings = WorkerSettings::default();
        assert_eq!(settings.queue_name, "contentflow-execution-requests");
        assert_eq!(settings.containers.locks, "vault_exec_locks");
        assert_eq!(settings.queue_visibility_timeout, Duration::from_secs(300));
        assert_eq!(settings.queue_max_messages, 32);
        assert_eq!(settings.api_port, 8099);
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let settings = WorkerSettings {
            num_processing_workers: 0,
            num_source_workers: 0,
            ..WorkerSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_warns_on_one_sided_configuration() {
        let settings = WorkerSettings {
            num_processing_workers: 2,
            num_source_workers: 0,
            ..WorkerSettings::default()
        };
        let warnings = settings.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("NUM_SOURCE_WORKERS"));
    }

    #[test]
    fn validate_warns_on_memory_backend_with_both_roles() {
        let settings = WorkerSettings {
            num_processing_workers: 2,
            num_source_workers: 1,
            backend: BackendKind::Memory,
            ..WorkerSettings::default()
        };
        let warnings = settings.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("process-local"));

        // A single-role fleet has nothing to coordinate across processes.
        let settings = WorkerSettings {
            num_processing_workers: 0,
            num_source_workers: 2,
            backend: BackendKind::Memory,
            ..WorkerSettings::default()
        };
        let warnings = settings.validate().unwrap();
        assert!(warnings.iter().all(|w| !w.contains("process-local")));
    }

    #[test]
    fn heartbeat_is_a_third_of_visibility() {
        let settings = WorkerSettings::default();
        assert_eq!(settings.heartbeat_interval(), Duration::from_secs(100));
    }
}
