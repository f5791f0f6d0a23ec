// Copyright 2025 John Brosnihan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Runtime configuration
//!
//! Configuration is loaded once at startup, either built in code through the
//! `with_*` methods or parsed from a TOML document:
//!
//! ```toml
//! worker_threads = 8
//! job_queue_size = 32
//! frame_interval_ms = 16
//! print_schedule = true
//!
//! [task_buffers]
//! initial_capacity = 256
//! max_pool_size = 64
//! ```
//!
//! Zero values mean "pick a default" and are normalised by [`RuntimeConfig::validate`].

use crate::error::{Result, RuntimeError};
use crate::pool::PoolConfig;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Default job queue length per worker queue
pub const DEFAULT_JOB_QUEUE_SIZE: usize = 20;

/// Default frame interval used by the paced frame loop
pub const DEFAULT_FRAME_INTERVAL_MS: u64 = 33;

/// Configuration for a [`Runtime`](crate::Runtime) instance
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = twice the available parallelism)
    pub worker_threads: usize,
    /// Capacity of the shared job queue and of every per-worker lane
    pub job_queue_size: usize,
    /// Target frame interval for the paced frame loop, in milliseconds
    pub frame_interval_ms: u64,
    /// Whether the membership collector runs in the background
    pub collector_enabled: bool,
    /// Log the stage/batch tree when the runtime starts
    pub print_schedule: bool,
    /// Recycling policy for deferred mutation task buffers
    pub task_buffers: PoolConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            worker_threads: 0,
            job_queue_size: DEFAULT_JOB_QUEUE_SIZE,
            frame_interval_ms: DEFAULT_FRAME_INTERVAL_MS,
            collector_enabled: true,
            print_schedule: false,
            task_buffers: PoolConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from a TOML string
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: RuntimeConfig = toml::from_str(source)?;
        config.validate()
    }

    /// Read and parse a TOML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Set the number of worker threads
    pub fn with_worker_threads(mut self, workers: usize) -> Self {
        self.worker_threads = workers;
        self
    }

    /// Set the capacity of each worker queue
    pub fn with_job_queue_size(mut self, size: usize) -> Self {
        self.job_queue_size = size;
        self
    }

    /// Set the paced frame interval
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Enable or disable the background membership collector
    pub fn with_collector(mut self, enabled: bool) -> Self {
        self.collector_enabled = enabled;
        self
    }

    /// Log the schedule tree at startup
    pub fn with_schedule_print(mut self) -> Self {
        self.print_schedule = true;
        self
    }

    /// Set the task buffer recycling policy
    pub fn with_task_buffers(mut self, buffers: PoolConfig) -> Self {
        self.task_buffers = buffers;
        self
    }

    /// Target frame interval as a [`Duration`]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    /// Normalise zero values to their defaults and reject impossible settings
    pub fn validate(mut self) -> Result<Self> {
        if self.worker_threads == 0 {
            let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
            self.worker_threads = cpus * 2;
        }
        if self.job_queue_size == 0 {
            tracing::warn!(
                "job_queue_size of 0 is not usable, falling back to {}",
                DEFAULT_JOB_QUEUE_SIZE
            );
            self.job_queue_size = DEFAULT_JOB_QUEUE_SIZE;
        }
        if self.frame_interval_ms == 0 {
            tracing::warn!(
                "frame_interval_ms of 0 is not usable, falling back to {}",
                DEFAULT_FRAME_INTERVAL_MS
            );
            self.frame_interval_ms = DEFAULT_FRAME_INTERVAL_MS;
        }
        if self.task_buffers.max_pool_size == 0 {
            return Err(RuntimeError::InvalidConfig(
                "task_buffers.max_pool_size must be at least 1".to_string(),
            ));
        }
        if self.worker_threads > u16::MAX as usize {
            return Err(RuntimeError::InvalidConfig(format!(
                "worker_threads {} exceeds the supported maximum",
                self.worker_threads
            )));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.worker_threads, 0);
        assert_eq!(config.job_queue_size, 20);
        assert_eq!(config.frame_interval(), Duration::from_millis(33));
        assert!(config.collector_enabled);
        assert!(!config.print_schedule);
    }

    #[test]
    fn test_validate_fills_worker_count() {
        let config = RuntimeConfig::new().validate().unwrap();
        assert!(config.worker_threads >= 2);
    }

    #[test]
    fn test_builder_methods() {
        let config = RuntimeConfig::new()
            .with_worker_threads(3)
            .with_job_queue_size(8)
            .with_frame_interval(Duration::from_millis(10))
            .with_collector(false)
            .with_schedule_print();

        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.job_queue_size, 8);
        assert_eq!(config.frame_interval_ms, 10);
        assert!(!config.collector_enabled);
        assert!(config.print_schedule);
    }

    #[test]
    fn test_from_toml() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            worker_threads = 4
            frame_interval_ms = 16

            [task_buffers]
            initial_capacity = 128
            max_pool_size = 32
            "#,
        )
        .unwrap();

        assert_eq!(config.worker_threads, 4);
        assert_eq!(config.frame_interval_ms, 16);
        assert_eq!(config.job_queue_size, DEFAULT_JOB_QUEUE_SIZE);
        assert_eq!(config.task_buffers.initial_capacity, 128);
        assert_eq!(config.task_buffers.max_pool_size, 32);
    }

    #[test]
    fn test_zero_values_are_normalised() {
        let config = RuntimeConfig::from_toml_str("job_queue_size = 0\nframe_interval_ms = 0").unwrap();
        assert_eq!(config.job_queue_size, DEFAULT_JOB_QUEUE_SIZE);
        assert_eq!(config.frame_interval_ms, DEFAULT_FRAME_INTERVAL_MS);
    }

    #[test]
    fn test_invalid_pool_size_rejected() {
        let result = RuntimeConfig::from_toml_str("[task_buffers]\nmax_pool_size = 0");
        assert!(matches!(result, Err(RuntimeError::InvalidConfig(_))));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = RuntimeConfig::from_toml_str("worker_count = 4");
        assert!(matches!(result, Err(RuntimeError::ConfigParse(_))));
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("ecs-runtime-config-{}.toml", std::process::id()));
        std::fs::write(&path, "worker_threads = 2\ncollector_enabled = false\n").unwrap();
        let config = RuntimeConfig::from_file(&path);
        std::fs::remove_file(&path).unwrap();

        let config = config.unwrap();
        assert_eq!(config.worker_threads, 2);
        assert!(!config.collector_enabled);

        let missing = RuntimeConfig::from_file(path);
        assert!(matches!(missing, Err(RuntimeError::Io(_))));
    }
}
