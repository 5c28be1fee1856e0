//! Queue configuration.

use crate::error::{Error, Result};

/// Configuration for a [`PriorityTaskQueue`](crate::PriorityTaskQueue).
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Fixed worker pool size; defaults to the number of logical CPUs.
    pub workers: Option<usize>,

    /// Worker threads are named `{prefix}-{index}`.
    pub thread_name_prefix: String,

    /// Stack size for worker threads.
    pub stack_size: Option<usize>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: None,
            thread_name_prefix: "taskq-worker".to_string(),
            stack_size: Some(2 * 1024 * 1024),
        }
    }
}

impl QueueConfig {
    /// Starts building a configuration from the defaults.
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder::new()
    }

    /// Checks the configuration for inconsistencies.
    pub fn validate(&self) -> Result<()> {
        if let Some(n) = self.workers {
            if n == 0 {
                return Err(Error::queue("workers must be > 0"));
            }
            if n > 1024 {
                return Err(Error::queue("workers too large (max 1024)"));
            }
        }

        if self.thread_name_prefix.is_empty() {
            return Err(Error::queue("thread_name_prefix must not be empty"));
        }

        Ok(())
    }

    /// Effective worker count.
    pub fn worker_threads(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get)
    }
}

/// Builder for [`QueueConfig`].
#[derive(Debug, Default)]
pub struct QueueConfigBuilder {
    config: QueueConfig,
}

impl QueueConfigBuilder {
    /// Starts from [`QueueConfig::default`].
    pub fn new() -> Self {
        Self {
            config: QueueConfig::default(),
        }
    }

    /// Sets the worker pool size.
    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = Some(n);
        self
    }

    /// Sets the worker thread name prefix.
    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Sets the worker thread stack size in bytes.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<QueueConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
