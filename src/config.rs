//! Configuration for the thread-pool execution context

use std::num::NonZeroUsize;
use std::thread;

use crate::error::ConfigError;

/// Configuration for [`ThreadPool`](crate::context::ThreadPool)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker threads draining the job queue
    pub worker_threads: usize,

    /// Name given to every worker thread
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_threads: thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(4),
            thread_name: "promise-worker".to_string(),
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads
    pub fn with_worker_threads(mut self, worker_threads: usize) -> Result<Self, ConfigError> {
        if worker_threads == 0 {
            return Err(ConfigError::InvalidWorkerThreads { value: worker_threads });
        }
        self.worker_threads = worker_threads;
        Ok(self)
    }

    /// Set the worker thread name
    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::InvalidWorkerThreads {
                value: self.worker_threads,
            });
        }
        if self.thread_name.trim().is_empty() {
            return Err(ConfigError::EmptyThreadName);
        }
        Ok(())
    }
}
