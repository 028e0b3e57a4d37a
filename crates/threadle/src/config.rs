//! Runtime configuration

use crate::backoff::BackoffPolicy;
use crate::{Result, ThreadleError};

/// Settings for a [`Runtime`](crate::Runtime)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Worker threads spawned by `Runtime::start` (0 = number of CPU cores)
    pub worker_count: usize,

    /// Prefix for worker thread names (`<prefix>-<id>`)
    pub thread_name_prefix: String,

    /// Name of the default Immediate queue
    pub default_queue_name: String,

    /// Priority of the default queue (lower is polled first)
    pub default_queue_priority: i32,

    /// Idle policy of every worker
    pub backoff: BackoffPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_count: 0,
            thread_name_prefix: "threadle-worker".to_string(),
            default_queue_name: "default".to_string(),
            default_queue_priority: 0,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl RuntimeConfig {
    /// One worker thread, for tests and tools that want deterministic ordering
    pub fn single_threaded() -> Self {
        Self {
            worker_count: 1,
            backoff: BackoffPolicy::responsive(),
            ..Self::default()
        }
    }

    /// Set the worker count
    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Worker count with 0 resolved to the number of CPU cores
    pub fn resolved_worker_count(&self) -> usize {
        if self.worker_count == 0 {
            num_cpus::get()
        } else {
            self.worker_count
        }
    }

    /// Reject settings the runtime cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.thread_name_prefix.trim().is_empty() {
            return Err(ThreadleError::Configuration(
                "thread_name_prefix must not be empty".to_string(),
            ));
        }
        if self.default_queue_name.is_empty() {
            return Err(ThreadleError::Configuration(
                "default_queue_name must not be empty".to_string(),
            ));
        }
        self.backoff.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.resolved_worker_count(), num_cpus::get());
        assert_eq!(config.with_workers(3).resolved_worker_count(), 3);
    }

    #[test]
    fn test_single_threaded_preset() {
        let config = RuntimeConfig::single_threaded();
        assert_eq!(config.resolved_worker_count(), 1);
        assert_eq!(config.backoff, BackoffPolicy::responsive());
    }

    #[test]
    fn test_invalid_config() {
        let config = RuntimeConfig {
            thread_name_prefix: "  ".to_string(),
            ..RuntimeConfig::default()
        };
        assert!(matches!(config.validate(), Err(ThreadleError::Configuration(_))));

        let mut config = RuntimeConfig::default();
        config.backoff.long_sleep_cap = std::time::Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
