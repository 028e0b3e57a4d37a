//! Shared helpers for integration tests

#![allow(dead_code)]

use std::thread;
use std::time::{Duration, Instant};
use threadle::{Runtime, RuntimeConfig};

/// Route `tracing` output to the test harness (set `RUST_LOG` to see it)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `condition` for up to five seconds
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Started runtime with `workers` threads and the responsive backoff
pub fn runtime(workers: usize) -> Runtime {
    init_tracing();
    let runtime = Runtime::new(RuntimeConfig::single_threaded().with_workers(workers))
        .expect("valid config");
    runtime.start().expect("workers start");
    runtime
}
