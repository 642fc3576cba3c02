#![allow(missing_docs)]

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    config::{RunOptions, TransformationConfig},
    context::TransContext,
    step::StepRegistry,
};

pub mod mock;

/// Installs a test subscriber once. The filter comes from `TEST_LOG`.
pub fn trace_init() {
    let filter = std::env::var("TEST_LOG").unwrap_or_else(|_| "error".to_owned());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Options with a short poll interval so that stops are observed quickly.
pub fn fast_options() -> RunOptions {
    RunOptions {
        poll_interval_ms: 5,
        ..RunOptions::default()
    }
}

pub fn context(config: &TransformationConfig, registry: StepRegistry) -> TransContext {
    TransContext::for_config(config, Arc::new(registry))
}

/// Polls `f` until it returns `true`, panicking after `duration`.
pub fn wait_for_duration(mut f: impl FnMut() -> bool, duration: Duration) {
    let started = Instant::now();
    while !f() {
        assert!(
            started.elapsed() < duration,
            "Timed out waiting for condition after {duration:?}"
        );
        std::thread::sleep(Duration::from_millis(5));
    }
}

pub fn wait_for(f: impl FnMut() -> bool) {
    wait_for_duration(f, Duration::from_secs(5));
}
