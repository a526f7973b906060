#![allow(dead_code)]
//! Shared integration test utilities.

use std::future::IntoFuture;
use std::sync::Once;
use std::time::Duration;

use futures::executor::block_on;
use promise_kit::{Context, Error, Promise, ThreadPool};
use thiserror::Error;

static INIT_LOGGING: Once = Once::new();

/// Installs a `tracing` subscriber once per test binary. Filter with `RUST_LOG`.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[derive(Debug, Error)]
#[error("wrench: {message}")]
pub struct WrenchError {
    pub message: String,
}

impl WrenchError {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Error)]
#[error("simple error")]
pub struct SimpleError;

pub fn pool() -> Context {
    Context::new(ThreadPool::new().expect("thread pool"))
}

/// A promise fulfilled with `value` after `millis` on `context`.
pub fn fulfill_after<T>(context: &Context, millis: u64, value: T) -> Promise<T>
where
    T: Clone + Send + 'static,
{
    let promise = Promise::pending_on(context);
    let resolver = promise.resolver();
    context.execute_after(
        Duration::from_millis(millis),
        Box::new(move || {
            resolver.fulfill(value);
        }),
    )
    .expect("timer thread");
    promise
}

/// A promise rejected with `error` after `millis` on `context`.
pub fn reject_after<T>(context: &Context, millis: u64, error: impl Into<Error>) -> Promise<T>
where
    T: Clone + Send + 'static,
{
    let promise = Promise::pending_on(context);
    let resolver = promise.resolver();
    let error = error.into();
    context.execute_after(
        Duration::from_millis(millis),
        Box::new(move || {
            resolver.reject(error);
        }),
    )
    .expect("timer thread");
    promise
}

/// Blocks the test thread until `promise` resolves.
pub fn wait<T>(promise: &Promise<T>) -> Result<T, Error>
where
    T: Clone + Send + 'static,
{
    block_on(promise.clone().into_future())
}
