//! Single-resolution promises for Rust.
//!
//! A [`Promise`] is fulfilled with a value or rejected with an [`Error`] at
//! most once; any number of threads may complete it, chain onto it or read it
//! concurrently. Continuations run on an [`ExecutionContext`] of the caller's
//! choosing, so the crate works with a thread pool, a serial queue, an event
//! loop, or inline for tests.
//!
//! # Examples
//!
//! ```
//! use promise_kit::{all, Context, Promise, ThreadPool};
//! use futures::executor::block_on;
//! use std::future::IntoFuture;
//!
//! let pool = Context::new(ThreadPool::new().unwrap());
//! let parts: Vec<Promise<u32>> = (1..=3)
//!     .map(|n| {
//!         Promise::with_work(&pool, move |resolver| {
//!             resolver.fulfill(n * 10);
//!             Ok::<(), promise_kit::Error>(())
//!         })
//!     })
//!     .collect();
//!
//! let total = all(parts).map(|values| values.iter().sum::<u32>());
//! assert_eq!(block_on(total.into_future()).unwrap(), 60);
//! ```
pub mod combinators;
pub mod config;
pub mod context;
pub mod error;
pub mod future;
pub mod promise;
mod recovery;
mod timer;

pub use combinators::{
    all, delay, delay_on, kickoff, kickoff_on, kickoff_promise, kickoff_promise_on, race, retry,
    timeout, timeout_on, zip, zip3, zip4, zip5,
};
pub use config::PoolConfig;
pub use context::{Context, ExecutionContext, Immediate, Invalidatable, Job, SerialQueue, ThreadPool};
pub use error::{ConfigError, Error, PromiseError};
pub use future::PromiseFuture;
pub use promise::{Promise, Resolver};
