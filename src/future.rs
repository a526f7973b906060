//! Awaiting a promise from async code.
//!
//! The promise itself never blocks. [`PromiseFuture`] registers one callback
//! and parks the latest [`Waker`] next to the slot that callback fills, so
//! any executor can drive it.
//!
//! ```
//! use promise_kit::Promise;
//! use futures::executor::block_on;
//! use std::future::IntoFuture;
//! use std::thread;
//!
//! let promise = Promise::<String>::new();
//! let resolver = promise.resolver();
//! let task = thread::spawn(move || resolver.fulfill("🍓".into()));
//! assert_eq!(block_on(promise.into_future()).unwrap(), "🍓");
//! task.join().expect("The resolver thread has panicked");
//! ```
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll, Waker};

use parking_lot::Mutex;

use crate::context::Context;
use crate::error::Error;
use crate::promise::Promise;

#[derive(Debug)]
struct Inner<T> {
    value: Option<Result<T, Error>>,
    waker: Option<Waker>,
}

/// A future that completes with the promise's outcome.
#[derive(Debug)]
pub struct PromiseFuture<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> IntoFuture for Promise<T>
where
    T: Clone + Send + 'static,
{
    type Output = Result<T, Error>;
    type IntoFuture = PromiseFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        let inner = Arc::new(Mutex::new(Inner {
            value: None,
            waker: None,
        }));
        let slot = Arc::clone(&inner);
        self.subscribe(&Context::immediate(), move |outcome| {
            let mut slot = slot.lock();
            slot.value = Some(outcome);
            let waker = slot.waker.take();
            drop(slot);
            if let Some(waker) = waker {
                waker.wake()
            }
        });
        PromiseFuture { inner }
    }
}

impl<T> Future for PromiseFuture<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let mut inner = self.inner.lock();
        match inner.value.take() {
            Some(value) => Poll::Ready(value),
            None => {
                inner.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}
