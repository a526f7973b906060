//! Operators that act on the failure branch, plus a few outcome-agnostic ones.
//!
//! Typed variants match on the concrete error kind via
//! [`Error::downcast_ref`]; a non-matching error passes through untouched.
use std::fmt;
use std::time::Duration;

use crate::combinators::{race, timeout_on};
use crate::context::Context;
use crate::error::{catch_panic, Error, PromiseError};
use crate::promise::Promise;

impl<T> Promise<T>
where
    T: Clone + Send + 'static,
{
    /// Replaces a rejection with the outcome of `handler(error)`.
    ///
    /// `handler` is never called when this promise fulfills.
    ///
    /// ```
    /// use promise_kit::Promise;
    ///
    /// let recovered = Promise::<u32>::rejected_msg("cache miss")
    ///     .recover(|_| Promise::fulfilled(0));
    /// assert_eq!(recovered.value(), Some(0));
    /// ```
    pub fn recover<F>(&self, handler: F) -> Promise<T>
    where
        F: FnOnce(Error) -> Promise<T> + Send + 'static,
    {
        self.recover_on(self.context(), handler)
    }

    pub fn recover_on<F>(&self, context: &Context, handler: F) -> Promise<T>
    where
        F: FnOnce(Error) -> Promise<T> + Send + 'static,
    {
        let (promise, resolver) = self.derive();
        self.subscribe(context, move |outcome| match outcome {
            Ok(value) => {
                resolver.fulfill(value);
            }
            Err(error) => match catch_panic(move || handler(error)) {
                Ok(replacement) => replacement.pipe(resolver),
                Err(error) => {
                    resolver.reject(error);
                }
            },
        });
        promise
    }

    /// Like [`recover`](Self::recover), but only for errors of kind `E`.
    pub fn recover_typed<E, F>(&self, handler: F) -> Promise<T>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
        F: FnOnce(&E) -> Promise<T> + Send + 'static,
    {
        let passthrough = self.context().clone();
        self.recover(move |error| match error.downcast_ref::<E>() {
            Some(typed) => handler(typed),
            None => Promise::rejected_on(&passthrough, error),
        })
    }

    /// Rewrites a rejection's error; fulfillment passes through.
    pub fn map_error<F>(&self, transform: F) -> Promise<T>
    where
        F: FnOnce(Error) -> Error + Send + 'static,
    {
        self.map_error_on(self.context(), transform)
    }

    pub fn map_error_on<F>(&self, context: &Context, transform: F) -> Promise<T>
    where
        F: FnOnce(Error) -> Error + Send + 'static,
    {
        let (promise, resolver) = self.derive();
        self.subscribe(context, move |outcome| match outcome {
            Ok(value) => {
                resolver.fulfill(value);
            }
            Err(error) => {
                let rewritten = catch_panic(move || transform(error)).unwrap_or_else(|e| e);
                resolver.reject(rewritten);
            }
        });
        promise
    }

    /// Like [`map_error`](Self::map_error), but only for errors of kind `E`.
    pub fn map_error_typed<E, F>(&self, transform: F) -> Promise<T>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
        F: FnOnce(&E) -> Error + Send + 'static,
    {
        self.map_error(move |error| match error.downcast_ref::<E>() {
            Some(typed) => transform(typed),
            None => error,
        })
    }

    /// Runs `on_rejected` only for errors of kind `E`; returns `self`.
    ///
    /// ```
    /// use promise_kit::{Promise, PromiseError};
    /// use std::sync::atomic::{AtomicBool, Ordering};
    /// use std::sync::Arc;
    ///
    /// let hit = Arc::new(AtomicBool::new(false));
    /// let flag = hit.clone();
    /// Promise::<()>::rejected_msg("boom")
    ///     .catch_typed(move |_: &PromiseError| flag.store(true, Ordering::SeqCst));
    /// assert!(hit.load(Ordering::SeqCst));
    /// ```
    pub fn catch_typed<E, R>(&self, on_rejected: R) -> Promise<T>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
        R: FnOnce(&E) + Send + 'static,
    {
        self.catch_typed_on(self.context(), on_rejected)
    }

    pub fn catch_typed_on<E, R>(&self, context: &Context, on_rejected: R) -> Promise<T>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
        R: FnOnce(&E) + Send + 'static,
    {
        self.catch_error_on(context, move |error| {
            if let Some(typed) = error.downcast_ref::<E>() {
                on_rejected(typed);
            }
        })
    }

    /// Rejects with [`PromiseError::ValidationFailed`] unless `predicate`
    /// accepts the fulfilled value. Never called on a rejection.
    pub fn ensure<P>(&self, predicate: P) -> Promise<T>
    where
        P: FnOnce(&T) -> bool + Send + 'static,
    {
        self.ensure_on(self.context(), predicate)
    }

    pub fn ensure_on<P>(&self, context: &Context, predicate: P) -> Promise<T>
    where
        P: FnOnce(&T) -> bool + Send + 'static,
    {
        self.try_map_on(context, move |value| {
            if predicate(&value) {
                Ok(value)
            } else {
                Err(PromiseError::ValidationFailed)
            }
        })
    }

    /// Runs `on_complete` whichever way the promise resolves; returns `self`.
    pub fn always<F>(&self, on_complete: F) -> Promise<T>
    where
        F: FnOnce() + Send + 'static,
    {
        self.always_on(self.context(), on_complete)
    }

    pub fn always_on<F>(&self, context: &Context, on_complete: F) -> Promise<T>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inspect_on(context, move |_| on_complete())
    }

    /// Races this promise against a [`timeout`](crate::timeout) of `duration`.
    ///
    /// The underlying work keeps running after a timeout; only its result is
    /// discarded.
    pub fn with_timeout(&self, duration: Duration) -> Promise<T> {
        race(vec![self.clone(), timeout_on(self.context(), duration)])
    }
}
