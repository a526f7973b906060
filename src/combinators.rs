//! Aggregation, timing and retry built on the public chaining API.
//!
//! Nothing here touches promise internals beyond registering callbacks;
//! aggregates rely on first-writer-wins resolution to settle exactly once.
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{catch_fallible, catch_panic, Error, PromiseError};
use crate::promise::{Promise, Resolver};

/// Waits for every input; fulfills with their values in input order.
///
/// Rejects with whichever input rejects first in real time. An empty input
/// fulfills immediately with an empty vector.
///
/// ```
/// use promise_kit::{all, Promise};
///
/// let first = Promise::new();
/// let joined = all(vec![first.clone(), Promise::fulfilled(2)]);
/// assert!(joined.is_pending());
/// first.fulfill(1);
/// assert_eq!(joined.value(), Some(vec![1, 2]));
/// ```
pub fn all<T>(promises: Vec<Promise<T>>) -> Promise<Vec<T>>
where
    T: Clone + Send + 'static,
{
    let Some(first) = promises.first() else {
        return Promise::fulfilled(Vec::new());
    };
    let (aggregate, resolver) = first.derive::<Vec<T>>();

    struct Slots<T> {
        values: Vec<Option<T>>,
        remaining: usize,
    }

    let slots = Arc::new(Mutex::new(Slots {
        values: vec![None; promises.len()],
        remaining: promises.len(),
    }));
    for (index, promise) in promises.iter().enumerate() {
        let slots = Arc::clone(&slots);
        let resolver = resolver.clone();
        promise.subscribe(&Context::immediate(), move |outcome| match outcome {
            Ok(value) => {
                let mut slots = slots.lock();
                slots.values[index] = Some(value);
                slots.remaining -= 1;
                if slots.remaining == 0 {
                    let values: Vec<T> = slots.values.drain(..).flatten().collect();
                    drop(slots);
                    resolver.fulfill(values);
                }
            }
            Err(error) => {
                resolver.reject(error);
            }
        });
    }
    aggregate
}

/// Adopts the outcome of whichever input resolves first.
///
/// # Panics
///
/// Panics if `promises` is empty.
pub fn race<T>(promises: Vec<Promise<T>>) -> Promise<T>
where
    T: Clone + Send + 'static,
{
    assert!(!promises.is_empty(), "race requires at least one promise");
    let (winner, resolver) = promises[0].derive::<T>();
    for promise in &promises {
        promise.pipe(resolver.clone());
    }
    winner
}

/// Fulfills with `()` once `duration` has elapsed.
///
/// Rejects with [`ConfigError::Spawn`](crate::ConfigError::Spawn) if the
/// shared timer thread cannot be started.
pub fn delay(duration: Duration) -> Promise<()> {
    delay_on(&Context::default(), duration)
}

pub fn delay_on(context: &Context, duration: Duration) -> Promise<()> {
    let promise = Promise::pending_on(context);
    let resolver = promise.resolver();
    let scheduled = context.execute_after(
        duration,
        Box::new(move || {
            resolver.fulfill(());
        }),
    );
    if let Err(error) = scheduled {
        warn!(%error, "could not schedule delay");
        promise.reject(error);
    }
    promise
}

/// Rejects with [`PromiseError::TimedOut`] after `duration`; never fulfills.
pub fn timeout<T>(duration: Duration) -> Promise<T>
where
    T: Clone + Send + 'static,
{
    timeout_on(&Context::default(), duration)
}

pub fn timeout_on<T>(context: &Context, duration: Duration) -> Promise<T>
where
    T: Clone + Send + 'static,
{
    let fallback = context.clone();
    delay_on(context, duration).flat_map(move |()| {
        debug!(?duration, "promise timed out");
        Promise::rejected_on(&fallback, PromiseError::TimedOut(duration))
    })
}

/// Retries `generate` up to `count` more times, waiting `delay` between
/// attempts. The last failure is the one surfaced.
///
/// ```
/// use promise_kit::{retry, Promise};
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::time::Duration;
///
/// let calls = AtomicU32::new(0);
/// let result = retry(3, Duration::ZERO, move || {
///     if calls.fetch_add(1, Ordering::SeqCst) < 2 {
///         Promise::rejected_msg("flaky")
///     } else {
///         Promise::fulfilled(8)
///     }
/// });
/// assert_eq!(result.value(), Some(8));
/// ```
pub fn retry<T, G>(count: u32, delay: Duration, generate: G) -> Promise<T>
where
    T: Clone + Send + 'static,
    G: Fn() -> Promise<T> + Send + Sync + 'static,
{
    let attempts = Arc::new(Attempts { generate, delay });
    let first = attempts.launch();
    let (result, resolver) = first.derive::<T>();
    attempts.watch(first, count, resolver);
    result
}

/// What every attempt of one `retry` call shares.
struct Attempts<G> {
    generate: G,
    delay: Duration,
}

impl<G> Attempts<G> {
    fn launch<T>(&self) -> Promise<T>
    where
        T: Clone + Send + 'static,
        G: Fn() -> Promise<T>,
    {
        match catch_panic(|| (self.generate)()) {
            Ok(promise) => promise,
            Err(error) => Promise::rejected(error),
        }
    }

    /// Settles `resolver` from `current`, or on failure schedules the next
    /// attempt as a fresh job. The callback returns before that attempt
    /// starts, so attempts never nest on the stack.
    fn watch<T>(self: Arc<Self>, current: Promise<T>, remaining: u32, resolver: Resolver<T>)
    where
        T: Clone + Send + 'static,
        G: Fn() -> Promise<T> + Send + Sync + 'static,
    {
        let context = current.context().clone();
        current.subscribe(&Context::immediate(), move |outcome| match outcome {
            Err(error) if remaining > 0 => {
                debug!(%error, remaining, "attempt failed, retrying");
                let delay = self.delay;
                let fallback = resolver.clone();
                let scheduled = context.execute_after(
                    delay,
                    Box::new(move || {
                        let next = self.launch();
                        self.watch(next, remaining - 1, resolver);
                    }),
                );
                if let Err(error) = scheduled {
                    warn!(%error, "could not schedule retry");
                    fallback.reject(error);
                }
            }
            outcome => {
                resolver.settle(outcome);
            }
        });
    }
}

/// Runs a fallible computation, turning an `Err` or a panic into a rejection.
///
/// ```
/// use promise_kit::kickoff;
///
/// let promise = kickoff(|| "kicked off!".parse::<u8>());
/// assert!(promise.is_rejected());
/// ```
pub fn kickoff<T, E, F>(block: F) -> Promise<T>
where
    T: Clone + Send + 'static,
    E: Into<Error>,
    F: FnOnce() -> Result<T, E> + Send + 'static,
{
    kickoff_on(&Context::default(), block)
}

pub fn kickoff_on<T, E, F>(context: &Context, block: F) -> Promise<T>
where
    T: Clone + Send + 'static,
    E: Into<Error>,
    F: FnOnce() -> Result<T, E> + Send + 'static,
{
    let promise = Promise::pending_on(context);
    let resolver = promise.resolver();
    context.execute(Box::new(move || {
        resolver.settle(catch_fallible(block));
    }));
    promise
}

/// Like [`kickoff`], for a computation that itself returns a promise.
pub fn kickoff_promise<T, F>(block: F) -> Promise<T>
where
    T: Clone + Send + 'static,
    F: FnOnce() -> Promise<T> + Send + 'static,
{
    kickoff_promise_on(&Context::default(), block)
}

pub fn kickoff_promise_on<T, F>(context: &Context, block: F) -> Promise<T>
where
    T: Clone + Send + 'static,
    F: FnOnce() -> Promise<T> + Send + 'static,
{
    Promise::fulfilled_on(context, ()).flat_map(move |()| block())
}

/// Pairs two promises; rejects as soon as either rejects.
///
/// ```
/// use promise_kit::{zip, Promise};
///
/// let zipped = zip(Promise::fulfilled(2), Promise::fulfilled("str"));
/// assert_eq!(zipped.value(), Some((2, "str")));
/// ```
pub fn zip<A, B>(first: Promise<A>, second: Promise<B>) -> Promise<(A, B)>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
{
    let (zipped, resolver) = first.derive::<(A, B)>();
    let slots: Arc<Mutex<(Option<A>, Option<B>)>> = Arc::new(Mutex::new((None, None)));

    let left = Arc::clone(&slots);
    let left_resolver = resolver.clone();
    first.subscribe(&Context::immediate(), move |outcome| match outcome {
        Ok(value) => {
            let both = {
                let mut pair = left.lock();
                pair.0 = Some(value);
                both_ready(&pair)
            };
            if let Some(both) = both {
                left_resolver.fulfill(both);
            }
        }
        Err(error) => {
            left_resolver.reject(error);
        }
    });

    let right = slots;
    second.subscribe(&Context::immediate(), move |outcome| match outcome {
        Ok(value) => {
            let both = {
                let mut pair = right.lock();
                pair.1 = Some(value);
                both_ready(&pair)
            };
            if let Some(both) = both {
                resolver.fulfill(both);
            }
        }
        Err(error) => {
            resolver.reject(error);
        }
    });
    zipped
}

fn both_ready<A: Clone, B: Clone>(pair: &(Option<A>, Option<B>)) -> Option<(A, B)> {
    match pair {
        (Some(a), Some(b)) => Some((a.clone(), b.clone())),
        _ => None,
    }
}

pub fn zip3<A, B, C>(a: Promise<A>, b: Promise<B>, c: Promise<C>) -> Promise<(A, B, C)>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    C: Clone + Send + 'static,
{
    zip(zip(a, b), c).map(|((a, b), c)| (a, b, c))
}

pub fn zip4<A, B, C, D>(
    a: Promise<A>,
    b: Promise<B>,
    c: Promise<C>,
    d: Promise<D>,
) -> Promise<(A, B, C, D)>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    C: Clone + Send + 'static,
    D: Clone + Send + 'static,
{
    zip(zip3(a, b, c), d).map(|((a, b, c), d)| (a, b, c, d))
}

pub fn zip5<A, B, C, D, E>(
    a: Promise<A>,
    b: Promise<B>,
    c: Promise<C>,
    d: Promise<D>,
    e: Promise<E>,
) -> Promise<(A, B, C, D, E)>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    C: Clone + Send + 'static,
    D: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    zip(zip4(a, b, c, d), e).map(|((a, b, c, d), e)| (a, b, c, d, e))
}
