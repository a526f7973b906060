//! The promise state machine and its primary chaining operators.
//!
//! A [`Promise`] is a shared handle; clones observe and complete the same
//! underlying value. State lives behind one mutex together with the queue of
//! waiting callbacks. User code is never run while that mutex is held.
use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::context::Context;
use crate::error::{catch_fallible, catch_panic, Error};

type Handler<T> = Box<dyn FnOnce(Result<T, Error>) + Send + 'static>;

/// Resolution state. Moves out of `Pending` at most once.
enum State<T> {
    Pending,
    Fulfilled(T),
    Rejected(Error),
}

impl<T: Clone> State<T> {
    fn outcome(&self) -> Option<Result<T, Error>> {
        match self {
            State::Pending => None,
            State::Fulfilled(value) => Some(Ok(value.clone())),
            State::Rejected(error) => Some(Err(error.clone())),
        }
    }
}

struct Callback<T> {
    handler: Handler<T>,
    context: Context,
}

struct Inner<T> {
    state: State<T>,
    callbacks: VecDeque<Callback<T>>,
    // Set while some thread is handing queued callbacks to their contexts.
    delivering: bool,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    context: Context,
}

/// A value that will be fulfilled or rejected at most once.
///
/// Each callback and each accessor receives its own clone of the value.
/// `T::clone` runs while the promise's internal lock is held, so it must not
/// touch the same promise; a panicking `clone` leaves the callback queued and
/// unwinds into whoever triggered delivery.
///
/// # Examples
///
/// ```
/// use promise_kit::Promise;
///
/// let promise = Promise::new();
/// let doubled = promise.map(|v: i32| v * 2);
/// promise.fulfill(21);
/// assert_eq!(doubled.value(), Some(42));
/// ```
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Promise<T>
where
    T: Clone + Send + 'static,
{
    fn with_state(context: Context, state: State<T>) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state,
                    callbacks: VecDeque::new(),
                    delivering: false,
                }),
                context,
            }),
        }
    }

    /// A pending promise on the default context.
    pub fn new() -> Self {
        Self::pending_on(&Context::default())
    }

    /// A pending promise whose chained callbacks default to `context`.
    pub fn pending_on(context: &Context) -> Self {
        Self::with_state(context.clone(), State::Pending)
    }

    pub fn fulfilled(value: T) -> Self {
        Self::fulfilled_on(&Context::default(), value)
    }

    pub fn fulfilled_on(context: &Context, value: T) -> Self {
        Self::with_state(context.clone(), State::Fulfilled(value))
    }

    pub fn rejected(error: impl Into<Error>) -> Self {
        Self::rejected_on(&Context::default(), error)
    }

    pub fn rejected_on(context: &Context, error: impl Into<Error>) -> Self {
        Self::with_state(context.clone(), State::Rejected(error.into()))
    }

    /// A promise rejected with a message-only error.
    pub fn rejected_msg(message: impl fmt::Display) -> Self {
        Self::rejected(Error::msg(message))
    }

    /// Schedules `work` on `context` and returns the promise it completes.
    ///
    /// `work` receives a [`Resolver`]. Returning `Err`, or panicking, rejects
    /// the promise unless `work` already resolved it.
    ///
    /// ```
    /// use promise_kit::{Context, Promise};
    ///
    /// let promise = Promise::with_work(&Context::immediate(), |resolver| {
    ///     resolver.fulfill("hey");
    ///     Ok::<(), promise_kit::Error>(())
    /// });
    /// assert_eq!(promise.value(), Some("hey"));
    /// ```
    pub fn with_work<W, E>(context: &Context, work: W) -> Self
    where
        W: FnOnce(Resolver<T>) -> Result<(), E> + Send + 'static,
        E: Into<Error>,
    {
        let promise = Self::pending_on(context);
        let resolver = promise.resolver();
        context.execute(Box::new(move || {
            let fallback = resolver.clone();
            if let Err(error) = catch_fallible(move || work(resolver)) {
                fallback.reject(error);
            }
        }));
        promise
    }

    /// A handle that can complete this promise from anywhere.
    pub fn resolver(&self) -> Resolver<T> {
        Resolver {
            promise: self.clone(),
        }
    }

    /// The context chained callbacks run on unless told otherwise.
    pub fn context(&self) -> &Context {
        &self.shared.context
    }

    /// Fulfills a pending promise. Returns `false` if it was already resolved.
    pub fn fulfill(&self, value: T) -> bool {
        self.transition(State::Fulfilled(value))
    }

    /// Rejects a pending promise. Returns `false` if it was already resolved.
    pub fn reject(&self, error: impl Into<Error>) -> bool {
        self.transition(State::Rejected(error.into()))
    }

    pub fn reject_msg(&self, message: impl fmt::Display) -> bool {
        self.reject(Error::msg(message))
    }

    pub fn settle(&self, result: Result<T, Error>) -> bool {
        match result {
            Ok(value) => self.fulfill(value),
            Err(error) => self.reject(error),
        }
    }

    fn transition(&self, next: State<T>) -> bool {
        let mut inner = self.shared.inner.lock();
        if !matches!(inner.state, State::Pending) {
            trace!("promise already resolved, ignoring second resolution");
            return false;
        }
        inner.state = next;
        if inner.delivering || inner.callbacks.is_empty() {
            return true;
        }
        inner.delivering = true;
        drop(inner);
        self.deliver();
        true
    }

    fn register(&self, context: &Context, handler: Handler<T>) {
        let mut inner = self.shared.inner.lock();
        inner.callbacks.push_back(Callback {
            handler,
            context: context.clone(),
        });
        if inner.delivering || matches!(inner.state, State::Pending) {
            return;
        }
        inner.delivering = true;
        drop(inner);
        self.deliver();
    }

    /// Hands queued callbacks to their contexts one at a time, in
    /// registration order, releasing the lock around each hand-off. Only the
    /// thread that set `delivering` runs this loop.
    fn deliver(&self) {
        let reset = DeliveryReset(&self.shared);
        while let Some((callback, outcome)) = self.next_delivery() {
            let Callback { handler, context } = callback;
            // A context that panics on submission loses this callback only.
            let handed_off = catch_panic(move || context.execute(Box::new(move || handler(outcome))));
            if let Err(error) = handed_off {
                warn!(error = %error, "execution context panicked while accepting a callback");
            }
        }
        mem::forget(reset);
    }

    /// Pops the next callback together with its outcome, or ends the run.
    fn next_delivery(&self) -> Option<(Callback<T>, Result<T, Error>)> {
        let mut inner = self.shared.inner.lock();
        // Clone before popping so a panicking `clone` keeps the callback queued.
        let outcome = if inner.callbacks.is_empty() {
            None
        } else {
            inner.state.outcome()
        };
        let next = outcome
            .and_then(|outcome| inner.callbacks.pop_front().map(|callback| (callback, outcome)));
        if next.is_none() {
            inner.delivering = false;
        }
        next
    }

    /// Registers a raw completion handler on `context`.
    pub(crate) fn subscribe<F>(&self, context: &Context, handler: F)
    where
        F: FnOnce(Result<T, Error>) + Send + 'static,
    {
        self.register(context, Box::new(handler));
    }

    /// Completes `target` with whatever this promise resolves to.
    pub(crate) fn pipe(&self, target: Resolver<T>) {
        self.subscribe(&Context::immediate(), move |outcome| {
            target.settle(outcome);
        });
    }

    /// A pending promise sharing this promise's default context.
    pub(crate) fn derive<U>(&self) -> (Promise<U>, Resolver<U>)
    where
        U: Clone + Send + 'static,
    {
        let promise = Promise::pending_on(self.context());
        let resolver = promise.resolver();
        (promise, resolver)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.shared.inner.lock().state, State::Pending)
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self.shared.inner.lock().state, State::Fulfilled(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.shared.inner.lock().state, State::Rejected(_))
    }

    /// A snapshot of the fulfilled value, if any.
    pub fn value(&self) -> Option<T> {
        match &self.shared.inner.lock().state {
            State::Fulfilled(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// A snapshot of the rejection error, if any.
    pub fn error(&self) -> Option<Error> {
        match &self.shared.inner.lock().state {
            State::Rejected(error) => Some(error.clone()),
            _ => None,
        }
    }

    /// A snapshot of the outcome, `None` while pending.
    pub fn result(&self) -> Option<Result<T, Error>> {
        self.shared.inner.lock().state.outcome()
    }

    /// Transforms the fulfilled value on the default context.
    pub fn map<U, F>(&self, transform: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.map_on(&self.shared.context, transform)
    }

    pub fn map_on<U, F>(&self, context: &Context, transform: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.try_map_on(context, move |value| Ok::<U, Error>(transform(value)))
    }

    /// Like [`map`](Self::map), but `transform` may fail.
    ///
    /// ```
    /// use promise_kit::Promise;
    ///
    /// let parsed = Promise::fulfilled("12x".to_string())
    ///     .try_map(|s| s.parse::<u32>());
    /// assert!(parsed.is_rejected());
    /// ```
    pub fn try_map<U, E, F>(&self, transform: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        E: Into<Error>,
        F: FnOnce(T) -> Result<U, E> + Send + 'static,
    {
        self.try_map_on(&self.shared.context, transform)
    }

    pub fn try_map_on<U, E, F>(&self, context: &Context, transform: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        E: Into<Error>,
        F: FnOnce(T) -> Result<U, E> + Send + 'static,
    {
        let derived = self.context().clone();
        self.flat_map_on(context, move |value| match transform(value) {
            Ok(next) => Promise::fulfilled_on(&derived, next),
            Err(error) => Promise::rejected_on(&derived, error),
        })
    }

    /// Chains a promise-returning step; the result adopts the inner promise.
    pub fn flat_map<U, F>(&self, transform: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        self.flat_map_on(&self.shared.context, transform)
    }

    pub fn flat_map_on<U, F>(&self, context: &Context, transform: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        let (promise, resolver) = self.derive();
        self.subscribe(context, move |outcome| match outcome {
            Ok(value) => match catch_panic(move || transform(value)) {
                Ok(next) => next.pipe(resolver),
                Err(error) => {
                    resolver.reject(error);
                }
            },
            Err(error) => {
                resolver.reject(error);
            }
        });
        promise
    }

    /// Observes the outcome without deriving a new promise; returns `self`.
    ///
    /// A panic inside either handler is logged and swallowed.
    pub fn on_complete<F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise<T>
    where
        F: FnOnce(T) + Send + 'static,
        R: FnOnce(Error) + Send + 'static,
    {
        self.on_complete_on(&self.shared.context, on_fulfilled, on_rejected)
    }

    pub fn on_complete_on<F, R>(&self, context: &Context, on_fulfilled: F, on_rejected: R) -> Promise<T>
    where
        F: FnOnce(T) + Send + 'static,
        R: FnOnce(Error) + Send + 'static,
    {
        self.inspect_on(context, move |outcome| match outcome {
            Ok(value) => on_fulfilled(value),
            Err(error) => on_rejected(error),
        })
    }

    /// Runs a side effect with the outcome, catching panics.
    pub(crate) fn inspect_on<F>(&self, context: &Context, inspect: F) -> Promise<T>
    where
        F: FnOnce(Result<T, Error>) + Send + 'static,
    {
        self.subscribe(context, move |outcome| {
            if let Err(error) = catch_panic(move || inspect(outcome)) {
                warn!(error = %error, "promise handler panicked");
            }
        });
        self.clone()
    }

    /// Observes the fulfilled value only; returns `self`.
    pub fn tap<F>(&self, on_fulfilled: F) -> Promise<T>
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.tap_on(&self.shared.context, on_fulfilled)
    }

    pub fn tap_on<F>(&self, context: &Context, on_fulfilled: F) -> Promise<T>
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.on_complete_on(context, on_fulfilled, |_| {})
    }

    /// Observes the rejection only; returns `self`.
    pub fn catch_error<R>(&self, on_rejected: R) -> Promise<T>
    where
        R: FnOnce(Error) + Send + 'static,
    {
        self.catch_error_on(&self.shared.context, on_rejected)
    }

    pub fn catch_error_on<R>(&self, context: &Context, on_rejected: R) -> Promise<T>
    where
        R: FnOnce(Error) + Send + 'static,
    {
        self.on_complete_on(context, |_| {}, on_rejected)
    }
}

/// Clears `delivering` if a delivery run unwinds, so the next registration
/// can start a fresh one.
struct DeliveryReset<'a, T>(&'a Shared<T>);

impl<T> Drop for DeliveryReset<'_, T> {
    fn drop(&mut self) {
        self.0.inner.lock().delivering = false;
    }
}

impl<T> Default for Promise<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        match &inner.state {
            State::Pending => f.write_str("Pending"),
            State::Fulfilled(value) => f.debug_tuple("Fulfilled").field(value).finish(),
            State::Rejected(error) => f.debug_tuple("Rejected").field(error).finish(),
        }
    }
}

/// The completing side of a [`Promise`].
///
/// Cloneable and sendable; only the first resolution across all clones
/// takes effect.
pub struct Resolver<T> {
    promise: Promise<T>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
        }
    }
}

impl<T> Resolver<T>
where
    T: Clone + Send + 'static,
{
    pub fn fulfill(&self, value: T) -> bool {
        self.promise.fulfill(value)
    }

    pub fn reject(&self, error: impl Into<Error>) -> bool {
        self.promise.reject(error)
    }

    pub fn reject_msg(&self, message: impl fmt::Display) -> bool {
        self.promise.reject_msg(message)
    }

    pub fn settle(&self, result: Result<T, Error>) -> bool {
        self.promise.settle(result)
    }

    pub fn promise(&self) -> &Promise<T> {
        &self.promise
    }
}

impl<T: fmt::Debug> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").field("promise", &self.promise).finish()
    }
}
