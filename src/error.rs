//! Failure values carried by rejected promises.
//!
//! A rejected promise holds an [`Error`]: a cheap, cloneable handle around any
//! `std::error::Error`. The concrete error kind survives type erasure, so
//! typed handlers such as [`Promise::catch_typed`](crate::Promise::catch_typed)
//! can check for it with [`Error::is`] and [`Error::downcast_ref`].

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Failures produced by the promise machinery itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PromiseError {
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("check failed")]
    ValidationFailed,

    #[error("user code panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Message(String),
}

/// Errors raised while building an execution context.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid worker thread count: {value} (must be > 0)")]
    InvalidWorkerThreads { value: usize },

    #[error("thread name must not be empty")]
    EmptyThreadName,

    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// The failure side of a promise.
///
/// Cloning is cheap; every callback attached to a rejected promise sees the
/// same underlying error.
///
/// ```
/// use promise_kit::{Error, PromiseError};
///
/// let err = Error::msg("disk on fire");
/// assert!(err.is::<PromiseError>());
/// assert_eq!(err.to_string(), "disk on fire");
/// ```
#[derive(Clone)]
pub struct Error {
    inner: Arc<anyhow::Error>,
}

impl Error {
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(anyhow::Error::new(error)),
        }
    }

    /// A message-only error, kind [`PromiseError::Message`].
    pub fn msg(message: impl fmt::Display) -> Self {
        Self::new(PromiseError::Message(message.to_string()))
    }

    /// Returns `true` if the concrete error is an `E`.
    pub fn is<E>(&self) -> bool
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.inner.is::<E>()
    }

    /// Borrows the concrete error if it is an `E`.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.inner.downcast_ref::<E>()
    }

    /// The crate-internal kind, if this error was raised by the machinery.
    pub fn kind(&self) -> Option<&PromiseError> {
        self.downcast_ref::<PromiseError>()
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind(), Some(PromiseError::TimedOut(_)))
    }

    /// `true` if both handles point at the same underlying error.
    pub fn ptr_eq(&self, other: &Error) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn panicked(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::new(PromiseError::Panicked(message))
    }
}

// `Error` must not implement `std::error::Error`: this blanket conversion
// would overlap with `From<T> for T`.
impl<E> From<E> for Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self::new(error)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.inner, f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.inner, f)
    }
}

/// Runs user code, turning a panic into a [`PromiseError::Panicked`] error.
pub(crate) fn catch_panic<R>(f: impl FnOnce() -> R) -> Result<R, Error> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(Error::panicked)
}

/// Like [`catch_panic`], for closures that already return a `Result`.
pub(crate) fn catch_fallible<R, E>(f: impl FnOnce() -> Result<R, E>) -> Result<R, Error>
where
    E: Into<Error>,
{
    catch_panic(f)?.map_err(Into::into)
}
