//! Execution contexts decide where callback bodies run.
//!
//! The promise machinery never runs user code itself: it hands each unit of
//! work to an [`ExecutionContext`]. Hosts can plug in their own event loop or
//! pool by implementing the trait; the crate ships [`Immediate`],
//! [`SerialQueue`], [`ThreadPool`] and the [`Invalidatable`] wrapper.
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::config::PoolConfig;
use crate::error::{catch_panic, ConfigError};
use crate::timer::Timer;

/// A zero-argument unit of work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Anything that can run a [`Job`], now or later.
///
/// Implementations may run the job inline, queue it, or (for invalidated
/// contexts) drop it without running it.
pub trait ExecutionContext: Send + Sync + 'static {
    fn execute(&self, job: Job);
}

/// A shared handle to an execution context.
///
/// The default context is [`Immediate`].
#[derive(Clone)]
pub struct Context {
    inner: Arc<dyn ExecutionContext>,
    name: &'static str,
}

impl Context {
    pub fn new<C: ExecutionContext>(context: C) -> Self {
        Self {
            inner: Arc::new(context),
            name: std::any::type_name::<C>(),
        }
    }

    pub fn immediate() -> Self {
        Self::new(Immediate)
    }

    pub fn execute(&self, job: Job) {
        self.inner.execute(job)
    }

    /// Submits `job` to this context once `delay` has elapsed.
    ///
    /// Every delayed job in the process shares one timer thread, which is
    /// spawned on first use. The job is never submitted early; it may run late
    /// if the context or the timer thread is busy. Fails only if the timer
    /// thread cannot be spawned, in which case `job` is dropped unrun.
    pub fn execute_after(&self, delay: Duration, job: Job) -> Result<(), ConfigError> {
        if delay.is_zero() {
            self.execute(job);
            return Ok(());
        }
        Timer::global()?.schedule(Instant::now() + delay, self.clone(), job);
        Ok(())
    }

    pub fn ptr_eq(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::immediate()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Context").field(&self.name).finish()
    }
}

impl<C: ExecutionContext> From<C> for Context {
    fn from(context: C) -> Self {
        Self::new(context)
    }
}

thread_local! {
    // Jobs handed to `Immediate` while an inline job is already running on
    // this thread. `None` outside of a drain.
    static INLINE_QUEUE: RefCell<Option<VecDeque<Job>>> = const { RefCell::new(None) };
}

/// Runs every job on the submitting thread.
///
/// A job submitted from inside another inline job on the same thread is
/// queued and runs as soon as the outer job returns, before the outermost
/// `execute` call returns. Long callback chains therefore run in a loop
/// rather than one stack frame per step.
#[derive(Debug, Clone, Copy, Default)]
pub struct Immediate;

impl ExecutionContext for Immediate {
    fn execute(&self, job: Job) {
        let job = INLINE_QUEUE.with(move |queue| match queue.borrow_mut().as_mut() {
            Some(pending) => {
                pending.push_back(job);
                None
            }
            None => Some(job),
        });
        if let Some(job) = job {
            drain_inline(job);
        }
    }
}

fn drain_inline(first: Job) {
    INLINE_QUEUE.with(|queue| *queue.borrow_mut() = Some(VecDeque::new()));
    let outcome = panic::catch_unwind(AssertUnwindSafe(first));
    while let Some(job) =
        INLINE_QUEUE.with(|queue| queue.borrow_mut().as_mut().and_then(VecDeque::pop_front))
    {
        run_job(job);
    }
    INLINE_QUEUE.with(|queue| *queue.borrow_mut() = None);
    // The outermost job's panic still reaches its caller.
    if let Err(payload) = outcome {
        panic::resume_unwind(payload);
    }
}

/// Runs a job and keeps the caller alive if it panics.
fn run_job(job: Job) {
    if let Err(err) = catch_panic(job) {
        warn!(error = %err, "job panicked");
    }
}

/// One worker thread running jobs in submission order.
#[derive(Debug, Clone)]
pub struct SerialQueue {
    sender: Arc<Mutex<Sender<Job>>>,
}

impl SerialQueue {
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigError> {
        let (sender, receiver) = channel::<Job>();
        thread::Builder::new().name(name.into()).spawn(move || {
            for job in receiver {
                run_job(job);
            }
        })?;
        Ok(Self {
            sender: Arc::new(Mutex::new(sender)),
        })
    }
}

impl ExecutionContext for SerialQueue {
    fn execute(&self, job: Job) {
        if self.sender.lock().send(job).is_err() {
            trace!("serial queue worker gone, job dropped");
        }
    }
}

/// A fixed set of worker threads sharing one job queue.
///
/// Workers exit once every handle to the pool has been dropped and the queue
/// has drained.
#[derive(Debug, Clone)]
pub struct ThreadPool {
    sender: Arc<Mutex<Sender<Job>>>,
    config: Arc<PoolConfig>,
}

impl ThreadPool {
    pub fn new() -> Result<Self, ConfigError> {
        Self::with_config(PoolConfig::default())
    }

    pub fn with_config(config: PoolConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let (sender, receiver) = channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        for index in 0..config.worker_threads {
            let receiver = Arc::clone(&receiver);
            thread::Builder::new()
                .name(format!("{}-{}", config.thread_name, index))
                .spawn(move || worker_loop(&receiver))?;
        }
        Ok(Self {
            sender: Arc::new(Mutex::new(sender)),
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }
}

fn worker_loop(receiver: &Mutex<Receiver<Job>>) {
    loop {
        // Hold the lock only while dequeuing.
        let next = receiver.lock().recv();
        match next {
            Ok(job) => run_job(job),
            Err(_) => break,
        }
    }
}

impl ExecutionContext for ThreadPool {
    fn execute(&self, job: Job) {
        if self.sender.lock().send(job).is_err() {
            trace!("thread pool shut down, job dropped");
        }
    }
}

/// Wraps a context so it can be switched off.
///
/// After [`invalidate`](Invalidatable::invalidate), newly submitted jobs are
/// discarded, and jobs already queued on the wrapped context are discarded
/// when they reach the front. A job that has started running is unaffected.
///
/// ```
/// use promise_kit::{Context, Invalidatable, Promise};
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
///
/// let queue = Invalidatable::new(Context::immediate());
/// queue.invalidate();
///
/// let ran = Arc::new(AtomicBool::new(false));
/// let flag = ran.clone();
/// Promise::fulfilled(5).tap_on(&queue.context(), move |_| flag.store(true, Ordering::SeqCst));
/// assert!(!ran.load(Ordering::SeqCst));
/// ```
#[derive(Debug, Clone)]
pub struct Invalidatable {
    inner: Context,
    valid: Arc<AtomicBool>,
}

impl Invalidatable {
    pub fn new(inner: impl Into<Context>) -> Self {
        Self {
            inner: inner.into(),
            valid: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    /// A [`Context`] handle sharing this wrapper's validity flag.
    pub fn context(&self) -> Context {
        Context::new(self.clone())
    }
}

impl ExecutionContext for Invalidatable {
    fn execute(&self, job: Job) {
        if !self.is_valid() {
            trace!("context invalidated, job dropped on submit");
            return;
        }
        let valid = Arc::clone(&self.valid);
        self.inner.execute(Box::new(move || {
            if valid.load(Ordering::SeqCst) {
                job()
            } else {
                trace!("context invalidated, queued job dropped");
            }
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    #[test]
    fn test_immediate_runs_inline() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        Context::immediate().execute(Box::new(move || flag.store(true, Ordering::SeqCst)));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_serial_queue_preserves_order() {
        let queue = Context::new(SerialQueue::new("serial-test").unwrap());
        let (tx, rx) = mpsc::channel();
        for i in 0..20 {
            let tx = tx.clone();
            queue.execute(Box::new(move || tx.send(i).unwrap()));
        }
        let seen: Vec<i32> = (0..20).map(|_| rx.recv().unwrap()).collect();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_thread_pool_runs_jobs() {
        let config = PoolConfig::new().with_worker_threads(2).unwrap();
        let pool = ThreadPool::with_config(config).unwrap();
        assert_eq!(pool.config().worker_threads, 2);
        let pool = Context::new(pool);
        let (tx, rx) = mpsc::channel();
        for i in 0..10 {
            let tx = tx.clone();
            pool.execute(Box::new(move || tx.send(i).unwrap()));
        }
        let mut seen: Vec<i32> = (0..10).map(|_| rx.recv().unwrap()).collect();
        seen.sort();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_thread_pool_survives_panicking_job() {
        let config = PoolConfig::new().with_worker_threads(1).unwrap();
        let pool = Context::new(ThreadPool::with_config(config).unwrap());
        let (tx, rx) = mpsc::channel();
        pool.execute(Box::new(|| panic!("bad job")));
        pool.execute(Box::new(move || tx.send(7).unwrap()));
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 7);
    }

    #[test]
    fn test_thread_pool_rejects_invalid_config() {
        let config = PoolConfig::new().with_thread_name("");
        assert!(matches!(
            ThreadPool::with_config(config),
            Err(ConfigError::EmptyThreadName)
        ));
    }

    #[test]
    fn test_execute_after_waits() {
        let (tx, rx) = mpsc::channel();
        let start = Instant::now();
        Context::immediate()
            .execute_after(
                Duration::from_millis(30),
                Box::new(move || tx.send(Instant::now()).unwrap()),
            )
            .unwrap();
        let fired = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(fired.duration_since(start) >= Duration::from_millis(30));
    }

    #[test]
    fn test_nested_inline_jobs_run_after_outer_job() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let outer = order.clone();
        Context::immediate().execute(Box::new(move || {
            let inner = outer.clone();
            Context::immediate().execute(Box::new(move || inner.lock().push("inner")));
            outer.lock().push("outer");
        }));
        assert_eq!(*order.lock(), vec!["outer", "inner"]);
    }

    #[test]
    fn test_deep_inline_resubmission_does_not_grow_stack() {
        fn hop(left: u32, count: Arc<AtomicUsize>) {
            count.fetch_add(1, Ordering::SeqCst);
            if left > 0 {
                Context::immediate().execute(Box::new(move || hop(left - 1, count)));
            }
        }
        let count = Arc::new(AtomicUsize::new(0));
        let start = count.clone();
        Context::immediate().execute(Box::new(move || hop(200_000, start)));
        assert_eq!(count.load(Ordering::SeqCst), 200_001);
    }

    #[test]
    fn test_inline_panic_reaches_caller_and_queue_still_drains() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            Context::immediate().execute(Box::new(move || {
                Context::immediate().execute(Box::new(move || flag.store(true, Ordering::SeqCst)));
                panic!("outer job");
            }));
        }));
        assert!(result.is_err());
        assert!(ran.load(Ordering::SeqCst));

        // The thread is usable inline again afterwards.
        let again = Arc::new(AtomicBool::new(false));
        let flag = again.clone();
        Context::immediate().execute(Box::new(move || flag.store(true, Ordering::SeqCst)));
        assert!(again.load(Ordering::SeqCst));
    }

    #[test]
    fn test_invalidatable_drops_after_invalidate() {
        let queue = Invalidatable::new(Immediate);
        let context = queue.context();
        let count = Arc::new(Mutex::new(0));

        let c = count.clone();
        context.execute(Box::new(move || *c.lock() += 1));
        assert!(queue.is_valid());

        queue.invalidate();
        let c = count.clone();
        context.execute(Box::new(move || *c.lock() += 1));
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn test_invalidatable_drops_queued_jobs() {
        let serial = SerialQueue::new("invalidatable-test").unwrap();
        let queue = Invalidatable::new(serial.clone());
        let context = queue.context();

        // Block the worker so the next job is queued but not started.
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        serial.execute(Box::new(move || {
            let _ = gate_rx.recv();
        }));

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        context.execute(Box::new(move || flag.store(true, Ordering::SeqCst)));
        queue.invalidate();
        gate_tx.send(()).unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        serial.execute(Box::new(move || done_tx.send(()).unwrap()));
        done_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(!ran.load(Ordering::SeqCst));
    }
}
