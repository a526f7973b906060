//! The process-wide timer behind [`Context::execute_after`].
//!
//! One lazily spawned thread keeps a min-heap of deadlines and sleeps on a
//! condition variable until the earliest one is due. Due jobs are handed to
//! their context from the timer thread, so an inline context runs them there.
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use parking_lot::{const_mutex, Condvar, Mutex, MutexGuard};
use tracing::{trace, warn};

use crate::context::{Context, Job};
use crate::error::{catch_panic, ConfigError};

static TIMER: Mutex<Option<Arc<Timer>>> = const_mutex(None);

struct TimerEntry {
    deadline: Instant,
    // Breaks deadline ties in scheduling order.
    sequence: u64,
    context: Context,
    job: Job,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.sequence == other.sequence
    }
}

impl Eq for TimerEntry {}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: `BinaryHeap` is a max-heap and the earliest deadline must
        // sit on top.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct TimerHeap {
    heap: BinaryHeap<TimerEntry>,
    next_sequence: u64,
}

#[derive(Default)]
pub(crate) struct Timer {
    entries: Mutex<TimerHeap>,
    wake: Condvar,
}

impl Timer {
    /// The shared timer, spawning its thread on first use.
    pub(crate) fn global() -> Result<Arc<Timer>, ConfigError> {
        let mut slot = TIMER.lock();
        if let Some(timer) = slot.as_ref() {
            return Ok(Arc::clone(timer));
        }
        let timer = Arc::new(Timer::default());
        let worker = Arc::clone(&timer);
        thread::Builder::new()
            .name("promise-timer".to_string())
            .spawn(move || worker.run())?;
        *slot = Some(Arc::clone(&timer));
        Ok(timer)
    }

    pub(crate) fn schedule(&self, deadline: Instant, context: Context, job: Job) {
        let mut entries = self.entries.lock();
        let sequence = entries.next_sequence;
        entries.next_sequence += 1;
        let earliest = entries.heap.peek().map_or(true, |head| deadline < head.deadline);
        entries.heap.push(TimerEntry {
            deadline,
            sequence,
            context,
            job,
        });
        drop(entries);
        if earliest {
            self.wake.notify_one();
        }
    }

    fn run(&self) {
        let mut entries = self.entries.lock();
        loop {
            let next = entries.heap.peek().map(|head| head.deadline);
            match next {
                None => self.wake.wait(&mut entries),
                Some(deadline) if deadline <= Instant::now() => {
                    let Some(entry) = entries.heap.pop() else {
                        continue;
                    };
                    MutexGuard::unlocked(&mut entries, || fire(entry));
                }
                Some(deadline) => {
                    self.wake.wait_until(&mut entries, deadline);
                }
            }
        }
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.entries.lock().heap.len()
    }
}

fn fire(entry: TimerEntry) {
    trace!(sequence = entry.sequence, "timer fired");
    let TimerEntry { context, job, .. } = entry;
    if let Err(error) = catch_panic(move || context.execute(job)) {
        warn!(%error, "delayed job panicked on the timer thread");
    }
}
