mod common;

#[cfg(test)]
mod tests {
    use crate::common::{init_test_logging, wait};
    use promise_kit::{Context, Invalidatable, Promise, SerialQueue, ThreadPool};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_valid_invalidatable_runs_work() {
        init_test_logging();
        let queue = Invalidatable::new(ThreadPool::new().unwrap());
        let (tx, rx) = mpsc::channel();
        let promise = Promise::fulfilled(5).tap_on(&queue.context(), move |_| tx.send(()).unwrap());
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(promise.value(), Some(5));
    }

    #[test]
    fn test_invalidated_queue_drops_pending_callback() {
        init_test_logging();
        let serial = SerialQueue::new("invalidated-test").unwrap();
        let queue = Invalidatable::new(serial.clone());
        let ran = Arc::new(AtomicBool::new(false));

        // Hold the worker so the callback is queued but not started.
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        Context::new(serial.clone()).execute(Box::new(move || {
            let _ = gate_rx.recv();
        }));

        let flag = ran.clone();
        Promise::fulfilled(5).tap_on(&queue.context(), move |_| flag.store(true, Ordering::SeqCst));
        queue.invalidate();
        gate_tx.send(()).unwrap();

        thread::sleep(Duration::from_millis(100));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_later_callbacks_fire_after_invalidated_tap() {
        init_test_logging();
        let queue = Invalidatable::new(ThreadPool::new().unwrap());
        queue.invalidate();

        let skipped = Arc::new(AtomicBool::new(false));
        let flag = skipped.clone();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let promise = Promise::fulfilled(5)
            .tap_on(&queue.context(), move |_| flag.store(true, Ordering::SeqCst))
            .tap(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        assert_eq!(wait(&promise).unwrap(), 5);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!skipped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_invalidation_does_not_cancel_resolution() {
        let queue = Invalidatable::new(Context::immediate());
        let promise = Promise::<i32>::pending_on(&queue.context());
        let mapped = promise.map(|v| v + 1);
        queue.invalidate();
        assert!(promise.fulfill(1));
        assert_eq!(promise.value(), Some(1));
        // The map callback was routed through the invalidated context.
        assert!(mapped.is_pending());
    }

    #[test]
    fn test_custom_execution_context() {
        struct Counting {
            jobs: Arc<AtomicUsize>,
        }

        impl promise_kit::ExecutionContext for Counting {
            fn execute(&self, job: promise_kit::Job) {
                self.jobs.fetch_add(1, Ordering::SeqCst);
                job()
            }
        }

        let jobs = Arc::new(AtomicUsize::new(0));
        let context = Context::new(Counting { jobs: jobs.clone() });
        let promise = Promise::fulfilled_on(&context, 2).map(|v| v * 2).map(|v| v + 1);
        assert_eq!(promise.value(), Some(5));
        assert_eq!(jobs.load(Ordering::SeqCst), 2);
    }
}
