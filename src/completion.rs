//! Shutdown completion signalling

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Shared flag the allocator sets once every slot has been destroyed
/// and the loop is about to exit.
pub(crate) struct CompletionSignal {
    done: Mutex<bool>,
    cond: Condvar,
}

impl CompletionSignal {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            done: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    pub(crate) fn signal(&self) {
        let mut done = self.done.lock().unwrap();
        *done = true;
        self.cond.notify_all();
    }
}

/// Handle returned by [`Pool::shutdown`](crate::Pool::shutdown).
///
/// Every call to `shutdown` returns a handle onto the same underlying
/// signal; all of them complete together, once the last slot has been
/// destroyed and the allocator has exited. A claimed object that is
/// never released keeps the signal pending forever.
#[derive(Clone)]
pub struct Completion {
    signal: Arc<CompletionSignal>,
}

impl Completion {
    pub(crate) fn new(signal: Arc<CompletionSignal>) -> Self {
        Self { signal }
    }

    /// Block until shutdown has completed, up to `timeout`. Returns
    /// true if the pool finished draining within the deadline.
    pub fn await_done(&self, timeout: Duration) -> bool {
        let done = self.signal.done.lock().unwrap();
        let (done, _timed_out) = self
            .signal
            .cond
            .wait_timeout_while(done, timeout, |done| !*done)
            .unwrap();
        *done
    }

    /// Non-blocking check.
    pub fn is_done(&self) -> bool {
        *self.signal.done.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn await_times_out_while_pending() {
        let completion = Completion::new(CompletionSignal::new());
        let started = Instant::now();
        assert!(!completion.await_done(Duration::from_millis(30)));
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert!(!completion.is_done());
    }

    #[test]
    fn signal_wakes_every_waiter() {
        let signal = CompletionSignal::new();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let handle = Completion::new(Arc::clone(&signal));
                thread::spawn(move || handle.await_done(Duration::from_secs(5)))
            })
            .collect();
        thread::sleep(Duration::from_millis(10));
        signal.signal();
        for waiter in waiters {
            assert!(waiter.join().unwrap());
        }
    }

    #[test]
    fn await_after_signal_returns_immediately() {
        let signal = CompletionSignal::new();
        signal.signal();
        let completion = Completion::new(signal);
        assert!(completion.await_done(Duration::ZERO));
        assert!(completion.is_done());
    }
}
