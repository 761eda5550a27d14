//! Manual-reset completion signal.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::watch;

/// Set once when a table is complete; never reset.
///
/// Threads block on it with [`wait_timeout`](Self::wait_timeout); async code
/// can [`subscribe`](Self::subscribe) and combine it with other futures in
/// `tokio::select!`.
pub struct CompletionSignal {
    set: Mutex<bool>,
    cond: Condvar,
    watch: watch::Sender<bool>,
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionSignal {
    pub fn new() -> Self {
        let (watch, _) = watch::channel(false);
        Self {
            set: Mutex::new(false),
            cond: Condvar::new(),
            watch,
        }
    }

    /// Raise the signal, waking every waiter.
    pub fn set(&self) {
        {
            let mut set = self.set.lock();
            *set = true;
            self.cond.notify_all();
        }
        self.watch.send_replace(true);
    }

    pub fn is_set(&self) -> bool {
        *self.set.lock()
    }

    /// Block until the signal is set or `timeout` elapses.
    ///
    /// Returns whether the signal is set. A zero timeout only polls.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut set = self.set.lock();
        while !*set {
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut set, deadline).timed_out() {
                        return *set;
                    }
                }
                None => self.cond.wait(&mut set),
            }
        }
        true
    }

    /// Receiver that observes `true` once the signal is set.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.watch.subscribe()
    }

    /// Wait asynchronously for the signal.
    pub async fn wait(&self) {
        let mut rx = self.subscribe();
        // The sender lives as long as `self`, so this cannot fail while borrowed.
        let _ = rx.wait_for(|set| *set).await;
    }
}
