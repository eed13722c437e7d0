//! The acquire-all barrier shared by the holders of one multi-key request.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::watch;

/// Outcome of one wait on the barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Every member of the set is held; holders may return.
    AllAcquired,
    /// The request failed or was canceled; holders hand their locks back for
    /// release.
    Abandoned,
    /// The barrier did not fire in time; the holder refreshes its lock and
    /// re-arrives.
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Waiting,
    AllAcquired,
    Abandoned,
}

/// Lock-free barrier for `N` concurrently held locks.
///
/// Each holder decrements the outstanding counter on (re-)arrival; the
/// holder that brings it to zero fires the all-acquired signal. A holder
/// whose wait times out increments the counter back before refreshing, so
/// the barrier only fires while every member is simultaneously held.
#[derive(Debug)]
pub struct LockSynchronizer {
    outstanding: AtomicUsize,
    signal: watch::Sender<Signal>,
}

impl LockSynchronizer {
    /// A barrier for a set of the given size.
    pub fn new(size: usize) -> Self {
        let (signal, _) = watch::channel(Signal::Waiting);
        Self { outstanding: AtomicUsize::new(size), signal }
    }

    /// Register this holder as currently holding its lock. Fires the
    /// all-acquired signal when it is the last outstanding member.
    pub fn arrive(&self) {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _ = self.signal.send(Signal::AllAcquired);
        }
    }

    /// Undo an [`arrive`](Self::arrive) after a timed-out wait.
    pub fn depart(&self) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
    }

    /// Mark the whole request failed; every holder returns its lock.
    pub fn abandon(&self) {
        let _ = self.signal.send(Signal::Abandoned);
    }

    /// Wait for the barrier, up to `timeout`.
    pub async fn wait(&self, timeout: Duration) -> WaitOutcome {
        let mut receiver = self.signal.subscribe();
        let outcome =
            tokio::time::timeout(timeout, receiver.wait_for(|s| *s != Signal::Waiting)).await;
        match outcome {
            Ok(Ok(signal)) => match *signal {
                Signal::AllAcquired => WaitOutcome::AllAcquired,
                Signal::Abandoned => WaitOutcome::Abandoned,
                Signal::Waiting => unreachable!("wait_for filters the waiting state"),
            },
            // The sender lives as long as the synchronizer, but a dropped
            // request reads the same as an abandoned one.
            Ok(Err(_)) => WaitOutcome::Abandoned,
            Err(_) => WaitOutcome::TimedOut,
        }
    }
}
