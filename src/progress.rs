//! Progress reporting and cooperative cancellation for long-running passes.
//!
//! A [`Progress`] is shared between a worker and whoever polls it. The worker
//! advances the counter once per pixel and checks the cancel flag in the same
//! place, so a cancelled pass stops within one pixel.

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// A pass stopped because its [`Progress`] was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cancelled;

/// Per-pixel callback for passes that cannot be cancelled.
#[inline]
pub(crate) fn uncancellable() -> Result<(), Infallible> {
    Ok(())
}

#[inline]
pub(crate) fn into_ok<T>(result: Result<T, Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(never) => match never {},
    }
}

/// Atomic `(current, max)` progress pair plus a cancellation flag.
#[derive(Debug, Default)]
pub struct Progress {
    current: AtomicU64,
    max: AtomicU64,
    cancelled: AtomicBool,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current `(value, max)` pair. `value` never decreases during a run.
    pub fn snapshot(&self) -> (u64, u64) {
        (
            self.current.load(Ordering::Relaxed),
            self.max.load(Ordering::Relaxed),
        )
    }

    /// Ask the running pass to stop at the next pixel.
    ///
    /// Cancellation is permanent: every later pass reporting to this
    /// `Progress` stops at its first pixel.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Begin a pass of `max` units, rewinding the counter to zero.
    pub(crate) fn start(&self, max: u64) {
        self.current.store(0, Ordering::Relaxed);
        self.max.store(max, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn advance(&self) {
        self.current.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one unit of work, then fail if cancellation was requested.
    #[inline]
    pub(crate) fn step(&self) -> Result<(), Cancelled> {
        self.advance();
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A pass running on its own named worker thread.
#[derive(Debug)]
pub struct Job<T> {
    progress: Arc<Progress>,
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> Job<T> {
    pub(crate) fn spawn<F>(name: &str, work: F) -> std::io::Result<Self>
    where
        F: FnOnce(&Progress) -> T + Send + 'static,
    {
        let progress = Arc::new(Progress::new());
        let shared = Arc::clone(&progress);
        let handle = std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || work(&shared))?;
        Ok(Self { progress, handle })
    }

    /// Current `(value, max)` progress of the worker.
    pub fn progress(&self) -> (u64, u64) {
        self.progress.snapshot()
    }

    pub fn cancel(&self) {
        self.progress.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the worker. A panic inside the worker is resumed here.
    pub fn join(self) -> T {
        match self.handle.join() {
            Ok(value) => value,
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_tracks_advances() {
        let p = Progress::new();
        p.start(3);
        p.advance();
        p.advance();
        assert_eq!(p.snapshot(), (2, 3));
        assert!(!p.is_cancelled());
        assert_eq!(p.step(), Ok(()));
        p.cancel();
        assert!(p.is_cancelled());
        assert_eq!(p.step(), Err(Cancelled));
        assert_eq!(p.snapshot(), (4, 3));
    }

    #[test]
    fn start_rewinds_counter() {
        let p = Progress::new();
        p.start(2);
        assert_eq!(p.step(), Ok(()));
        assert_eq!(p.step(), Ok(()));
        assert_eq!(p.snapshot(), (2, 2));
        p.start(5);
        assert_eq!(p.snapshot(), (0, 5));

        p.cancel();
        p.start(5);
        assert_eq!(p.step(), Err(Cancelled));
    }

    #[test]
    fn job_returns_worker_result() {
        let job = Job::spawn("progress test", |progress: &Progress| {
            progress.start(10);
            for _ in 0..10 {
                progress.advance();
            }
            42
        })
        .unwrap();
        assert_eq!(job.join(), 42);
    }

    #[test]
    fn job_sees_cancellation() {
        let job = Job::spawn("cancel test", |progress: &Progress| {
            while !progress.is_cancelled() {
                std::thread::yield_now();
            }
            "stopped"
        })
        .unwrap();
        job.cancel();
        assert_eq!(job.join(), "stopped");
    }
}
