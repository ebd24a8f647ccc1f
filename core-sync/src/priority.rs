//! Interactive requests take priority over background sync
//!
//! [`RequestPriorityTracker`] counts in-flight requests. The transition from
//! zero to one active request pauses background work and the transition back
//! to zero resumes it. Both transitions happen under the same lock as the
//! counter update, so concurrent requests produce exactly one pause and one
//! resume per busy period.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Something that yields to interactive traffic.
pub trait SyncPauseControl: Send + Sync {
    /// Idempotent.
    fn pause_for_requests(&self);
    /// Idempotent.
    fn resume_after_requests(&self);
}

pub struct RequestPriorityTracker {
    active: Mutex<usize>,
    control: Arc<dyn SyncPauseControl>,
}

impl RequestPriorityTracker {
    pub fn new(control: Arc<dyn SyncPauseControl>) -> Self {
        Self {
            active: Mutex::new(0),
            control,
        }
    }

    /// Register a request; it ends when the guard is dropped.
    pub fn begin(self: &Arc<Self>) -> RequestGuard {
        {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            *active += 1;
            if *active == 1 {
                debug!("First active request, pausing background sync");
                self.control.pause_for_requests();
            }
        }
        RequestGuard {
            tracker: Arc::clone(self),
            started: Instant::now(),
        }
    }

    pub fn active_requests(&self) -> usize {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn end(&self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        *active = active.saturating_sub(1);
        if *active == 0 {
            debug!("No active requests, resuming background sync");
            self.control.resume_after_requests();
        }
    }
}

/// One in-flight request.
pub struct RequestGuard {
    tracker: Arc<RequestPriorityTracker>,
    started: Instant,
}

impl RequestGuard {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.tracker.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingControl {
        pauses: AtomicUsize,
        resumes: AtomicUsize,
    }

    impl SyncPauseControl for CountingControl {
        fn pause_for_requests(&self) {
            self.pauses.fetch_add(1, Ordering::SeqCst);
        }

        fn resume_after_requests(&self) {
            self.resumes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_overlapping_requests_pause_once() {
        let control = Arc::new(CountingControl::default());
        let tracker = Arc::new(RequestPriorityTracker::new(control.clone()));

        let first = tracker.begin();
        let second = tracker.begin();
        assert_eq!(tracker.active_requests(), 2);
        drop(first);
        assert_eq!(control.resumes.load(Ordering::SeqCst), 0);
        drop(second);

        assert_eq!(tracker.active_requests(), 0);
        assert_eq!(control.pauses.load(Ordering::SeqCst), 1);
        assert_eq!(control.resumes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_guard_released_on_panic() {
        let control = Arc::new(CountingControl::default());
        let tracker = Arc::new(RequestPriorityTracker::new(control.clone()));

        let handler_tracker = Arc::clone(&tracker);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = handler_tracker.begin();
            panic!("handler failed");
        }));

        assert!(outcome.is_err());
        assert_eq!(tracker.active_requests(), 0);
        assert_eq!(control.resumes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_requests_return_to_zero() {
        let control = Arc::new(CountingControl::default());
        let tracker = Arc::new(RequestPriorityTracker::new(control.clone()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    let _guard = tracker.begin();
                    std::thread::sleep(Duration::from_millis(5));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tracker.active_requests(), 0);
        assert_eq!(
            control.pauses.load(Ordering::SeqCst),
            control.resumes.load(Ordering::SeqCst)
        );
    }
}
