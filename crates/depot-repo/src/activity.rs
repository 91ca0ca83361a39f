//! Progress reporting and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{RepoError, RepoResult};

/// Receives progress from long-running work and can request that it stop.
///
/// Work is never interrupted: operations poll [`is_cancelled`] between units
/// of work and unwind with [`RepoError::Cancelled`].
///
/// [`is_cancelled`]: ActivityReporter::is_cancelled
pub trait ActivityReporter: Send + Sync {
    fn started(&self, activity: &str, total: Option<u64>);
    fn advanced(&self, activity: &str, done: u64);
    fn finished(&self, activity: &str);
    fn is_cancelled(&self) -> bool;

    /// Fail with [`RepoError::Cancelled`] if cancellation was requested.
    fn check_cancelled(&self) -> RepoResult<()> {
        if self.is_cancelled() {
            Err(RepoError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Shared cancellation flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Reporter that logs through `tracing`.
#[derive(Clone, Debug, Default)]
pub struct TracingReporter {
    cancel: CancelToken,
}

impl TracingReporter {
    pub fn new(cancel: CancelToken) -> Self {
        Self { cancel }
    }
}

impl ActivityReporter for TracingReporter {
    fn started(&self, activity: &str, total: Option<u64>) {
        info!(activity, total, "started");
    }

    fn advanced(&self, activity: &str, done: u64) {
        debug!(activity, done, "progress");
    }

    fn finished(&self, activity: &str) {
        debug!(activity, "finished");
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A running activity. Reports `finished` when dropped.
pub struct Activity<'a> {
    reporter: &'a dyn ActivityReporter,
    name: String,
    done: u64,
}

impl<'a> Activity<'a> {
    pub fn start(reporter: &'a dyn ActivityReporter, name: impl Into<String>, total: Option<u64>) -> Self {
        let name = name.into();
        reporter.started(&name, total);
        Self {
            reporter,
            name,
            done: 0,
        }
    }

    /// Count `n` more units done, then check for cancellation.
    pub fn advance(&mut self, n: u64) -> RepoResult<()> {
        self.done += n;
        self.reporter.advanced(&self.name, self.done);
        self.reporter.check_cancelled()
    }

    pub fn done(&self) -> u64 {
        self.done
    }
}

impl Drop for Activity<'_> {
    fn drop(&mut self) {
        self.reporter.finished(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<String>>);

    impl ActivityReporter for Recording {
        fn started(&self, activity: &str, _total: Option<u64>) {
            self.0.lock().unwrap().push(format!("start {activity}"));
        }
        fn advanced(&self, activity: &str, done: u64) {
            self.0.lock().unwrap().push(format!("{activity} {done}"));
        }
        fn finished(&self, activity: &str) {
            self.0.lock().unwrap().push(format!("end {activity}"));
        }
        fn is_cancelled(&self) -> bool {
            false
        }
    }

    #[test]
    fn activity_reports_lifecycle() {
        let reporter = Recording::default();
        {
            let mut activity = Activity::start(&reporter, "copy", Some(2));
            activity.advance(1).unwrap();
            activity.advance(1).unwrap();
            assert_eq!(activity.done(), 2);
        }
        assert_eq!(
            *reporter.0.lock().unwrap(),
            vec!["start copy", "copy 1", "copy 2", "end copy"]
        );
    }

    #[test]
    fn cancelled_token_stops_activity() {
        let token = CancelToken::new();
        let reporter = TracingReporter::new(token.clone());
        let mut activity = Activity::start(&reporter, "scan", None);
        activity.advance(1).unwrap();
        token.cancel();
        assert!(matches!(activity.advance(1), Err(RepoError::Cancelled)));
    }
}
