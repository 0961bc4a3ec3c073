//! Queue configuration and observation types.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::OptionsError;

/// Maximum number of tasks allowed in flight at once.
///
/// Zero is unrepresentable: a queue that can never start anything is a
/// configuration error, not a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Concurrency(NonZeroUsize);

impl Concurrency {
    pub const ONE: Self = Self(NonZeroUsize::MIN);
    pub const UNBOUNDED: Self = Self(NonZeroUsize::MAX);

    pub fn new(limit: usize) -> Result<Self, OptionsError> {
        NonZeroUsize::new(limit)
            .map(Self)
            .ok_or(OptionsError::ZeroConcurrency)
    }

    #[must_use]
    pub const fn get(self) -> usize {
        self.0.get()
    }

    #[must_use]
    pub const fn is_unbounded(self) -> bool {
        self.0.get() == usize::MAX
    }
}

impl Default for Concurrency {
    fn default() -> Self {
        Self::ONE
    }
}

/// Validated options for an async queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    concurrency: Concurrency,
    autostart: bool,
    task_timeout: Option<Duration>,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self::new(Concurrency::default())
    }
}

impl QueueOptions {
    #[must_use]
    pub const fn new(concurrency: Concurrency) -> Self {
        Self {
            concurrency,
            autostart: true,
            task_timeout: None,
        }
    }

    pub fn with_concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// When `false`, the queue is constructed paused and starts nothing until
    /// resumed.
    pub fn autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    /// Bound how long a single task may run once started.
    pub fn task_timeout(mut self, timeout: Duration) -> Result<Self, OptionsError> {
        if timeout.is_zero() {
            return Err(OptionsError::ZeroTimeout);
        }
        self.task_timeout = Some(timeout);
        Ok(self)
    }

    #[must_use]
    pub const fn concurrency(&self) -> Concurrency {
        self.concurrency
    }

    #[must_use]
    pub const fn starts_paused(&self) -> bool {
        !self.autostart
    }

    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.task_timeout
    }
}

/// Point-in-time snapshot of a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Tasks currently executing.
    pub running: usize,
    /// Tasks submitted but not yet started.
    pub pending: usize,
    pub paused: bool,
    /// Tasks that finished successfully.
    pub completed: u64,
    /// Tasks that failed, timed out, or panicked.
    pub failed: u64,
}

impl QueueStats {
    /// Nothing running and nothing waiting.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.running == 0 && self.pending == 0
    }

    /// Nothing waiting to start. Tasks may still be running.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.pending == 0
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.running + self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_concurrency_rejected() {
        assert!(matches!(
            Concurrency::new(0),
            Err(OptionsError::ZeroConcurrency)
        ));
        assert_eq!(Concurrency::new(3).unwrap().get(), 3);
    }

    #[test]
    fn unbounded_is_max() {
        assert!(Concurrency::UNBOUNDED.is_unbounded());
        assert!(!Concurrency::ONE.is_unbounded());
        assert_eq!(Concurrency::UNBOUNDED.get(), usize::MAX);
    }

    #[test]
    fn options_defaults() {
        let opts = QueueOptions::default();
        assert_eq!(opts.concurrency(), Concurrency::ONE);
        assert!(!opts.starts_paused());
        assert_eq!(opts.timeout(), None);
    }

    #[test]
    fn zero_timeout_rejected() {
        let err = QueueOptions::default().task_timeout(Duration::ZERO);
        assert!(matches!(err, Err(OptionsError::ZeroTimeout)));
    }

    #[test]
    fn stats_predicates() {
        let mut stats = QueueStats::default();
        assert!(stats.is_idle());
        assert!(stats.is_empty());

        stats.running = 1;
        assert!(!stats.is_idle());
        assert!(stats.is_empty());

        stats.pending = 2;
        assert!(!stats.is_empty());
        assert_eq!(stats.size(), 3);
    }

    #[test]
    fn stats_serialize_as_flat_object() {
        let stats = QueueStats {
            running: 2,
            pending: 1,
            paused: false,
            completed: 5,
            failed: 1,
        };
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["running"], 2);
        assert_eq!(json["failed"], 1);
    }
}
