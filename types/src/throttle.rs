//! Throttle configuration types.
//!
//! A throttle is described by a window length and the edges of that window
//! on which the wrapped function may fire. Both are validated on
//! construction so the runtime never sees a zero-length window.

use std::time::Duration;

use crate::OptionsError;

/// Length of a throttle window. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WaitWindow(Duration);

impl WaitWindow {
    pub fn new(wait: Duration) -> Result<Self, OptionsError> {
        if wait.is_zero() {
            return Err(OptionsError::ZeroWait);
        }
        Ok(Self(wait))
    }

    pub fn from_millis(ms: u64) -> Result<Self, OptionsError> {
        Self::new(Duration::from_millis(ms))
    }

    #[must_use]
    pub const fn get(self) -> Duration {
        self.0
    }
}

/// Which edges of a window may invoke the wrapped function.
///
/// - `leading`: the first call in a quiet period fires immediately.
/// - `trailing`: the last call received while a window is open fires once
///   the window elapses.
///
/// With both disabled the throttle never invokes anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct EdgePolicy {
    pub leading: bool,
    pub trailing: bool,
}

impl Default for EdgePolicy {
    fn default() -> Self {
        Self {
            leading: true,
            trailing: true,
        }
    }
}

impl EdgePolicy {
    #[must_use]
    pub const fn fires_at_all(self) -> bool {
        self.leading || self.trailing
    }
}

/// Validated options for a throttle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleOptions {
    wait: WaitWindow,
    edges: EdgePolicy,
}

impl ThrottleOptions {
    /// Options with the given window and both edges enabled.
    pub fn new(wait: Duration) -> Result<Self, OptionsError> {
        Ok(Self {
            wait: WaitWindow::new(wait)?,
            edges: EdgePolicy::default(),
        })
    }

    /// Same edges, different window.
    pub fn with_wait(mut self, wait: Duration) -> Result<Self, OptionsError> {
        self.wait = WaitWindow::new(wait)?;
        Ok(self)
    }

    pub fn leading(mut self, leading: bool) -> Self {
        self.edges.leading = leading;
        self
    }

    pub fn trailing(mut self, trailing: bool) -> Self {
        self.edges.trailing = trailing;
        self
    }

    #[must_use]
    pub const fn wait(&self) -> Duration {
        self.wait.get()
    }

    #[must_use]
    pub const fn edges(&self) -> EdgePolicy {
        self.edges
    }

    /// Upper bound on invocations over an interval of length `span`.
    ///
    /// Invocations are at least one window apart, so at most
    /// `ceil(span / wait) + 1` of them fit.
    #[must_use]
    pub fn max_invocations_within(&self, span: Duration) -> u64 {
        let wait = self.wait.get().as_nanos();
        let span = span.as_nanos();
        (span.div_ceil(wait) + 1) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_wait_rejected() {
        assert!(matches!(
            ThrottleOptions::new(Duration::ZERO),
            Err(OptionsError::ZeroWait)
        ));
        assert!(WaitWindow::from_millis(0).is_err());
    }

    #[test]
    fn defaults_fire_on_both_edges() {
        let opts = ThrottleOptions::new(Duration::from_millis(100)).unwrap();
        assert!(opts.edges().leading);
        assert!(opts.edges().trailing);
        assert_eq!(opts.wait(), Duration::from_millis(100));
    }

    #[test]
    fn builder_toggles_edges() {
        let opts = ThrottleOptions::new(Duration::from_millis(100))
            .unwrap()
            .leading(false);
        assert!(!opts.edges().leading);
        assert!(opts.edges().fires_at_all());

        let silent = opts.trailing(false);
        assert!(!silent.edges().fires_at_all());
    }

    #[test]
    fn with_wait_keeps_edges() {
        let opts = ThrottleOptions::new(Duration::from_millis(100))
            .unwrap()
            .leading(false)
            .with_wait(Duration::from_millis(40))
            .unwrap();
        assert_eq!(opts.wait(), Duration::from_millis(40));
        assert!(!opts.edges().leading);
        assert!(opts.with_wait(Duration::ZERO).is_err());
    }

    #[test]
    fn invocation_bound() {
        let opts = ThrottleOptions::new(Duration::from_millis(100)).unwrap();
        assert_eq!(opts.max_invocations_within(Duration::ZERO), 1);
        assert_eq!(opts.max_invocations_within(Duration::from_millis(100)), 2);
        assert_eq!(opts.max_invocations_within(Duration::from_millis(250)), 4);
    }
}
