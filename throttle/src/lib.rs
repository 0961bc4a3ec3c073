//! Call-rate throttling.
//!
//! [`Throttle`] wraps a function so that it runs at most once per wait window.
//!
//! # Windows
//!
//! ```text
//!  call   call call      call                  call
//!   |      |    |          |                     |
//!   v      v    v          v                     v
//!   [========== wait ======][======= wait =======][===== ...
//!   ^                       ^                     ^
//!   leading edge            trailing edge         leading edge
//!   (first call)            (last call: "call 4") (window was closed)
//! ```
//!
//! A window opens whenever the function is invoked, or when a trailing call is
//! deferred with no window open. While a window is open, calls are either
//! recorded as the pending trailing call (latest wins) or suppressed. When the
//! window elapses, a pending trailing call fires and opens the next window, so
//! trailing invocations respect the same rate as leading ones.
//!
//! Windows are measured on the tokio clock, which makes the throttle
//! deterministic under `tokio::time::pause`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

pub use pacer_types::{EdgePolicy, RuntimeError, ThrottleOptions, WaitWindow};

/// Window length used when `now + wait` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// What a single [`Throttle::call`] did with its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// The wrapped function ran before `call` returned.
    Invoked,
    /// The arguments were stored as the pending trailing call.
    Deferred,
    /// The arguments were dropped.
    Suppressed,
}

/// Rate-bounding wrapper around `Fn(T)`.
///
/// Cloning is cheap; all clones share one window. Dropping the last clone
/// aborts any pending trailing call.
pub struct Throttle<T: Send + 'static> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Clone for Throttle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> fmt::Debug for Throttle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Throttle")
            .field("options", &self.shared.options)
            .field("pending", &self.is_pending())
            .field("invocations", &self.invocations())
            .finish_non_exhaustive()
    }
}

type Callback<T> = Box<dyn Fn(T) + Send + Sync>;

struct Shared<T> {
    func: Callback<T>,
    options: ThrottleOptions,
    runtime: Handle,
    state: Mutex<State<T>>,
    invocations: AtomicU64,
}

struct State<T> {
    window: Option<Window>,
    pending: Option<T>,
    /// Bumped on every window change so stale timers can tell they lost.
    generation: u64,
}

struct Window {
    ends_at: Instant,
    timer: JoinHandle<()>,
}

impl<T: Send + 'static> Throttle<T> {
    /// Wrap `func`. Must be called from within a tokio runtime; the window
    /// timers are spawned on it.
    pub fn new<F>(func: F, options: ThrottleOptions) -> Result<Self, RuntimeError>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| RuntimeError {
            component: "Throttle",
        })?;

        Ok(Self {
            shared: Arc::new(Shared {
                func: Box::new(func),
                options,
                runtime,
                state: Mutex::new(State {
                    window: None,
                    pending: None,
                    generation: 0,
                }),
                invocations: AtomicU64::new(0),
            }),
        })
    }

    #[must_use]
    pub fn options(&self) -> ThrottleOptions {
        self.shared.options
    }

    /// Offer a call to the wrapped function.
    pub fn call(&self, args: T) -> CallOutcome {
        let edges = self.shared.options.edges();
        let mut state = self.shared.lock();

        if state.window.is_none() {
            if edges.leading {
                self.shared.open_window(&mut state);
                drop(state);
                tracing::trace!("throttle: leading edge");
                self.shared.invoke(args);
                return CallOutcome::Invoked;
            }
            if edges.trailing {
                self.shared.open_window(&mut state);
                state.pending = Some(args);
                return CallOutcome::Deferred;
            }
            return CallOutcome::Suppressed;
        }

        if edges.trailing {
            state.pending = Some(args);
            CallOutcome::Deferred
        } else {
            CallOutcome::Suppressed
        }
    }

    /// Discard any pending trailing call and close the current window.
    ///
    /// The next [`call`](Self::call) behaves like the first one ever made.
    pub fn cancel(&self) {
        let mut state = self.shared.lock();
        state.generation += 1;
        let dropped = state.pending.take().is_some();
        if let Some(window) = state.window.take() {
            window.timer.abort();
        }
        tracing::debug!(dropped_pending = dropped, "throttle cancelled");
    }

    /// Run the pending trailing call now instead of at the end of the window.
    ///
    /// The window restarts from this invocation. Returns `false` when there
    /// was nothing pending. This is an explicit override: the flushed call may
    /// land less than one window after the previous invocation.
    pub fn flush(&self) -> bool {
        let mut state = self.shared.lock();
        let Some(args) = state.pending.take() else {
            return false;
        };
        if let Some(window) = state.window.take() {
            window.timer.abort();
        }
        self.shared.open_window(&mut state);
        drop(state);
        tracing::debug!("throttle flushed");
        self.shared.invoke(args);
        true
    }

    /// Whether a trailing call is waiting for its window to elapse.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.shared.lock().pending.is_some()
    }

    /// When the open window closes, if one is open.
    #[must_use]
    pub fn window_ends_at(&self) -> Option<Instant> {
        self.shared.lock().window.as_ref().map(|w| w.ends_at)
    }

    /// Total number of times the wrapped function has run.
    #[must_use]
    pub fn invocations(&self) -> u64 {
        self.shared.invocations.load(Ordering::Relaxed)
    }
}

impl<T: Send + 'static> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Never call with the state lock held.
    fn invoke(&self, args: T) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        (self.func)(args);
    }

    fn open_window(self: &Arc<Self>, state: &mut State<T>) {
        state.generation += 1;
        let generation = state.generation;
        let ends_at = window_deadline(Instant::now(), self.options.wait());
        let weak = Arc::downgrade(self);

        let timer = self.runtime.spawn(async move {
            sleep_until(ends_at).await;
            window_elapsed(&weak, generation);
        });

        state.window = Some(Window { ends_at, timer });
    }
}

fn window_deadline(now: Instant, wait: Duration) -> Instant {
    now.checked_add(wait)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

fn window_elapsed<T: Send + 'static>(weak: &Weak<Shared<T>>, generation: u64) {
    let Some(shared) = weak.upgrade() else {
        return;
    };
    let mut state = shared.lock();
    if state.generation != generation {
        return;
    }

    // Our own handle; dropping it detaches rather than aborts.
    state.window = None;

    if let Some(args) = state.pending.take() {
        shared.open_window(&mut state);
        drop(state);
        tracing::trace!("throttle: trailing edge");
        shared.invoke(args);
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(window) = state.window.take() {
            window.timer.abort();
        }
    }
}
