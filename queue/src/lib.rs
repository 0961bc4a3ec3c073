//! Concurrency-limited async task queue.
//!
//! [`AsyncQueue`] accepts task factories (closures returning a future) and
//! starts them in submission order, never running more than the configured
//! [`Concurrency`] at once.
//!
//! # Lifecycle
//!
//! ```text
//! add() -> pending (FIFO) --slot free && !paused--> running --> done
//!              |                                       |
//!           clear()                              Ok  -> handle
//!              v                                 Err -> on_error + handle
//!        handle: Cleared
//! ```
//!
//! Tasks are closures so nothing runs before a slot is granted. Failed,
//! timed-out, and panicking tasks free their slot like successful ones; the
//! error goes to the task's [`TaskHandle`] and to the `on_error` callback.
//!
//! Scheduling state lives behind a std mutex that is never held across an
//! await. Stats snapshots are republished on a `watch` channel after every
//! state change. [`AsyncQueue::on_idle`] and [`AsyncQueue::on_empty`] wait on
//! milestone counters bumped under the same lock, so a waiter sees every
//! moment the queue went idle even if new work arrived before it was polled.

mod task;

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;

pub use pacer_types::{Concurrency, QueueOptions, QueueStats, RuntimeError, TaskId};
pub use task::{TaskError, TaskHandle};

use task::Job;

type ErrorCallback = Arc<dyn Fn(TaskId, &TaskError) + Send + Sync>;

/// Bounded-concurrency FIFO queue for async tasks.
///
/// Cloning is cheap; clones drive the same queue.
#[derive(Clone)]
pub struct AsyncQueue {
    shared: Arc<Shared>,
}

struct Shared {
    runtime: Handle,
    task_timeout: Option<Duration>,
    state: Mutex<State>,
    stats: watch::Sender<QueueStats>,
    milestones: watch::Sender<Milestones>,
    on_error: Mutex<Option<ErrorCallback>>,
}

struct State {
    concurrency: Concurrency,
    paused: bool,
    pending: VecDeque<Job>,
    running: usize,
    next_id: TaskId,
    completed: u64,
    failed: u64,
}

/// How many times the queue has been observed idle or empty.
#[derive(Debug, Clone, Copy, Default)]
struct Milestones {
    idle: u64,
    empty: u64,
}

impl State {
    fn snapshot(&self) -> QueueStats {
        QueueStats {
            running: self.running,
            pending: self.pending.len(),
            paused: self.paused,
            completed: self.completed,
            failed: self.failed,
        }
    }

    fn has_free_slot(&self) -> bool {
        self.running < self.concurrency.get()
    }
}

impl fmt::Debug for AsyncQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncQueue")
            .field("concurrency", &self.concurrency())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl AsyncQueue {
    /// Create a queue. Must be called from within a tokio runtime; tasks are
    /// spawned on it.
    pub fn new(options: QueueOptions) -> Result<Self, RuntimeError> {
        let runtime = Handle::try_current().map_err(|_| RuntimeError {
            component: "AsyncQueue",
        })?;

        let state = State {
            concurrency: options.concurrency(),
            paused: options.starts_paused(),
            pending: VecDeque::new(),
            running: 0,
            next_id: TaskId::new(1),
            completed: 0,
            failed: 0,
        };
        let (stats, _) = watch::channel(state.snapshot());
        let (milestones, _) = watch::channel(Milestones::default());

        Ok(Self {
            shared: Arc::new(Shared {
                runtime,
                task_timeout: options.timeout(),
                state: Mutex::new(state),
                stats,
                milestones,
                on_error: Mutex::new(None),
            }),
        })
    }

    /// Queue with the given limit and default options.
    pub fn with_concurrency(limit: Concurrency) -> Result<Self, RuntimeError> {
        Self::new(QueueOptions::new(limit))
    }

    /// Submit a task. It starts immediately when a slot is free and the queue
    /// is not paused, otherwise after every earlier submission has started.
    pub fn add<F, Fut, T>(&self, task: F) -> TaskHandle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let mut state = self.shared.lock();
        let id = state.next_id;
        state.next_id = id.next();

        let (job, handle) = Job::new(id, task, self.shared.task_timeout);
        state.pending.push_back(job);
        tracing::debug!(task = %id, pending = state.pending.len(), "task queued");

        self.shared.drain(&mut state);
        handle
    }

    /// Submit several tasks, preserving iteration order.
    pub fn add_all<I, F, Fut, T>(&self, tasks: I) -> Vec<TaskHandle<T>>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        tasks.into_iter().map(|task| self.add(task)).collect()
    }

    /// Register the callback that receives every task failure.
    ///
    /// Replaces any previous callback. It runs on the runtime thread that
    /// finished the task, before the task's slot is released, so by the time
    /// [`on_idle`](Self::on_idle) resolves every failure has been reported.
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(TaskId, &TaskError) + Send + Sync + 'static,
    {
        *self
            .shared
            .on_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    /// Stop starting tasks. Running tasks are unaffected.
    pub fn pause(&self) {
        let mut state = self.shared.lock();
        if !state.paused {
            state.paused = true;
            tracing::debug!("queue paused");
            self.shared.publish(&state);
        }
    }

    /// Resume starting tasks, filling free slots in submission order.
    pub fn resume(&self) {
        let mut state = self.shared.lock();
        if state.paused {
            state.paused = false;
            tracing::debug!("queue resumed");
        }
        self.shared.drain(&mut state);
    }

    /// Drop every task that has not started. Their handles resolve to
    /// [`TaskError::Cleared`]. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let dropped: Vec<Job> = {
            let mut state = self.shared.lock();
            let dropped = state.pending.drain(..).collect();
            self.shared.publish(&state);
            dropped
        };
        let count = dropped.len();
        if count > 0 {
            tracing::debug!(dropped = count, "queue cleared");
        }
        // Dropping the jobs outside the lock wakes their handles.
        drop(dropped);
        count
    }

    /// Change the concurrency limit.
    ///
    /// Raising it starts waiting tasks right away. Lowering it never
    /// interrupts running tasks; new ones start once the running count falls
    /// below the new limit.
    pub fn set_concurrency(&self, limit: Concurrency) {
        let mut state = self.shared.lock();
        state.concurrency = limit;
        tracing::debug!(concurrency = limit.get(), "concurrency changed");
        self.shared.drain(&mut state);
    }

    /// Resolves at the first moment nothing is running and nothing is
    /// waiting, counting from the first poll. Immediately if that is now.
    ///
    /// A paused queue with waiting tasks is not idle.
    pub async fn on_idle(&self) {
        self.wait_until(QueueStats::is_idle, |m| m.idle).await;
    }

    /// Resolves at the first moment nothing is waiting to start. Tasks may
    /// still be running.
    pub async fn on_empty(&self) {
        self.wait_until(QueueStats::is_empty, |m| m.empty).await;
    }

    async fn wait_until(
        &self,
        reached: fn(&QueueStats) -> bool,
        count: fn(&Milestones) -> u64,
    ) {
        let (mut rx, seen) = {
            let state = self.shared.lock();
            if reached(&state.snapshot()) {
                return;
            }
            // Subscribing under the lock: no milestone can slip in between.
            let rx = self.shared.milestones.subscribe();
            let seen = count(&rx.borrow());
            (rx, seen)
        };
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|m| count(m) != seen).await;
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        self.shared.lock().snapshot()
    }

    #[must_use]
    pub fn running(&self) -> usize {
        self.shared.lock().running
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.lock().pending.len()
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.shared.lock().paused
    }

    #[must_use]
    pub fn concurrency(&self) -> Concurrency {
        self.shared.lock().concurrency
    }

    /// Subscribe to stats snapshots, republished after every state change.
    #[must_use]
    pub fn watch_stats(&self) -> watch::Receiver<QueueStats> {
        self.shared.stats.subscribe()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Caller holds the state lock.
    fn publish(&self, state: &State) {
        let stats = state.snapshot();
        if stats.is_empty() {
            self.milestones.send_modify(|m| {
                m.empty = m.empty.wrapping_add(1);
                if stats.is_idle() {
                    m.idle = m.idle.wrapping_add(1);
                }
            });
        }
        self.stats.send_replace(stats);
    }

    /// Start as many pending tasks as the limit allows, then publish.
    fn drain(self: &Arc<Self>, state: &mut State) {
        while !state.paused && state.has_free_slot() {
            let Some(job) = state.pending.pop_front() else {
                break;
            };
            state.running += 1;
            self.spawn(job);
        }
        self.publish(state);
    }

    fn spawn(self: &Arc<Self>, job: Job) {
        let id = job.id;
        tracing::debug!(task = %id, "task started");

        let shared = Arc::clone(self);
        self.runtime.spawn(async move {
            let finished = job.start().await;
            shared.finish(id, &finished.report);
            finished.deliver();
        });
    }

    fn finish(self: &Arc<Self>, id: TaskId, report: &Result<(), TaskError>) {
        if let Err(err) = report {
            tracing::warn!(task = %id, error = %err, "task failed");
            let callback = self
                .on_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(callback) = callback
                && panic::catch_unwind(AssertUnwindSafe(|| callback(id, err))).is_err()
            {
                tracing::error!(task = %id, "on_error callback panicked");
            }
        } else {
            tracing::debug!(task = %id, "task finished");
        }

        let mut state = self.lock();
        state.running -= 1;
        if report.is_ok() {
            state.completed += 1;
        } else {
            state.failed += 1;
        }
        self.drain(&mut state);
    }
}
