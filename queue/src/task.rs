//! Task wrapping: timeout, panic containment, and result delivery.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time;

use pacer_types::TaskId;

/// Why a queued task produced no value.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// Removed before it started, by [`AsyncQueue::clear`](crate::AsyncQueue::clear)
    /// or because the queue went away with the task still waiting.
    #[error("task was cleared before it started")]
    Cleared,
    /// The task returned an error.
    #[error("task failed: {0:#}")]
    Failed(Arc<anyhow::Error>),
    #[error("task timed out after {0:?}")]
    TimedOut(Duration),
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// The error the task itself returned, if that is why it failed.
    #[must_use]
    pub fn source_error(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Type-erased unit of work waiting in the queue.
///
/// Running it executes the user task and yields a [`Finished`]: the report
/// for the scheduler plus the result still owed to the handle.
pub(crate) struct Job {
    pub(crate) id: TaskId,
    run: Box<dyn FnOnce() -> BoxFuture<'static, Finished> + Send>,
}

/// A task that has run but whose handle has not been resolved yet.
///
/// The scheduler settles its bookkeeping first and then calls
/// [`deliver`](Self::deliver), so an awaited handle always observes the
/// task's slot as released.
pub(crate) struct Finished {
    pub(crate) report: Result<(), TaskError>,
    deliver: Box<dyn FnOnce() + Send>,
}

impl Finished {
    pub(crate) fn deliver(self) {
        (self.deliver)();
    }
}

impl Job {
    pub(crate) fn new<F, Fut, T>(
        id: TaskId,
        task: F,
        timeout: Option<Duration>,
    ) -> (Self, TaskHandle<T>)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let run = Box::new(move || {
            async move {
                let result = run_guarded(task, timeout).await;
                let report = match &result {
                    Ok(_) => Ok(()),
                    Err(err) => Err(err.clone()),
                };
                Finished {
                    report,
                    deliver: Box::new(move || {
                        // The caller may have dropped the handle; that's fine.
                        let _ = tx.send(result);
                    }),
                }
            }
            .boxed()
        });
        (Self { id, run }, TaskHandle { id, rx })
    }

    pub(crate) fn start(self) -> BoxFuture<'static, Finished> {
        (self.run)()
    }
}

async fn run_guarded<F, Fut, T>(task: F, timeout: Option<Duration>) -> Result<T, TaskError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let guarded = AssertUnwindSafe(async move { task().await }).catch_unwind();

    let outcome = match timeout {
        Some(limit) => match time::timeout(limit, guarded).await {
            Ok(outcome) => outcome,
            Err(_) => return Err(TaskError::TimedOut(limit)),
        },
        None => guarded.await,
    };

    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(TaskError::Failed(Arc::new(err))),
        Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Completion handle for a queued task.
///
/// Await it for the task's value. Dropping it does not cancel the task.
/// The handle resolves only after the queue has released the task's slot, so
/// [`AsyncQueue::stats`](crate::AsyncQueue::stats) read afterwards already
/// counts the task as completed or failed.
#[derive(Debug)]
#[must_use = "dropping the handle discards the task's result"]
pub struct TaskHandle<T> {
    id: TaskId,
    rx: oneshot::Receiver<Result<T, TaskError>>,
}

impl<T> TaskHandle<T> {
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // Sender dropped without a result: the job never ran.
            Poll::Ready(Err(_)) => Poll::Ready(Err(TaskError::Cleared)),
            Poll::Pending => Poll::Pending,
        }
    }
}
