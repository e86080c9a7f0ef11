//! Bounded priority task queue
//!
//! Admission control for expensive work (AI completions). At most
//! `max_concurrent` tasks run at once; the rest wait in a pending list
//! ordered by descending priority, FIFO among equal priorities.
//!
//! ```text
//! submit ──► active < max? ──yes──► spawn ──► result ──► release slot ──► admit next
//!                 │ no
//!                 └──► pending (priority order) ──► clear() ──► Err(Cleared)
//! ```
//!
//! Admitted tasks are spawned and always run to completion, even if the
//! caller drops its [`TaskHandle`].

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Default concurrency limit
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Why a submitted task produced no result
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Removed by [`TaskQueue::clear`] before it started
    #[error("task '{0}' was cleared from the queue before it started")]
    Cleared(String),

    /// Started but ended without a result (panicked or the runtime shut down)
    #[error("task '{0}' ended without producing a result")]
    Abandoned(String),
}

enum Admission {
    Run(Slot),
    Clear,
}

type Job = Box<dyn FnOnce(Admission) + Send>;

struct PendingTask {
    id: String,
    priority: i32,
    job: Job,
}

struct QueueState {
    active: usize,
    pending: VecDeque<PendingTask>,
}

struct Shared {
    max_concurrent: usize,
    state: Mutex<QueueState>,
}

impl Shared {
    fn start(self: &Arc<Self>, id: String, job: Job) {
        debug!(task_id = %id, "Task admitted");
        job(Admission::Run(Slot {
            shared: Arc::clone(self),
            id,
        }));
    }
}

/// A running task's claim on one concurrency slot
///
/// Dropping it (normal completion, error or panic) frees the slot and admits
/// the next pending task.
struct Slot {
    shared: Arc<Shared>,
    id: String,
}

impl Drop for Slot {
    fn drop(&mut self) {
        let next = {
            let mut state = self.shared.state.lock();
            state.active -= 1;
            let next = if state.active < self.shared.max_concurrent {
                state.pending.pop_front()
            } else {
                None
            };
            if next.is_some() {
                state.active += 1;
            }
            next
        };

        debug!(task_id = %self.id, "Task finished");
        if let Some(task) = next {
            self.shared.start(task.id, task.job);
        }
    }
}

/// Result of a submitted task
///
/// Resolves to the task's output, or a [`QueueError`] when the task was
/// cleared before starting or ended without a result.
pub struct TaskHandle<T> {
    id: String,
    rx: oneshot::Receiver<Result<T, QueueError>>,
}

impl<T> TaskHandle<T> {
    /// Id the task was submitted with
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, QueueError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(QueueError::Abandoned(this.id.clone()))))
    }
}

/// Priority-ordered queue with a concurrency limit
///
/// Cheap to clone; clones share the same slots and pending list.
///
/// # Example
///
/// ```
/// use orator_worker::TaskQueue;
///
/// # tokio_test::block_on(async {
/// let queue = TaskQueue::new(2);
/// let handle = queue.submit("summarize", 5, || async { 40 + 2 });
/// assert_eq!(handle.await, Ok(42));
/// # });
/// ```
#[derive(Clone)]
pub struct TaskQueue {
    shared: Arc<Shared>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT)
    }
}

impl TaskQueue {
    /// Create a queue running at most `max_concurrent` tasks (minimum 1)
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                max_concurrent: max_concurrent.max(1),
                state: Mutex::new(QueueState {
                    active: 0,
                    pending: VecDeque::new(),
                }),
            }),
        }
    }

    /// Submit a task
    ///
    /// Admission is decided immediately: the task starts now if a slot is
    /// free, otherwise it is placed before the first pending task with a
    /// strictly lower priority. Must be called within a Tokio runtime.
    pub fn submit<F, Fut, T>(&self, id: impl Into<String>, priority: i32, runnable: F) -> TaskHandle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let id = id.into();
        let (tx, rx) = oneshot::channel();

        let cleared_id = id.clone();
        let job: Job = Box::new(move |admission| match admission {
            Admission::Run(slot) => {
                let task = async move {
                    let output = runnable().await;
                    // Free the slot before the caller observes the result
                    drop(slot);
                    let _ = tx.send(Ok(output));
                };
                match tokio::runtime::Handle::try_current() {
                    Ok(runtime) => {
                        runtime.spawn(task);
                    }
                    Err(_) => warn!("No Tokio runtime, task abandoned"),
                }
            }
            Admission::Clear => {
                let _ = tx.send(Err(QueueError::Cleared(cleared_id)));
            }
        });

        let admitted = {
            let mut state = self.shared.state.lock();
            if state.active < self.shared.max_concurrent {
                state.active += 1;
                Some(job)
            } else {
                let position = state
                    .pending
                    .iter()
                    .position(|pending| pending.priority < priority)
                    .unwrap_or(state.pending.len());
                state.pending.insert(
                    position,
                    PendingTask {
                        id: id.clone(),
                        priority,
                        job,
                    },
                );
                debug!(
                    task_id = %id,
                    priority,
                    position,
                    queue_length = state.pending.len(),
                    "Task queued"
                );
                None
            }
        };

        if let Some(job) = admitted {
            self.shared.start(id.clone(), job);
        }

        TaskHandle { id, rx }
    }

    /// Drop every pending task; running tasks are unaffected
    ///
    /// The handles of dropped tasks resolve to [`QueueError::Cleared`].
    /// Returns the number of tasks dropped.
    pub fn clear(&self) -> usize {
        let cleared: Vec<PendingTask> = self.shared.state.lock().pending.drain(..).collect();
        let count = cleared.len();
        for task in cleared {
            (task.job)(Admission::Clear);
        }
        if count > 0 {
            debug!(cleared = count, "Pending tasks cleared");
        }
        count
    }

    /// Number of tasks waiting for a slot
    pub fn queue_length(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Number of running tasks
    pub fn active_count(&self) -> usize {
        self.shared.state.lock().active
    }

    pub fn max_concurrent(&self) -> usize {
        self.shared.max_concurrent
    }

    /// Ids of pending tasks in admission order
    pub fn pending_ids(&self) -> Vec<String> {
        self.shared
            .state
            .lock()
            .pending
            .iter()
            .map(|task| task.id.clone())
            .collect()
    }
}
