//! Deferral of reactions onto a later turn.
//!
//! A [`Deferred`](crate::Deferred) never runs a reaction inside the call that
//! registered it or settled its source. Instead it hands a [`Task`] to a
//! [`Scheduler`], and whoever owns the scheduler decides when that later turn
//! happens. [`TaskQueue`] is the in-process FIFO used by default: every thread
//! has one, and [`run_until_idle`] drains it.
//!
//! ```
//! use deferred_cell::{scheduler, Deferred, Error};
//!
//! let doubled = Deferred::<i32, Error>::fulfilled(21).then(|v| Ok(v * 2));
//! assert_eq!(doubled.outcome(), None);
//!
//! scheduler::run_until_idle().unwrap();
//! assert_eq!(doubled.outcome(), Some(Ok(42)));
//! ```
use std::{
    cell::RefCell,
    collections::VecDeque,
    fmt,
    rc::Rc,
};

use tracing::warn;

use crate::Error;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

/// Anything able to run a task on a later turn of the current thread.
pub trait Scheduler {
    fn schedule_later(&self, task: Task);
}

/// Limits applied when a [`TaskQueue`] is drained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueOptions {
    /// Maximum number of tasks a single [`TaskQueue::run_until_idle`] call
    /// may run. `None` drains until the queue is empty.
    pub max_tasks_per_run: Option<usize>,
}

impl QueueOptions {
    pub fn bounded(limit: usize) -> Self {
        QueueOptions {
            max_tasks_per_run: Some(limit),
        }
    }
}

/// FIFO task queue. Clones share the same underlying queue.
#[derive(Clone, Default)]
pub struct TaskQueue {
    tasks: Rc<RefCell<VecDeque<Task>>>,
    options: QueueOptions,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: QueueOptions) -> Self {
        TaskQueue {
            tasks: Rc::default(),
            options,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Runs the oldest queued task, if any. Returns whether a task ran.
    pub fn run_next(&self) -> bool {
        // The borrow must end before the task runs; tasks schedule more tasks.
        let task = self.tasks.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs tasks, including ones scheduled along the way, until the queue
    /// is empty. Returns how many tasks ran.
    pub fn run_until_idle(&self) -> Result<usize, Error> {
        let mut ran = 0;
        loop {
            if let Some(limit) = self.options.max_tasks_per_run {
                if ran >= limit && !self.is_empty() {
                    warn!(limit, pending = self.len(), "task queue drain exceeded its budget");
                    return Err(Error::TurnBudgetExceeded { limit });
                }
            }
            if !self.run_next() {
                return Ok(ran);
            }
            ran += 1;
        }
    }
}

impl Scheduler for TaskQueue {
    fn schedule_later(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("len", &self.len())
            .field("options", &self.options)
            .finish()
    }
}

thread_local! {
    static DEFAULT_QUEUE: TaskQueue = TaskQueue::new();
    static CURRENT: RefCell<Option<Rc<dyn Scheduler>>> = const { RefCell::new(None) };
}

/// The scheduler new deferreds on this thread are bound to: the one installed
/// by [`enter`], or else the thread's default [`TaskQueue`].
pub fn current() -> Rc<dyn Scheduler> {
    CURRENT
        .with(|current| current.borrow().clone())
        .unwrap_or_else(|| Rc::new(default_queue()))
}

/// Handle to this thread's default queue.
pub fn default_queue() -> TaskQueue {
    DEFAULT_QUEUE.with(TaskQueue::clone)
}

/// Runs `f` with `scheduler` installed as the current scheduler.
pub fn enter<R>(scheduler: Rc<dyn Scheduler>, f: impl FnOnce() -> R) -> R {
    struct Restore(Option<Rc<dyn Scheduler>>);

    impl Drop for Restore {
        fn drop(&mut self) {
            let prev = self.0.take();
            CURRENT.with(|current| current.replace(prev));
        }
    }

    let _restore = Restore(CURRENT.with(|current| current.replace(Some(scheduler))));
    f()
}

/// Drains this thread's default queue.
pub fn run_until_idle() -> Result<usize, Error> {
    default_queue().run_until_idle()
}
