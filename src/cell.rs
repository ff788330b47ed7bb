use std::{
    cell::RefCell,
    collections::VecDeque,
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
    task::Waker,
};

use tracing::trace;

use crate::scheduler::Scheduler;

pub(crate) type CellRef<T, E> = Rc<RefCell<Inner<T, E>>>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Where a deferred is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Pending,
    Fulfilled,
    Rejected,
}

#[derive(Debug)]
enum State<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
}

/// A callback waiting on a cell. Built once per chaining call and run once.
pub(crate) struct Reaction<T, E> {
    react: Box<dyn FnOnce(Result<T, E>)>,
}

impl<T, E> Reaction<T, E> {
    pub(crate) fn new(react: impl FnOnce(Result<T, E>) + 'static) -> Self {
        Reaction {
            react: Box::new(react),
        }
    }

    fn dispatch(self, outcome: Result<T, E>) {
        (self.react)(outcome)
    }
}

pub(crate) struct Inner<T, E> {
    id: u64,
    state: State<T, E>,
    callbacks: VecDeque<Reaction<T, E>>,
    wakers: Vec<Waker>,
    scheduler: Rc<dyn Scheduler>,
}

pub(crate) fn new_cell<T, E>(scheduler: Rc<dyn Scheduler>) -> CellRef<T, E> {
    Rc::new(RefCell::new(Inner {
        id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
        state: State::Pending,
        callbacks: VecDeque::new(),
        wakers: Vec::new(),
        scheduler,
    }))
}

pub(crate) fn id<T, E>(cell: &CellRef<T, E>) -> u64 {
    cell.borrow().id
}

pub(crate) fn scheduler<T, E>(cell: &CellRef<T, E>) -> Rc<dyn Scheduler> {
    Rc::clone(&cell.borrow().scheduler)
}

pub(crate) fn status<T, E>(cell: &CellRef<T, E>) -> Status {
    match cell.borrow().state {
        State::Pending => Status::Pending,
        State::Fulfilled(_) => Status::Fulfilled,
        State::Rejected(_) => Status::Rejected,
    }
}

pub(crate) fn is_pending<T, E>(cell: &CellRef<T, E>) -> bool {
    matches!(cell.borrow().state, State::Pending)
}

pub(crate) fn outcome<T: Clone, E: Clone>(cell: &CellRef<T, E>) -> Option<Result<T, E>> {
    match &cell.borrow().state {
        State::Pending => None,
        State::Fulfilled(value) => Some(Ok(value.clone())),
        State::Rejected(error) => Some(Err(error.clone())),
    }
}

/// Moves a pending cell to its final state and schedules every queued
/// reaction, oldest first. A no-op on a settled cell.
pub(crate) fn settle<T, E>(cell: &CellRef<T, E>, outcome: Result<T, E>)
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    if !is_pending(cell) {
        trace!(cell = id(cell), "ignoring settle of an already settled deferred");
        return;
    }
    // Payload clones run with no borrow held; a `Clone` impl may inspect the cell.
    let state = match &outcome {
        Ok(value) => State::Fulfilled(value.clone()),
        Err(error) => State::Rejected(error.clone()),
    };
    let (id, callbacks, wakers, scheduler) = {
        let mut inner = cell.borrow_mut();
        if !matches!(inner.state, State::Pending) {
            trace!(cell = inner.id, "ignoring settle of an already settled deferred");
            return;
        }
        inner.state = state;
        (
            inner.id,
            std::mem::take(&mut inner.callbacks),
            std::mem::take(&mut inner.wakers),
            Rc::clone(&inner.scheduler),
        )
    };
    trace!(
        cell = id,
        fulfilled = outcome.is_ok(),
        reactions = callbacks.len(),
        "deferred settled"
    );

    for reaction in callbacks {
        let outcome = outcome.clone();
        scheduler.schedule_later(Box::new(move || reaction.dispatch(outcome)));
    }
    for waker in wakers {
        waker.wake();
    }
}

/// Queues `reaction` on a pending cell, or schedules it straight away against
/// the settled outcome.
pub(crate) fn register<T, E>(cell: &CellRef<T, E>, reaction: Reaction<T, E>)
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    // Only a shared borrow is held while the settled payload is cloned.
    let Some(outcome) = outcome(cell) else {
        cell.borrow_mut().callbacks.push_back(reaction);
        return;
    };
    let scheduler = scheduler(cell);
    scheduler.schedule_later(Box::new(move || reaction.dispatch(outcome)));
}

pub(crate) fn add_waker<T, E>(cell: &CellRef<T, E>, waker: &Waker) {
    let mut inner = cell.borrow_mut();
    if !inner.wakers.iter().any(|w| w.will_wake(waker)) {
        inner.wakers.push(waker.clone());
    }
}
