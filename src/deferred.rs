use std::{
    fmt,
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};

use crate::{
    cell::{self, CellRef, Reaction, Status},
    resolution::{IntoResolution, Resolver, Thenable},
    scheduler::{self, Scheduler},
    Error,
};

/// A value that is settled exactly once, to `Ok(T)` or `Err(E)`, by whoever
/// holds its [`Resolver`].
///
/// Handles are cheap to clone; clones observe the same settlement. Reactions
/// registered with [`then`](Deferred::then) and friends never run inside the
/// call that registers them or the call that settles the source: they are
/// handed to the deferred's [`Scheduler`] and run on a later turn, in
/// registration order.
///
/// # Examples
///
/// ```
/// use deferred_cell::{scheduler, Deferred, Error};
///
/// let (deferred, resolver) = Deferred::<String, Error>::pending();
/// let greeting = deferred.then(|name| Ok(format!("hello {name}")));
///
/// resolver.resolve("world".into());
/// scheduler::run_until_idle().unwrap();
/// assert_eq!(greeting.outcome(), Some(Ok("hello world".to_string())));
/// ```
pub struct Deferred<T, E> {
    pub(crate) cell: CellRef<T, E>,
}

impl<T, E> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Creates a deferred on the current scheduler and runs `start` with its
    /// resolver before returning.
    pub fn new<F>(start: F) -> Self
    where
        F: FnOnce(Resolver<T, E>),
    {
        Self::new_in(scheduler::current(), start)
    }

    pub fn new_in<F>(scheduler: Rc<dyn Scheduler>, start: F) -> Self
    where
        F: FnOnce(Resolver<T, E>),
    {
        let (deferred, resolver) = Self::pending_in(scheduler);
        start(resolver);
        deferred
    }

    /// Like [`new`](Deferred::new), but an `Err` returned by `start` rejects
    /// the deferred unless `start` already settled it.
    pub fn try_new<F>(start: F) -> Self
    where
        F: FnOnce(Resolver<T, E>) -> Result<(), E>,
    {
        Self::try_new_in(scheduler::current(), start)
    }

    pub fn try_new_in<F>(scheduler: Rc<dyn Scheduler>, start: F) -> Self
    where
        F: FnOnce(Resolver<T, E>) -> Result<(), E>,
    {
        let (deferred, resolver) = Self::pending_in(scheduler);
        if let Err(error) = start(resolver.clone()) {
            resolver.reject(error);
        }
        deferred
    }

    /// Creates a pending deferred on the current scheduler together with the
    /// resolver that settles it.
    pub fn pending() -> (Self, Resolver<T, E>) {
        Self::pending_in(scheduler::current())
    }

    pub fn pending_in(scheduler: Rc<dyn Scheduler>) -> (Self, Resolver<T, E>) {
        let cell = cell::new_cell(scheduler);
        let resolver = Resolver::new(Rc::clone(&cell));
        (Deferred { cell }, resolver)
    }

    pub fn status(&self) -> Status {
        cell::status(&self.cell)
    }

    /// The settled result, or `None` while pending.
    pub fn outcome(&self) -> Option<Result<T, E>> {
        cell::outcome(&self.cell)
    }

    /// Chains a success handler. Errors skip the handler and reject the
    /// returned deferred unchanged.
    ///
    /// The handler's return value settles the returned deferred: `Ok` fulfils,
    /// `Err` rejects, and a [`Deferred`] or [`Resolution`](crate::Resolution) is
    /// adopted.
    pub fn then<F, R>(&self, on_fulfilled: F) -> Deferred<R::Value, E>
    where
        F: FnOnce(T) -> R + 'static,
        R: IntoResolution<Error = E>,
        R::Value: Clone + 'static,
    {
        self.chain(move |resolver| {
            Reaction::new(move |outcome| match outcome {
                Ok(value) => resolver.resolve_with(on_fulfilled(value)),
                Err(error) => resolver.reject(error),
            })
        })
    }

    /// Chains a handler for each outcome.
    pub fn then_with<F, G, R, S>(&self, on_fulfilled: F, on_rejected: G) -> Deferred<R::Value, E>
    where
        F: FnOnce(T) -> R + 'static,
        G: FnOnce(E) -> S + 'static,
        R: IntoResolution<Error = E>,
        S: IntoResolution<Value = R::Value, Error = E>,
        R::Value: Clone + 'static,
    {
        self.chain(move |resolver| {
            Reaction::new(move |outcome| match outcome {
                Ok(value) => resolver.resolve_with(on_fulfilled(value)),
                Err(error) => resolver.resolve_with(on_rejected(error)),
            })
        })
    }

    /// Chains a failure handler. Values skip the handler and fulfil the
    /// returned deferred unchanged; a handler returning `Ok` recovers.
    pub fn catch<G, S>(&self, on_rejected: G) -> Deferred<T, E>
    where
        G: FnOnce(E) -> S + 'static,
        S: IntoResolution<Value = T, Error = E>,
    {
        self.chain(move |resolver| {
            Reaction::new(move |outcome| match outcome {
                Ok(value) => resolver.resolve(value),
                Err(error) => resolver.resolve_with(on_rejected(error)),
            })
        })
    }

    /// Chains a handler that runs whichever way the source settles.
    ///
    /// The returned deferred settles with what `on_done` returns, not with the
    /// source's result; pass the argument back to keep it.
    pub fn finally<F, R>(&self, on_done: F) -> Deferred<R::Value, E>
    where
        F: FnOnce(Result<T, E>) -> R + 'static,
        R: IntoResolution<Error = E>,
        R::Value: Clone + 'static,
    {
        self.chain(move |resolver| {
            Reaction::new(move |outcome| resolver.resolve_with(on_done(outcome)))
        })
    }

    /// Runs `react` once this deferred settles, on a later turn.
    pub(crate) fn on_settled(&self, react: impl FnOnce(Result<T, E>) + 'static) {
        cell::register(&self.cell, Reaction::new(react));
    }

    fn chain<U>(&self, reaction: impl FnOnce(Resolver<U, E>) -> Reaction<T, E>) -> Deferred<U, E>
    where
        U: Clone + 'static,
    {
        let (dependent, resolver) = Deferred::pending_in(cell::scheduler(&self.cell));
        cell::register(&self.cell, reaction(resolver));
        dependent
    }
}

impl<T, E> Thenable<T, E> for Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    fn then(self: Box<Self>, resolver: Resolver<T, E>) -> Result<(), E> {
        self.on_settled(move |outcome| match outcome {
            Ok(value) => resolver.resolve(value),
            Err(error) => resolver.reject(error),
        });
        Ok(())
    }

    fn cell_id(&self) -> Option<u64> {
        Some(cell::id(&self.cell))
    }
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Deferred {
            cell: Rc::clone(&self.cell),
        }
    }
}

impl<T, E> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("id", &cell::id(&self.cell))
            .field("status", &cell::status(&self.cell))
            .finish()
    }
}

/// Awaiting only observes settlement; it does not drive the scheduler.
///
/// Reactions reach a chained deferred on later turns of its [`Scheduler`], so
/// a deferred produced by [`then`](Deferred::then) and friends stays pending
/// until someone drains that scheduler, for example with
/// [`scheduler::run_until_idle`]. Blocking on such a deferred without draining
/// the queue never completes.
///
/// ```
/// use deferred_cell::{scheduler, Deferred, Error};
/// use futures::executor::block_on;
///
/// let doubled = Deferred::<i32, Error>::fulfilled(1).then(|v| Ok(v * 2));
/// scheduler::run_until_idle().unwrap();
/// assert_eq!(block_on(doubled), Ok(2));
/// ```
impl<T: Clone, E: Clone> Future for Deferred<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match cell::outcome(&self.cell) {
            Some(outcome) => Poll::Ready(outcome),
            None => {
                cell::add_waker(&self.cell, cx.waker());
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{scheduler::TaskQueue, Resolution};
    use futures::{executor::LocalPool, task::LocalSpawnExt};
    use std::cell::RefCell;

    #[derive(Debug, Clone, PartialEq)]
    enum Failure {
        Msg(&'static str),
        Deferred(Error),
    }

    impl From<Error> for Failure {
        fn from(error: Error) -> Self {
            Failure::Deferred(error)
        }
    }

    fn queue() -> (TaskQueue, Rc<dyn Scheduler>) {
        let queue = TaskQueue::new();
        let scheduler: Rc<dyn Scheduler> = Rc::new(queue.clone());
        (queue, scheduler)
    }

    #[test]
    fn start_runs_synchronously_and_first_settle_wins() {
        let (_queue, scheduler) = queue();
        let ran = Rc::new(RefCell::new(false));
        let flag = ran.clone();
        let deferred = Deferred::<i32, Failure>::new_in(scheduler, move |resolver| {
            *flag.borrow_mut() = true;
            resolver.resolve(1);
            resolver.resolve(2);
            resolver.reject(Failure::Msg("3"));
        });
        assert!(*ran.borrow());
        assert_eq!(deferred.outcome(), Some(Ok(1)));
    }

    #[test]
    fn handlers_never_run_in_the_registering_call() {
        let (queue, scheduler) = queue();
        let deferred = Deferred::<&str, Failure>::new_in(scheduler, |r| r.resolve("x"));
        let seen = Rc::new(RefCell::new(None));
        let sink = seen.clone();
        deferred.then(move |v| {
            *sink.borrow_mut() = Some(v);
            Ok(())
        });
        assert_eq!(*seen.borrow(), None);

        queue.run_until_idle().unwrap();
        assert_eq!(*seen.borrow(), Some("x"));
    }

    #[test]
    fn reactions_on_one_source_run_in_registration_order() {
        let (queue, scheduler) = queue();
        let (deferred, resolver) = Deferred::<i32, Failure>::pending_in(scheduler);
        let log = Rc::new(RefCell::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let log = log.clone();
            deferred.then(move |v| {
                log.borrow_mut().push((tag, v));
                Ok(())
            });
        }
        resolver.resolve(4);
        queue.run_until_idle().unwrap();
        assert_eq!(*log.borrow(), vec![("first", 4), ("second", 4), ("third", 4)]);
    }

    #[test]
    fn handler_error_rejects_the_dependent() {
        let (queue, scheduler) = queue();
        let deferred = Deferred::<i32, Failure>::new_in(scheduler, |r| r.resolve(1));
        let failed = deferred.then(|_| Err::<i32, _>(Failure::Msg("bad")));
        queue.run_until_idle().unwrap();
        assert_eq!(failed.outcome(), Some(Err(Failure::Msg("bad"))));
    }

    #[test]
    fn catch_recovers_and_then_with_picks_the_matching_arm() {
        let (queue, scheduler) = queue();
        let deferred = Deferred::<i32, Failure>::new_in(scheduler, |r| r.reject(Failure::Msg("e")));
        let recovered = deferred.catch(|_| Ok(0)).then(|v| Ok(v + 1));
        let labelled = deferred.then_with(|v| Ok(format!("ok {v}")), |e| Ok(format!("err {e:?}")));
        queue.run_until_idle().unwrap();
        assert_eq!(recovered.outcome(), Some(Ok(1)));
        assert_eq!(labelled.outcome(), Some(Ok(r#"err Msg("e")"#.to_string())));
    }

    #[test]
    fn catch_passes_values_through() {
        let (queue, scheduler) = queue();
        let deferred = Deferred::<i32, Failure>::new_in(scheduler, |r| r.resolve(6));
        let passed = deferred.catch(|_| Ok(-1));
        queue.run_until_idle().unwrap();
        assert_eq!(passed.outcome(), Some(Ok(6)));
    }

    #[test]
    fn finally_settles_with_the_handler_result() {
        let (queue, scheduler) = queue();
        let ok = Deferred::<i32, Failure>::new_in(scheduler.clone(), |r| r.resolve(1));
        let err = Deferred::<i32, Failure>::new_in(scheduler, |r| r.reject(Failure::Msg("e")));
        let from_ok = ok.finally(|outcome| Ok(outcome.is_ok()));
        let from_err = err.finally(|outcome| Ok(outcome.is_ok()));
        queue.run_until_idle().unwrap();
        assert_eq!(from_ok.outcome(), Some(Ok(true)));
        assert_eq!(from_err.outcome(), Some(Ok(false)));
    }

    #[test]
    fn returning_a_deferred_from_a_handler_chains_it() {
        let (queue, scheduler) = queue();
        let (inner, inner_resolver) = Deferred::<i32, Failure>::pending_in(scheduler.clone());
        let outer = Deferred::<i32, Failure>::new_in(scheduler, |r| r.resolve(1));
        let adopted = outer.then(move |_| inner);

        queue.run_until_idle().unwrap();
        assert_eq!(adopted.status(), Status::Pending);

        inner_resolver.resolve(10);
        queue.run_until_idle().unwrap();
        assert_eq!(adopted.outcome(), Some(Ok(10)));
    }

    #[test]
    fn handler_returning_its_own_dependent_rejects() {
        let (queue, scheduler) = queue();
        let source = Deferred::<i32, Failure>::new_in(scheduler, |r| r.resolve(1));
        let slot: Rc<RefCell<Option<Deferred<i32, Failure>>>> = Rc::default();
        let own = slot.clone();
        let dependent = source.then(move |_| match own.borrow_mut().take() {
            Some(itself) => Resolution::Deferred(itself),
            None => Resolution::Rejected(Failure::Msg("missing")),
        });
        *slot.borrow_mut() = Some(dependent.clone());

        queue.run_until_idle().unwrap();
        assert_eq!(
            dependent.outcome(),
            Some(Err(Failure::Deferred(Error::SelfResolution)))
        );
    }

    #[test]
    fn try_new_rejects_on_start_error() {
        let queue = TaskQueue::new();
        let deferred = scheduler::enter(Rc::new(queue), || {
            Deferred::<i32, Failure>::try_new(|_| Err(Failure::Msg("start")))
        });
        assert_eq!(deferred.outcome(), Some(Err(Failure::Msg("start"))));

        let settled_first = Deferred::<i32, Failure>::try_new(|r| {
            r.resolve(2);
            Err(Failure::Msg("ignored"))
        });
        assert_eq!(settled_first.outcome(), Some(Ok(2)));
    }

    #[test]
    fn try_new_in_uses_the_given_scheduler() {
        let (queue, scheduler) = queue();
        let deferred = Deferred::<i32, Failure>::try_new_in(scheduler, |_| Err(Failure::Msg("start")));
        assert_eq!(deferred.outcome(), Some(Err(Failure::Msg("start"))));

        let recovered = deferred.catch(|_| Ok(1));
        assert_eq!(queue.len(), 1);
        assert_eq!(scheduler::default_queue().len(), 0);
        queue.run_until_idle().unwrap();
        assert_eq!(recovered.outcome(), Some(Ok(1)));
    }

    #[test]
    fn chained_deferred_is_pending_until_the_queue_runs() {
        use futures::FutureExt;

        let (queue, scheduler) = queue();
        let source = Deferred::<i32, Failure>::new_in(scheduler, |r| r.resolve(1));
        let mut doubled = Deferred::then(&source, |v| Ok(v * 2));
        assert_eq!((&mut doubled).now_or_never(), None);

        queue.run_until_idle().unwrap();
        assert_eq!(doubled.now_or_never(), Some(Ok(2)));
    }

    #[test]
    fn awaiting_wakes_on_settlement() {
        let (queue, scheduler) = queue();
        let (deferred, resolver) = Deferred::<i32, Failure>::pending_in(scheduler);
        let seen = Rc::new(RefCell::new(None));

        let mut pool = LocalPool::new();
        let sink = seen.clone();
        let waiting = deferred.then(|v| Ok(v * 3));
        pool.spawner()
            .spawn_local(async move {
                *sink.borrow_mut() = Some(waiting.await);
            })
            .unwrap();

        pool.run_until_stalled();
        assert_eq!(*seen.borrow(), None);

        resolver.resolve(5);
        queue.run_until_idle().unwrap();
        pool.run_until_stalled();
        assert_eq!(*seen.borrow(), Some(Ok(15)));
    }

    #[test]
    fn debug_shows_id_and_status() {
        let (_queue, scheduler) = queue();
        let (deferred, _resolver) = Deferred::<i32, Failure>::pending_in(scheduler);
        let shown = format!("{deferred:?}");
        assert!(shown.starts_with("Deferred { id: "));
        assert!(shown.ends_with("status: Pending }"));
    }
}
