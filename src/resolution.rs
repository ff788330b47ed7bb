//! The resolution procedure: settling a cell with something that may itself
//! still be waiting on a result.
use std::{fmt, rc::Rc};

use tracing::debug;

use crate::{
    cell::{self, CellRef},
    Deferred, Error,
};

/// A value that settles later and can report its result to a [`Resolver`].
///
/// `then` subscribes the resolver to the eventual result. Implementations may
/// call the resolver at any time, from any later turn, and any number of
/// times; only the first call that reaches a plain value or an error has an
/// effect. Returning `Err` rejects the cell being resolved.
pub trait Thenable<T, E> {
    fn then(self: Box<Self>, resolver: Resolver<T, E>) -> Result<(), E>;

    /// Id of the deferred behind this thenable, if there is one. Used to
    /// refuse settling a deferred with itself.
    fn cell_id(&self) -> Option<u64> {
        None
    }
}

/// What a cell is being settled with.
pub enum Resolution<T, E> {
    Value(T),
    Rejected(E),
    Deferred(Deferred<T, E>),
    Thenable(Box<dyn Thenable<T, E>>),
}

impl<T, E> Resolution<T, E> {
    pub fn thenable(thenable: impl Thenable<T, E> + 'static) -> Self {
        Resolution::Thenable(Box::new(thenable))
    }
}

impl<T, E> From<Deferred<T, E>> for Resolution<T, E> {
    fn from(deferred: Deferred<T, E>) -> Self {
        Resolution::Deferred(deferred)
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Resolution<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolution::Rejected(error) => f.debug_tuple("Rejected").field(error).finish(),
            Resolution::Deferred(deferred) => f.debug_tuple("Deferred").field(deferred).finish(),
            Resolution::Thenable(_) => f.write_str("Thenable(..)"),
        }
    }
}

/// Conversion into a [`Resolution`]. This is what reaction handlers return:
/// `Ok(value)` fulfils, `Err(error)` rejects, a deferred or thenable is
/// adopted.
pub trait IntoResolution {
    type Value;
    type Error;

    fn into_resolution(self) -> Resolution<Self::Value, Self::Error>;
}

impl<T, E> IntoResolution for Result<T, E> {
    type Value = T;
    type Error = E;

    fn into_resolution(self) -> Resolution<T, E> {
        match self {
            Ok(value) => Resolution::Value(value),
            Err(error) => Resolution::Rejected(error),
        }
    }
}

impl<T, E> IntoResolution for Resolution<T, E> {
    type Value = T;
    type Error = E;

    fn into_resolution(self) -> Resolution<T, E> {
        self
    }
}

impl<T, E> IntoResolution for Deferred<T, E> {
    type Value = T;
    type Error = E;

    fn into_resolution(self) -> Resolution<T, E> {
        Resolution::Deferred(self)
    }
}

impl<T, E> IntoResolution for Box<dyn Thenable<T, E>> {
    type Value = T;
    type Error = E;

    fn into_resolution(self) -> Resolution<T, E> {
        Resolution::Thenable(self)
    }
}

/// The settle capability of one deferred.
///
/// Handed to producers and to thenables being adopted. It exposes nothing of
/// the deferred except the ability to settle it. Clones settle the same
/// deferred; whichever call settles it first wins and the rest are ignored.
pub struct Resolver<T, E> {
    cell: CellRef<T, E>,
}

impl<T, E> Resolver<T, E> {
    pub(crate) fn new(cell: CellRef<T, E>) -> Self {
        Resolver { cell }
    }

    pub fn is_settled(&self) -> bool {
        !cell::is_pending(&self.cell)
    }
}

impl<T, E> Resolver<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    pub fn resolve(&self, value: T) {
        resolve_cell(&self.cell, Resolution::Value(value))
    }

    /// Settles with `value`, first waiting on it if it is a deferred or a
    /// thenable.
    pub fn resolve_with<R>(&self, value: R)
    where
        R: IntoResolution<Value = T, Error = E>,
    {
        resolve_cell(&self.cell, value.into_resolution())
    }

    /// Rejects with `error` as given; errors are never unwrapped.
    pub fn reject(&self, error: E) {
        resolve_cell(&self.cell, Resolution::Rejected(error))
    }
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Resolver {
            cell: Rc::clone(&self.cell),
        }
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("cell", &cell::id(&self.cell))
            .field("status", &cell::status(&self.cell))
            .finish()
    }
}

pub(crate) fn resolve_cell<T, E>(cell: &CellRef<T, E>, resolution: Resolution<T, E>)
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    if !cell::is_pending(cell) {
        return;
    }
    match resolution {
        Resolution::Value(value) => cell::settle(cell, Ok(value)),
        Resolution::Rejected(error) => cell::settle(cell, Err(error)),
        Resolution::Deferred(deferred) => adopt(cell, Box::new(deferred)),
        Resolution::Thenable(thenable) => adopt(cell, thenable),
    }
}

/// Hands the cell's resolver to `thenable`. The cell stays pending until the
/// thenable reports back; every report re-enters [`resolve_cell`].
fn adopt<T, E>(cell: &CellRef<T, E>, thenable: Box<dyn Thenable<T, E>>)
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    if thenable.cell_id() == Some(cell::id(cell)) {
        debug!(cell = cell::id(cell), "deferred resolved with itself");
        cell::settle(cell, Err(Error::SelfResolution.into()));
        return;
    }
    if let Err(error) = thenable.then(Resolver::new(Rc::clone(cell))) {
        debug!(cell = cell::id(cell), "thenable failed while subscribing");
        resolve_cell(cell, Resolution::Rejected(error));
    }
}
