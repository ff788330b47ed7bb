//! Settle-once deferred values.
//!
//! A [`Deferred`] starts pending and is settled exactly once, to a value or to
//! an error, through its [`Resolver`]. Consumers chain reactions with
//! [`then`](Deferred::then), [`catch`](Deferred::catch) and
//! [`finally`](Deferred::finally); each chain step is a new deferred. A
//! deferred settled with another deferred, or with any [`Thenable`], waits for
//! that one to settle first, however deeply they nest.
//!
//! Reactions always run on a later turn of a [`Scheduler`]. By default that is
//! the calling thread's [`TaskQueue`], drained with
//! [`scheduler::run_until_idle`]. A deferred is also a [`Future`](std::future::Future).
//!
//! # Examples
//!
//! ```
//! use deferred_cell::{scheduler, Deferred, Error};
//!
//! let result = Deferred::<i32, Error>::fulfilled(1)
//!     .then(|v| Ok(v + 1))
//!     .then(|v| Ok(v * 2));
//!
//! scheduler::run_until_idle().unwrap();
//! assert_eq!(result.outcome(), Some(Ok(4)));
//! ```
//!
//! Awaiting works from any executor once the queue has been driven:
//!
//! ```
//! use deferred_cell::{scheduler, Deferred, Error};
//! use futures::executor::block_on;
//!
//! let (deferred, resolver) = Deferred::<&str, Error>::pending();
//! let shouted = deferred.then(|s| Ok(s.to_uppercase()));
//! resolver.resolve("hi");
//! scheduler::run_until_idle().unwrap();
//! assert_eq!(block_on(shouted), Ok("HI".to_string()));
//! ```
use thiserror::Error;

mod cell;
mod combinators;
mod deferred;
mod resolution;
pub mod scheduler;

pub use cell::Status;
pub use deferred::Deferred;
pub use resolution::{IntoResolution, Resolution, Resolver, Thenable};
pub use scheduler::{QueueOptions, Scheduler, TaskQueue};

/// Failures raised by this crate itself. Error types used with [`Deferred`]
/// convert from it, so these arrive on the ordinary rejection channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("a deferred cannot be resolved with itself")]
    SelfResolution,
    #[error("task queue still busy after running {limit} tasks")]
    TurnBudgetExceeded { limit: usize },
}
