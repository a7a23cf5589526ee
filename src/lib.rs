//! Deferred values with `then`/`catch` chaining on a cooperative,
//! single-threaded scheduler.
//!
//! A [`Deferred`] is both a handle and a link in a chain of continuations.
//! Settling a link runs the next continuation, and so on down the chain.
//! Failures skip forward to the nearest registered error handler.
//!
//! # Examples
//!
//! ```
//! use deferred_chain::{runtime, Deferred};
//! use std::{cell::Cell, rc::Rc};
//!
//! let seen = Rc::new(Cell::new(0));
//! let sink = seen.clone();
//! Deferred::<i32, String>::resolve(2)
//!     .then(|x| x + 1)
//!     .then(move |x| {
//!         sink.set(x);
//!         x
//!     });
//! assert_eq!(seen.get(), 0);
//! runtime::run_until_idle();
//! assert_eq!(seen.get(), 3);
//! ```
pub mod config;
pub mod deferred;
pub mod runtime;
pub mod scheduler;
pub mod settled;

mod chain;

pub use config::{Config, DoubleSettle, UnhandledRejection};
pub use deferred::{Deferred, Outcome, Reject, Resolve};
pub use runtime::Runtime;
pub use scheduler::{Schedule, Task, TaskQueue};
pub use settled::Settled;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("the deferred was rejected")]
    Rejected,
    #[error("every settlement capability was dropped while the deferred was pending")]
    Abandoned,
    #[error("the task queue ran dry while the deferred was still pending")]
    Stalled,
    #[error("invalid value {value:?} for {key}")]
    InvalidConfig { key: &'static str, value: String },
}
