//! The public handle: construction, chaining and observation.
use crate::{
    chain::{self, Callback, Link, Lookup, Node},
    runtime,
    settled::Settled,
    Error,
};
use std::{fmt, rc::Rc};

/// A value that becomes available later, and a link in a chain of
/// continuations.
///
/// Each deferred has at most one continuation: calling [`then`](Self::then)
/// twice on the same handle replaces the first continuation. Cloning the
/// handle does not copy the node.
///
/// # Examples
///
/// ```
/// use deferred_chain::{runtime, Deferred};
/// use std::{cell::RefCell, rc::Rc};
///
/// let caught = Rc::new(RefCell::new(None));
/// let sink = caught.clone();
/// Deferred::<i32, String>::resolve(1)
///     .then(|_| Err::<i32, _>("bad".to_string()))
///     .then(|x| x * 100)
///     .catch(move |e| *sink.borrow_mut() = Some(e));
/// runtime::run_until_idle();
/// assert_eq!(caught.borrow().as_deref(), Some("bad"));
/// ```
pub struct Deferred<T, E> {
    pub(crate) node: Link<T, E>,
}

/// What a continuation settles its deferred with.
pub enum Outcome<T, E> {
    Value(T),
    /// The chain waits for this deferred and continues with its value.
    Nested(Deferred<T, E>),
    /// Rejects, skipping ahead to the closest error handler.
    Failed(E),
}

/// Shared by the [`Resolve`] and [`Reject`] halves of one deferred.
struct Capability<T, E> {
    node: Link<T, E>,
}

/// Settles a deferred with a value. Consumed on use.
pub struct Resolve<T, E> {
    capability: Rc<Capability<T, E>>,
}

/// Settles a deferred with an error. Consumed on use.
pub struct Reject<T, E> {
    capability: Rc<Capability<T, E>>,
}

impl<T, E> From<T> for Outcome<T, E> {
    fn from(value: T) -> Self {
        Outcome::Value(value)
    }
}

impl<T, E> From<Deferred<T, E>> for Outcome<T, E> {
    fn from(deferred: Deferred<T, E>) -> Self {
        Outcome::Nested(deferred)
    }
}

impl<T, E> From<Result<T, E>> for Outcome<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Outcome::Value(value),
            Err(err) => Outcome::Failed(err),
        }
    }
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
        }
    }
}

impl<T: fmt::Debug, E> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node.try_borrow() {
            Ok(node) => f.debug_struct("Deferred").field("state", &node.state).finish(),
            Err(_) => f.debug_struct("Deferred").finish_non_exhaustive(),
        }
    }
}

impl<T, E> Drop for Capability<T, E> {
    /// If nobody settled the deferred, wake its waiters with an error.
    fn drop(&mut self) {
        chain::abandon(&self.node);
    }
}

impl<T, E> Capability<T, E> {
    fn split(node: Link<T, E>) -> (Resolve<T, E>, Reject<T, E>) {
        let capability = Rc::new(Capability { node });
        (
            Resolve {
                capability: capability.clone(),
            },
            Reject { capability },
        )
    }
}

impl<T: Clone + 'static, E: fmt::Debug + 'static> Resolve<T, E> {
    /// Settles with a value, with another deferred to wait on, or, given an
    /// `Err`, exactly as [`Reject::reject`] would.
    pub fn resolve(self, value: impl Into<Outcome<T, E>>) {
        chain::settle(&self.capability.node, value.into());
    }
}

impl<T, E: fmt::Debug> Reject<T, E> {
    pub fn reject(self, err: E) {
        chain::reject(&self.capability.node, err);
    }
}

impl<T, E> Deferred<T, E> {
    pub fn is_pending(&self) -> bool {
        self.node.borrow().is_pending()
    }

    pub fn is_settled(&self) -> bool {
        !self.is_pending()
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.node.borrow().state, chain::State::Rejected)
    }
}

impl<T: Clone + 'static, E: fmt::Debug + 'static> Deferred<T, E> {
    /// Creates a pending deferred and schedules `initializer` on the current
    /// runtime. It runs after the current turn, and only if the deferred is
    /// still pending by then.
    ///
    /// # Examples
    ///
    /// ```
    /// use deferred_chain::{runtime, Deferred};
    /// let d = Deferred::<i32, ()>::new(|resolve, _reject| resolve.resolve(7));
    /// assert!(d.is_pending());
    /// runtime::run_until_idle();
    /// assert_eq!(d.value(), Some(7));
    /// ```
    pub fn new<F>(initializer: F) -> Self
    where
        F: FnOnce(Resolve<T, E>, Reject<T, E>) + 'static,
    {
        let node = Node::root();
        let scheduled = node.clone();
        runtime::current().scheduler().submit(Box::new(move || {
            if !scheduled.borrow().is_pending() {
                return;
            }
            let (resolve, reject) = Capability::split(scheduled);
            initializer(resolve, reject);
        }));
        tracing::trace!("initializer scheduled");
        Self { node }
    }

    /// A pending deferred whose settlement capabilities go to the caller.
    /// Settling through them runs the chain right away, in the caller's turn.
    ///
    /// # Examples
    ///
    /// ```
    /// use deferred_chain::Deferred;
    /// let (d, resolve, _reject) = Deferred::<&str, ()>::pending();
    /// resolve.resolve("🍓");
    /// assert_eq!(d.value(), Some("🍓"));
    /// ```
    pub fn pending() -> (Self, Resolve<T, E>, Reject<T, E>) {
        let node = Node::root();
        let (resolve, reject) = Capability::split(node.clone());
        (Self { node }, resolve, reject)
    }

    pub fn resolve(value: impl Into<Outcome<T, E>>) -> Self {
        let outcome = value.into();
        Self::new(move |resolve, _| resolve.resolve(outcome))
    }

    pub fn reject(err: E) -> Self {
        Self::new(move |_, reject| reject.reject(err))
    }

    /// Chains `callback` after this deferred and returns the deferred that
    /// settles with its result. If this one has already settled, the callback
    /// runs before `then` returns.
    pub fn then<F, R>(&self, callback: F) -> Self
    where
        F: FnOnce(T) -> R + 'static,
        R: Into<Outcome<T, E>>,
    {
        let callback: Callback<T, E> = Box::new(move |value| callback(value).into());
        Self {
            node: chain::append(&self.node, callback),
        }
    }

    /// Registers the error handler of this node, replacing any earlier one,
    /// and returns the same deferred. Whatever `handler` returns is dropped;
    /// the chain does not continue past a handled rejection.
    pub fn catch<F, R>(&self, mut handler: F) -> Self
    where
        F: FnMut(E) -> R + 'static,
    {
        self.node.borrow_mut().error_handler = Some(Box::new(move |err| {
            handler(err);
        }));
        self.clone()
    }

    /// Waits for every deferred in turn and settles with the value of the
    /// last one. The fold starts from `T::default()`, which is also the
    /// result for an empty input.
    ///
    /// # Examples
    ///
    /// ```
    /// use deferred_chain::{runtime, Deferred};
    /// let all = Deferred::<i32, ()>::all([Deferred::resolve(10)]);
    /// runtime::run_until_idle();
    /// assert_eq!(all.value(), Some(10));
    /// ```
    pub fn all<I>(deferreds: I) -> Self
    where
        I: IntoIterator<Item = Deferred<T, E>>,
        T: Default,
    {
        deferreds
            .into_iter()
            .fold(Self::resolve(T::default()), |chain, deferred| {
                chain.then(move |_| deferred)
            })
    }

    /// The settled value, looking through nested deferreds. `None` while
    /// pending or after a rejection.
    pub fn value(&self) -> Option<T> {
        match chain::lookup(&self.node) {
            Lookup::Settled(result) => result.ok(),
            Lookup::Pending(_) => None,
        }
    }

    /// A future of the outcome. It does not run the scheduler; something else
    /// has to.
    pub fn settled(&self) -> Settled<T, E> {
        Settled::new(self.clone())
    }

    /// Runs the current runtime's tasks one at a time until this deferred
    /// settles.
    pub fn wait(self) -> Result<T, Error> {
        let runtime = runtime::current();
        loop {
            if let Lookup::Settled(result) = chain::lookup(&self.node) {
                return result;
            }
            if !runtime.run_next() {
                return Err(Error::Stalled);
            }
        }
    }
}
