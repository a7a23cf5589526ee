//! The linked structure behind [`Deferred`]: settlement, forward
//! propagation, splicing of nested deferreds and the error-handler search.
use crate::{
    deferred::{Deferred, Outcome},
    runtime, Error,
};
use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
    task::Waker,
};

pub(crate) type Link<T, E> = Rc<RefCell<Node<T, E>>>;
pub(crate) type Callback<T, E> = Box<dyn FnOnce(T) -> Outcome<T, E>>;
pub(crate) type ErrorHandler<E> = Box<dyn FnMut(E)>;

pub(crate) enum State<T, E> {
    Pending,
    Fulfilled(T),
    /// Settled with another deferred; the outcome is whatever that one
    /// settles with.
    Adopted(Deferred<T, E>),
    Rejected,
}

pub(crate) struct Node<T, E> {
    pub(crate) state: State<T, E>,
    /// The one continuation chained after this node.
    pub(crate) next: Option<Link<T, E>>,
    /// The node this one was chained from, or the node that adopted it.
    pub(crate) prev: Weak<RefCell<Node<T, E>>>,
    pub(crate) callback: Option<Callback<T, E>>,
    pub(crate) error_handler: Option<ErrorHandler<E>>,
    pub(crate) abandoned: bool,
    wakers: Vec<Waker>,
}

pub(crate) enum Lookup<T, E> {
    Settled(Result<T, Error>),
    /// Still pending; holds the node whose settlement decides the outcome.
    Pending(Link<T, E>),
}

impl<T, E> Node<T, E> {
    pub(crate) fn root() -> Link<T, E> {
        Self::link(None)
    }

    fn link(callback: Option<Callback<T, E>>) -> Link<T, E> {
        Rc::new(RefCell::new(Node {
            state: State::Pending,
            next: None,
            prev: Weak::new(),
            callback,
            error_handler: None,
            abandoned: false,
            wakers: vec![],
        }))
    }

    pub(crate) fn is_pending(&self) -> bool {
        matches!(self.state, State::Pending)
    }
}

impl<T, E> Drop for Node<T, E> {
    /// Unlinks the continuations one at a time; dropping a long chain
    /// recursively would overflow the stack.
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(link) = next {
            next = match Rc::try_unwrap(link) {
                Ok(cell) => cell.into_inner().next.take(),
                Err(_) => None,
            };
        }
    }
}

impl<T: fmt::Debug, E> fmt::Debug for State<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Pending => f.write_str("Pending"),
            State::Fulfilled(value) => f.debug_tuple("Fulfilled").field(value).finish(),
            State::Adopted(_) => f.write_str("Adopted"),
            State::Rejected => f.write_str("Rejected"),
        }
    }
}

/// Moves a pending node into `state` and wakes whoever awaits it.
fn transition<T, E>(link: &Link<T, E>, state: State<T, E>) -> bool {
    let wakers = {
        let mut node = link.borrow_mut();
        if !node.is_pending() {
            return false;
        }
        node.state = state;
        std::mem::take(&mut node.wakers)
    };
    for waker in wakers {
        waker.wake();
    }
    true
}

/// Turns a success outcome into the state it settles a node with. `Err`
/// carries the payload of a failed outcome back to the caller.
fn settled_state<T, E>(link: &Link<T, E>, outcome: Outcome<T, E>) -> Result<Option<State<T, E>>, E> {
    match outcome {
        Outcome::Value(value) => Ok(Some(State::Fulfilled(value))),
        Outcome::Nested(nested) if Rc::ptr_eq(&nested.node, link) => {
            tracing::warn!("deferred resolved with itself, ignoring");
            Ok(None)
        }
        Outcome::Nested(nested) => Ok(Some(State::Adopted(nested))),
        Outcome::Failed(err) => Err(err),
    }
}

/// Entry point of the `resolve` capability.
pub(crate) fn settle<T, E>(link: &Link<T, E>, outcome: Outcome<T, E>)
where
    T: Clone + 'static,
    E: fmt::Debug + 'static,
{
    let state = match settled_state(link, outcome) {
        Ok(Some(state)) => state,
        Ok(None) => return,
        Err(err) => return reject(link, err),
    };
    if !transition(link, state) {
        runtime::current().report_settled_twice();
        return;
    }
    tracing::trace!("deferred settled");
    advance(link.clone());
}

/// Entry point of the `reject` capability. The handler search starts at the
/// node this one was chained from, so a `catch` on the spawning side sees
/// failures of the initializer.
pub(crate) fn reject<T, E: fmt::Debug>(link: &Link<T, E>, err: E) {
    let search_from = {
        let node = link.borrow();
        if !node.is_pending() {
            drop(node);
            runtime::current().report_settled_twice();
            return;
        }
        node.prev.upgrade().unwrap_or_else(|| link.clone())
    };
    fail(link, &search_from, err);
}

/// Rejects `failed` and hands `err` to the closest handler at or after
/// `search_from`.
fn fail<T, E: fmt::Debug>(failed: &Link<T, E>, search_from: &Link<T, E>, err: E) {
    let holder = closest_error_handler(search_from);
    transition(failed, State::Rejected);
    match holder {
        Some(holder) => {
            // Taken out for the call so the handler may touch its own node.
            let handler = holder.borrow_mut().error_handler.take();
            if let Some(mut handler) = handler {
                tracing::trace!("rejection handled");
                handler(err);
                let mut node = holder.borrow_mut();
                if node.error_handler.is_none() {
                    node.error_handler = Some(handler);
                }
            }
        }
        None => runtime::current().report_unhandled(&err),
    }
}

/// Walks `next` links from `from` (inclusive) to the first node with an
/// error handler.
pub(crate) fn closest_error_handler<T, E>(from: &Link<T, E>) -> Option<Link<T, E>> {
    let mut cursor = Some(from.clone());
    while let Some(link) = cursor {
        let (found, next) = {
            let node = link.borrow();
            (node.error_handler.is_some(), node.next.clone())
        };
        if found {
            return Some(link);
        }
        cursor = next;
    }
    None
}

/// Chains a continuation after `link`. A settled `link` feeds it right away.
pub(crate) fn append<T, E>(link: &Link<T, E>, callback: Callback<T, E>) -> Link<T, E>
where
    T: Clone + 'static,
    E: fmt::Debug + 'static,
{
    let next = Node::link(Some(callback));
    let settled = {
        let mut node = link.borrow_mut();
        let mut continuation = next.borrow_mut();
        continuation.prev = Rc::downgrade(link);
        continuation.abandoned = node.is_pending() && node.abandoned;
        node.next = Some(next.clone());
        !node.is_pending()
    };
    if settled {
        advance(link.clone());
    }
    next
}

enum Snapshot<T, E> {
    Value(T),
    Nested(Link<T, E>),
    Idle,
}

/// Drives the chain forward from a settled node for as long as each
/// continuation settles without waiting.
fn advance<T, E>(mut link: Link<T, E>)
where
    T: Clone + 'static,
    E: fmt::Debug + 'static,
{
    loop {
        let snapshot = match &link.borrow().state {
            State::Fulfilled(value) => Snapshot::Value(value.clone()),
            State::Adopted(nested) => Snapshot::Nested(nested.node.clone()),
            State::Pending | State::Rejected => Snapshot::Idle,
        };
        let step = match snapshot {
            Snapshot::Value(value) => proceed(&link, value),
            Snapshot::Nested(nested) => splice(&link, nested),
            Snapshot::Idle => None,
        };
        match step {
            Some(next) => link = next,
            None => return,
        }
    }
}

/// Runs the continuation after `link` with `value` and settles it with the
/// result. Returns the continuation if it settled.
fn proceed<T, E>(link: &Link<T, E>, value: T) -> Option<Link<T, E>>
where
    T: Clone + 'static,
    E: fmt::Debug + 'static,
{
    let next = link.borrow().next.clone()?;
    let callback = next.borrow_mut().callback.take()?;
    tracing::trace!("running continuation");
    let outcome = callback(value);
    match settled_state(&next, outcome) {
        Ok(Some(state)) => transition(&next, state).then_some(next),
        Ok(None) => None,
        Err(err) => {
            fail(&next, link, err);
            None
        }
    }
}

/// Puts `nested` between `link` and its continuation, so the continuation
/// waits for `nested` instead of running now. Returns `nested` if it has
/// already settled and the chain can keep going.
fn splice<T, E>(link: &Link<T, E>, nested: Link<T, E>) -> Option<Link<T, E>> {
    if Rc::ptr_eq(link, &nested) {
        return None;
    }
    if closest_error_handler(&nested).is_none() {
        nested.borrow_mut().prev = Rc::downgrade(link);
    }
    let next = link.borrow_mut().next.replace(nested.clone());
    if let Some(next) = next {
        if !Rc::ptr_eq(&next, &nested) {
            nested.borrow_mut().next = Some(next);
        }
    }
    tracing::trace!("nested deferred spliced into chain");
    let (pending, abandoned) = {
        let node = nested.borrow();
        (node.is_pending(), node.abandoned)
    };
    if pending && abandoned {
        mark_abandoned(&nested);
    }
    (!pending).then_some(nested)
}

/// Resolves `link` through adopted deferreds to its final outcome.
pub(crate) fn lookup<T: Clone, E>(link: &Link<T, E>) -> Lookup<T, E> {
    let mut link = link.clone();
    loop {
        let nested = {
            let node = link.borrow();
            match &node.state {
                State::Fulfilled(value) => return Lookup::Settled(Ok(value.clone())),
                State::Rejected => return Lookup::Settled(Err(Error::Rejected)),
                State::Pending if node.abandoned => return Lookup::Settled(Err(Error::Abandoned)),
                State::Pending => None,
                State::Adopted(nested) => Some(nested.node.clone()),
            }
        };
        match nested {
            Some(nested) => link = nested,
            None => return Lookup::Pending(link),
        }
    }
}

pub(crate) fn register_waker<T, E>(link: &Link<T, E>, waker: &Waker) {
    let mut node = link.borrow_mut();
    if !node.wakers.iter().any(|w| w.will_wake(waker)) {
        node.wakers.push(waker.clone());
    }
}

/// Called once every settlement capability of a pending node is gone.
pub(crate) fn abandon<T, E>(link: &Link<T, E>) {
    if !link.borrow().is_pending() {
        return;
    }
    tracing::trace!("deferred abandoned while pending");
    mark_abandoned(link);
}

/// Flags `from` and every pending continuation after it, since none of
/// them can settle any more, and wakes their waiters.
fn mark_abandoned<T, E>(from: &Link<T, E>) {
    let mut wakers = vec![];
    let mut cursor = Some(from.clone());
    while let Some(link) = cursor {
        let mut node = link.borrow_mut();
        if !node.is_pending() {
            break;
        }
        node.abandoned = true;
        wakers.append(&mut node.wakers);
        cursor = node.next.clone();
    }
    for waker in wakers {
        waker.wake();
    }
}
