use crate::{
    chain::{self, Lookup},
    Deferred, Error,
};
use std::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

/// Future returned by [`Deferred::settled`].
///
/// Polling registers the waker on whichever node decides the outcome, so a
/// deferred that adopts another one is followed to the end.
///
/// # Examples
///
/// ```
/// use deferred_chain::{runtime, Deferred};
/// use futures::executor::block_on;
/// let d = Deferred::<i32, ()>::resolve(5).then(|x| x * 2);
/// runtime::run_until_idle();
/// assert_eq!(block_on(d.settled()), Ok(10));
/// ```
pub struct Settled<T, E> {
    deferred: Deferred<T, E>,
}

impl<T, E> Settled<T, E> {
    pub(crate) fn new(deferred: Deferred<T, E>) -> Self {
        Self { deferred }
    }
}

impl<T: fmt::Debug, E> fmt::Debug for Settled<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Settled").field(&self.deferred).finish()
    }
}

impl<T: Clone, E> Future for Settled<T, E> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match chain::lookup(&self.deferred.node) {
            Lookup::Settled(result) => Poll::Ready(result),
            Lookup::Pending(link) => {
                chain::register_waker(&link, cx.waker());
                Poll::Pending
            }
        }
    }
}
