//! The per-thread context a deferred runs in: a scheduler, the
//! [`Config`] policies, and the tally of unhandled rejections.
use crate::{
    config::{DoubleSettle, UnhandledRejection},
    scheduler::{Schedule, TaskQueue},
    Config,
};
use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
};

thread_local! {
    static CURRENT: RefCell<Option<Rc<Runtime>>> = const { RefCell::new(None) };
}

pub struct Runtime {
    scheduler: Rc<dyn Schedule>,
    config: Config,
    unhandled: Cell<usize>,
}

/// Restores the previously current runtime when dropped.
#[must_use = "the runtime is only current while the guard is alive"]
pub struct EnterGuard {
    previous: Option<Rc<Runtime>>,
}

/// The runtime of the calling thread, created with [`Config::default`] on
/// first use.
pub fn current() -> Rc<Runtime> {
    CURRENT.with(|current| {
        current
            .borrow_mut()
            .get_or_insert_with(|| Rc::new(Runtime::new(Config::default())))
            .clone()
    })
}

/// Drains the current runtime's scheduler. Returns how many tasks ran.
pub fn run_until_idle() -> usize {
    current().run_until_idle()
}

impl Runtime {
    pub fn new(config: Config) -> Self {
        Self::with_scheduler(Rc::new(TaskQueue::new()), config)
    }

    pub fn with_scheduler(scheduler: Rc<dyn Schedule>, config: Config) -> Self {
        Self {
            scheduler,
            config,
            unhandled: Cell::new(0),
        }
    }

    /// Makes this runtime current for the calling thread until the guard is
    /// dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use deferred_chain::{runtime, Config, Runtime};
    /// use std::rc::Rc;
    /// let rt = Rc::new(Runtime::new(Config::default()));
    /// let guard = rt.enter();
    /// assert!(Rc::ptr_eq(&runtime::current(), &rt));
    /// drop(guard);
    /// assert!(!Rc::ptr_eq(&runtime::current(), &rt));
    /// ```
    pub fn enter(self: &Rc<Self>) -> EnterGuard {
        let previous = CURRENT.with(|current| current.borrow_mut().replace(self.clone()));
        EnterGuard { previous }
    }

    pub fn scheduler(&self) -> Rc<dyn Schedule> {
        self.scheduler.clone()
    }

    pub fn config(&self) -> Config {
        self.config
    }

    pub fn run_next(&self) -> bool {
        self.scheduler.run_next()
    }

    pub fn run_until_idle(&self) -> usize {
        self.scheduler.run_until_idle()
    }

    /// How many rejections reached the end of their chain without meeting an
    /// error handler.
    pub fn unhandled_rejections(&self) -> usize {
        self.unhandled.get()
    }

    pub(crate) fn report_unhandled<E: fmt::Debug>(&self, err: &E) {
        self.unhandled.set(self.unhandled.get() + 1);
        tracing::error!(error = ?err, "unhandled rejection");
        if self.config.unhandled_rejection == UnhandledRejection::Panic {
            panic!("unhandled rejection: {err:?}");
        }
    }

    pub(crate) fn report_settled_twice(&self) {
        tracing::warn!("deferred settled more than once, ignoring");
        if self.config.double_settle == DoubleSettle::Panic {
            panic!("deferred settled more than once");
        }
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("unhandled", &self.unhandled.get())
            .finish_non_exhaustive()
    }
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

#[cfg(test)]
mod tests {
use super::*;

#[test]
fn test_current_is_stable_per_thread() {
    assert!(Rc::ptr_eq(&current(), &current()));
}

#[test]
fn test_enter_nests_and_restores() {
    let outer = Rc::new(Runtime::new(Config::default()));
    let inner = Rc::new(Runtime::new(Config::default()));
    let _outer_guard = outer.enter();
    {
        let _inner_guard = inner.enter();
        assert!(Rc::ptr_eq(&current(), &inner));
    }
    assert!(Rc::ptr_eq(&current(), &outer));
}

#[test]
fn test_report_counts() {
    let rt = Runtime::new(Config::default());
    rt.report_unhandled(&"boom");
    rt.report_unhandled(&55);
    assert_eq!(rt.unhandled_rejections(), 2);
}

#[test]
#[should_panic(expected = "unhandled rejection: \"boom\"")]
fn test_report_panics_under_strict_policy() {
    let rt = Runtime::new(Config::default().unhandled_rejection(UnhandledRejection::Panic));
    rt.report_unhandled(&"boom");
}

#[test]
#[should_panic(expected = "settled more than once")]
fn test_settled_twice_panics_under_strict_policy() {
    let rt = Runtime::new(Config::default().double_settle(DoubleSettle::Panic));
    rt.report_settled_twice();
}
}
