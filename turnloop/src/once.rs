//! [`Once<T>`] — a lazy, idempotent one-shot producer.
//!
//! Grounded on `once.hpp`: the wrapped factory runs at most once, no
//! matter how many callers ask for the value or how many of those asks
//! arrive before the factory's own `Deferred` has determined. Every caller
//! fans out from the same underlying [`IvarMulti`], so they all observe
//! the identical produced value.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::deferred::Deferred;
use crate::ivar::IvarMulti;

struct Inner<T: Clone> {
    multi: IvarMulti<T>,
    factory: RefCell<Option<Box<dyn FnOnce() -> Deferred<T>>>>,
    started: Cell<bool>,
}

/// Wraps a factory so it runs exactly once, the first time its value is
/// asked for, regardless of how many callers ask concurrently.
pub struct Once<T: Clone> {
    inner: Rc<Inner<T>>,
}

impl<T: Clone> Clone for Once<T> {
    fn clone(&self) -> Self {
        Once { inner: Rc::clone(&self.inner) }
    }
}

impl<T: Clone> std::fmt::Debug for Once<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Once").field("started", &self.inner.started.get()).finish()
    }
}

impl<T: Clone + 'static> Once<T> {
    pub fn new<F>(factory: F) -> Self
    where
        F: FnOnce() -> Deferred<T> + 'static,
    {
        Once {
            inner: Rc::new(Inner {
                multi: IvarMulti::new(),
                factory: RefCell::new(Some(Box::new(factory))),
                started: Cell::new(false),
            }),
        }
    }

    /// Returns a handle to the eventual value. Triggers the factory on the
    /// first call; every call (first or not) fans out from the same
    /// underlying cell.
    pub fn value(&self) -> Deferred<T> {
        if !self.inner.started.replace(true) {
            let factory =
                self.inner.factory.borrow_mut().take().expect("factory already consumed");
            let inner = Rc::clone(&self.inner);
            factory().iter(move |value| inner.multi.fill(value));
        }
        Deferred::from_ivar(self.inner.multi.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SchedulerContext;
    use crate::task::Task;
    use serial_test::serial;
    use std::cell::RefCell as StdRefCell;

    #[test]
    #[serial]
    fn factory_runs_exactly_once_across_many_callers() {
        let ctx = SchedulerContext::create().unwrap();
        let calls = Rc::new(StdRefCell::new(0));
        let calls2 = Rc::clone(&calls);
        let once = Once::new(move || {
            *calls2.borrow_mut() += 1;
            Deferred::ready(7)
        });

        let a = once.clone();
        let b = once.clone();
        let t1 = Task::spawn(async move { a.value().await });
        let t2 = Task::spawn(async move { b.value().await });

        ctx.scheduler().wait_until(|| t1.is_done() && t2.is_done()).unwrap();
        assert_eq!(t1.value(), 7);
        assert_eq!(t2.value(), 7);
        assert_eq!(*calls.borrow(), 1);
    }
}
