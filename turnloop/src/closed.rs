//! [`Closed`] — a small mixin for graceful, idempotent shutdown.
//!
//! Grounded on `closed.hpp`: a type that has asynchronous teardown work
//! (flushing a socket, draining a pipe, joining a bridged thread) embeds a
//! `Closed` and routes its public `close()` through [`Closed::close`].
//! Concurrent callers all collapse onto the same teardown run; every one
//! of them, first or not, gets a `Deferred` that determines once teardown
//! actually finishes.

use std::cell::Cell;
use std::rc::Rc;

use crate::deferred::Deferred;
use crate::ivar::IvarMulti;

struct State {
    multi: IvarMulti<()>,
    started: Cell<bool>,
}

/// Collapses concurrent `close()` calls into a single run of the owner's
/// teardown logic, fanning the completion out to every caller.
pub struct Closed {
    state: Rc<State>,
}

impl Clone for Closed {
    fn clone(&self) -> Self {
        Closed { state: Rc::clone(&self.state) }
    }
}

impl std::fmt::Debug for Closed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Closed").field("started", &self.state.started.get()).finish()
    }
}

impl Default for Closed {
    fn default() -> Self {
        Self::new()
    }
}

impl Closed {
    pub fn new() -> Self {
        Closed { state: Rc::new(State { multi: IvarMulti::new(), started: Cell::new(false) }) }
    }

    pub fn is_closed(&self) -> bool {
        self.state.started.get()
    }

    /// A handle that determines once teardown has completed, without
    /// triggering it. Safe to call any number of times.
    pub fn closed(&self) -> Deferred<()> {
        Deferred::from_ivar(self.state.multi.subscribe())
    }

    /// Runs `teardown` at most once across however many times `close` is
    /// called. The first caller's `teardown` future is the one that runs;
    /// every caller (including that first one) gets back a `Deferred` tied
    /// to the single run's completion.
    pub fn close<F, Fut>(&self, teardown: F) -> Deferred<()>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ()> + 'static,
    {
        if !self.state.started.replace(true) {
            let state = Rc::clone(&self.state);
            let fut = teardown();
            crate::task::Task::spawn(async move {
                fut.await;
                state.multi.fill(());
            });
        }
        self.closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SchedulerContext;
    use crate::task::Task;
    use serial_test::serial;
    use std::cell::RefCell;

    #[test]
    #[serial]
    fn concurrent_close_calls_collapse_to_one_teardown() {
        let ctx = SchedulerContext::create().unwrap();
        let runs = Rc::new(RefCell::new(0));
        let closed = Closed::new();

        let runs2 = Rc::clone(&runs);
        let d1 = closed.close(move || async move {
            *runs2.borrow_mut() += 1;
        });
        let d2 = closed.close(|| async move {});

        let t1 = Task::spawn(async move { d1.await });
        let t2 = Task::spawn(async move { d2.await });
        ctx.scheduler().wait_until(|| t1.is_done() && t2.is_done()).unwrap();

        assert_eq!(*runs.borrow(), 1);
        assert!(closed.is_closed());
    }
}
