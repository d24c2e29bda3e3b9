//! [`Deferred<T>`] — a read-only handle over an [`Ivar`], and the thing
//! most application code actually touches (`Ivar::fill` is the producer
//! side; `Deferred` is what consumers are handed).
//!
//! `Deferred<T>` implements [`std::future::Future`], so it composes with
//! native `async`/`.await` the way the original's `Deferred` composed with
//! `co_await`: a `Deferred` that is already determined resolves without a
//! turn boundary (`co_await` on a ready value never suspends); one that
//! isn't registers exactly one listener and resumes the awaiting task on a
//! later turn once the backing `Ivar` is filled.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::ivar::Ivar;

struct PollState<T> {
    value: Option<T>,
    waker: Option<Waker>,
    registered: bool,
}

impl<T> Default for PollState<T> {
    fn default() -> Self {
        PollState { value: None, waker: None, registered: false }
    }
}

/// A read handle over a write-once value.
///
/// Cloning a `Deferred` shares the same underlying [`Ivar`] — it does not
/// duplicate the value. Since an `Ivar` accepts only one listener, only one
/// of a `Deferred`'s clones may actually be consumed (via `.await`,
/// [`Deferred::map`], [`Deferred::bind`], or [`Deferred::iter`]); consuming
/// a second one panics, exactly as registering a second listener on the
/// same `Ivar` would.
pub struct Deferred<T> {
    ivar: Ivar<T>,
    poll: Rc<RefCell<PollState<T>>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Deferred { ivar: self.ivar.clone(), poll: Rc::clone(&self.poll) }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred").field("determined", &self.ivar.is_determined()).finish()
    }
}

impl<T: 'static> Deferred<T> {
    pub(crate) fn from_ivar(ivar: Ivar<T>) -> Self {
        Deferred { ivar, poll: Rc::new(RefCell::new(PollState::default())) }
    }

    /// A `Deferred` that never determines. Useful as a neutral element in
    /// combinators like `every`'s cancellation race, where "no cancellation
    /// requested" needs to be expressed as a value that simply never wins.
    pub fn never() -> Self {
        Deferred::from_ivar(Ivar::new())
    }

    /// An already-determined `Deferred`, equivalent to `Deferred::from`.
    pub fn ready(value: T) -> Self {
        Deferred::from_ivar(Ivar::with_value(value))
    }

    pub fn is_determined(&self) -> bool {
        self.ivar.is_determined()
    }

    /// Registers `f` to run once this `Deferred` determines, scheduled on
    /// a later turn exactly like [`Ivar::on_determined`] (which this is a
    /// thin wrapper over).
    ///
    /// # Panics
    ///
    /// Panics if a listener was already registered on the backing `Ivar`
    /// (via `iter`, `map`, `bind`, or a previous `.await`).
    pub fn iter<F>(&self, f: F)
    where
        F: FnOnce(T) + 'static,
    {
        self.ivar.on_determined(f);
    }

    /// Transforms the eventual value with `f`, without blocking on it now.
    pub fn map<U, F>(&self, f: F) -> Deferred<U>
    where
        U: 'static,
        F: FnOnce(T) -> U + 'static,
    {
        let out = Ivar::new();
        let out2 = out.clone();
        self.iter(move |value| out2.fill(f(value)));
        Deferred::from_ivar(out)
    }

    /// Chains onto another asynchronous value once this one determines.
    pub fn bind<U, F>(&self, f: F) -> Deferred<U>
    where
        U: 'static,
        F: FnOnce(T) -> Deferred<U> + 'static,
    {
        let out = Ivar::new();
        let out2 = out.clone();
        self.iter(move |value| {
            let next = f(value);
            next.iter(move |v| out2.fill(v));
        });
        Deferred::from_ivar(out)
    }
}

impl<T: 'static> From<T> for Deferred<T> {
    /// Implicit lift: a plain value is a `Deferred` that is already
    /// determined.
    fn from(value: T) -> Self {
        Deferred::ready(value)
    }
}

impl<T: 'static> Future for Deferred<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        {
            let mut state = self.poll.borrow_mut();
            if let Some(value) = state.value.take() {
                return Poll::Ready(value);
            }
            if state.registered {
                state.waker = Some(cx.waker().clone());
                return Poll::Pending;
            }
        }

        // First poll. A value that's already determined resolves without a
        // turn boundary: `.await` on a ready `Deferred` never suspends.
        if let Some(value) = self.ivar.take_determined_without_listener() {
            return Poll::Ready(value);
        }

        self.poll.borrow_mut().registered = true;
        self.poll.borrow_mut().waker = Some(cx.waker().clone());

        let poll_state = Rc::clone(&self.poll);
        self.ivar.on_determined(move |value| {
            let waker = {
                let mut state = poll_state.borrow_mut();
                state.value = Some(value);
                state.waker.take()
            };
            if let Some(waker) = waker {
                waker.wake();
            }
        });
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SchedulerContext;
    use crate::task::Task;
    use serial_test::serial;

    #[test]
    #[serial]
    fn map_composes_without_blocking() {
        let _ctx = SchedulerContext::create().unwrap();
        let ivar = Ivar::<i32>::new();
        let d = Deferred::from_ivar(ivar.clone());
        let doubled = d.map(|v| v * 2);
        ivar.fill(21);

        let task = Task::spawn(async move { doubled.await });
        Task::drive_to_completion(&task);
        assert_eq!(task.value(), 42);
    }

    #[test]
    #[serial]
    fn ready_value_resolves_without_a_turn_boundary() {
        let _ctx = SchedulerContext::create().unwrap();
        let d = Deferred::ready(7);
        let task = Task::spawn(async move { d.await });
        // A ready await never suspends, so the task is already done after
        // the synchronous initial poll inside `spawn` — no turn needed.
        assert!(task.is_done());
        assert_eq!(task.value(), 7);
    }

    #[test]
    #[serial]
    fn bind_chains_two_deferreds() {
        let _ctx = SchedulerContext::create().unwrap();
        let first = Ivar::<i32>::new();
        let d = Deferred::from_ivar(first.clone());
        let chained = d.bind(|v| Deferred::ready(v + 1));
        first.fill(1);

        let task = Task::spawn(async move { chained.await });
        Task::drive_to_completion(&task);
        assert_eq!(task.value(), 2);
    }
}
