//! [`Task<T>`] — the coroutine bridge. Wraps a native `async` block (rather
//! than a hand-rolled coroutine transform) in scheduler-driven bookkeeping
//! so its suspension points resume as scheduled ready-queue work instead of
//! synchronous stack-recursive calls.
//!
//! Grounded on `task.hpp`'s `TaskState`/`TaskPromiseBase`: a task starts
//! running immediately on creation (no-suspend initial suspend point,
//! matched here by polling once inside [`Task::spawn`]), and on completion
//! it does *at most one* of: reschedule whoever is awaiting it as a `Task`,
//! or fill an [`Ivar`] attached via [`Task::to_deferred`]. Those two paths
//! are mutually exclusive in the original and remain so here.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use crate::deferred::Deferred;
use crate::ivar::Ivar;
use crate::scheduler;

struct Inner<T> {
    future: Option<Pin<Box<dyn Future<Output = T>>>>,
    value: Option<T>,
    done: bool,
    /// Waker of whatever is polling this `Task` as a `Future` (another
    /// task's `.await`, or an executor driving it directly).
    awaiter: Option<Waker>,
    /// Set by `to_deferred` if someone wants the result without treating
    /// this task as a `Future`. Mutually exclusive with `awaiter` winning
    /// the race at completion time: `awaiter` is checked first.
    ivar: Option<Ivar<T>>,
    /// Collapses repeated `wake()` calls arriving before the scheduled
    /// poll actually runs into a single scheduled poll.
    poll_scheduled: bool,
}

/// A spawned, independently-running unit of async work.
///
/// `Task<T>` is `Clone` (cheap, `Rc`-backed, shared-state semantics — the
/// clones all observe the same completion). It implements [`Future`], so
/// one task may `.await` another.
pub struct Task<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Task { inner: Rc::clone(&self.inner) }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("done", &self.inner.borrow().done).finish()
    }
}

struct WakeTarget<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

// SAFETY: `turnloop` is single-threaded end to end. Every `Waker` built
// from a `WakeTarget` is only ever constructed on, cloned on, and woken
// from the thread that owns the bound `Scheduler` (enforced by
// `SchedulerContext::scheduler`'s thread-affinity assertion); the `Rc`
// inside never actually crosses a thread boundary despite the `Send + Sync`
// bound the standard library's `Wake` trait requires of its implementor.
unsafe impl<T> Send for WakeTarget<T> {}
unsafe impl<T> Sync for WakeTarget<T> {}

impl<T: 'static> Wake for WakeTarget<T> {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        let already_scheduled = {
            let mut inner = self.inner.borrow_mut();
            if inner.done {
                return;
            }
            let was = inner.poll_scheduled;
            inner.poll_scheduled = true;
            was
        };
        if already_scheduled {
            return;
        }
        let inner = Rc::clone(&self.inner);
        scheduler::schedule(move || poll_once(&inner));
    }
}

fn make_waker<T: 'static>(inner: Rc<RefCell<Inner<T>>>) -> Waker {
    Waker::from(Arc::new(WakeTarget { inner }))
}

fn poll_once<T: 'static>(inner: &Rc<RefCell<Inner<T>>>) {
    inner.borrow_mut().poll_scheduled = false;

    let waker = make_waker(Rc::clone(inner));
    let mut cx = Context::from_waker(&waker);

    let poll_result = {
        let mut guard = inner.borrow_mut();
        let future = guard.future.as_mut().expect("polled after completion");
        // SAFETY: the boxed future is never moved out of its `Pin<Box<_>>`
        // slot; we only ever reach it through this `as_mut` projection.
        let pinned = future.as_mut();
        pinned.poll(&mut cx)
    };

    if let Poll::Ready(value) = poll_result {
        let (awaiter, ivar) = {
            let mut guard = inner.borrow_mut();
            guard.future = None;
            guard.done = true;
            guard.value = Some(value);
            (guard.awaiter.take(), guard.ivar.take())
        };
        match awaiter {
            Some(waker) => waker.wake(),
            None => {
                if let Some(ivar) = ivar {
                    let value = inner.borrow_mut().value.take().expect("just stored");
                    ivar.fill(value);
                }
            }
        }
    }
}

impl<T: 'static> Task<T> {
    /// Spawns `future`, running it immediately up to its first real
    /// suspension point (native `async` functions don't suspend before
    /// their first `.await` on a pending value, matching the original's
    /// no-suspend initial-suspend policy).
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = T> + 'static,
    {
        let inner = Rc::new(RefCell::new(Inner {
            future: Some(Box::pin(future)),
            value: None,
            done: false,
            awaiter: None,
            ivar: None,
            poll_scheduled: false,
        }));
        poll_once(&inner);
        Task { inner }
    }

    pub fn is_done(&self) -> bool {
        self.inner.borrow().done
    }

    /// Takes the completed value.
    ///
    /// # Panics
    ///
    /// Panics if the task has not completed yet, or if the value was
    /// already taken.
    pub fn value(&self) -> T {
        let mut inner = self.inner.borrow_mut();
        assert!(inner.done, "Task::value called before completion");
        inner.value.take().expect("Task value already taken")
    }

    /// Converts this task into a [`Deferred`], for callers that want a
    /// uniform read handle rather than a second `Future` impl to await.
    /// If the task has already completed, the returned `Deferred` is
    /// already determined.
    ///
    /// # Panics
    ///
    /// Panics if this task is already being awaited as a `Future`
    /// (`awaiter` already set) — completion can fill at most one of the
    /// two paths, exactly as an `Ivar` accepts only one listener.
    pub fn to_deferred(&self) -> Deferred<T> {
        let mut inner = self.inner.borrow_mut();
        if inner.done {
            let value = inner.value.take().expect("Task value already taken");
            return Deferred::ready(value);
        }
        assert!(inner.awaiter.is_none(), "Task is already being awaited");
        let ivar = Ivar::new();
        inner.ivar = Some(ivar.clone());
        Deferred::from_ivar(ivar)
    }

    /// Test/example helper: repeatedly runs scheduler turns on the
    /// current thread's bound scheduler until `task` has completed.
    pub fn drive_to_completion(task: &Task<T>) {
        let task = task.clone();
        scheduler::with_current(|scheduler| {
            scheduler.wait_until(|| task.is_done()).expect("scheduler wait_until failed");
        });
    }
}

impl<T: 'static> Future for Task<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut inner = self.inner.borrow_mut();
        if inner.done {
            Poll::Ready(inner.value.take().expect("Task value already taken"))
        } else {
            inner.awaiter = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

impl<T: 'static> From<Deferred<T>> for Task<T> {
    /// Wraps a `Deferred` in a `Task` that simply awaits it — the
    /// equivalent of the original's `co_return co_await d`.
    fn from(deferred: Deferred<T>) -> Self {
        Task::spawn(async move { deferred.await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SchedulerContext;
    use serial_test::serial;

    #[test]
    #[serial]
    fn spawn_runs_synchronously_to_the_first_suspension() {
        let _ctx = SchedulerContext::create().unwrap();
        let ran = Rc::new(RefCell::new(false));
        let ran2 = Rc::clone(&ran);
        let task = Task::spawn(async move {
            *ran2.borrow_mut() = true;
            5
        });
        assert!(*ran.borrow());
        assert!(task.is_done());
        assert_eq!(task.value(), 5);
    }

    #[test]
    #[serial]
    fn awaiting_a_pending_ivar_resumes_on_a_later_turn() {
        let _ctx = SchedulerContext::create().unwrap();
        let ivar = Ivar::<i32>::new();
        let deferred = Deferred::from_ivar(ivar.clone());
        let task = Task::spawn(async move { deferred.await + 1 });
        assert!(!task.is_done());

        ivar.fill(9);
        Task::drive_to_completion(&task);
        assert_eq!(task.value(), 10);
    }

    #[test]
    #[serial]
    fn to_deferred_reflects_eventual_completion() {
        let _ctx = SchedulerContext::create().unwrap();
        let ivar = Ivar::<i32>::new();
        let deferred_in = Deferred::from_ivar(ivar.clone());
        let task = Task::spawn(async move { deferred_in.await * 10 });
        let out = task.to_deferred();

        ivar.fill(4);
        let collector = Task::spawn(async move { out.await });
        Task::drive_to_completion(&collector);
        assert_eq!(collector.value(), 40);
    }
}
