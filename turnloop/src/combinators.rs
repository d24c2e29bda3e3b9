//! Free-standing combinators built on top of [`Ivar`]/[`Deferred`]/[`Task`]:
//! [`after`], [`every`], [`repeat`], [`repeat_parallel`], [`wait_all`], and
//! [`iter_parallel`].
//!
//! Grounded on `every.hpp` (the `TaskHandle`/cooperative-cancel pattern) and
//! `task.hpp` (`repeat_parallel`, `iter_parallel`).

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::deferred::Deferred;
use crate::ivar::{Ivar, IvarMulti};
use crate::scheduler;
use crate::task::Task;

/// A `Deferred` that determines once `delay` has elapsed on the current
/// thread's bound scheduler.
pub fn after(delay: Duration) -> Deferred<()> {
    let ivar = Ivar::new();
    let ivar2 = ivar.clone();
    scheduler::with_current(|s| {
        s.after(delay, move || ivar2.fill(()));
    });
    Deferred::from_ivar(ivar)
}

/// Runs `f` sequentially, `n` times, awaiting each call before starting the
/// next. `repeat(0, f)` returns a completed task without invoking `f`.
pub fn repeat<F, Fut>(n: usize, mut f: F) -> Task<()>
where
    F: FnMut() -> Fut + 'static,
    Fut: Future<Output = ()> + 'static,
{
    Task::spawn(async move {
        for _ in 0..n {
            f().await;
        }
    })
}

/// Waits for every task in `tasks` to complete, returning their values in
/// the same order. The tasks themselves already started running the
/// moment they were spawned; this only collects results, it doesn't
/// serialize their execution.
pub async fn wait_all<T: 'static>(tasks: Vec<Task<T>>) -> Vec<T> {
    let mut out = Vec::with_capacity(tasks.len());
    for task in tasks {
        out.push(task.await);
    }
    out
}

/// Runs `f()` exactly `n` times across `concurrency` workers: each worker
/// loops, pulling the next of the `n` outstanding calls off a shared queue
/// and awaiting `f()` before pulling another. Results are appended in
/// completion order, not call order — there is no stable ordering
/// guarantee, matching the original's worker-pool semantics.
pub fn repeat_parallel<F, Fut>(n: usize, concurrency: usize, f: F) -> Task<Vec<()>>
where
    F: Fn() -> Fut + 'static,
    Fut: Future<Output = ()> + 'static,
{
    iter_parallel(vec![(); n], concurrency, move |()| f())
}

/// Spawns `concurrency` workers that together consume every item in
/// `items`, each worker popping the next item off a shared queue and
/// awaiting `f(item)` before popping another. Results are appended in
/// completion order (no stable ordering guarantee) — callers that need
/// input-order results should pair each item with its index themselves.
pub fn iter_parallel<I, O, F, Fut>(items: Vec<I>, concurrency: usize, f: F) -> Task<Vec<O>>
where
    I: 'static,
    O: 'static,
    F: Fn(I) -> Fut + 'static,
    Fut: Future<Output = O> + 'static,
{
    let queue = Rc::new(RefCell::new(VecDeque::from(items)));
    let f = Rc::new(f);
    let results = Rc::new(RefCell::new(Vec::new()));
    let worker_count = concurrency.max(1);
    Task::spawn(async move {
        let workers: Vec<Task<()>> = (0..worker_count)
            .map(|_| {
                let queue = Rc::clone(&queue);
                let f = Rc::clone(&f);
                let results = Rc::clone(&results);
                Task::spawn(async move {
                    loop {
                        let item = queue.borrow_mut().pop_front();
                        let Some(item) = item else { break };
                        let value = f(item).await;
                        results.borrow_mut().push(value);
                    }
                })
            })
            .collect();
        wait_all(workers).await;
        Rc::try_unwrap(results)
            .unwrap_or_else(|_| unreachable!("all workers have completed and dropped their clones"))
            .into_inner()
    })
}

/// Races two same-typed `Deferred`s, reporting which one determined first.
/// Both are `Unpin` ([`Deferred`] holds only `Rc`/`RefCell` fields), so no
/// unsafe pinning is needed to poll them side by side.
struct Race<T> {
    a: Deferred<T>,
    b: Deferred<T>,
}

enum Winner<T> {
    A(T),
    B(T),
}

impl<T: 'static> Future for Race<T> {
    type Output = Winner<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Poll::Ready(v) = Pin::new(&mut self.a).poll(cx) {
            return Poll::Ready(Winner::A(v));
        }
        if let Poll::Ready(v) = Pin::new(&mut self.b).poll(cx) {
            return Poll::Ready(Winner::B(v));
        }
        Poll::Pending
    }
}

/// A handle to a task spawned by [`every`]: lets the caller cancel the
/// repetition cooperatively.
pub struct TaskHandle {
    cancel: Rc<IvarMulti<()>>,
    task: Task<()>,
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("canceled", &self.cancel.is_determined())
            .field("done", &self.task.is_done())
            .finish()
    }
}

impl TaskHandle {
    /// Requests cancellation. Takes effect the next time the running `f`
    /// call (if any) finishes and the loop reaches its timer wait again —
    /// `every` does not interrupt `f` mid-flight.
    pub fn cancel(&self) {
        if !self.cancel.is_determined() {
            self.cancel.fill(());
        }
    }

    pub fn is_done(&self) -> bool {
        self.task.is_done()
    }
}

/// Runs `f` every `period` until the returned [`TaskHandle`] is canceled.
/// Cancellation is cooperative: each iteration races a *fresh* cancellation
/// listener (subscribed from the shared [`IvarMulti`]) against that
/// iteration's timer, so cancellation requested while `f` is running takes
/// effect on the next iteration boundary rather than interrupting `f`.
pub fn every<F>(period: Duration, mut f: F) -> TaskHandle
where
    F: FnMut() + 'static,
{
    let cancel = Rc::new(IvarMulti::<()>::new());
    let cancel_for_task = Rc::clone(&cancel);
    let task = Task::spawn(async move {
        loop {
            let cancel_signal = Deferred::from_ivar(cancel_for_task.subscribe());
            let race = Race { a: after(period), b: cancel_signal };
            match race.await {
                Winner::A(()) => f(),
                Winner::B(()) => break,
            }
        }
    });
    TaskHandle { cancel, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SchedulerContext;
    use serial_test::serial;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    #[serial]
    fn after_fires_on_a_later_turn() {
        let ctx = SchedulerContext::create().unwrap();
        let d = after(Duration::from_millis(0));
        let task = Task::spawn(async move { d.await });
        assert!(!task.is_done());
        ctx.scheduler().wait_until(|| task.is_done()).unwrap();
    }

    #[test]
    #[serial]
    fn repeat_zero_never_calls_f() {
        let ctx = SchedulerContext::create().unwrap();
        let calls = Rc::new(RefCell::new(0));
        let c2 = Rc::clone(&calls);
        let task = repeat(0, move || {
            let c3 = Rc::clone(&c2);
            async move {
                *c3.borrow_mut() += 1;
            }
        });
        ctx.scheduler().wait_until(|| task.is_done()).unwrap();
        assert_eq!(*calls.borrow(), 0);
    }

    #[test]
    #[serial]
    fn every_stops_after_cancel() {
        let ctx = SchedulerContext::create().unwrap();
        let calls = Rc::new(RefCell::new(0));
        let c2 = Rc::clone(&calls);
        let handle = every(Duration::from_millis(1), move || *c2.borrow_mut() += 1);

        ctx.scheduler().wait_until(|| *calls.borrow() >= 3).unwrap();
        handle.cancel();
        ctx.scheduler().wait_until(|| handle.is_done()).unwrap();

        let seen_at_cancel = *calls.borrow();
        // A couple more turns shouldn't move the counter once canceled.
        ctx.scheduler().wait_until(|| true).unwrap();
        assert_eq!(*calls.borrow(), seen_at_cancel);
    }

    #[test]
    #[serial]
    fn wait_all_preserves_order() {
        let ctx = SchedulerContext::create().unwrap();
        let tasks: Vec<Task<i32>> =
            (0..5).map(|i| Task::spawn(async move { i * i })).collect();
        let collected = Task::spawn(async move { wait_all(tasks).await });
        ctx.scheduler().wait_until(|| collected.is_done()).unwrap();
        assert_eq!(collected.value(), vec![0, 1, 4, 9, 16]);
    }

    #[test]
    #[serial]
    fn repeat_parallel_runs_every_call_exactly_once() {
        let ctx = SchedulerContext::create().unwrap();
        let calls = Rc::new(RefCell::new(0));
        let c2 = Rc::clone(&calls);
        let task = repeat_parallel(10, 3, move || {
            let c3 = Rc::clone(&c2);
            async move {
                *c3.borrow_mut() += 1;
            }
        });
        ctx.scheduler().wait_until(|| task.is_done()).unwrap();
        assert_eq!(*calls.borrow(), 10);
        assert_eq!(task.value().len(), 10);
    }

    #[test]
    #[serial]
    fn iter_parallel_processes_every_item_exactly_once() {
        let ctx = SchedulerContext::create().unwrap();
        let items: Vec<i32> = (0..9).collect();
        let task = iter_parallel(items, 2, |i| async move { i * 2 });
        ctx.scheduler().wait_until(|| task.is_done()).unwrap();
        let mut results = task.value();
        results.sort_unstable();
        assert_eq!(results, (0..9).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    #[serial]
    fn iter_parallel_respects_concurrency_limit_across_suspensions() {
        let ctx = SchedulerContext::create().unwrap();
        let in_flight = Rc::new(RefCell::new(0));
        let max_in_flight = Rc::new(RefCell::new(0));
        let items: Vec<i32> = (0..6).collect();
        let (f1, f2) = (Rc::clone(&in_flight), Rc::clone(&max_in_flight));
        let task = iter_parallel(items, 2, move |i| {
            let (f1, f2) = (Rc::clone(&f1), Rc::clone(&f2));
            async move {
                *f1.borrow_mut() += 1;
                *f2.borrow_mut() = (*f2.borrow()).max(*f1.borrow());
                after(Duration::from_millis(1)).await;
                *f1.borrow_mut() -= 1;
                i
            }
        });
        ctx.scheduler().wait_until(|| task.is_done()).unwrap();
        let mut results = task.value();
        results.sort_unstable();
        assert_eq!(results, (0..6).collect::<Vec<_>>());
        assert!(*max_in_flight.borrow() <= 2, "saw {} concurrently", *max_in_flight.borrow());
    }
}
