//! The single-threaded cooperative scheduler: a FIFO ready queue, a timer
//! wheel, and a thin readiness layer (epoll on Linux, poll on macOS,
//! selected at compile time — see `scheduler_epoll.cpp`/`scheduler.hpp` in
//! the prior art this module is grounded on).
//!
//! A "turn" is: migrate expired timers into the ready queue, swap the ready
//! queues, drain the swapped-out queue, then either return (if the caller's
//! stop condition holds and nothing is left queued) or block in the
//! readiness primitive for at most `min(next timer deadline, 60s)`. See
//! [`Scheduler::run_one_turn`]. [`Scheduler::close`] is the separate,
//! explicit teardown operation — it is not implied by a `wait_until` call
//! returning.

pub mod context;
mod timer;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        #[path = "epoll.rs"]
        mod backend;
    } else {
        #[path = "poll.rs"]
        mod backend;
    }
}

pub use context::SchedulerContext;
pub use timer::TimerId;
pub(crate) use context::{schedule, try_with_current, with_current};

use std::cell::RefCell;
use std::collections::HashMap;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

use slab::Slab;

use crate::error::{Error, Result};
use timer::TimerQueue;

/// The maximum time a turn will block in the readiness primitive even if no
/// timer is pending. Without this cap a scheduler with only fd work (no
/// timers) blocks forever in `epoll_wait`/`poll` and never gets a chance to
/// re-check its stop condition.
const MAX_WAIT: Duration = Duration::from_secs(60);

type Callback = Box<dyn FnOnce()>;
type FdCallback = Rc<dyn Fn()>;

/// Opaque id for a registered fd, internal to the scheduler: a `Slab` key.
/// Kept distinct from `RawFd` so that callback lookups don't depend on OS
/// fd-reuse semantics once a slot is freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FdId(usize);

struct FdRegistration {
    callback: FdCallback,
}

/// The scheduler's mutable state. Never touched from any thread but the one
/// that created it — see [`SchedulerContext`] for the enforcement of that
/// invariant.
///
/// Lifecycle: Created -> Running (bound by [`SchedulerContext`]) -> Closed
/// ([`Scheduler::close`] has run). There is no transition back to Running;
/// `backend` becomes `None` once closed, and any operation that needs it
/// (`add_fd`, `remove_fd`, a turn's readiness wait) is a programmer error
/// past that point.
pub struct Scheduler {
    backend: RefCell<Option<backend::Backend>>,
    ready_primary: RefCell<Vec<Callback>>,
    ready_secondary: RefCell<Vec<Callback>>,
    timers: RefCell<TimerQueue>,
    fds: RefCell<Slab<FdRegistration>>,
    fd_lookup: RefCell<HashMap<RawFd, FdId>>,
    on_exit: RefCell<Vec<Callback>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending_ready", &self.ready_primary.borrow().len())
            .field("registered_fds", &self.fds.borrow().len())
            .field("timers", &self.timers.borrow())
            .field("closed", &self.backend.borrow().is_none())
            .finish()
    }
}

impl Scheduler {
    pub(crate) fn new() -> Result<Self> {
        Ok(Scheduler {
            backend: RefCell::new(Some(backend::Backend::new()?)),
            ready_primary: RefCell::new(Vec::new()),
            ready_secondary: RefCell::new(Vec::new()),
            timers: RefCell::new(TimerQueue::new()),
            fds: RefCell::new(Slab::new()),
            fd_lookup: RefCell::new(HashMap::new()),
            on_exit: RefCell::new(Vec::new()),
        })
    }

    /// Runs `f` against the live readiness backend.
    ///
    /// # Panics
    ///
    /// Panics if called after [`Scheduler::close`] — there is no backend
    /// left to run `f` against, and reaching this point means some
    /// scheduler operation was used past the Closed state.
    fn with_backend<R>(&self, f: impl FnOnce(&backend::Backend) -> R) -> R {
        let guard = self.backend.borrow();
        let backend = guard.as_ref().expect("Scheduler used after close()");
        f(backend)
    }

    /// Enqueues `callback` onto the ready queue. This is the only path by
    /// which any listener, waker, or `every`/`after` continuation is ever
    /// invoked — direct synchronous invocation from a producer is exactly
    /// what this method exists to prevent (unbounded native-stack growth
    /// under long dependency chains).
    pub fn schedule<F>(&self, callback: F)
    where
        F: FnOnce() + 'static,
    {
        self.ready_primary.borrow_mut().push(Box::new(callback));
    }

    /// Schedules `callback` to run after `delay` has elapsed. Returns a
    /// [`TimerId`] that can be passed to [`Scheduler::cancel`] up until the
    /// timer fires.
    pub fn after<F>(&self, delay: Duration, callback: F) -> TimerId
    where
        F: FnOnce() + 'static,
    {
        let deadline = Instant::now() + delay;
        self.timers.borrow_mut().insert(deadline, Box::new(callback))
    }

    /// Cancels a pending timer. Idempotent: canceling a timer that already
    /// fired, or an id that was never issued by this scheduler, is a no-op
    /// rather than an error.
    pub fn cancel(&self, id: TimerId) {
        self.timers.borrow_mut().cancel(id);
    }

    /// Registers `fd` for readiness notification. `callback` is invoked
    /// (scheduled, not called synchronously) whenever the backend reports
    /// the fd ready for either reading or writing; the callback is expected
    /// to retry its non-blocking operation and re-arm itself if it hits
    /// `EAGAIN` again (edge-triggered semantics on Linux; level-triggered
    /// on macOS, where re-arming is simply "do nothing, the next `poll`
    /// will report it again if still ready").
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateFd`] if `fd` is already registered.
    pub fn add_fd<F>(&self, fd: RawFd, callback: F) -> Result<()>
    where
        F: Fn() + 'static,
    {
        if self.fd_lookup.borrow().contains_key(&fd) {
            return Err(Error::DuplicateFd);
        }
        self.with_backend(|backend| backend.register(fd))?;
        let key = self.fds.borrow_mut().insert(FdRegistration { callback: Rc::new(callback) });
        self.fd_lookup.borrow_mut().insert(fd, FdId(key));
        Ok(())
    }

    /// Unregisters `fd`. Idempotent with respect to fds that were already
    /// removed (or never registered): this lets a fd wrapper's `Drop`
    /// call `remove_fd` unconditionally without tracking whether some other
    /// path already did so. Also a no-op after [`Scheduler::close`], since
    /// `close` already clears every registration.
    pub fn remove_fd(&self, fd: RawFd) -> Result<()> {
        let Some(id) = self.fd_lookup.borrow_mut().remove(&fd) else {
            return Ok(());
        };
        self.fds.borrow_mut().remove(id.0);
        self.with_backend(|backend| backend.deregister(fd))
    }

    /// Registers a callback to run once, in registration order, when
    /// [`Scheduler::close`] runs.
    pub fn on_exit<F>(&self, callback: F)
    where
        F: FnOnce() + 'static,
    {
        self.on_exit.borrow_mut().push(Box::new(callback));
    }

    /// Runs exit hooks in registration order, then closes the readiness
    /// backend and drops every fd registration and callback. The Closed
    /// state has no transition back to Running: any later `add_fd`,
    /// `remove_fd`, or `wait_until` call that needs the backend will panic.
    ///
    /// Calling `close` more than once is harmless — the second call finds
    /// an already-empty hook list and an already-`None` backend — but it
    /// does not re-run anything.
    pub fn close(&self) {
        for hook in std::mem::take(&mut *self.on_exit.borrow_mut()) {
            hook();
        }
        self.backend.borrow_mut().take();
        self.fds.borrow_mut().clear();
        self.fd_lookup.borrow_mut().clear();
    }

    /// Runs turns until `condition` returns `true` with the ready queue
    /// empty — checked once per turn, before the turn would otherwise block
    /// in the readiness primitive, so a stop request doesn't wait out a
    /// spurious timeout when there's nothing left to do. Does not run exit
    /// hooks; call [`Scheduler::close`] for that.
    pub fn wait_until<C>(&self, mut condition: C) -> Result<()>
    where
        C: FnMut() -> bool,
    {
        loop {
            if self.run_one_turn(&mut condition)? {
                return Ok(());
            }
        }
    }

    /// Runs exactly one turn: migrate expired timers, swap and drain the
    /// ready queue, then either report that `stop` is satisfied or block
    /// for readiness. Returns `true` once `stop()` holds with an empty
    /// primary queue.
    fn run_one_turn(&self, stop: &mut dyn FnMut() -> bool) -> Result<bool> {
        let now = Instant::now();
        for callback in self.timers.borrow_mut().drain_expired(now) {
            self.schedule_boxed(callback);
        }

        self.swap_ready_queues();
        self.drain_secondary();

        let primary_empty = self.ready_primary.borrow().is_empty();
        let should_stop = stop();
        if should_stop && primary_empty {
            return Ok(true);
        }

        // Zero timeout when there's ready work to get back to, or when a
        // stop was requested and we just want to drain the rest without
        // waiting out a spurious poll.
        let timeout =
            if should_stop || !primary_empty { Duration::ZERO } else { self.next_wait_timeout() };

        let ready_fds = self.with_backend(|backend| backend.wait(Some(timeout)))?;
        for fd in ready_fds {
            let id = self.fd_lookup.borrow().get(&fd).copied();
            if let Some(id) = id {
                let callback = self.fds.borrow().get(id.0).map(|r| Rc::clone(&r.callback));
                if let Some(callback) = callback {
                    self.schedule(move || callback());
                }
            }
        }
        Ok(false)
    }

    fn schedule_boxed(&self, callback: Callback) {
        self.ready_primary.borrow_mut().push(callback);
    }

    fn swap_ready_queues(&self) {
        debug_assert!(self.ready_secondary.borrow().is_empty());
        self.ready_primary.swap(&self.ready_secondary);
    }

    fn drain_secondary(&self) {
        let callbacks = std::mem::take(&mut *self.ready_secondary.borrow_mut());
        for callback in callbacks {
            callback();
        }
    }

    fn next_wait_timeout(&self) -> Duration {
        match self.timers.borrow().next_deadline() {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(MAX_WAIT),
            None => MAX_WAIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    #[test]
    fn scheduled_work_runs_fifo_within_a_turn() {
        let sched = Scheduler::new().unwrap();
        let order = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let o = Rc::clone(&order);
            sched.schedule(move || o.borrow_mut().push(i));
        }
        let done = Cell::new(false);
        sched.wait_until(|| { let was = done.get(); done.set(true); was }).unwrap();
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn after_zero_fires_on_a_later_turn_not_synchronously() {
        let sched = Scheduler::new().unwrap();
        let fired = Rc::new(Cell::new(false));
        let f = Rc::clone(&fired);
        sched.after(Duration::from_secs(0), move || f.set(true));
        assert!(!fired.get());
        sched.wait_until(|| fired.get()).unwrap();
        assert!(fired.get());
    }

    #[test]
    fn cancel_prevents_a_pending_timer_from_firing() {
        let sched = Scheduler::new().unwrap();
        let fired = Rc::new(Cell::new(false));
        let f = Rc::clone(&fired);
        let id = sched.after(Duration::from_millis(50), move || f.set(true));
        sched.cancel(id);
        let turns = Cell::new(0);
        sched
            .wait_until(|| {
                turns.set(turns.get() + 1);
                turns.get() > 1
            })
            .ok();
        assert!(!fired.get());
    }

    #[test]
    fn wait_until_true_with_empty_queue_returns_without_blocking() {
        let sched = Scheduler::new().unwrap();
        let start = Instant::now();
        sched.wait_until(|| true).unwrap();
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "wait_until blocked instead of returning immediately"
        );
    }

    #[test]
    fn close_runs_exit_hooks_in_registration_order_but_wait_until_does_not() {
        let sched = Scheduler::new().unwrap();
        let order = Rc::new(RefCell::new(Vec::new()));
        let (o1, o2) = (Rc::clone(&order), Rc::clone(&order));
        sched.on_exit(move || o1.borrow_mut().push(1));
        sched.on_exit(move || o2.borrow_mut().push(2));

        sched.wait_until(|| true).unwrap();
        assert!(order.borrow().is_empty(), "wait_until must not run exit hooks itself");

        sched.close();
        assert_eq!(*order.borrow(), vec![1, 2]);
    }
}
