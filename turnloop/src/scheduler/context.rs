//! Binds a [`Scheduler`] to the thread that created it and enforces the two
//! invariants the rest of the crate leans on without re-checking them:
//!
//! - At most one scheduler exists per process at a time.
//! - Every scheduler operation is issued from the thread that created it.
//!
//! The original scheduler was a thread-affine singleton reached through a
//! process-global pointer; `SchedulerContext` is the Rust equivalent, with
//! the affinity check made explicit instead of left to undefined behavior.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::ThreadId;

use super::Scheduler;
use crate::error::{Error, Result};

static SCHEDULER_EXISTS: AtomicBool = AtomicBool::new(false);

thread_local! {
    static CURRENT: RefCell<Option<Rc<Scheduler>>> = const { RefCell::new(None) };
}

/// An owned handle to a bound [`Scheduler`]. Dropping it releases the
/// process-wide singleton slot, permitting a new scheduler to be created
/// (on any thread, including the same one).
pub struct SchedulerContext {
    scheduler: Rc<Scheduler>,
    owner: ThreadId,
}

impl std::fmt::Debug for SchedulerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerContext").field("owner", &self.owner).finish()
    }
}

impl SchedulerContext {
    /// Creates a new scheduler and binds it to the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchedulerExists`] if another [`SchedulerContext`] is
    /// already alive anywhere in the process.
    pub fn create() -> Result<Self> {
        if SCHEDULER_EXISTS
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::SchedulerExists);
        }
        let scheduler = match Scheduler::new() {
            Ok(scheduler) => Rc::new(scheduler),
            Err(err) => {
                SCHEDULER_EXISTS.store(false, Ordering::Release);
                return Err(err);
            }
        };
        let owner = std::thread::current().id();
        CURRENT.with(|cell| *cell.borrow_mut() = Some(Rc::clone(&scheduler)));
        Ok(SchedulerContext { scheduler, owner })
    }

    /// Returns a reference to the bound scheduler.
    ///
    /// # Panics
    ///
    /// Panics if called from any thread other than the one that created
    /// this context.
    pub fn scheduler(&self) -> &Scheduler {
        assert_eq!(
            std::thread::current().id(),
            self.owner,
            "SchedulerContext accessed from a thread other than the one that created it"
        );
        &self.scheduler
    }
}

impl Drop for SchedulerContext {
    fn drop(&mut self) {
        CURRENT.with(|cell| *cell.borrow_mut() = None);
        SCHEDULER_EXISTS.store(false, Ordering::Release);
    }
}

/// Schedules `callback` on the current thread's bound scheduler.
///
/// # Panics
///
/// Panics if no [`SchedulerContext`] is bound on the current thread. Every
/// caller of this function (ivars, tasks, pipes, combinators) only ever
/// runs while a turn is in progress, so an unbound thread here indicates a
/// primitive escaped to a thread the scheduler never ran on.
pub(crate) fn schedule<F>(callback: F)
where
    F: FnOnce() + 'static,
{
    with_current(|scheduler| scheduler.schedule(callback));
}

/// Runs `f` against the scheduler bound on the current thread.
///
/// # Panics
///
/// Panics if no [`SchedulerContext`] is bound on the current thread.
pub(crate) fn with_current<R>(f: impl FnOnce(&Scheduler) -> R) -> R {
    try_with_current(f).expect("no scheduler is bound on this thread")
}

/// Like [`with_current`], but returns `None` instead of panicking when no
/// scheduler is bound. Used from `Drop` impls, where a bound scheduler may
/// legitimately no longer exist (it was torn down first) and panicking
/// during unwind would be worse than silently skipping cleanup that no
/// longer has anywhere to run.
pub(crate) fn try_with_current<R>(f: impl FnOnce(&Scheduler) -> R) -> Option<R> {
    CURRENT.with(|cell| cell.borrow().as_ref().map(|scheduler| f(scheduler)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn second_scheduler_on_the_same_process_is_rejected() {
        let _first = SchedulerContext::create().unwrap();
        let second = SchedulerContext::create();
        assert!(matches!(second, Err(Error::SchedulerExists)));
    }

    #[test]
    #[serial]
    fn dropping_a_context_frees_the_slot_for_a_new_one() {
        {
            let _ctx = SchedulerContext::create().unwrap();
        }
        let ctx = SchedulerContext::create();
        assert!(ctx.is_ok());
    }
}
