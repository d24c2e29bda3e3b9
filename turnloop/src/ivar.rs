//! [`Ivar<T>`] — the write-once cell every other synchronization primitive in
//! this crate is built on — and [`IvarMulti<T>`], its fan-out sibling.
//!
//! Both are single-threaded: they are `Rc`-backed, not `Arc`-backed, because
//! every mutation happens on the scheduler thread (see
//! `crate::scheduler::SchedulerContext`). Reaching for `Arc`/`Mutex` here
//! would buy nothing but overhead — there is never a second thread touching
//! these cells.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::scheduler;

type Listener<T> = Box<dyn FnOnce(T)>;

struct Inner<T> {
    value: Option<T>,
    listener: Option<Listener<T>>,
    /// Set once delivery has been scheduled (or the direct-read path has
    /// claimed the value). After this, the cell is inert.
    dead: bool,
    determined: bool,
}

impl<T> Default for Inner<T> {
    fn default() -> Self {
        Inner { value: None, listener: None, dead: false, determined: false }
    }
}

/// A write-once cell with a single resolution listener and scheduled
/// delivery.
///
/// # Invariants
///
/// - At most one transition empty -> filled. [`Ivar::fill`] panics on a
///   second call.
/// - At most one listener is ever registered. [`Ivar::on_determined`] panics
///   on a second call.
/// - Once both a value and a listener are present, delivery is *scheduled*
///   on the current scheduler's ready queue — never invoked synchronously.
pub struct Ivar<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for Ivar<T> {
    fn clone(&self) -> Self {
        Ivar { inner: Rc::clone(&self.inner) }
    }
}

impl<T> fmt::Debug for Ivar<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Ivar")
            .field("determined", &inner.determined)
            .field("dead", &inner.dead)
            .finish()
    }
}

impl<T> Default for Ivar<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Ivar<T> {
    /// Creates a fresh, empty `Ivar`.
    pub fn new() -> Self {
        Ivar { inner: Rc::new(RefCell::new(Inner::default())) }
    }

    /// Creates an `Ivar` that is already filled with `value`.
    pub fn with_value(value: T) -> Self {
        let ivar = Self::new();
        ivar.inner.borrow_mut().value = Some(value);
        ivar.inner.borrow_mut().determined = true;
        ivar
    }

    /// Fills the cell. The sole producer action.
    ///
    /// # Panics
    ///
    /// Panics if the cell is already filled or already dead (delivered).
    /// Double-filling an `Ivar` is a programmer error, not a recoverable
    /// one — it indicates two producers raced for the same cell.
    pub fn fill(&self, value: T) {
        {
            let mut inner = self.inner.borrow_mut();
            assert!(
                !inner.dead && !inner.determined,
                "Ivar already determined"
            );
            inner.value = Some(value);
            inner.determined = true;
        }
        self.maybe_schedule();
    }

    /// Registers the unique listener for this cell.
    ///
    /// # Panics
    ///
    /// Panics if a listener is already registered.
    pub fn on_determined<F>(&self, callback: F)
    where
        F: FnOnce(T) + 'static,
    {
        {
            let mut inner = self.inner.borrow_mut();
            assert!(inner.listener.is_none(), "Ivar already has a listener");
            inner.listener = Some(Box::new(callback));
        }
        self.maybe_schedule();
    }

    /// Non-blocking probe: has `fill` been called?
    pub fn is_determined(&self) -> bool {
        self.inner.borrow().determined
    }

    /// Claims the stored value directly, bypassing the listener mechanism,
    /// provided no listener has been registered and the cell isn't already
    /// dead. Used by [`crate::Deferred`]'s `Future` impl to implement the
    /// "ready values resolve synchronously, without a turn boundary" rule —
    /// the listener path, by contrast, always defers delivery to a later
    /// turn (see [`Ivar::maybe_schedule`]).
    pub(crate) fn take_determined_without_listener(&self) -> Option<T> {
        let mut inner = self.inner.borrow_mut();
        if inner.dead || inner.listener.is_some() {
            return None;
        }
        let value = inner.value.take();
        if value.is_some() {
            inner.dead = true;
        }
        value
    }

    fn maybe_schedule(&self) {
        let should_schedule = {
            let inner = self.inner.borrow();
            inner.value.is_some() && inner.listener.is_some() && !inner.dead
        };
        if should_schedule {
            self.inner.borrow_mut().dead = true;
            let inner = Rc::clone(&self.inner);
            scheduler::schedule(move || {
                let (value, listener) = {
                    let mut inner = inner.borrow_mut();
                    (inner.value.take(), inner.listener.take())
                };
                if let (Some(value), Some(listener)) = (value, listener) {
                    listener(value);
                }
            });
        }
    }
}

/// A write-once cell that fans a copy of its value out to every listener
/// registered on it, including listeners registered after the fill (those
/// receive the stored value, scheduled like any other delivery — never
/// synchronously).
///
/// Used for "closed"/"flushed"-style notifications where more than one
/// observer must see the same event (see [`crate::Once`] and
/// [`crate::Closed`]).
pub struct IvarMulti<T: Clone> {
    value: RefCell<Option<T>>,
    waiters: RefCell<Vec<Ivar<T>>>,
}

impl<T: Clone> fmt::Debug for IvarMulti<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IvarMulti")
            .field("determined", &self.value.borrow().is_some())
            .field("waiters", &self.waiters.borrow().len())
            .finish()
    }
}

impl<T: Clone> Default for IvarMulti<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static> IvarMulti<T> {
    pub fn new() -> Self {
        IvarMulti { value: RefCell::new(None), waiters: RefCell::new(Vec::new()) }
    }

    pub fn is_determined(&self) -> bool {
        self.value.borrow().is_some()
    }

    /// Fills the cell and fans the value out to every listener registered
    /// so far.
    ///
    /// # Panics
    ///
    /// Panics if the cell is already filled.
    pub fn fill(&self, value: T) {
        {
            let mut slot = self.value.borrow_mut();
            assert!(slot.is_none(), "IvarMulti already determined");
            *slot = Some(value);
        }
        for waiter in self.waiters.borrow_mut().drain(..) {
            let value = self.value.borrow().clone().expect("just filled");
            waiter.fill(value);
        }
    }

    /// Returns a fresh [`Ivar`] that will receive a copy of this cell's
    /// value. If the cell is already determined, the returned ivar is
    /// filled immediately (still through the scheduled-delivery path, not
    /// synchronously, once a listener is attached to it).
    pub fn subscribe(&self) -> Ivar<T> {
        let ivar = Ivar::new();
        match self.value.borrow().as_ref() {
            Some(value) => ivar.fill(value.clone()),
            None => self.waiters.borrow_mut().push(ivar.clone()),
        }
        ivar
    }
}
