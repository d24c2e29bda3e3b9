//! The timer wheel: a deadline-ordered queue of one-shot callbacks.
//!
//! Modeled directly on `SchedulerEpollImpl::_move_time` in the original
//! C++ scheduler: timers live in a structure ordered by `(deadline,
//! insertion sequence)` so that ties break in FIFO order, and a turn begins
//! by migrating every timer whose deadline has passed into the ready queue
//! before touching the readiness primitive at all.

use std::collections::BTreeMap;
use std::time::Instant;

/// Opaque handle to a scheduled timer, returned by
/// [`crate::scheduler::Scheduler::after`] and accepted by
/// [`crate::scheduler::Scheduler::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub(crate) u64);

type Callback = Box<dyn FnOnce()>;

pub(crate) struct TimerQueue {
    // Ordered by (deadline, sequence) so iteration order is deadline-FIFO.
    entries: BTreeMap<(Instant, u64), (TimerId, Callback)>,
    index: std::collections::HashMap<TimerId, (Instant, u64)>,
    next_seq: u64,
    next_id: u64,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        TimerQueue {
            entries: BTreeMap::new(),
            index: std::collections::HashMap::new(),
            next_seq: 0,
            next_id: 0,
        }
    }

    pub(crate) fn insert(&mut self, deadline: Instant, callback: Callback) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert((deadline, seq), (id, callback));
        self.index.insert(id, (deadline, seq));
        id
    }

    /// Removes a timer before it fires. Returns `true` if it was still
    /// pending (cancel is idempotent: a timer that already fired, or was
    /// never registered, is simply not found).
    pub(crate) fn cancel(&mut self, id: TimerId) -> bool {
        if let Some(key) = self.index.remove(&id) {
            self.entries.remove(&key);
            true
        } else {
            false
        }
    }

    /// The deadline of the next pending timer, if any.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Removes and returns every timer whose deadline is `<= now`, in
    /// deadline (then insertion) order.
    pub(crate) fn drain_expired(&mut self, now: Instant) -> Vec<Callback> {
        let mut expired = Vec::new();
        loop {
            let Some((&key, _)) = self.entries.iter().next() else { break };
            if key.0 > now {
                break;
            }
            let (id, callback) = self.entries.remove(&key).expect("key just observed");
            self.index.remove(&id);
            expired.push(callback);
        }
        expired
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerQueue").field("pending", &self.entries.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    #[test]
    fn expired_timers_drain_in_deadline_order() {
        let mut q = TimerQueue::new();
        let base = Instant::now();
        let order = Rc::new(RefCell::new(Vec::new()));

        let o1 = Rc::clone(&order);
        q.insert(base + Duration::from_millis(20), Box::new(move || o1.borrow_mut().push(1)));
        let o2 = Rc::clone(&order);
        q.insert(base + Duration::from_millis(5), Box::new(move || o2.borrow_mut().push(2)));
        let o3 = Rc::clone(&order);
        q.insert(base + Duration::from_millis(10), Box::new(move || o3.borrow_mut().push(3)));

        for cb in q.drain_expired(base + Duration::from_millis(15)) {
            cb();
        }
        assert_eq!(*order.borrow(), vec![2, 3]);
        assert!(!q.is_empty());
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut q = TimerQueue::new();
        let id = q.insert(Instant::now(), Box::new(|| {}));
        assert!(q.cancel(id));
        assert!(!q.cancel(id));
    }

    #[test]
    fn ties_break_fifo() {
        let mut q = TimerQueue::new();
        let deadline = Instant::now();
        let order = Rc::new(RefCell::new(Vec::new()));
        for i in 0..5 {
            let o = Rc::clone(&order);
            q.insert(deadline, Box::new(move || o.borrow_mut().push(i)));
        }
        for cb in q.drain_expired(deadline) {
            cb();
        }
        assert_eq!(*order.borrow(), vec![0, 1, 2, 3, 4]);
    }
}
