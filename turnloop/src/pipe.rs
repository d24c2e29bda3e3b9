//! [`Pipe<T>`] — a single-producer, single-consumer async queue.
//!
//! Grounded on `pipe.hpp`: values handed to [`Pipe::push`] either go
//! straight to a reader that's already blocked in [`Pipe::next_value`]
//! (handoff, no allocation in the queue at all) or get buffered until one
//! shows up. [`Pipe::close`] is the producer's way of saying "no more
//! values are coming"; every pending and future `next_value` call then
//! resolves to `None`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::deferred::Deferred;
use crate::ivar::Ivar;
use crate::task::Task;

struct QueuedItem<T> {
    value: T,
    /// Filled once this item is handed to a consumer, letting
    /// [`Pipe::blocking_push`] report backpressure.
    consumed: Option<Ivar<()>>,
}

struct Inner<T> {
    queue: VecDeque<QueuedItem<T>>,
    waiting_reader: Option<Ivar<Option<T>>>,
    closed: bool,
}

/// An async SPSC queue: one task pushes, one task reads.
///
/// Pushing more than one producer or reading from more than one consumer
/// concurrently isn't prevented at the type level (there's nothing to stop
/// it compiling), but only one reader may be blocked in `next_value` at a
/// time — a second concurrent call panics, mirroring `Ivar`'s
/// single-listener rule, since `next_value` is built directly on one.
pub struct Pipe<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for Pipe<T> {
    fn clone(&self) -> Self {
        Pipe { inner: Rc::clone(&self.inner) }
    }
}

impl<T> fmt::Debug for Pipe<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Pipe")
            .field("buffered", &inner.queue.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

impl<T> Default for Pipe<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Pipe<T> {
    pub fn new() -> Self {
        Pipe {
            inner: Rc::new(RefCell::new(Inner {
                queue: VecDeque::new(),
                waiting_reader: None,
                closed: false,
            })),
        }
    }

    /// Pushes a value. If a reader is already blocked in `next_value`, the
    /// value is handed to it directly; otherwise it's buffered.
    ///
    /// # Panics
    ///
    /// Panics if the pipe has already been closed.
    pub fn push(&self, value: T) {
        let mut inner = self.inner.borrow_mut();
        assert!(!inner.closed, "push on a closed Pipe");
        if let Some(reader) = inner.waiting_reader.take() {
            drop(inner);
            reader.fill(Some(value));
        } else {
            inner.queue.push_back(QueuedItem { value, consumed: None });
        }
    }

    /// Pushes a value and returns a [`Deferred`] that determines once the
    /// value has actually been picked up by a reader (handed off directly,
    /// or dequeued by a later `next_value` call) — backpressure for
    /// producers that want to avoid running far ahead of their consumer.
    ///
    /// # Panics
    ///
    /// Panics if the pipe has already been closed.
    pub fn blocking_push(&self, value: T) -> Deferred<()> {
        let mut inner = self.inner.borrow_mut();
        assert!(!inner.closed, "push on a closed Pipe");
        if let Some(reader) = inner.waiting_reader.take() {
            drop(inner);
            reader.fill(Some(value));
            Deferred::ready(())
        } else {
            let consumed = Ivar::new();
            inner.queue.push_back(QueuedItem { value, consumed: Some(consumed.clone()) });
            Deferred::from_ivar(consumed)
        }
    }

    /// Reads the next value, or `None` once the pipe is closed and drained.
    ///
    /// # Panics
    ///
    /// Panics if another `next_value` call is already pending.
    pub fn next_value(&self) -> Deferred<Option<T>> {
        let mut inner = self.inner.borrow_mut();
        if let Some(item) = inner.queue.pop_front() {
            drop(inner);
            if let Some(consumed) = item.consumed {
                consumed.fill(());
            }
            return Deferred::ready(Some(item.value));
        }
        if inner.closed {
            return Deferred::ready(None);
        }
        assert!(inner.waiting_reader.is_none(), "Pipe already has a pending reader");
        let ivar = Ivar::new();
        inner.waiting_reader = Some(ivar.clone());
        Deferred::from_ivar(ivar)
    }

    /// Closes the pipe. Any pending `next_value` call, and every call made
    /// after this one, resolves to `None` once the buffer is drained.
    pub fn close(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.closed {
            return;
        }
        inner.closed = true;
        if let Some(reader) = inner.waiting_reader.take() {
            drop(inner);
            reader.fill(None);
        }
    }

    /// Drives a synchronous callback over every value as it arrives,
    /// spawned as an independent [`Task`] that runs until the pipe closes.
    pub fn iter<F>(&self, mut f: F) -> Task<()>
    where
        F: FnMut(T) + 'static,
    {
        let pipe = self.clone();
        Task::spawn(async move {
            loop {
                match pipe.next_value().await {
                    Some(value) => f(value),
                    None => break,
                }
            }
        })
    }

    /// Like [`Pipe::iter`], but `f` returns a [`Deferred`] that's awaited
    /// before the next value is pulled — for consumers whose processing of
    /// one item is itself asynchronous and must finish before the next one
    /// starts.
    pub fn iter2<F>(&self, mut f: F) -> Task<()>
    where
        F: FnMut(T) -> Deferred<()> + 'static,
    {
        let pipe = self.clone();
        Task::spawn(async move {
            loop {
                match pipe.next_value().await {
                    Some(value) => f(value).await,
                    None => break,
                }
            }
        })
    }

    /// Builds a new pipe whose values are `f` applied to this pipe's
    /// values; closes in lockstep with the source.
    pub fn map<U, F>(&self, mut f: F) -> Pipe<U>
    where
        U: 'static,
        F: FnMut(T) -> U + 'static,
    {
        let out = Pipe::<U>::new();
        let out2 = out.clone();
        let source = self.clone();
        Task::spawn(async move {
            loop {
                match source.next_value().await {
                    Some(value) => out2.push(f(value)),
                    None => {
                        out2.close();
                        break;
                    }
                }
            }
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SchedulerContext;
    use serial_test::serial;

    #[test]
    #[serial]
    fn handoff_bypasses_the_queue() {
        let ctx = SchedulerContext::create().unwrap();
        let pipe = Pipe::<i32>::new();

        let pipe2 = pipe.clone();
        let task = Task::spawn(async move { pipe2.next_value().await });
        assert!(!task.is_done(), "next_value should suspend until a value arrives");

        pipe.push(99);
        assert_eq!(pipe.inner.borrow().queue.len(), 0, "push should hand off directly to the waiting reader");

        ctx.scheduler().wait_until(|| task.is_done()).unwrap();
        assert_eq!(task.value(), Some(99));
    }

    #[test]
    #[serial]
    fn close_resolves_pending_reader_with_none() {
        let ctx = SchedulerContext::create().unwrap();
        let pipe = Pipe::<i32>::new();
        let pipe2 = pipe.clone();
        let task = Task::spawn(async move { pipe2.next_value().await });
        pipe.close();
        ctx.scheduler().wait_until(|| task.is_done()).unwrap();
        assert_eq!(task.value(), None);
    }

    #[test]
    #[serial]
    fn buffered_values_drain_in_order() {
        let ctx = SchedulerContext::create().unwrap();
        let pipe = Pipe::<i32>::new();
        pipe.push(1);
        pipe.push(2);
        pipe.close();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        let task = pipe.iter(move |v| seen2.borrow_mut().push(v));
        ctx.scheduler().wait_until(|| task.is_done()).unwrap();
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }
}
