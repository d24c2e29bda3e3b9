//! [`ThreadBridge<T>`] — the crate's one sanctioned way to get a value from
//! another OS thread onto the scheduler thread.
//!
//! Grounded on `queue_bridge.hpp`/`out_thread.hpp`: values cross threads
//! through a thread-safe `std::sync::mpsc` channel (data), paired with a
//! self-pipe (signal) whose read end is registered with the scheduler —
//! writing a single byte to the pipe is enough to wake the scheduler out
//! of a blocking `epoll_wait`/`poll` call without needing the readiness
//! backend to understand anything about the channel itself.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::mpsc;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::net::async_fd::set_nonblocking;
use crate::net::AsyncFd;

/// The scheduler-thread side: call [`ThreadBridge::next_value`] to await
/// the next value pushed from another thread.
pub struct ThreadBridge<T> {
    receiver: mpsc::Receiver<T>,
    read_fd: AsyncFd,
}

impl<T> std::fmt::Debug for ThreadBridge<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadBridge").field("fd", &self.read_fd.as_raw_fd()).finish()
    }
}

/// The off-thread side: cloneable, `Send`, handed to however many producer
/// threads need to push values back onto the scheduler thread.
pub struct ThreadBridgeSender<T> {
    sender: mpsc::Sender<T>,
    write_fd: Arc<OwnedFd>,
}

impl<T> Clone for ThreadBridgeSender<T> {
    fn clone(&self) -> Self {
        ThreadBridgeSender { sender: self.sender.clone(), write_fd: Arc::clone(&self.write_fd) }
    }
}

impl<T> std::fmt::Debug for ThreadBridgeSender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadBridgeSender").field("fd", &self.write_fd.as_raw_fd()).finish()
    }
}

impl<T: 'static> ThreadBridge<T> {
    /// Creates a bridge and its sender. The bridge's read end is
    /// registered with the current thread's bound scheduler; the sender
    /// may be moved onto (or cloned across) any number of other threads.
    pub fn new() -> Result<(Self, ThreadBridgeSender<T>)> {
        let mut fds = [0 as RawFd; 2];
        // SAFETY: `fds` is a valid, writable 2-element buffer.
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        if rc < 0 {
            return Err(Error::io("pipe(2)", std::io::Error::last_os_error()));
        }
        // SAFETY: `fds[0]`/`fds[1]` were just returned by a successful
        // `pipe(2)` call and are not owned anywhere else yet.
        let read_owned = unsafe { OwnedFd::from_raw_fd(fds[0]) };
        let write_owned = unsafe { OwnedFd::from_raw_fd(fds[1]) };
        set_nonblocking(write_owned.as_raw_fd())?;

        let read_fd = AsyncFd::new(read_owned)?;
        let (sender, receiver) = mpsc::channel();
        Ok((
            ThreadBridge { receiver, read_fd },
            ThreadBridgeSender { sender, write_fd: Arc::new(write_owned) },
        ))
    }

    /// Awaits the next value pushed by any sender clone, draining the
    /// self-pipe's wakeup byte(s) each time it fires. Returns `None` once
    /// every [`ThreadBridgeSender`] clone has been dropped and the channel
    /// is empty.
    pub async fn next_value(&self) -> Option<T> {
        loop {
            match self.receiver.try_recv() {
                Ok(value) => return Some(value),
                Err(mpsc::TryRecvError::Disconnected) => return None,
                Err(mpsc::TryRecvError::Empty) => {}
            }
            self.read_fd.ready().await;
            drain_pipe(self.read_fd.as_raw_fd());
        }
    }
}

impl<T> ThreadBridgeSender<T> {
    /// Pushes `value` onto the channel and wakes the scheduler thread.
    pub fn send(&self, value: T) -> std::result::Result<(), mpsc::SendError<T>> {
        self.sender.send(value)?;
        let byte = [0u8; 1];
        // SAFETY: `byte` is a valid 1-byte local buffer; a short write (or
        // `EAGAIN` on a full pipe) is fine to ignore here since the
        // receiver only cares that *some* wakeup eventually arrives and
        // will drain every queued value once woken, pipe-full or not.
        unsafe {
            libc::write(self.write_fd.as_raw_fd(), byte.as_ptr().cast(), 1);
        }
        Ok(())
    }
}

fn drain_pipe(fd: RawFd) {
    let mut buf = [0u8; 64];
    loop {
        // SAFETY: `buf` is a valid, writable local buffer of the given
        // length; `fd` is the bridge's own non-blocking read end.
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n <= 0 {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SchedulerContext;
    use crate::task::Task;
    use serial_test::serial;
    use std::thread;

    #[test]
    #[serial]
    fn value_pushed_from_another_thread_arrives_on_the_scheduler_thread() {
        let ctx = SchedulerContext::create().unwrap();
        let (bridge, sender) = ThreadBridge::<i32>::new().unwrap();

        let handle = thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(5));
            sender.send(77).unwrap();
        });

        let task = Task::spawn(async move { bridge.next_value().await });
        ctx.scheduler().wait_until(|| task.is_done()).unwrap();
        assert_eq!(task.value(), Some(77));
        handle.join().unwrap();
    }

    #[test]
    #[serial]
    fn dropping_every_sender_ends_the_stream() {
        let ctx = SchedulerContext::create().unwrap();
        let (bridge, sender) = ThreadBridge::<i32>::new().unwrap();
        drop(sender);

        let task = Task::spawn(async move { bridge.next_value().await });
        // The channel is disconnected already; this resolves once the
        // task gets a chance to notice (no pipe wakeup is needed for the
        // disconnected case, `try_recv` sees it immediately).
        ctx.scheduler().wait_until(|| task.is_done()).unwrap();
        assert_eq!(task.value(), None);
    }
}
