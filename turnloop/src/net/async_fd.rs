//! [`AsyncFd`] — registers a raw, non-blocking file descriptor with the
//! scheduler and exposes its readiness edges as [`Deferred`] values.
//!
//! Grounded on `async_fd.hpp`'s role in the original (a thin readiness
//! wrapper that `Socket`/`ProcessManager` build atop) but reshaped for
//! edge-triggered epoll: since an `IvarMulti` fires only once, each
//! readiness edge gets a fresh one — `readable`/`writable` subscribe to
//! whichever is currently live, and the fd's scheduler callback swaps in a
//! replacement every time it fires.

use std::cell::RefCell;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::rc::Rc;

use crate::deferred::Deferred;
use crate::error::{Error, Result};
use crate::ivar::IvarMulti;
use crate::scheduler;

struct Inner {
    fd: OwnedFd,
    // Edge-triggered readiness is one-shot per registration; each firing
    // replaces this with a fresh `IvarMulti` so the next round of
    // `readable`/`writable` callers get their own listener slot.
    ready: RefCell<Rc<IvarMulti<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Best-effort: if no scheduler is bound (e.g. the fd outlived its
        // scheduler in a test), there's nothing to unregister from.
        let raw = self.fd.as_raw_fd();
        scheduler::try_with_current(|s| {
            let _ = s.remove_fd(raw);
        });
    }
}

/// A non-blocking fd registered for readiness notifications with the
/// current thread's bound scheduler.
pub struct AsyncFd {
    inner: Rc<Inner>,
}

impl Clone for AsyncFd {
    fn clone(&self) -> Self {
        AsyncFd { inner: Rc::clone(&self.inner) }
    }
}

impl std::fmt::Debug for AsyncFd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFd").field("fd", &self.inner.fd.as_raw_fd()).finish()
    }
}

impl AsyncFd {
    /// Takes ownership of `fd`, puts it in non-blocking mode, and
    /// registers it with the current scheduler.
    pub fn new(fd: OwnedFd) -> Result<Self> {
        set_nonblocking(fd.as_raw_fd())?;
        let inner = Rc::new(Inner { fd, ready: RefCell::new(Rc::new(IvarMulti::new())) });
        let callback_inner = Rc::clone(&inner);
        let raw = inner.fd.as_raw_fd();
        scheduler::with_current(|s| {
            s.add_fd(raw, move || {
                let fired = callback_inner.ready.replace(Rc::new(IvarMulti::new()));
                fired.fill(());
            })
        })?;
        Ok(AsyncFd { inner })
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.inner.fd.as_raw_fd()
    }

    /// Determines the next time this fd is reported ready (for reading or
    /// writing — registration covers both, matching the combined
    /// `EPOLLIN | EPOLLOUT` interest set). The caller is expected to retry
    /// its non-blocking syscall and call this again on `EAGAIN`.
    pub fn ready(&self) -> Deferred<()> {
        let multi = Rc::clone(&self.inner.ready.borrow());
        Deferred::from_ivar(multi.subscribe())
    }
}

pub(crate) fn set_nonblocking(fd: RawFd) -> Result<()> {
    // SAFETY: `fd` is a valid, open file descriptor owned by the caller
    // for the duration of this call.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(Error::io("fcntl(F_GETFL)", std::io::Error::last_os_error()));
    }
    // SAFETY: same as above.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(Error::io("fcntl(F_SETFL)", std::io::Error::last_os_error()));
    }
    Ok(())
}
