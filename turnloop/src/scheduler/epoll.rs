//! Linux readiness backend: `epoll`, edge-triggered.
//!
//! Grounded on `scheduler_epoll.cpp`: a single epoll instance, fds armed
//! with `EPOLLIN | EPOLLOUT | EPOLLET` so one registration covers both
//! read- and write-readiness, and the fd wrapper on top (`AsyncFd`) is
//! responsible for retrying its syscall and tolerating `EAGAIN` after each
//! wakeup — edge-triggered mode only reports a transition, not a level, so
//! a registration never fires twice for the same readiness state.

use std::os::fd::RawFd;
use std::time::Duration;

use crate::error::{Error, Result};

const MAX_EVENTS: usize = 256;

pub(crate) struct Backend {
    epoll_fd: RawFd,
}

impl Backend {
    pub(crate) fn new() -> Result<Self> {
        // SAFETY: epoll_create1 has no preconditions beyond a valid flags
        // argument; 0 is always valid.
        let epoll_fd = unsafe { libc::epoll_create1(0) };
        if epoll_fd < 0 {
            return Err(Error::EpollCreate(std::io::Error::last_os_error()));
        }
        Ok(Backend { epoll_fd })
    }

    pub(crate) fn register(&self, fd: RawFd) -> Result<()> {
        let mut event = libc::epoll_event {
            events: (libc::EPOLLIN | libc::EPOLLOUT | libc::EPOLLET) as u32,
            u64: fd as u64,
        };
        // SAFETY: `epoll_fd` is a valid, open epoll instance owned by
        // `self`; `event` is a live local we hold a unique pointer to for
        // the duration of the call.
        let rc = unsafe {
            libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_ADD, fd, &mut event as *mut _)
        };
        if rc < 0 {
            return Err(Error::EpollCtl(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    pub(crate) fn deregister(&self, fd: RawFd) -> Result<()> {
        // SAFETY: same as `register`; the event pointer is ignored by the
        // kernel for `EPOLL_CTL_DEL` on Linux 2.6.9+ but a non-null pointer
        // is still required by older kernels, so we pass a throwaway one.
        let mut event = libc::epoll_event { events: 0, u64: 0 };
        let rc =
            unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, &mut event as *mut _) };
        if rc < 0 {
            return Err(Error::EpollCtl(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    pub(crate) fn wait(&self, timeout: Option<Duration>) -> Result<Vec<RawFd>> {
        let timeout_ms = timeout.map_or(-1, |d| i32::try_from(d.as_millis()).unwrap_or(i32::MAX));
        let mut events = [libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS];
        loop {
            // SAFETY: `events` is a local buffer of the declared capacity;
            // `epoll_fd` is valid for the lifetime of `self`.
            let rc = unsafe {
                libc::epoll_wait(self.epoll_fd, events.as_mut_ptr(), MAX_EVENTS as i32, timeout_ms)
            };
            if rc < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(Error::EpollWait(err));
            }
            let ready = events[..rc as usize].iter().map(|e| e.u64 as RawFd).collect();
            return Ok(ready);
        }
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        // SAFETY: `epoll_fd` is owned exclusively by this `Backend` and
        // closed exactly once.
        unsafe {
            libc::close(self.epoll_fd);
        }
    }
}
