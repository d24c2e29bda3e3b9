//! macOS (and other non-Linux Unix) readiness backend: `poll(2)`,
//! level-triggered.
//!
//! Unlike the epoll backend, a registration here reports readiness on
//! every wait call for as long as the condition holds — a fd wrapper that
//! doesn't drain its socket promptly simply gets woken again next turn,
//! rather than missing the edge.

use std::os::fd::RawFd;
use std::time::Duration;

use crate::error::{Error, Result};

pub(crate) struct Backend {
    fds: std::cell::RefCell<Vec<libc::pollfd>>,
}

impl Backend {
    pub(crate) fn new() -> Result<Self> {
        Ok(Backend { fds: std::cell::RefCell::new(Vec::new()) })
    }

    pub(crate) fn register(&self, fd: RawFd) -> Result<()> {
        self.fds.borrow_mut().push(libc::pollfd {
            fd,
            events: libc::POLLIN | libc::POLLOUT,
            revents: 0,
        });
        Ok(())
    }

    pub(crate) fn deregister(&self, fd: RawFd) -> Result<()> {
        self.fds.borrow_mut().retain(|p| p.fd != fd);
        Ok(())
    }

    pub(crate) fn wait(&self, timeout: Option<Duration>) -> Result<Vec<RawFd>> {
        let timeout_ms = timeout.map_or(-1, |d| i32::try_from(d.as_millis()).unwrap_or(i32::MAX));
        loop {
            let mut fds = self.fds.borrow_mut();
            if fds.is_empty() {
                drop(fds);
                if let Some(d) = timeout {
                    std::thread::sleep(d);
                }
                return Ok(Vec::new());
            }
            // SAFETY: `fds` is a live, uniquely-borrowed `Vec<pollfd>`; the
            // pointer and length passed to `poll` are consistent with it.
            let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
            if rc < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(Error::Poll(err));
            }
            let ready = fds
                .iter_mut()
                .filter(|p| p.revents != 0)
                .map(|p| {
                    p.revents = 0;
                    p.fd
                })
                .collect();
            return Ok(ready);
        }
    }
}
