//! Error types for the fallible parts of the runtime.
//!
//! Per the design: OS failures (syscalls that returned an error) travel
//! through [`Error`]/[`Result`]. Programmer errors (double-fill, double
//! listener, wrong-thread access, a second scheduler on the process) are
//! `assert!`/`panic!` at the call site, not variants here — folding them in
//! would let callers `match` around bugs instead of fixing them.

use std::io;

/// Errors surfaced by fallible runtime operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// `epoll_create1(2)` failed.
    #[error("failed to create epoll instance: {0}")]
    EpollCreate(#[source] io::Error),

    /// `epoll_ctl(2)` failed while registering or unregistering an fd.
    #[error("failed to add socket to epoll: {0}")]
    EpollCtl(#[source] io::Error),

    /// `epoll_wait(2)` failed for a reason other than `EINTR`.
    #[error("failed to wait on epoll: {0}")]
    EpollWait(#[source] io::Error),

    /// `poll(2)` failed for a reason other than `EINTR` (macOS backend).
    #[error("failed to poll: {0}")]
    Poll(#[source] io::Error),

    /// An fd was registered twice with [`crate::scheduler::Scheduler::add_fd`].
    #[error("duplicated fd registration")]
    DuplicateFd,

    /// A second [`crate::scheduler::Scheduler`] was constructed while one
    /// already existed on the process.
    #[error("a scheduler already exists on this process")]
    SchedulerExists,

    /// A non-blocking syscall (`fcntl`, socket setup, `signal_hook`, `pipe`)
    /// failed.
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn io(context: &'static str, source: io::Error) -> Self {
        Error::Io { context, source }
    }
}

/// Convenience alias, mirroring the original's `bee::OrError<T>`.
pub type Result<T> = std::result::Result<T, Error>;
