//! Non-blocking I/O built on the scheduler's fd registry.

pub(crate) mod async_fd;
mod socket;

pub use async_fd::AsyncFd;
pub(crate) use async_fd::set_nonblocking;
pub use socket::{HostAndPort, SocketClient, SocketServer};
