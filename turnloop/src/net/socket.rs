//! TCP wrappers built on [`AsyncFd`]: [`SocketServer`] (bind + listen +
//! accept) and [`SocketClient`] (connect, non-blocking read/write).
//!
//! Grounded on `socket.hpp`/`socket.cpp`: raw, non-blocking sockets with
//! the scheduler supplying readiness, and `EAGAIN` handled by returning to
//! the ready-queue via [`AsyncFd::ready`] rather than blocking the thread.

use std::io;
use std::mem;
use std::net::Ipv4Addr;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::net::async_fd::{set_nonblocking, AsyncFd};

/// A resolved `host:port` pair. Grounded on `host_and_port.hpp`; this crate
/// only supports literal IPv4 addresses (DNS resolution is out of scope,
/// same as the original, which resolves hostnames through a separate
/// blocking-thread helper it explicitly does not fold into the scheduler).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostAndPort {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl HostAndPort {
    pub fn new(host: Ipv4Addr, port: u16) -> Self {
        HostAndPort { host, port }
    }

    fn to_sockaddr(self) -> libc::sockaddr_in {
        libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: self.port.to_be(),
            sin_addr: libc::in_addr { s_addr: u32::from(self.host).to_be() },
            sin_zero: [0; 8],
        }
    }
}

impl FromStr for HostAndPort {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (host, port) =
            s.rsplit_once(':').ok_or_else(|| format!("expected host:port, got {s:?}"))?;
        let host: Ipv4Addr = host.parse().map_err(|e| format!("{e}"))?;
        let port: u16 = port.parse().map_err(|e| format!("{e}"))?;
        Ok(HostAndPort { host, port })
    }
}

fn new_tcp_socket() -> Result<OwnedFd> {
    // SAFETY: a plain, no-argument-dependent socket(2) call.
    let raw = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
    if raw < 0 {
        return Err(Error::io("socket(2)", io::Error::last_os_error()));
    }
    // SAFETY: `raw` was just returned by a successful `socket(2)` call and
    // is not owned anywhere else yet.
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

/// A listening TCP socket.
pub struct SocketServer {
    fd: AsyncFd,
}

impl std::fmt::Debug for SocketServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketServer").field("fd", &self.fd.as_raw_fd()).finish()
    }
}

impl SocketServer {
    /// Binds and listens on `addr`.
    pub fn bind(addr: HostAndPort) -> Result<Self> {
        let raw_fd = new_tcp_socket()?;
        let raw = raw_fd.as_raw_fd_for_setup();
        let one: libc::c_int = 1;
        // SAFETY: `raw` is a valid, owned socket fd; `one` is a live local
        // whose address is only read by `setsockopt` during the call.
        unsafe {
            libc::setsockopt(
                raw,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                (&raw const one).cast(),
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            );
        }

        let sockaddr = addr.to_sockaddr();
        // SAFETY: `sockaddr` is a valid, fully initialized `sockaddr_in`
        // local for the duration of the call; its size matches what we
        // pass.
        let rc = unsafe {
            libc::bind(
                raw,
                (&raw const sockaddr).cast(),
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(Error::io("bind(2)", io::Error::last_os_error()));
        }
        // SAFETY: `raw` is the same valid socket fd used above.
        let rc = unsafe { libc::listen(raw, libc::SOMAXCONN) };
        if rc < 0 {
            return Err(Error::io("listen(2)", io::Error::last_os_error()));
        }

        Ok(SocketServer { fd: AsyncFd::new(raw_fd)? })
    }

    /// Accepts the next incoming connection, retrying on `EAGAIN` by
    /// awaiting the listening fd's next readiness edge.
    pub async fn accept(&self) -> Result<SocketClient> {
        loop {
            let raw = self.fd.as_raw_fd();
            // SAFETY: `raw` is the listening socket's valid fd; a null
            // address/length pair is explicitly permitted by `accept(2)`
            // when the peer address isn't needed.
            let accepted = unsafe { libc::accept(raw, std::ptr::null_mut(), std::ptr::null_mut()) };
            if accepted >= 0 {
                // SAFETY: `accepted` was just returned by a successful
                // `accept(2)` call and is not owned anywhere else yet.
                let owned = unsafe { OwnedFd::from_raw_fd(accepted) };
                return Ok(SocketClient { fd: AsyncFd::new(owned)? });
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::WouldBlock {
                return Err(Error::io("accept(2)", err));
            }
            self.fd.ready().await;
        }
    }
}

/// A connected TCP socket.
pub struct SocketClient {
    fd: AsyncFd,
}

impl std::fmt::Debug for SocketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketClient").field("fd", &self.fd.as_raw_fd()).finish()
    }
}

impl SocketClient {
    /// Connects to `addr`, suspending until the non-blocking connect
    /// completes (or fails).
    pub async fn connect(addr: HostAndPort) -> Result<Self> {
        let raw_fd = new_tcp_socket()?;
        set_nonblocking(raw_fd.as_raw_fd_for_setup())?;
        let fd = AsyncFd::new(raw_fd)?;

        let sockaddr = addr.to_sockaddr();
        let raw = fd.as_raw_fd();
        // SAFETY: `sockaddr` is valid for the duration of this call and
        // its declared size matches the structure passed.
        let rc = unsafe {
            libc::connect(
                raw,
                (&raw const sockaddr).cast(),
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::WouldBlock
                && err.raw_os_error() != Some(libc::EINPROGRESS)
            {
                return Err(Error::io("connect(2)", err));
            }
            fd.ready().await;
            let mut sock_err: libc::c_int = 0;
            let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
            // SAFETY: `sock_err`/`len` are valid locals whose addresses
            // are passed for `getsockopt` to write into.
            let rc = unsafe {
                libc::getsockopt(
                    raw,
                    libc::SOL_SOCKET,
                    libc::SO_ERROR,
                    (&raw mut sock_err).cast(),
                    &raw mut len,
                )
            };
            if rc < 0 {
                return Err(Error::io("getsockopt(SO_ERROR)", io::Error::last_os_error()));
            }
            if sock_err != 0 {
                return Err(Error::io("connect(2)", io::Error::from_raw_os_error(sock_err)));
            }
        }
        Ok(SocketClient { fd })
    }

    /// Reads into `buf`, retrying on `EAGAIN`. Returns `0` on a clean
    /// peer-initiated shutdown, same as `std::io::Read`.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            let raw = self.fd.as_raw_fd();
            // SAFETY: `buf` is a valid, writable slice of the given length
            // for the duration of the call.
            let n = unsafe {
                libc::read(raw, buf.as_mut_ptr().cast(), buf.len())
            };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::WouldBlock {
                return Err(Error::io("read(2)", err));
            }
            self.fd.ready().await;
        }
    }

    /// Writes all of `buf`, retrying on `EAGAIN` until the whole buffer is
    /// sent (the original's bulk-transfer scenario chunks a large payload
    /// through exactly this loop).
    pub async fn write_all(&self, buf: &[u8]) -> Result<()> {
        let mut offset = 0;
        while offset < buf.len() {
            let raw = self.fd.as_raw_fd();
            // SAFETY: `buf[offset..]` is a valid, readable slice for the
            // duration of the call.
            let n = unsafe {
                libc::write(raw, buf[offset..].as_ptr().cast(), buf.len() - offset)
            };
            if n >= 0 {
                offset += n as usize;
                continue;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::WouldBlock {
                return Err(Error::io("write(2)", err));
            }
            self.fd.ready().await;
        }
        Ok(())
    }
}

/// Internal helper: an fd isn't yet registered with the scheduler while
/// it's still being configured (`setsockopt`/`bind`/`listen`), so this
/// reads the raw fd directly rather than going through `AsyncFd`.
trait RawFdForSetup {
    fn as_raw_fd_for_setup(&self) -> RawFd;
}

impl RawFdForSetup for OwnedFd {
    fn as_raw_fd_for_setup(&self) -> RawFd {
        use std::os::fd::AsRawFd;
        self.as_raw_fd()
    }
}
