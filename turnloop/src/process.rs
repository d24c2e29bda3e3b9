//! [`ProcessManager`] — spawns child processes and reaps them
//! asynchronously via `SIGCHLD`, rather than blocking the scheduler thread
//! in `waitpid`.
//!
//! Grounded on `process_manager.hpp`/`process_manager.cpp`: the original
//! reads `SIGCHLD` through a blocked-signal + `signalfd` pair, which is
//! Linux-only. This is reshaped onto `signal_hook`'s self-pipe registration
//! (the same crate the workspace already pulls in for Unix signal
//! handling) so the same async-signal-safe wakeup works on every Unix this
//! crate's `poll`-backed scheduler targets: the write end of a pipe is
//! registered with `signal_hook` as the `SIGCHLD` action, the read end is
//! an ordinary [`AsyncFd`], and each wakeup drains every exited child with
//! a non-blocking reap, so one signal covers however many children exited
//! before it was handled.

use std::cell::RefCell;
use std::collections::HashMap;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::process::Command;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::net::AsyncFd;
use crate::task::Task;

type ExitCallback = Box<dyn FnOnce(i32)>;

struct Inner {
    pending: RefCell<HashMap<u32, (std::process::Child, ExitCallback)>>,
}

/// Spawns processes and invokes a callback, off the ready queue, when each
/// one exits.
pub struct ProcessManager {
    inner: Rc<Inner>,
    signal_fd: AsyncFd,
    reaper: Task<()>,
}

impl std::fmt::Debug for ProcessManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessManager")
            .field("pending_children", &self.inner.pending.borrow().len())
            .finish()
    }
}

impl ProcessManager {
    /// Registers a `SIGCHLD` self-pipe with `signal_hook` and starts
    /// reaping exited children through it.
    ///
    /// Only one `ProcessManager` should exist per process: a second one
    /// would race the first to reap the same children.
    pub fn new() -> Result<Self> {
        let signal_fd = Self::open_signal_pipe()?;
        let inner = Rc::new(Inner { pending: RefCell::new(HashMap::new()) });
        let reap_inner = Rc::clone(&inner);
        let reap_fd = signal_fd.clone();
        let reaper = Task::spawn(async move {
            loop {
                reap_fd.ready().await;
                drain_pipe(reap_fd.as_raw_fd());
                Self::reap_exited(&reap_inner);
            }
        });
        Ok(ProcessManager { inner, signal_fd, reaper })
    }

    fn open_signal_pipe() -> Result<AsyncFd> {
        let mut fds = [0 as RawFd; 2];
        // SAFETY: `fds` is a valid, writable 2-element buffer.
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        if rc < 0 {
            return Err(Error::io("pipe(2)", std::io::Error::last_os_error()));
        }
        // SAFETY: `fds[0]`/`fds[1]` were just returned by a successful
        // `pipe(2)` call and are not owned anywhere else yet.
        let read_end = unsafe { OwnedFd::from_raw_fd(fds[0]) };
        let write_end = unsafe { OwnedFd::from_raw_fd(fds[1]) };

        // `signal_hook` installs the async-signal-safe handler and keeps
        // `write_end` open for the life of the process; every `SIGCHLD`
        // writes one byte into it.
        signal_hook::low_level::pipe::register(libc::SIGCHLD, write_end)
            .map_err(|e| Error::io("signal_hook::low_level::pipe::register(SIGCHLD)", e))?;

        AsyncFd::new(read_end)
    }

    /// Non-blockingly reaps every child that has exited so far, firing
    /// each one's callback in turn.
    fn reap_exited(inner: &Rc<Inner>) {
        let mut finished: Vec<(i32, ExitCallback)> = Vec::new();
        {
            let mut pending = inner.pending.borrow_mut();
            let pids: Vec<u32> = pending.keys().copied().collect();
            for pid in pids {
                let exit_code = {
                    let (child, _) = pending.get_mut(&pid).expect("pid from snapshot");
                    match child.try_wait() {
                        Ok(Some(status)) => Some(status.code().unwrap_or(-1)),
                        Ok(None) => None,
                        Err(_) => Some(-1),
                    }
                };
                if let Some(code) = exit_code {
                    let (_, callback) = pending.remove(&pid).expect("pid just matched above");
                    finished.push((code, callback));
                }
            }
        }
        for (code, callback) in finished {
            callback(code);
        }
    }

    /// Spawns `program` with `args`, invoking `on_exit` with its exit code
    /// once `SIGCHLD` reaping picks it up.
    pub fn spawn_process<F>(&self, program: &str, args: &[String], on_exit: F) -> Result<u32>
    where
        F: FnOnce(i32) + 'static,
    {
        let child = Command::new(program)
            .args(args)
            .spawn()
            .map_err(|e| Error::io("spawn child process", e))?;
        let pid = child.id();
        self.inner.pending.borrow_mut().insert(pid, (child, Box::new(on_exit)));
        Ok(pid)
    }

    pub fn signal_fd(&self) -> &AsyncFd {
        &self.signal_fd
    }

    pub fn is_reaping(&self) -> bool {
        !self.reaper.is_done()
    }

    /// Tears the manager down. Every spawned child must already have been
    /// reaped: closing with children still outstanding means some `SIGCHLD`
    /// could still arrive after nothing is left to observe it, which is
    /// exactly the shutdown race spec.md's process-supervision contract
    /// rules out.
    ///
    /// # Panics
    ///
    /// Panics if any spawned child has not yet exited and been reaped.
    ///
    /// Deliberately not also enforced from `Drop`: a second assert firing
    /// there while this one's panic is still unwinding through the same
    /// value would abort the process instead of just failing this call.
    pub fn close(&self) {
        assert!(
            self.inner.pending.borrow().is_empty(),
            "ProcessManager::close called with {} outstanding unreaped children",
            self.inner.pending.borrow().len()
        );
    }
}

fn drain_pipe(fd: RawFd) {
    let mut buf = [0u8; 64];
    loop {
        // SAFETY: `buf` is a valid, writable local buffer of the given
        // length; `fd` is this manager's own non-blocking signal-pipe read
        // end.
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
    use serial_test::serial;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    #[serial]
    fn spawned_child_exit_is_observed_on_the_scheduler_thread() {
        let ctx = SchedulerContext::create().unwrap();
        let manager = ProcessManager::new().unwrap();

        let code = Rc::new(Cell::new(None));
        let code2 = Rc::clone(&code);
        manager
            .spawn_process("true", &[], move |status| code2.set(Some(status)))
            .unwrap();

        ctx.scheduler().wait_until(|| code.get().is_some()).unwrap();
        assert_eq!(code.get(), Some(0));
        manager.close();
    }

    #[test]
    #[serial]
    #[should_panic(expected = "outstanding unreaped children")]
    fn close_with_a_child_still_running_panics() {
        let _ctx = SchedulerContext::create().unwrap();
        let manager = ProcessManager::new().unwrap();
        manager.spawn_process("sleep", &["5".to_string()], |_| {}).unwrap();
        manager.close();
    }
}
