//! A single-threaded cooperative asynchronous runtime: a scheduler
//! (readiness + timers + a FIFO ready queue), a small algebra of
//! write-once futures ([`Ivar`], [`IvarMulti`], [`Deferred`]), and a bridge
//! ([`Task`]) into native `async`/`.await`.
//!
//! There is no work-stealing, no preemption, and no thread pool: every
//! callback this crate ever invokes runs on the one thread that created
//! the [`SchedulerContext`], one at a time, in the order it was scheduled.
//! That's the whole concurrency model — it buys determinism and a simple
//! mental model for I/O-bound work at the cost of never using a second
//! core.
//!
//! ```no_run
//! use std::time::Duration;
//! use turnloop::{Ivar, SchedulerContext};
//!
//! let ctx = SchedulerContext::create().expect("no scheduler exists yet");
//! let ivar = Ivar::<u32>::new();
//! let ivar2 = ivar.clone();
//! ctx.scheduler().after(Duration::from_millis(10), move || ivar2.fill(42));
//!
//! let mut seen = None;
//! ivar.on_determined(|v| seen = Some(v));
//! ctx.scheduler().wait_until(|| seen.is_some()).unwrap();
//! assert_eq!(seen, Some(42));
//! ```

mod closed;
mod combinators;
mod deferred;
mod error;
mod ivar;
mod logging;
mod net;
mod once;
mod pipe;
mod process;
mod scheduler;
mod task;
mod thread_bridge;

pub use closed::Closed;
pub use combinators::{after, every, iter_parallel, repeat, repeat_parallel, wait_all, TaskHandle};
pub use deferred::Deferred;
pub use error::{Error, Result};
pub use ivar::{Ivar, IvarMulti};
pub use logging::init_from_env;
pub use net::{AsyncFd, HostAndPort, SocketClient, SocketServer};
pub use once::Once;
pub use pipe::Pipe;
pub use process::ProcessManager;
pub use scheduler::{Scheduler, SchedulerContext, TimerId};
pub use task::Task;
pub use thread_bridge::{ThreadBridge, ThreadBridgeSender};
