//! Tracing setup, in the style of
//! `r3bl_terminal_async::tracing_logging::tracing_setup`, stripped of the
//! TUI-specific `SharedWriter` plumbing this crate has no use for — nothing
//! else in `turnloop` writes to a shared terminal.
//!
//! The scheduler's turn loop emits `trace!`/`debug!` spans around turn
//! boundaries, fd (de)registration, and timer migration. Call [`init_from_env`]
//! once, early in `main`, to see them; without it the `tracing` macros are
//! no-ops (the default when no subscriber is installed).

use tracing_subscriber::{fmt, EnvFilter};

/// Initializes a process-wide `tracing` subscriber from the `RUST_LOG`
/// environment variable, falling back to `warn` if it is unset or
/// unparseable.
///
/// Idempotent: a second call is a silent no-op (mirrors
/// `tracing_subscriber`'s own `set_global_default` behavior under the hood).
pub fn init_from_env() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt().with_env_filter(filter).try_init();
}
