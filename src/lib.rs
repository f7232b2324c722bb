//! A supervisor for a fixed-size pool of worker subprocesses.
//!
//! Two pieces do all the work:
//!
//! - [`pool::Pool`] mechanically spawns, kills, reaps, and reconciles a set
//!   of worker processes produced by a [`worker::WorkerHandler`].
//! - [`signal::SignalHandler`] installs OS signal dispositions, defers
//!   delivery through a bounded lock-free queue and a self-pipe, and drives
//!   a single main loop that dispatches named actions onto a
//!   [`signal::SupervisorTarget`] — typically a [`pool::Pool`] wrapped in a
//!   [`supervisor::Supervisor`].
//!
//! The signal-disposition code itself (the closures registered with
//! `signal_hook::low_level::register`) never allocates, locks, or logs;
//! everything else runs on the main loop thread, outside signal context.

pub mod errors;
pub mod pool;
pub mod sig;
pub mod signal;
pub mod supervisor;
pub mod worker;

pub use errors::{ErrorContext, SupervisorError, SupervisorResult};
pub use pool::Pool;
pub use signal::{ActionOutcome, SignalHandler, SupervisorTarget};
pub use supervisor::Supervisor;
pub use worker::{Worker, WorkerFactory, WorkerHandler, WorkerOptions};
