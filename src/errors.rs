//! Error handling for the supervisor.
//!
//! Uses `thiserror` for a detailed error enum that callers can match on,
//! following the same shape as a typical library error type: one variant
//! per failure kind, with `#[from]` conversions for the OS-level sources.

use std::io;
use thiserror::Error;

/// Errors raised by the Pool, the WorkerHandler, and the SignalHandler.
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// IO operation failed (pipe creation, reads/writes on the self-pipe).
    #[error("IO operation failed: {0}")]
    Io(#[from] io::Error),

    /// A `nix` syscall failed (fork, kill, waitpid, sigaction, ...).
    #[error("OS call failed: {0}")]
    Nix(#[from] nix::Error),

    /// `WorkerHandler::signal_for` was asked for an action it has no
    /// mapping for, or `SignalHandler::start` found a configured action
    /// the target does not implement.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// A signal name could not be resolved to an OS signal.
    #[error("unknown signal name: {0}")]
    UnknownSignalName(String),

    /// Two distinct signal-mapping keys normalized to the same signal name.
    #[error("duplicate signal mapping for {0}")]
    DuplicateSignalMapping(String),

    /// `SignalHandler::start` was called while a handler was already
    /// running.
    #[error("signal handler already started")]
    AlreadyStarted,

    /// `SignalHandler::stop`/`join` was called with no handler running.
    #[error("signal handler not started")]
    NotStarted,

    /// A worker could not be spawned.
    #[error("failed to spawn worker: {reason}")]
    SpawnFailed { reason: String },
}

/// Result type alias used throughout the crate.
pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// Adds short human-readable context to a propagated error without
/// discarding the original source.
pub trait ErrorContext<T> {
    fn context<C>(self, context: C) -> SupervisorResult<T>
    where
        C: Into<String>;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: Into<SupervisorError>,
{
    fn context<C>(self, context: C) -> SupervisorResult<T>
    where
        C: Into<String>,
    {
        self.map_err(|e| {
            let base = e.into();
            SupervisorError::SpawnFailed {
                reason: format!("{}: {}", context.into(), base),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "not found");
        let err: SupervisorError = io_error.into();
        assert!(matches!(err, SupervisorError::Io(_)));
    }

    #[test]
    fn context_preserves_source_message() {
        let result: Result<(), io::Error> =
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        let with_context = result.context("spawning worker");
        let err = with_context.unwrap_err();
        assert!(err.to_string().contains("spawning worker"));
    }
}
