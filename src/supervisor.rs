//! Supervisor: a thin wrapper that owns a [`Pool`] and adds the actions
//! the Pool deliberately does not know about — `reload` and `shutdown` —
//! so the Pool's own action vocabulary stays limited to the mechanical
//! primitives described alongside it.

use crate::errors::{SupervisorError, SupervisorResult};
use crate::pool::Pool;
use crate::signal::{ActionOutcome, SupervisorTarget};
use std::sync::Arc;
use tracing::info;

/// Owns a `Pool` and exposes it as a `SignalHandler` target with an
/// additional `reload` action. Composition only — no new core semantics.
pub struct Supervisor {
    pool: Arc<Pool>,
}

impl Supervisor {
    pub fn new(pool: Arc<Pool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    pub fn stop_gracefully(&self) -> SupervisorResult<ActionOutcome> {
        self.pool.invoke("stop_gracefully")
    }

    pub fn stop_forcefully(&self) -> SupervisorResult<ActionOutcome> {
        self.pool.invoke("stop_forcefully")
    }

    /// No-op at the mechanical layer: logs and leaves the pool untouched.
    /// A real worker type would use `reload` to pick up new configuration
    /// on its next `update` cycle; this crate ships the wiring, not a
    /// concrete reload policy.
    pub fn reload(&self) -> SupervisorResult<ActionOutcome> {
        info!(pool = %self.pool.name(), "reload requested");
        Ok(ActionOutcome::Continue)
    }

    /// Stops the pool entirely and requests that the main loop exit after
    /// this action's `update()` call. The only action in this crate's
    /// vocabulary that produces [`ActionOutcome::Break`].
    pub fn shutdown(&self) -> SupervisorResult<ActionOutcome> {
        info!(pool = %self.pool.name(), "shutdown requested");
        self.pool.stop()?;
        Ok(ActionOutcome::Break)
    }
}

impl SupervisorTarget for Supervisor {
    fn start(&self) -> SupervisorResult<()> {
        self.pool.start()
    }

    fn update(&self) -> SupervisorResult<()> {
        self.pool.update()
    }

    fn supports_action(&self, action: &str) -> bool {
        matches!(
            action,
            "stop_forcefully" | "stop_gracefully" | "reload" | "shutdown"
        )
    }

    fn invoke(&self, action: &str) -> SupervisorResult<ActionOutcome> {
        match action {
            "stop_forcefully" => self.stop_forcefully(),
            "stop_gracefully" => self.stop_gracefully(),
            "reload" => self.reload(),
            "shutdown" => self.shutdown(),
            other => Err(SupervisorError::UnknownAction(other.to_string())),
        }
    }
}
