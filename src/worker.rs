//! WorkerHandler: a factory bound to a worker type, an environment preamble,
//! and an action-name -> signal-name table. Produces forked child processes
//! on demand; the Pool never spawns or signals a process directly.

use crate::errors::{SupervisorError, SupervisorResult};
use crate::sig;
use nix::sys::signal::Signal;
use nix::unistd::{fork, ForkResult, Pid};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Opaque per-worker options, passed through to `WorkerFactory::build`
/// untouched. The core treats the contents as a bag of strings; only the
/// worker implementation gives them meaning.
pub type WorkerOptions = HashMap<String, String>;

/// A worker instance running inside a forked child. `start` is called once,
/// on the child side of the fork, and its return value becomes the child's
/// exit code.
pub trait Worker: Send {
    fn start(&mut self) -> i32;
}

/// Builds a `Worker` from per-spawn options. Bound once into a
/// `WorkerHandler` and invoked from the freshly forked child, after the
/// child has reset its inherited signal dispositions and applied the
/// environment preamble.
pub trait WorkerFactory: Send + Sync {
    fn build(&self, options: &WorkerOptions) -> Box<dyn Worker>;
}

/// Factory bound to a worker type, an environment preamble, and a
/// signal-name table mapping action names (`stop_gracefully`) to OS signal
/// names (`TERM`).
#[derive(Clone)]
pub struct WorkerHandler {
    name: String,
    worker_class: Arc<dyn WorkerFactory>,
    env_preamble: Vec<(String, String)>,
    signal_mappings: HashMap<String, String>,
    load_path: Vec<PathBuf>,
}

impl WorkerHandler {
    /// Creates a handler with the canonical action vocabulary from the
    /// supervisor's signal-mapping configuration: `stop_forcefully` -> KILL,
    /// `stop_gracefully` -> TERM. Callers may add further actions with
    /// [`WorkerHandler::signal_mapping`].
    pub fn new(name: impl Into<String>, worker_class: Arc<dyn WorkerFactory>) -> Self {
        let mut signal_mappings = HashMap::new();
        signal_mappings.insert("stop_forcefully".to_string(), "KILL".to_string());
        signal_mappings.insert("stop_gracefully".to_string(), "TERM".to_string());

        Self {
            name: name.into(),
            worker_class,
            env_preamble: Vec::new(),
            signal_mappings,
            load_path: Vec::new(),
        }
    }

    /// Adds an environment variable that is set in the child, before the
    /// worker is constructed, so that `worker_class` becomes resolvable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_preamble.push((key.into(), value.into()));
        self
    }

    /// Adds an extra search path for the worker code.
    pub fn load_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.load_path.push(path.into());
        self
    }

    /// Binds an action name to an OS signal name, validating the name
    /// eagerly so misconfiguration fails at construction rather than at the
    /// next `kill_worker`.
    pub fn signal_mapping(
        mut self,
        action: impl Into<String>,
        signal_name: impl Into<String>,
    ) -> SupervisorResult<Self> {
        let signal_name = signal_name.into();
        sig::parse_signal_name(&signal_name)?;
        self.signal_mappings.insert(action.into(), signal_name);
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolves an action name to the OS signal it sends.
    pub fn signal_for(&self, action: &str) -> SupervisorResult<Signal> {
        let signal_name = self
            .signal_mappings
            .get(action)
            .ok_or_else(|| SupervisorError::UnknownAction(action.to_string()))?;
        sig::parse_signal_name(signal_name)
    }

    /// Forks a child configured to run `worker_class` with `options`. The
    /// child applies the load path and environment preamble, resets any
    /// supervisor-installed signal dispositions to default, constructs the
    /// worker, and runs it to completion before exiting with its return
    /// code. The parent receives the child's PID immediately and never
    /// blocks here.
    ///
    /// # Safety concerns
    ///
    /// `fork` is only safe to call while the process is effectively
    /// single-threaded from the caller's perspective of shared state; the
    /// Pool only calls this from its own thread, serialized with the
    /// SignalHandler's main loop (see crate-level docs).
    pub fn spawn(&self, options: &WorkerOptions) -> SupervisorResult<Pid> {
        match unsafe { fork() }? {
            ForkResult::Parent { child } => Ok(child),
            ForkResult::Child => {
                let _ = crate::signal::SignalHandler::reset_for_fork();

                if !self.load_path.is_empty() {
                    let joined = self
                        .load_path
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(":");
                    std::env::set_var("WORKER_LOAD_PATH", joined);
                }
                for (key, value) in &self.env_preamble {
                    std::env::set_var(key, value);
                }

                let mut worker = self.worker_class.build(options);
                let code = worker.start();
                std::process::exit(code);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopWorker;
    impl Worker for NoopWorker {
        fn start(&mut self) -> i32 {
            0
        }
    }

    struct NoopFactory;
    impl WorkerFactory for NoopFactory {
        fn build(&self, _options: &WorkerOptions) -> Box<dyn Worker> {
            Box::new(NoopWorker)
        }
    }

    fn handler() -> WorkerHandler {
        WorkerHandler::new("test-handler", Arc::new(NoopFactory))
    }

    #[test]
    fn canonical_actions_resolve_to_documented_signals() {
        let h = handler();
        assert_eq!(h.signal_for("stop_forcefully").unwrap(), Signal::SIGKILL);
        assert_eq!(h.signal_for("stop_gracefully").unwrap(), Signal::SIGTERM);
    }

    #[test]
    fn unknown_action_is_an_error() {
        let h = handler();
        assert!(matches!(
            h.signal_for("reload"),
            Err(SupervisorError::UnknownAction(_))
        ));
    }

    #[test]
    fn additional_actions_can_be_registered() {
        let h = handler().signal_mapping("reload", "hup").unwrap();
        assert_eq!(h.signal_for("reload").unwrap(), Signal::SIGHUP);
    }

    #[test]
    fn invalid_signal_name_is_rejected_at_construction() {
        assert!(handler().signal_mapping("reload", "NOTASIGNAL").is_err());
    }
}
