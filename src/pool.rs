//! Pool: mechanical management of a fixed-size set of worker subprocesses.
//!
//! The Pool knows nothing about signals or dispatch; it only spawns, kills,
//! reaps, and reconciles. It becomes the `SupervisorTarget` the SignalHandler
//! drives, but that wiring lives in [`crate::supervisor`], not here.

use crate::errors::{SupervisorError, SupervisorResult};
use crate::signal::{ActionOutcome, SupervisorTarget};
use crate::worker::{WorkerHandler, WorkerOptions};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// A fixed-size pool of worker processes, all produced by the same
/// [`WorkerHandler`]. `workers` is strictly insertion-ordered: kills drain
/// from the tail, so long-lived workers accumulate at the head.
pub struct Pool {
    name: String,
    handler: Arc<WorkerHandler>,
    size: usize,
    options: WorkerOptions,
    workers: Mutex<Vec<Pid>>,
}

impl Pool {
    pub fn new(
        name: impl Into<String>,
        handler: Arc<WorkerHandler>,
        size: usize,
        options: WorkerOptions,
    ) -> Self {
        Self {
            name: name.into(),
            handler,
            size,
            options,
            workers: Mutex::new(Vec::with_capacity(size)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Current live-worker count. Does not reap; a worker that has exited
    /// but not yet been cleaned up still counts.
    pub fn worker_count(&self) -> usize {
        self.workers.lock().expect("pool workers poisoned").len()
    }

    /// A snapshot of currently tracked PIDs, oldest first.
    pub fn worker_pids(&self) -> Vec<Pid> {
        self.workers.lock().expect("pool workers poisoned").clone()
    }

    /// Converges to `size` by spawning. Returns once `|workers| == size`.
    pub fn start(&self) -> SupervisorResult<()> {
        info!(pool = %self.name, size = self.size, "starting pool");
        self.spawn_workers(self.size)
    }

    /// Kills every live worker with `stop_forcefully`, reaps them, and
    /// returns once `workers` is empty.
    pub fn stop(&self) -> SupervisorResult<()> {
        let count = self.worker_count();
        info!(pool = %self.name, count, "stopping pool");
        self.kill_workers(count, "stop_forcefully")?;
        self.cleanup_dead_workers(true)
    }

    /// Blocks until every currently-live worker has exited, reaping each.
    pub fn wait(&self) -> SupervisorResult<()> {
        self.cleanup_dead_workers(true)
    }

    /// Reaps dead workers non-blockingly, then spawns replacements so that
    /// `|workers| == size`. The reconciling action is `stop_gracefully`.
    pub fn update(&self) -> SupervisorResult<()> {
        self.cleanup_dead_workers(false)?;
        self.maintain_worker_count("stop_gracefully")
    }

    /// Forks one worker via the handler and appends its PID to `workers`.
    pub fn spawn_worker(&self) -> SupervisorResult<Pid> {
        let pid = self.handler.spawn(&self.options)?;
        debug!(pool = %self.name, pid = pid.as_raw(), "spawned worker");
        self.workers.lock().expect("pool workers poisoned").push(pid);
        Ok(pid)
    }

    pub fn spawn_workers(&self, n: usize) -> SupervisorResult<()> {
        for _ in 0..n {
            self.spawn_worker()?;
        }
        Ok(())
    }

    /// Sends the signal mapped to `action` to `pid`, then optimistically
    /// removes it from `workers` — the PID is still reaped later by
    /// [`Pool::cleanup_dead_workers`]. A PID that has already exited (the OS
    /// reports `ESRCH`) is treated as a successful kill, not an error.
    pub fn kill_worker(&self, pid: Pid, action: &str) -> SupervisorResult<()> {
        let signal = self.handler.signal_for(action)?;
        match kill(pid, signal) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => return Err(SupervisorError::Nix(e)),
        }
        debug!(pool = %self.name, pid = pid.as_raw(), action, "sent signal to worker");
        let mut workers = self.workers.lock().expect("pool workers poisoned");
        workers.retain(|&p| p != pid);
        Ok(())
    }

    /// Kills the `n` most-recently-spawned workers, tail-first.
    pub fn kill_workers(&self, n: usize, action: &str) -> SupervisorResult<()> {
        let tail: Vec<Pid> = {
            let workers = self.workers.lock().expect("pool workers poisoned");
            let start = workers.len().saturating_sub(n);
            workers[start..].iter().rev().copied().collect()
        };
        for pid in tail {
            self.kill_worker(pid, action)?;
        }
        Ok(())
    }

    /// Reaps exited children by waiting on the wildcard PID `-1`, i.e. any
    /// child of this process, not just the ones still in `workers` —
    /// `kill_worker` removes a PID from `workers` optimistically, before the
    /// OS has actually reaped it, so restricting the wait to tracked PIDs
    /// would leave every killed worker a zombie forever. In blocking mode
    /// this loops until there are no children left to wait for (`ECHILD`),
    /// which for a single-pool process is exactly "every worker has
    /// exited". Non-blocking mode drains whatever is already reapable and
    /// returns as soon as nothing is. A PID already reaped elsewhere (a "no
    /// such child" error from the OS) ends the loop, not an error.
    pub fn cleanup_dead_workers(&self, blocking: bool) -> SupervisorResult<()> {
        let flags = if blocking { None } else { Some(WaitPidFlag::WNOHANG) };
        loop {
            match waitpid(Pid::from_raw(-1), flags) {
                Ok(WaitStatus::StillAlive) => return Ok(()),
                Ok(status) => {
                    if let Some(pid) = status.pid() {
                        let mut workers = self.workers.lock().expect("pool workers poisoned");
                        if workers.iter().any(|p| *p == pid) {
                            workers.retain(|p| *p != pid);
                            debug!(pool = %self.name, pid = pid.as_raw(), "reaped worker");
                        }
                    }
                }
                Err(Errno::ECHILD) => return Ok(()),
                Err(e) => return Err(SupervisorError::Nix(e)),
            }
        }
    }

    /// Reconciles `workers` toward `size`: kills the surplus (tail-first,
    /// using `action`) or spawns the shortfall.
    pub fn maintain_worker_count(&self, action: &str) -> SupervisorResult<()> {
        let count = self.worker_count();
        if count > self.size {
            self.kill_workers(count - self.size, action)
        } else if count < self.size {
            self.spawn_workers(self.size - count)
        } else {
            Ok(())
        }
    }
}

impl SupervisorTarget for Pool {
    fn start(&self) -> SupervisorResult<()> {
        Pool::start(self)
    }

    fn update(&self) -> SupervisorResult<()> {
        Pool::update(self)
    }

    fn supports_action(&self, action: &str) -> bool {
        matches!(action, "stop_forcefully" | "stop_gracefully")
    }

    /// Invoking either canonical action on the Pool directly means killing
    /// every currently tracked worker with that action's signal. The main
    /// loop's following `update()` call respawns back to `size`, giving a
    /// full rolling-recycle: a `stop_gracefully` signal to the supervisor
    /// replaces the whole generation of workers rather than shutting the
    /// pool down permanently. Permanent shutdown is `Pool::stop`, called
    /// explicitly by an owning `Supervisor`, not through `invoke`.
    fn invoke(&self, action: &str) -> SupervisorResult<ActionOutcome> {
        if !self.supports_action(action) {
            return Err(SupervisorError::UnknownAction(action.to_string()));
        }
        let count = self.worker_count();
        warn!(pool = %self.name, action, count, "recycling all workers");
        self.kill_workers(count, action)?;
        Ok(ActionOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{Worker, WorkerFactory};

    struct SleepWorker {
        millis: u64,
    }

    impl Worker for SleepWorker {
        fn start(&mut self) -> i32 {
            std::thread::sleep(std::time::Duration::from_millis(self.millis));
            0
        }
    }

    struct SleepFactory;
    impl WorkerFactory for SleepFactory {
        fn build(&self, options: &WorkerOptions) -> Box<dyn Worker> {
            let millis = options
                .get("sleep_ms")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            Box::new(SleepWorker { millis })
        }
    }

    fn handler() -> Arc<WorkerHandler> {
        Arc::new(WorkerHandler::new("sleep-handler", Arc::new(SleepFactory)))
    }

    fn options(sleep_ms: &str) -> WorkerOptions {
        let mut o = WorkerOptions::new();
        o.insert("sleep_ms".to_string(), sleep_ms.to_string());
        o
    }

    #[test]
    fn spawn_and_reap() {
        let pool = Pool::new("test", handler(), 4, options("0"));
        pool.spawn_workers(4).unwrap();
        assert_eq!(pool.worker_count(), 4);
        std::thread::sleep(std::time::Duration::from_millis(50));
        pool.cleanup_dead_workers(true).unwrap();
        assert_eq!(pool.worker_count(), 0);
    }

    #[test]
    fn forced_kill_removes_worker_immediately() {
        let pool = Pool::new("test", handler(), 1, options("1000"));
        let pid = pool.spawn_worker().unwrap();
        pool.kill_worker(pid, "stop_forcefully").unwrap();
        assert_eq!(pool.worker_count(), 0);
        pool.cleanup_dead_workers(true).unwrap();
    }

    #[test]
    fn tail_first_kill_ordering() {
        let pool = Pool::new("test", handler(), 4, options("1000"));
        pool.spawn_workers(4).unwrap();
        let original = pool.worker_pids();
        pool.kill_workers(3, "stop_forcefully").unwrap();
        assert_eq!(pool.worker_pids(), vec![original[0]]);
        pool.cleanup_dead_workers(true).unwrap();
    }

    #[test]
    fn reconciliation_converges_to_size() {
        let pool = Pool::new("test", handler(), 2, options("1000"));
        pool.spawn_workers(4).unwrap();
        pool.maintain_worker_count("stop_forcefully").unwrap();
        assert_eq!(pool.worker_count(), 2);
        pool.stop().unwrap();
    }

    #[test]
    fn double_reap_is_tolerated() {
        let pool = Pool::new("test", handler(), 2, options("0"));
        pool.spawn_workers(2).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));
        pool.cleanup_dead_workers(false).unwrap();
        assert_eq!(pool.worker_count(), 0);
        pool.cleanup_dead_workers(false).unwrap();
        assert_eq!(pool.worker_count(), 0);
    }

    #[test]
    fn invoke_recycles_all_workers() {
        let pool = Pool::new("test", handler(), 2, options("1000"));
        pool.spawn_workers(2).unwrap();
        let outcome = pool.invoke("stop_forcefully").unwrap();
        assert_eq!(outcome, ActionOutcome::Continue);
        assert_eq!(pool.worker_count(), 0);
    }

    #[test]
    fn invoke_rejects_unknown_action() {
        let pool = Pool::new("test", handler(), 1, options("0"));
        assert!(matches!(
            pool.invoke("reload"),
            Err(SupervisorError::UnknownAction(_))
        ));
    }
}
