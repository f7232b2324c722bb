//! Deferred-signal dispatch: a process-wide singleton that turns asynchronous
//! OS signal delivery into a serialized stream of actions invoked on a
//! `target`, from a single background main loop.
//!
//! The design pressure throughout this module is async-signal-safety: the
//! code that actually runs inside the OS signal disposition (the closures
//! registered with `signal_hook::low_level::register`) may not allocate,
//! lock, or log. It may only push a signal number into a bounded lock-free
//! queue and write a single byte to a pipe. Everything else — looking up
//! which actions a signal maps to, invoking them, running `target.update()`
//! — happens on the main loop thread, outside signal context.

use crate::errors::{SupervisorError, SupervisorResult};
use crate::sig;
use signal_hook::SigId;
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

const QUEUE_CAP: usize = 5;

/// The object a `SignalHandler` dispatches actions onto. The Pool is the
/// only target this crate ships, but anything implementing this trait can
/// be driven by the same deferred-signal machinery.
pub trait SupervisorTarget: Send + Sync {
    /// Called once, from `SignalHandler::start`, before the main loop
    /// begins. Default is a no-op for targets with nothing to initialize.
    fn start(&self) -> SupervisorResult<()> {
        Ok(())
    }

    /// Called at the end of every main loop iteration, signal or no signal.
    fn update(&self) -> SupervisorResult<()> {
        Ok(())
    }

    /// Whether `invoke` knows how to perform `action`. Checked for every
    /// action name appearing in the signal mapping at `start` time, so
    /// misconfiguration is fatal before the main loop ever runs.
    fn supports_action(&self, action: &str) -> bool;

    /// Performs `action`. Returns [`ActionOutcome::Break`] to request that
    /// the main loop exit after the next `update` call.
    fn invoke(&self, action: &str) -> SupervisorResult<ActionOutcome>;
}

/// The result of dispatching a single action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Continue,
    Break,
}

/// A bounded, lock-free, signal-safe FIFO of pending signal numbers.
/// Overflow is dropped with a diagnostic rather than growing — allocating
/// inside a signal disposition is not allowed.
struct SignalQueue {
    slots: [AtomicI32; QUEUE_CAP],
    len: AtomicUsize,
    head: AtomicUsize,
    tail: AtomicUsize,
}

impl SignalQueue {
    const fn new() -> Self {
        Self {
            slots: [
                AtomicI32::new(0),
                AtomicI32::new(0),
                AtomicI32::new(0),
                AtomicI32::new(0),
                AtomicI32::new(0),
            ],
            len: AtomicUsize::new(0),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Signal-safe: called from within an OS signal disposition.
    fn try_push(&self, value: i32) -> bool {
        loop {
            let len = self.len.load(Ordering::Acquire);
            if len >= QUEUE_CAP {
                return false;
            }
            if self
                .len
                .compare_exchange_weak(len, len + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let idx = self.tail.fetch_add(1, Ordering::AcqRel) % QUEUE_CAP;
                self.slots[idx].store(value, Ordering::Release);
                return true;
            }
        }
    }

    fn try_pop(&self) -> Option<i32> {
        loop {
            let len = self.len.load(Ordering::Acquire);
            if len == 0 {
                return None;
            }
            if self
                .len
                .compare_exchange_weak(len, len - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let idx = self.head.fetch_add(1, Ordering::AcqRel) % QUEUE_CAP;
                return Some(self.slots[idx].load(Ordering::Acquire));
            }
        }
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }
}

static SIGNAL_QUEUE: SignalQueue = SignalQueue::new();
static PIPE_WRITE_FD: AtomicI32 = AtomicI32::new(-1);

/// Non-blocking, signal-safe write of `bytes` to the self-pipe's write end.
/// Retries on `EINTR`; tolerates `EAGAIN` (a full pipe) because the reader
/// is already guaranteed to wake from whatever is already buffered.
fn raw_wakeup(bytes: &[u8]) {
    let fd = PIPE_WRITE_FD.load(Ordering::Acquire);
    if fd < 0 {
        return;
    }
    let mut offset = 0;
    while offset < bytes.len() {
        let rv = unsafe {
            libc::write(
                fd,
                bytes[offset..].as_ptr() as *const libc::c_void,
                bytes.len() - offset,
            )
        };
        if rv >= 0 {
            offset += rv as usize;
            continue;
        }
        let errno = std::io::Error::last_os_error()
            .raw_os_error()
            .unwrap_or(0);
        if errno == libc::EINTR {
            continue;
        }
        // EAGAIN or anything else: give up, the reader will wake anyway.
        break;
    }
}

/// Writes `bytes` to stderr, signal-safely (no allocation, no formatting).
fn write_stderr(bytes: &[u8]) {
    unsafe {
        libc::write(libc::STDERR_FILENO, bytes.as_ptr() as *const libc::c_void, bytes.len());
    }
}

/// Diagnostic for a signal dropped because the queue was full. Looks up the
/// dropped signal's canonical `SIG<NAME>` spelling via
/// [`sig::canonical_name_for`] so the message names which signal was lost,
/// not just that one was.
fn overflow_diagnostic(signum: i32) {
    write_stderr(b"procwarden: signal queue full, dropping ");
    match nix::sys::signal::Signal::try_from(signum) {
        Ok(signal) => write_stderr(sig::canonical_name_for(signal).as_bytes()),
        Err(_) => write_stderr(b"unknown signal"),
    }
    write_stderr(b"\n");
}

/// Wakes the main loop with a single default byte. Exposed so callers
/// outside the signal path (tests, or a manual nudge) can use the same
/// mechanism the signal dispositions use.
pub fn wakeup() -> SupervisorResult<()> {
    if PIPE_WRITE_FD.load(Ordering::Acquire) < 0 {
        return Err(SupervisorError::NotStarted);
    }
    raw_wakeup(b".");
    Ok(())
}

fn open_self_pipe() -> SupervisorResult<(RawFd, RawFd)> {
    let mut fds = [0i32; 2];
    let rv = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
    if rv != 0 {
        return Err(SupervisorError::Io(std::io::Error::last_os_error()));
    }
    Ok((fds[0], fds[1]))
}

fn close_fd(fd: RawFd) {
    if fd >= 0 {
        unsafe {
            libc::close(fd);
        }
    }
}

enum SnoozeResult {
    Timeout,
    Woken,
    Stop,
}

fn drain_pipe(read_fd: RawFd) -> SnoozeResult {
    let mut buf = [0u8; 64];
    let mut collected: Vec<u8> = Vec::new();
    loop {
        let rv = unsafe { libc::read(read_fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if rv > 0 {
            collected.extend_from_slice(&buf[..rv as usize]);
            if (rv as usize) < buf.len() {
                break;
            }
            continue;
        }
        if rv == 0 {
            break;
        }
        let errno = std::io::Error::last_os_error()
            .raw_os_error()
            .unwrap_or(0);
        if errno == libc::EINTR {
            continue;
        }
        break; // EAGAIN or other: nothing more to drain right now.
    }
    if collected.windows(4).any(|w| w == b"STOP") {
        SnoozeResult::Stop
    } else {
        SnoozeResult::Woken
    }
}

/// Blocks on the self-pipe's read end with a 1-second timeout. The timeout
/// is a liveness heartbeat, not a cancellation mechanism: it guarantees the
/// main loop revisits `update()` even if a wakeup is lost.
fn snooze(read_fd: RawFd) -> SnoozeResult {
    let mut pfd = libc::pollfd {
        fd: read_fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let rv = unsafe { libc::poll(&mut pfd as *mut libc::pollfd, 1, 1000) };
    match rv {
        0 => SnoozeResult::Timeout,
        n if n > 0 => drain_pipe(read_fd),
        _ => {
            let errno = std::io::Error::last_os_error()
                .raw_os_error()
                .unwrap_or(0);
            if errno == libc::EINTR {
                SnoozeResult::Woken
            } else {
                SnoozeResult::Timeout
            }
        }
    }
}

/// Normalizes a signal-mapping table: uppercases keys, prefixes bare names
/// with `SIG`, and rejects collisions introduced by normalization.
/// Idempotent — normalizing an already-normalized table returns it
/// unchanged.
pub fn normalize_signal_mappings(
    mappings: &HashMap<String, Vec<String>>,
) -> SupervisorResult<HashMap<String, Vec<String>>> {
    let mut normalized = HashMap::with_capacity(mappings.len());
    for (key, actions) in mappings {
        let canonical = sig::normalize_signal_name(key);
        if normalized.contains_key(&canonical) {
            return Err(SupervisorError::DuplicateSignalMapping(canonical));
        }
        normalized.insert(canonical, actions.clone());
    }
    Ok(normalized)
}

struct StartedState {
    sig_ids: Vec<SigId>,
}

struct JoinSlot {
    read_fd: RawFd,
    write_fd: RawFd,
    handle: JoinHandle<()>,
}

static STATE: Mutex<Option<StartedState>> = Mutex::new(None);
static JOIN_SLOT: Mutex<Option<JoinSlot>> = Mutex::new(None);

/// Process-wide signal-to-action dispatcher. Stateless handle type: all
/// state lives behind the module-level singleton, because OS signal
/// dispositions are themselves process-global.
pub struct SignalHandler;

impl SignalHandler {
    /// Installs the self-pipe, registers a deferring disposition for every
    /// signal in `mappings`, verifies `target` supports every referenced
    /// action, calls `target.start()`, and launches the main loop. Fails if
    /// a handler is already started.
    pub fn start(
        mappings: HashMap<String, Vec<String>>,
        target: Arc<dyn SupervisorTarget>,
    ) -> SupervisorResult<()> {
        let mut state = STATE.lock().expect("signal handler state poisoned");
        if state.is_some() {
            return Err(SupervisorError::AlreadyStarted);
        }

        let normalized = normalize_signal_mappings(&mappings)?;

        for actions in normalized.values() {
            for action in actions {
                if !target.supports_action(action) {
                    return Err(SupervisorError::UnknownAction(action.clone()));
                }
            }
        }

        let mut numeric_mappings: HashMap<i32, Vec<String>> = HashMap::with_capacity(normalized.len());
        for (name, actions) in &normalized {
            let signal = sig::parse_signal_name(name)?;
            numeric_mappings.insert(signal as i32, actions.clone());
        }

        let (read_fd, write_fd) = open_self_pipe()?;
        PIPE_WRITE_FD.store(write_fd, Ordering::Release);
        while SIGNAL_QUEUE.try_pop().is_some() {} // start from an empty queue

        let mut sig_ids = Vec::with_capacity(numeric_mappings.len());
        for &signum in numeric_mappings.keys() {
            let id = unsafe {
                signal_hook::low_level::register(signum, move || {
                    if !SIGNAL_QUEUE.try_push(signum) {
                        overflow_diagnostic(signum);
                    }
                    raw_wakeup(b".");
                })
            }
            .map_err(SupervisorError::Io)?;
            sig_ids.push(id);
        }

        target.start()?;

        let loop_target = Arc::clone(&target);
        let handle = std::thread::spawn(move || run_main_loop(numeric_mappings, loop_target, read_fd));

        *state = Some(StartedState { sig_ids });
        *JOIN_SLOT.lock().expect("join slot poisoned") = Some(JoinSlot {
            read_fd,
            write_fd,
            handle,
        });

        Ok(())
    }

    /// Restores original signal dispositions and wakes the main loop with a
    /// `STOP` message. Clears the singleton immediately; does not join —
    /// call [`SignalHandler::join`] for that.
    pub fn stop() -> SupervisorResult<()> {
        let started = STATE
            .lock()
            .expect("signal handler state poisoned")
            .take()
            .ok_or(SupervisorError::NotStarted)?;

        for id in started.sig_ids {
            signal_hook::low_level::unregister(id);
        }

        raw_wakeup(b"STOP");
        Ok(())
    }

    /// Blocks until the main loop thread exits, then closes the self-pipe.
    pub fn join() -> SupervisorResult<()> {
        let slot = JOIN_SLOT
            .lock()
            .expect("join slot poisoned")
            .take()
            .ok_or(SupervisorError::NotStarted)?;

        let _ = slot.handle.join();
        PIPE_WRITE_FD.store(-1, Ordering::Release);
        close_fd(slot.read_fd);
        close_fd(slot.write_fd);
        Ok(())
    }

    /// Called inside a freshly forked child, before it runs worker code.
    /// Restores original signal dispositions and clears the singleton, but
    /// drops the self-pipe descriptors without closing them — the child
    /// must not consume or interfere with the parent's pipe — and never
    /// touches the signal queue. Safe to call even if no handler is
    /// started.
    pub fn reset_for_fork() -> SupervisorResult<()> {
        if let Some(started) = STATE.lock().expect("signal handler state poisoned").take() {
            for id in started.sig_ids {
                signal_hook::low_level::unregister(id);
            }
        }
        JOIN_SLOT.lock().expect("join slot poisoned").take();
        PIPE_WRITE_FD.store(-1, Ordering::Release);
        Ok(())
    }

    /// Whether a handler is currently started. Exposed for tests.
    pub fn is_started() -> bool {
        STATE.lock().expect("signal handler state poisoned").is_some()
    }
}

fn run_main_loop(
    mappings: HashMap<i32, Vec<String>>,
    target: Arc<dyn SupervisorTarget>,
    read_fd: RawFd,
) {
    loop {
        let mut last_outcome = ActionOutcome::Continue;

        if let Some(signum) = SIGNAL_QUEUE.try_pop() {
            if let Some(actions) = mappings.get(&signum) {
                for action in actions {
                    last_outcome = match target.invoke(action) {
                        Ok(outcome) => outcome,
                        Err(err) => {
                            tracing::warn!(action = %action, error = %err, "action failed");
                            ActionOutcome::Continue
                        }
                    };
                }
            }
        }

        if let Err(err) = target.update() {
            tracing::warn!(error = %err, "update failed");
        }

        if last_outcome == ActionOutcome::Break {
            break;
        }

        if SIGNAL_QUEUE.len() == 0 {
            match snooze(read_fd) {
                SnoozeResult::Stop => break,
                SnoozeResult::Woken | SnoozeResult::Timeout => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    struct CountingTarget {
        updates: StdAtomicUsize,
        invocations: Mutex<Vec<String>>,
    }

    impl CountingTarget {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                updates: StdAtomicUsize::new(0),
                invocations: Mutex::new(Vec::new()),
            })
        }
    }

    impl SupervisorTarget for CountingTarget {
        fn update(&self) -> SupervisorResult<()> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn supports_action(&self, action: &str) -> bool {
            action == "stop_gracefully"
        }

        fn invoke(&self, action: &str) -> SupervisorResult<ActionOutcome> {
            self.invocations.lock().unwrap().push(action.to_string());
            Ok(ActionOutcome::Continue)
        }
    }

    #[test]
    fn normalization_is_idempotent() {
        let mut mappings = HashMap::new();
        mappings.insert("term".to_string(), vec!["stop_gracefully".to_string()]);
        mappings.insert("HUP".to_string(), vec!["reload".to_string()]);

        let once = normalize_signal_mappings(&mappings).unwrap();
        let twice = normalize_signal_mappings(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn normalization_rejects_collisions() {
        let mut mappings = HashMap::new();
        mappings.insert("TERM".to_string(), vec!["a".to_string()]);
        mappings.insert("term".to_string(), vec!["b".to_string()]);
        assert!(matches!(
            normalize_signal_mappings(&mappings),
            Err(SupervisorError::DuplicateSignalMapping(_))
        ));
    }

    #[test]
    fn start_rejects_unknown_actions() {
        let target = CountingTarget::new();
        let mut mappings = HashMap::new();
        mappings.insert("USR1".to_string(), vec!["does_not_exist".to_string()]);

        let result = SignalHandler::start(mappings, target);
        assert!(matches!(result, Err(SupervisorError::UnknownAction(_))));
        assert!(!SignalHandler::is_started());
    }

    #[test]
    fn queue_drops_signals_past_capacity() {
        for i in 0..(QUEUE_CAP as i32 + 2) {
            SIGNAL_QUEUE.try_push(i);
        }
        assert!(SIGNAL_QUEUE.len() <= QUEUE_CAP);
        while SIGNAL_QUEUE.try_pop().is_some() {}
    }
}
