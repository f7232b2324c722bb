//! Signal-name normalization and lookup shared by the Pool and the
//! SignalHandler. Kept separate from both because it's pure, allocation-light
//! logic neither module owns exclusively.

use crate::errors::{SupervisorError, SupervisorResult};
use nix::sys::signal::Signal;

/// Uppercases a signal name and prefixes it with `SIG` if missing, e.g.
/// `"term"` -> `"SIGTERM"`, `"SIGKILL"` -> `"SIGKILL"`.
pub fn normalize_signal_name(name: &str) -> String {
    let upper = name.to_ascii_uppercase();
    if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    }
}

/// Resolves a (possibly unnormalized) signal name to a `nix` `Signal`.
///
/// Accepts any spelling `normalize_signal_name` would produce, e.g.
/// `"term"`, `"TERM"`, `"SIGTERM"`.
pub fn parse_signal_name(name: &str) -> SupervisorResult<Signal> {
    let normalized = normalize_signal_name(name);
    signal_from_normalized(&normalized)
        .ok_or_else(|| SupervisorError::UnknownSignalName(normalized))
}

/// Resolves a signal number (as delivered by the OS) back to its canonical
/// `SIG<NAME>` spelling, for diagnostics and for matching against a
/// `signal_mappings` table keyed by name.
pub fn canonical_name_for(signal: Signal) -> &'static str {
    signal.as_str()
}

fn signal_from_normalized(name: &str) -> Option<Signal> {
    use Signal::*;
    Some(match name {
        "SIGHUP" => SIGHUP,
        "SIGINT" => SIGINT,
        "SIGQUIT" => SIGQUIT,
        "SIGILL" => SIGILL,
        "SIGTRAP" => SIGTRAP,
        "SIGABRT" => SIGABRT,
        "SIGBUS" => SIGBUS,
        "SIGFPE" => SIGFPE,
        "SIGKILL" => SIGKILL,
        "SIGUSR1" => SIGUSR1,
        "SIGSEGV" => SIGSEGV,
        "SIGUSR2" => SIGUSR2,
        "SIGPIPE" => SIGPIPE,
        "SIGALRM" => SIGALRM,
        "SIGTERM" => SIGTERM,
        #[cfg(not(any(target_os = "macos", target_os = "ios")))]
        "SIGSTKFLT" => SIGSTKFLT,
        "SIGCHLD" => SIGCHLD,
        "SIGCONT" => SIGCONT,
        "SIGSTOP" => SIGSTOP,
        "SIGTSTP" => SIGTSTP,
        "SIGTTIN" => SIGTTIN,
        "SIGTTOU" => SIGTTOU,
        "SIGURG" => SIGURG,
        "SIGXCPU" => SIGXCPU,
        "SIGXFSZ" => SIGXFSZ,
        "SIGVTALRM" => SIGVTALRM,
        "SIGPROF" => SIGPROF,
        "SIGWINCH" => SIGWINCH,
        "SIGIO" => SIGIO,
        #[cfg(not(any(target_os = "macos", target_os = "ios")))]
        "SIGPWR" => SIGPWR,
        "SIGSYS" => SIGSYS,
        _ => return None,
    })
}
