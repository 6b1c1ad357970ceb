//! Termination signal name and number resolution.
use std::str::FromStr;

use nix::sys::signal::Signal;

use crate::patterns;

/// Exception type reported when gdb doesn't print a termination signal.
pub const DEFAULT_SIGNAL: &str = "Core";

/// Signal name to number lookup, keyed by bare POSIX name (`SEGV`, `ABRT`).
pub trait SignalLookup {
    /// Get signal number, `None` if the name is unknown.
    fn signal_number(&self, name: &str) -> Option<i32>;
}

/// Lookup through the host signal table.
#[derive(Clone, Copy, Debug, Default)]
pub struct HostSignals;

impl SignalLookup for HostSignals {
    fn signal_number(&self, name: &str) -> Option<i32> {
        Signal::from_str(&format!("SIG{}", name.to_ascii_uppercase()))
            .ok()
            .map(|signal| signal as i32)
    }
}

impl<F> SignalLookup for F
where
    F: Fn(&str) -> Option<i32>,
{
    fn signal_number(&self, name: &str) -> Option<i32> {
        self(name)
    }
}

/// Get termination signal name from gdb output, `Core` if there is none.
pub fn exit_signal_name(text: &str) -> String {
    patterns::exit_signal(text)
        .unwrap_or(DEFAULT_SIGNAL)
        .to_string()
}

/// Strip the `SIG` prefix: `SIGSEGV` -> `SEGV`.
pub fn bare_signal_name(signal: &str) -> Option<&str> {
    let prefix = signal.get(..3)?;
    if !prefix.eq_ignore_ascii_case("SIG") {
        return None;
    }
    Some(&signal[3..]).filter(|name| !name.is_empty())
}

/// Resolve signal name to its number.
///
/// # Arguments
///
/// * `lookup` - signal table
///
/// * `signal` - signal name as printed by gdb, e.g. `SIGSEGV`
///
/// # Return value
///
/// Signal number, `None` for unknown names and for the `Core` placeholder.
pub fn resolve_signal_number<L: SignalLookup + ?Sized>(lookup: &L, signal: &str) -> Option<i32> {
    bare_signal_name(signal).and_then(|name| lookup.signal_number(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_signal_name() {
        assert_eq!(bare_signal_name("SIGSEGV"), Some("SEGV"));
        assert_eq!(bare_signal_name("sigabrt"), Some("abrt"));
        assert_eq!(bare_signal_name("SIG"), None);
        assert_eq!(bare_signal_name("Core"), None);
        assert_eq!(bare_signal_name(""), None);
    }

    #[test]
    fn test_host_signals() {
        assert_eq!(resolve_signal_number(&HostSignals, "SIGSEGV"), Some(11));
        assert_eq!(resolve_signal_number(&HostSignals, "SIGABRT"), Some(6));
        assert_eq!(resolve_signal_number(&HostSignals, "SIGKILL"), Some(9));
        assert_eq!(resolve_signal_number(&HostSignals, "SIGNOPE"), None);
        assert_eq!(resolve_signal_number(&HostSignals, DEFAULT_SIGNAL), None);
    }

    #[test]
    fn test_custom_lookup() {
        let table = |name: &str| if name == "SEGV" { Some(11) } else { None };
        assert_eq!(resolve_signal_number(&table, "SIGSEGV"), Some(11));
        assert_eq!(resolve_signal_number(&table, "SIGBUS"), None);
    }

    #[test]
    fn test_exit_signal_name() {
        assert_eq!(
            exit_signal_name("Program terminated with signal SIGFPE, Arithmetic exception."),
            "SIGFPE"
        );
        assert_eq!(exit_signal_name("#0  0x1 in main ()"), DEFAULT_SIGNAL);
    }
}
