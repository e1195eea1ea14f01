//! Unrecoverable failure reporting.
//!
//! A control system that has silently lost scheduled work is more dangerous
//! than one that has stopped, so the core never hands half-failed operations
//! back to callers. It reports and exits instead. Collaborators use the same
//! path for their own unrecoverable conditions.

use core::fmt;
use std::io::Write;

/// Subsystem a fatal report originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    RunLoop,
    Timers,
    Hardware,
    Application,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RunLoop => "runloop",
            Self::Timers => "timer subsystem",
            Self::Hardware => "hardware",
            Self::Application => "application",
        };
        f.write_str(name)
    }
}

/// Renders the diagnostic line emitted by [`fatal`].
pub fn report(component: Component, message: impl fmt::Display) -> String {
    format!("{component} critical failure: {message}")
}

/// Reports a component-tagged diagnostic and terminates the process with status 1.
///
/// The report goes to the installed logger at error level. When no logger
/// would accept it, it is written to stderr directly so it is never lost.
pub fn fatal(component: Component, message: impl fmt::Display) -> ! {
    let line = report(component, message);
    if log::log_enabled!(target: "runloop::fatal", log::Level::Error) {
        log::error!(target: "runloop::fatal", "{line}");
        log::logger().flush();
    } else {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{line}");
        let _ = stderr.flush();
    }
    std::process::exit(1)
}

/// Turns setup failures into fatal reports.
pub trait OrFatal<T> {
    /// Returns the success value, or reports `context` and the error as fatal.
    fn or_fatal(self, component: Component, context: &str) -> T;
}

impl<T, E: fmt::Display> OrFatal<T> for Result<T, E> {
    fn or_fatal(self, component: Component, context: &str) -> T {
        match self {
            Ok(value) => value,
            Err(err) => fatal(component, format_args!("{context}: {err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_is_tagged_with_component() {
        assert_eq!(
            report(Component::Timers, "clock unavailable"),
            "timer subsystem critical failure: clock unavailable"
        );
        assert_eq!(
            report(Component::RunLoop, format_args!("depth {}", 3)),
            "runloop critical failure: depth 3"
        );
    }

    #[test]
    fn or_fatal_passes_success_through() {
        let value: Result<u8, String> = Ok(7);
        assert_eq!(value.or_fatal(Component::Hardware, "pwm init"), 7);
    }
}
