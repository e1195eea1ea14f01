//! Errors reported while setting up the core.
//!
//! Steady-state operations (`enqueue`, `schedule_once`) have no error path:
//! they either succeed or end the process through [`crate::fatal`].

use std::io;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("timer safety ceiling must be longer than zero")]
    ZeroMaxSleep,
    #[error("timer thread name must not be empty")]
    EmptyThreadName,
}

#[derive(Debug, Error)]
pub enum TimerError {
    #[error("periodic timer period must be longer than zero")]
    ZeroPeriod,
    #[error("invalid timer configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to spawn timer thread: {0}")]
    Spawn(#[source] io::Error),
}
