//! Configuration for the run loop and the timer engine.

use core::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default upper bound on a single timer-thread sleep.
pub const DEFAULT_MAX_SLEEP: Duration = Duration::from_secs(10);

/// Configuration for a [`RunLoop`](crate::RunLoop).
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLoopConfig {
    /// Name used in log output.
    pub name: String,
    /// Queue depth above which a warning is logged. `None` disables the warning.
    pub backlog_warning: Option<usize>,
}

impl Default for RunLoopConfig {
    fn default() -> Self {
        Self {
            name: "runloop".to_owned(),
            backlog_warning: Some(1024),
        }
    }
}

impl RunLoopConfig {
    pub fn builder() -> RunLoopConfigBuilder {
        RunLoopConfigBuilder::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunLoopConfigBuilder {
    config: RunLoopConfig,
}

impl RunLoopConfigBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Sets the depth at which a backlog warning is logged.
    pub fn backlog_warning(mut self, depth: usize) -> Self {
        self.config.backlog_warning = Some(depth);
        self
    }

    pub fn no_backlog_warning(mut self) -> Self {
        self.config.backlog_warning = None;
        self
    }

    pub fn build(self) -> RunLoopConfig {
        self.config
    }
}

/// Configuration for a [`TimerEngine`](crate::TimerEngine).
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerConfig {
    /// Name given to the timer thread.
    pub thread_name: String,
    /// Safety ceiling on one sleep of the timer thread.
    ///
    /// The thread re-evaluates its timers at least this often even when
    /// nothing is due.
    pub max_sleep: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            thread_name: "runloop-timers".to_owned(),
            max_sleep: DEFAULT_MAX_SLEEP,
        }
    }
}

impl TimerConfig {
    pub fn builder() -> TimerConfigBuilder {
        TimerConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_sleep.is_zero() {
            return Err(ConfigError::ZeroMaxSleep);
        }
        if self.thread_name.is_empty() {
            return Err(ConfigError::EmptyThreadName);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct TimerConfigBuilder {
    config: TimerConfig,
}

impl TimerConfigBuilder {
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    pub fn max_sleep(mut self, ceiling: Duration) -> Self {
        self.config.max_sleep = ceiling;
        self
    }

    pub fn build(self) -> TimerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_config_rejects_zero_ceiling() {
        let config = TimerConfig::builder().max_sleep(Duration::ZERO).build();
        assert_eq!(config.validate(), Err(ConfigError::ZeroMaxSleep));
    }

    #[test]
    fn timer_config_rejects_empty_thread_name() {
        let config = TimerConfig::builder().thread_name("").build();
        assert_eq!(config.validate(), Err(ConfigError::EmptyThreadName));
    }

    #[test]
    fn default_timer_config_is_valid() {
        assert_eq!(TimerConfig::default().validate(), Ok(()));
    }
}
