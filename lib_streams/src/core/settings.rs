//! Immutable per-stream engine settings, read once per generation start.

use std::time::Duration;

use thiserror::Error;

/// Settings that fail validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    /// The stream has no name to namespace its state under.
    #[error("Stream name must not be empty")]
    EmptyStreamName,

    /// The loop would busy-poll.
    #[error("Poll interval must be greater than zero")]
    ZeroPollInterval,

    /// No cycle could ever run.
    #[error("Safety margin {margin:?} must be smaller than the execution budget {budget:?}")]
    MarginExceedsBudget {
        /// Configured execution budget.
        budget: Duration,
        /// Configured safety margin.
        margin: Duration,
    },

    /// The watchdog would fire continuously.
    #[error("Watchdog interval must be greater than zero")]
    ZeroWatchdogInterval,
}

/// Configuration of one stream's generations.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Stream name, also the lease key.
    pub stream: String,
    /// Partitions to poll; empty means resolve them at generation start.
    pub partitions: Vec<String>,
    /// Pause between cycles.
    pub poll_interval: Duration,
    /// Wall-clock allowance of one generation.
    pub execution_budget: Duration,
    /// Remaining time below which the generation hands off.
    pub safety_margin: Duration,
    /// Period of the watchdog trigger.
    pub watchdog_interval: Duration,
    /// Extra lease time past the budget, also the lease kept across a hand-off.
    pub lease_grace: Duration,
}

impl EngineSettings {
    /// Rejects settings under which a generation cannot make progress.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.stream.trim().is_empty() {
            return Err(SettingsError::EmptyStreamName);
        }
        if self.poll_interval.is_zero() {
            return Err(SettingsError::ZeroPollInterval);
        }
        if self.safety_margin >= self.execution_budget {
            return Err(SettingsError::MarginExceedsBudget {
                budget: self.execution_budget,
                margin: self.safety_margin,
            });
        }
        if self.watchdog_interval.is_zero() {
            return Err(SettingsError::ZeroWatchdogInterval);
        }
        Ok(())
    }

    /// Lease TTL covering a whole generation.
    pub fn lease_ttl(&self) -> Duration {
        self.execution_budget + self.lease_grace
    }
}
