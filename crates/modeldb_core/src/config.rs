//! Store configuration.

use std::time::Duration;

/// Configuration shared by every lock and store of a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// How long a lock request may block before it is reported as a deadlock.
    pub deadlock_timeout: Duration,

    /// Whether new transactions pre-acquire locks remembered for their call site.
    pub preemptive_locking: bool,

    /// Minimum number of remembered resources before pre-acquisition kicks in.
    pub preemptive_threshold: usize,

    /// Minimum interval between progress log lines during export and import.
    pub progress_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            deadlock_timeout: Duration::from_secs(300),
            preemptive_locking: true,
            preemptive_threshold: 2,
            progress_interval: Duration::from_secs(1),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the deadlock timeout.
    #[must_use]
    pub const fn deadlock_timeout(mut self, timeout: Duration) -> Self {
        self.deadlock_timeout = timeout;
        self
    }

    /// Enables or disables preemptive lock acquisition.
    #[must_use]
    pub const fn preemptive_locking(mut self, enabled: bool) -> Self {
        self.preemptive_locking = enabled;
        self
    }

    /// Sets the preemptive acquisition threshold.
    #[must_use]
    pub const fn preemptive_threshold(mut self, threshold: usize) -> Self {
        self.preemptive_threshold = threshold;
        self
    }

    /// Sets the progress logging interval.
    #[must_use]
    pub const fn progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.deadlock_timeout, Duration::from_secs(300));
        assert!(config.preemptive_locking);
        assert_eq!(config.preemptive_threshold, 2);
        assert_eq!(config.progress_interval, Duration::from_secs(1));
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .deadlock_timeout(Duration::from_millis(250))
            .preemptive_locking(false)
            .preemptive_threshold(4)
            .progress_interval(Duration::ZERO);

        assert_eq!(config.deadlock_timeout, Duration::from_millis(250));
        assert!(!config.preemptive_locking);
        assert_eq!(config.preemptive_threshold, 4);
        assert_eq!(config.progress_interval, Duration::ZERO);
    }
}
