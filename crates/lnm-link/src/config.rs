//! Timing configuration for the link.
//!
//! `ConnectionConfig` (in `lnm-core`) says *where* the daemon lives;
//! `LinkConfig` says *how* the link behaves while reaching it.

use std::time::Duration;

/// Timings and policy for the connection state machine.
///
/// # Example
///
/// ```rust
/// use lnm_link::LinkConfig;
/// use std::time::Duration;
///
/// let config = LinkConfig {
///     retry_initial_delay: Duration::from_millis(250),
///     ..Default::default()
/// };
/// assert_eq!(config.sync_interval, Duration::from_secs(15));
/// ```
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Upper bound on a single connect attempt.
    pub connect_timeout: Duration,

    /// Delay before the first retry after a failed attempt.
    pub retry_initial_delay: Duration,

    /// Maximum delay between retry attempts.
    pub retry_max_delay: Duration,

    /// Backoff multiplier. `1.0` keeps the delay fixed at
    /// `retry_initial_delay`; anything larger grows it up to `retry_max_delay`.
    pub retry_multiplier: f64,

    /// Period of the sync scheduler while connected.
    pub sync_interval: Duration,

    /// Minimum time between two daemon launches.
    pub daemon_relaunch_delay: Duration,

    /// Whether to launch `lightningd` when nothing answers on the socket.
    pub spawn_daemon: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            retry_initial_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
            retry_multiplier: 1.0,
            sync_interval: Duration::from_secs(15),
            daemon_relaunch_delay: Duration::from_secs(30),
            spawn_daemon: true,
        }
    }
}

impl LinkConfig {
    /// Returns the delay to use after `current`.
    pub fn next_retry_delay(&self, current: Duration) -> Duration {
        if self.retry_multiplier <= 1.0 {
            return self.retry_initial_delay;
        }
        let next_ms = (current.as_millis() as f64 * self.retry_multiplier) as u64;
        Duration::from_millis(next_ms).min(self.retry_max_delay)
    }
}
