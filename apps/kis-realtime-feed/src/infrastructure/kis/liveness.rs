//! Liveness Watchdog
//!
//! The venue drives the heartbeat: it sends `PINGPONG` frames and expects
//! them echoed. The client never pings. A session that has received nothing
//! (text, ping or pong) for longer than the idle timeout is treated as
//! dropped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Configuration for the idle watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessConfig {
    /// Maximum silence before the session is considered dead.
    /// `Duration::ZERO` disables the watchdog.
    pub idle_timeout: Duration,
    /// How often the watchdog checks for silence.
    pub check_interval: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(120),
            check_interval: Duration::from_secs(5),
        }
    }
}

impl LivenessConfig {
    /// Create a configuration with custom values.
    #[must_use]
    pub const fn new(idle_timeout: Duration, check_interval: Duration) -> Self {
        Self {
            idle_timeout,
            check_interval,
        }
    }

    /// Configuration with the watchdog turned off.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            idle_timeout: Duration::ZERO,
            check_interval: Duration::from_secs(5),
        }
    }

    /// Check if the watchdog is active.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        !self.idle_timeout.is_zero()
    }
}

/// Last-activity timestamp shared between the receive loop and the watchdog.
#[derive(Debug)]
pub struct LivenessState {
    last_activity: RwLock<Instant>,
}

impl Default for LivenessState {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessState {
    /// Create state stamped with the current time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_activity: RwLock::new(Instant::now()),
        }
    }

    /// Record inbound activity.
    pub fn record_activity(&self) {
        *self.last_activity.write() = Instant::now();
    }

    /// Time since the last inbound activity.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_activity.read().elapsed()
    }
}

/// Idle watchdog for one session.
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    config: LivenessConfig,
    state: Arc<LivenessState>,
}

impl LivenessMonitor {
    /// Create a monitor over shared state.
    #[must_use]
    pub const fn new(config: LivenessConfig, state: Arc<LivenessState>) -> Self {
        Self { config, state }
    }

    /// Shared activity state.
    #[must_use]
    pub fn state(&self) -> Arc<LivenessState> {
        Arc::clone(&self.state)
    }

    /// Resolve once the session has been idle longer than the timeout.
    ///
    /// Returns the observed idle duration. Never resolves when disabled.
    pub async fn idle_expired(&self) -> Duration {
        if !self.config.is_enabled() {
            return std::future::pending().await;
        }

        let mut interval = tokio::time::interval(self.config.check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let idle = self.state.idle_for();
            if idle > self.config.idle_timeout {
                tracing::warn!(
                    idle_secs = idle.as_secs(),
                    timeout_secs = self.config.idle_timeout.as_secs(),
                    "Feed idle timeout detected"
                );
                return idle;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = LivenessConfig::default();
        assert_eq!(config.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.check_interval, Duration::from_secs(5));
        assert!(config.is_enabled());
        assert!(!LivenessConfig::disabled().is_enabled());
    }

    #[test]
    fn activity_resets_idle_time() {
        let state = LivenessState::new();
        std::thread::sleep(Duration::from_millis(20));
        assert!(state.idle_for() >= Duration::from_millis(20));

        state.record_activity();
        assert!(state.idle_for() < Duration::from_millis(20));
    }

    #[tokio::test]
    async fn expires_after_silence() {
        let monitor = LivenessMonitor::new(
            LivenessConfig::new(Duration::from_millis(30), Duration::from_millis(5)),
            Arc::new(LivenessState::new()),
        );

        let idle = tokio::time::timeout(Duration::from_secs(2), monitor.idle_expired())
            .await
            .expect("watchdog should fire");

        assert!(idle > Duration::from_millis(30));
    }

    #[tokio::test]
    async fn activity_keeps_session_alive() {
        let state = Arc::new(LivenessState::new());
        let monitor = LivenessMonitor::new(
            LivenessConfig::new(Duration::from_millis(80), Duration::from_millis(5)),
            Arc::clone(&state),
        );

        let keepalive = {
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                for _ in 0..10 {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    state.record_activity();
                }
            })
        };

        let result = tokio::time::timeout(Duration::from_millis(150), monitor.idle_expired()).await;
        assert!(result.is_err(), "watchdog fired while frames were arriving");
        keepalive.await.unwrap();
    }

    #[tokio::test]
    async fn disabled_monitor_never_fires() {
        let monitor =
            LivenessMonitor::new(LivenessConfig::disabled(), Arc::new(LivenessState::new()));

        let result = tokio::time::timeout(Duration::from_millis(50), monitor.idle_expired()).await;
        assert!(result.is_err());
    }
}
