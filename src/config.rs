//! Centralized configuration for the scheduler.
//!
//! All tunable parameters are defined here to avoid hard-coded values
//! scattered throughout the codebase.

use std::time::Duration;

/// Scheduler tunables: connection caps, blacklist cooldown, and the tick
/// periods for the four periodic concerns.
///
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Client identifier prefix baked into generated peer IDs
    pub client_id: &'static str,
    /// Global cap on open connections (pending + active)
    pub max_global_egress: usize,
    /// Per-torrent cap on open connections (pending + active)
    pub max_conns_per_torrent: usize,
    /// How long a blacklisted peer stays excluded
    pub blacklist_cooldown: Duration,
    /// Tick period for the stale-blacklist sweep
    pub blacklist_cleanup_interval: Duration,
    /// Tick period for tracker announces
    pub announce_interval: Duration,
    /// Tick period for the connection/seeder preemption sweep
    pub preemption_interval: Duration,
    /// Tick period for stats gauge emission
    pub emit_stats_interval: Duration,
    /// Max time without piece progress before a conn is closed
    pub idle_conn_ttl: Duration,
    /// Max absolute lifetime of a conn
    pub conn_ttl: Duration,
    /// How long a completed torrent stays resident with no peers
    pub idle_seeder_ttl: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            client_id: "-EB0001-",
            max_global_egress: 50,
            max_conns_per_torrent: 10,
            blacklist_cooldown: Duration::from_secs(30),
            blacklist_cleanup_interval: Duration::from_secs(60),
            announce_interval: Duration::from_secs(3),
            preemption_interval: Duration::from_secs(30),
            emit_stats_interval: Duration::from_secs(10),
            idle_conn_ttl: Duration::from_secs(5 * 60),
            conn_ttl: Duration::from_secs(60 * 60),
            idle_seeder_ttl: Duration::from_secs(10 * 60),
        }
    }
}

impl SchedulerConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Caps and the blacklist cooldown can be overridden via
    /// `EBBTIDE_MAX_GLOBAL_EGRESS`, `EBBTIDE_MAX_CONNS_PER_TORRENT`, and
    /// `EBBTIDE_BLACKLIST_COOLDOWN` (seconds), with defaults otherwise.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(cap) = std::env::var("EBBTIDE_MAX_GLOBAL_EGRESS") {
            if let Ok(n) = cap.parse::<usize>() {
                config.max_global_egress = n;
            }
        }

        if let Ok(cap) = std::env::var("EBBTIDE_MAX_CONNS_PER_TORRENT") {
            if let Ok(n) = cap.parse::<usize>() {
                config.max_conns_per_torrent = n;
            }
        }

        if let Ok(cooldown) = std::env::var("EBBTIDE_BLACKLIST_COOLDOWN") {
            if let Ok(seconds) = cooldown.parse::<u64>() {
                config.blacklist_cooldown = Duration::from_secs(seconds);
            }
        }

        config
    }

    /// Creates a configuration for testing.
    ///
    /// Tick periods are parked at one hour so tests drive ticks manually
    /// against a simulated clock.
    pub fn for_testing() -> Self {
        let parked = Duration::from_secs(3600);
        Self {
            blacklist_cleanup_interval: parked,
            announce_interval: parked,
            preemption_interval: parked,
            emit_stats_interval: parked,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = SchedulerConfig::default();

        assert_eq!(config.client_id, "-EB0001-");
        assert_eq!(config.max_global_egress, 50);
        assert_eq!(config.max_conns_per_torrent, 10);
        assert_eq!(config.blacklist_cooldown, Duration::from_secs(30));
        assert!(config.conn_ttl > config.idle_conn_ttl);
    }

    #[test]
    fn test_testing_config_parks_tick_intervals() {
        let config = SchedulerConfig::for_testing();
        assert_eq!(config.announce_interval, Duration::from_secs(3600));
        assert_eq!(config.preemption_interval, Duration::from_secs(3600));
        assert_eq!(config.max_global_egress, SchedulerConfig::default().max_global_egress);
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("EBBTIDE_MAX_GLOBAL_EGRESS", "7");
            std::env::set_var("EBBTIDE_MAX_CONNS_PER_TORRENT", "3");
            std::env::set_var("EBBTIDE_BLACKLIST_COOLDOWN", "120");
        }

        let config = SchedulerConfig::from_env();

        assert_eq!(config.max_global_egress, 7);
        assert_eq!(config.max_conns_per_torrent, 3);
        assert_eq!(config.blacklist_cooldown, Duration::from_secs(120));

        unsafe {
            std::env::remove_var("EBBTIDE_MAX_GLOBAL_EGRESS");
            std::env::remove_var("EBBTIDE_MAX_CONNS_PER_TORRENT");
            std::env::remove_var("EBBTIDE_BLACKLIST_COOLDOWN");
        }
    }
}
