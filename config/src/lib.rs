//! Typed configuration for the aggregator.
//!
//! The struct is format agnostic: callers deserialize it from whatever
//! serde format their deployment uses and hand it over. Durations accept
//! humantime strings (`"200ms"`, `"10s"`).

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use std::time::Duration;

use data_types::Timeouts;
use serde::Deserialize;

/// Process-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address the public query surface listens on.
    pub listen: String,

    /// Address the internal (metrics, debug) surface listens on.
    pub listen_internal: String,

    /// Backend addresses, `host[:port]` or full URLs.
    pub backends: Vec<String>,

    pub max_idle_conns_per_host: usize,

    #[serde(with = "humantime_serde")]
    pub keep_alive_interval: Duration,

    pub timeouts: TimeoutConfig,

    /// Concurrent in-flight requests allowed per backend; 0 disables the
    /// limit.
    pub concurrency_limit_per_server: usize,

    /// TTL in seconds for routing and learned-path cache entries.
    pub expire_delay_sec: u32,

    /// Number of linear request-duration histogram buckets the handler
    /// layer publishes.
    pub buckets: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: ":8080".to_owned(),
            listen_internal: ":8081".to_owned(),
            backends: Vec::new(),
            max_idle_conns_per_host: 100,
            keep_alive_interval: Duration::from_secs(30),
            timeouts: TimeoutConfig::default(),
            concurrency_limit_per_server: 20,
            expire_delay_sec: 600,
            buckets: 10,
        }
    }
}

impl Config {
    /// The per-surface deadlines the dispatcher works with.
    pub fn query_timeouts(&self) -> Timeouts {
        Timeouts {
            find: self.timeouts.find,
            render: self.timeouts.render,
        }
    }
}

/// Timeout knobs, one per phase of a request's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutConfig {
    /// TCP connect timeout toward backends.
    #[serde(with = "humantime_serde")]
    pub connect: Duration,

    /// Overall budget for one backend call once started.
    #[serde(with = "humantime_serde")]
    pub global: Duration,

    /// Deadline for find fan-outs (also bounds info and probe).
    #[serde(with = "humantime_serde")]
    pub find: Duration,

    /// Deadline for render fan-outs.
    #[serde(with = "humantime_serde")]
    pub render: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_millis(200),
            global: Duration::from_secs(10),
            find: Duration::from_secs(2),
            render: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.concurrency_limit_per_server, 20);
        assert_eq!(config.timeouts.connect, Duration::from_millis(200));
        assert_eq!(config.query_timeouts(), Timeouts::default());
    }

    #[test]
    fn deserialize_with_humantime_durations() {
        let config: Config = serde_json::from_value(serde_json::json!({
            "listen": "0.0.0.0:8000",
            "backends": ["b1:8080", "b2:8080"],
            "keep_alive_interval": "30s",
            "timeouts": {
                "connect": "200ms",
                "find": "2s",
                "render": "10s"
            }
        }))
        .unwrap();

        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.timeouts.connect, Duration::from_millis(200));
        // unset fields keep their defaults
        assert_eq!(config.timeouts.global, Duration::from_secs(10));
        assert_eq!(config.buckets, 10);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result: Result<Config, _> =
            serde_json::from_value(serde_json::json!({"listne": ":8080"}));
        assert!(result.is_err());
    }
}
