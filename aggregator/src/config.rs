use envconfig::Envconfig;
use tracing::Level;

use dedup_common::env::{EnvMsDuration, NonEmptyString};
use dedup_common::retry::RetryPolicy;

#[derive(Envconfig, Clone)]
pub struct Config {
    /// Dedup table location, a file path or a `sqlite:` DSN.
    #[envconfig(from = "DEDUP_DB", default = "./data.db")]
    pub database: NonEmptyString,

    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "8080")]
    pub port: u16,

    #[envconfig(default = "8")]
    pub max_db_connections: u32,

    /// 0 means unbounded
    #[envconfig(default = "0")]
    pub queue_capacity: usize,

    #[envconfig(default = "1000")]
    pub poll_timeout: EnvMsDuration,

    #[envconfig(default = "5000")]
    pub shutdown_grace_period: EnvMsDuration,

    #[envconfig(default = "30000")]
    pub liveness_deadline: EnvMsDuration,

    #[envconfig(nested = true)]
    pub retry_policy: RetryPolicyConfig,

    #[envconfig(default = "false")]
    pub export_prometheus: bool,

    #[envconfig(default = "20971520")]
    pub max_body_size: usize,

    pub otel_url: Option<String>,

    #[envconfig(default = "1.0")]
    pub otel_sampling_rate: f64,

    #[envconfig(default = "aggregator")]
    pub otel_service_name: String,

    #[envconfig(default = "info")]
    pub log_level: Level,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn queue_capacity(&self) -> Option<usize> {
        match self.queue_capacity {
            0 => None,
            capacity => Some(capacity),
        }
    }
}

#[derive(Envconfig, Clone)]
pub struct RetryPolicyConfig {
    #[envconfig(from = "MAX_STORE_ATTEMPTS", default = "3")]
    pub max_attempts: u32,

    #[envconfig(default = "2")]
    pub backoff_coefficient: u32,

    #[envconfig(default = "100")]
    pub initial_interval: EnvMsDuration,

    #[envconfig(default = "2000")]
    pub maximum_interval: EnvMsDuration,
}

impl RetryPolicyConfig {
    pub fn provide(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            self.backoff_coefficient,
            self.initial_interval.0,
            Some(self.maximum_interval.0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    #[test]
    fn defaults() {
        let config = Config::init_from_hashmap(&HashMap::new()).unwrap();

        assert_eq!(config.database.as_str(), "./data.db");
        assert_eq!(config.bind(), "0.0.0.0:8080");
        assert_eq!(config.queue_capacity(), None);
        assert_eq!(config.poll_timeout.0, Duration::from_secs(1));
        assert_eq!(config.shutdown_grace_period.0, Duration::from_secs(5));
        assert_eq!(config.retry_policy.provide().max_attempts(), 3);
        assert!(!config.export_prometheus);
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    fn overrides() {
        let env = HashMap::from([
            ("DEDUP_DB".to_owned(), "sqlite:///tmp/dedup.db".to_owned()),
            ("BIND_PORT".to_owned(), "9000".to_owned()),
            ("QUEUE_CAPACITY".to_owned(), "128".to_owned()),
            ("MAX_STORE_ATTEMPTS".to_owned(), "5".to_owned()),
        ]);
        let config = Config::init_from_hashmap(&env).unwrap();

        assert_eq!(config.database.as_str(), "sqlite:///tmp/dedup.db");
        assert_eq!(config.port, 9000);
        assert_eq!(config.queue_capacity(), Some(128));
        assert_eq!(config.retry_policy.provide().max_attempts(), 5);
    }

    #[test]
    fn rejects_blank_database() {
        let env = HashMap::from([("DEDUP_DB".to_owned(), " ".to_owned())]);
        assert!(Config::init_from_hashmap(&env).is_err());
    }
}
