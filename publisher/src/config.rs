use envconfig::Envconfig;
use url::Url;

use dedup_common::env::{EnvMsDuration, NonEmptyString};

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Mode {
    /// Publish one cycle every `INTERVAL` until stopped
    Continuous,
    /// Publish a single cycle and exit
    OneShot,
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_ref() {
            "continuous" => Ok(Mode::Continuous),
            "one-shot" | "oneshot" => Ok(Mode::OneShot),
            _ => Err(format!("Unknown publisher mode: {s}")),
        }
    }
}

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "http://localhost:8080")]
    pub aggregator_url: Url,

    #[envconfig(default = "100")]
    pub batch_size: usize,

    #[envconfig(default = "1000")]
    pub total_events: usize,

    #[envconfig(default = "0.2")]
    pub duplicate_rate: f64,

    #[envconfig(default = "demo")]
    pub topic: NonEmptyString,

    #[envconfig(default = "pub-1")]
    pub producer_id: NonEmptyString,

    #[envconfig(default = "5000")]
    pub interval: EnvMsDuration,

    #[envconfig(default = "500")]
    pub batch_delay: EnvMsDuration,

    #[envconfig(default = "continuous")]
    pub mode: Mode,

    #[envconfig(default = "30")]
    pub ready_retries: u32,

    #[envconfig(default = "2000")]
    pub ready_delay: EnvMsDuration,

    #[envconfig(default = "10000")]
    pub request_timeout: EnvMsDuration,
}
