//! Typed views over the configuration values the grid core consumes.
//!
//! Config *parsing* (files, environment) is out of scope; these structs hold
//! already-parsed values and own the resolution rules: duration flooring,
//! defaults, and the model-store URI precedence.

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

/// Node-level options: concurrency ceiling, driver sources, registration
/// cadence.
#[derive(Debug, Clone)]
pub struct NodeOptions {
    /// Cap on concurrently creatable sessions; `None` means "use the
    /// machine's parallelism". Hard-capped at available parallelism either
    /// way.
    pub max_concurrent_sessions: Option<usize>,
    /// Seconds between registration attempts; values <= 0 floor to 1.
    pub register_cycle: Option<i64>,
    /// Seconds to keep trying to register; values <= 0 floor to 1.
    pub register_period: Option<i64>,
    /// Seconds between heartbeats; values <= 0 floor to 1.
    pub heartbeat_period: Option<i64>,
    /// Whether drivers are discovered automatically.
    pub detect_drivers: bool,
    /// Allow-list of detected driver display names. Requires
    /// `detect_drivers`; the combination with detection disabled is a
    /// configuration error caught during slot assembly.
    pub drivers: Option<Vec<String>>,
    /// Alternating provider-name / stereotype-JSON entries.
    pub driver_factories: Vec<String>,
    /// `key=value` triples of name / stereotype / max-sessions.
    pub driver_configuration: Vec<String>,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: None,
            register_cycle: None,
            register_period: None,
            heartbeat_period: None,
            detect_drivers: true,
            drivers: None,
            driver_factories: Vec::new(),
            driver_configuration: Vec::new(),
        }
    }
}

impl NodeOptions {
    /// Concurrency ceiling for the discovery pass: the configured value
    /// bounded above by available parallelism, defaulting to it.
    pub fn max_sessions(&self) -> usize {
        let parallelism = available_parallelism();
        self.max_concurrent_sessions
            .unwrap_or(parallelism)
            .min(parallelism)
            .max(1)
    }

    pub fn register_cycle(&self) -> Duration {
        floored_seconds(self.register_cycle, 10)
    }

    pub fn register_period(&self) -> Duration {
        floored_seconds(self.register_period, 120)
    }

    pub fn heartbeat_period(&self) -> Duration {
        floored_seconds(self.heartbeat_period, 10)
    }
}

/// Queue-level timing options.
#[derive(Debug, Clone, Default)]
pub struct QueueOptions {
    /// Seconds between retry re-evaluations of a front-inserted request.
    pub retry_interval: Option<i64>,
    /// Seconds a request may stay queued before it is rejected.
    pub request_timeout: Option<i64>,
}

impl QueueOptions {
    pub fn retry_interval(&self) -> Duration {
        floored_seconds(self.retry_interval, 5)
    }

    pub fn request_timeout(&self) -> Duration {
        floored_seconds(self.request_timeout, 300)
    }
}

/// Connection settings for the alternate distributed-model store.
///
/// Only the address is resolved here; the store's protocol belongs to its
/// own collaborator.
#[derive(Debug, Clone, Default)]
pub struct ModelStoreOptions {
    /// Full connection URI; takes precedence over host/port when both are
    /// given.
    pub uri: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl ModelStoreOptions {
    /// Resolves the store URI: the full URI if present, else one assembled
    /// from host and port. Absence of both, or an unparsable value, is a
    /// fatal configuration error.
    pub fn server_uri(&self) -> Result<Url> {
        if let Some(raw) = &self.uri {
            return Url::parse(raw).map_err(|_| {
                Error::Configuration(format!("model store URI is not a valid URI: {raw}"))
            });
        }

        match (&self.host, self.port) {
            (Some(host), Some(port)) => {
                let assembled = format!("redis://{host}:{port}");
                Url::parse(&assembled).map_err(|_| {
                    Error::Configuration(format!(
                        "model store URI configured through host ({host}) and port ({port}) is not a valid URI"
                    ))
                })
            }
            _ => Err(Error::Configuration(
                "unable to determine host and port for the model store".to_string(),
            )),
        }
    }
}

fn floored_seconds(configured: Option<i64>, default_secs: i64) -> Duration {
    let seconds = configured.unwrap_or(default_secs).max(1);
    Duration::from_secs(seconds as u64)
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}
