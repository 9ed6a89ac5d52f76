use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use fractal_engine::{BusyPolicy, ComputeInvoker, GenerationService, DEFAULT_TIMEOUT};
use thiserror::Error;

pub const DEFAULT_ADDRESS: ([u8; 4], u16) = ([127, 0, 0, 1], 3005);
pub const DEFAULT_BINARY: &str = "./morphosis";

/// Server configuration, read from `FRACTAL_*` environment variables
/// with defaults matching the original deployment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: SocketAddr,
    pub binary: PathBuf,
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub busy_policy: BusyPolicy,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(DEFAULT_ADDRESS),
            binary: PathBuf::from(DEFAULT_BINARY),
            workdir: PathBuf::from("."),
            timeout: DEFAULT_TIMEOUT,
            busy_policy: BusyPolicy::DegradedFallback,
        }
    }
}

impl ServerConfig {
    /// Reads `FRACTAL_ADDR`, `FRACTAL_BINARY`, `FRACTAL_WORKDIR`,
    /// `FRACTAL_TIMEOUT_SECS` and `FRACTAL_BUSY_POLICY`
    /// (`fallback` | `reject`), falling back to defaults for unset
    /// variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("FRACTAL_ADDR") {
            config.address = value.parse().map_err(|_| ConfigError::Invalid {
                key: "FRACTAL_ADDR",
                value,
            })?;
        }
        if let Ok(value) = std::env::var("FRACTAL_BINARY") {
            config.binary = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("FRACTAL_WORKDIR") {
            config.workdir = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("FRACTAL_TIMEOUT_SECS") {
            let secs: u64 = value.parse().map_err(|_| ConfigError::Invalid {
                key: "FRACTAL_TIMEOUT_SECS",
                value,
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        if let Ok(value) = std::env::var("FRACTAL_BUSY_POLICY") {
            config.busy_policy = match value.as_str() {
                "fallback" => BusyPolicy::DegradedFallback,
                "reject" => BusyPolicy::Reject,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "FRACTAL_BUSY_POLICY",
                        value,
                    })
                }
            };
        }

        Ok(config)
    }

    pub fn service(&self) -> GenerationService {
        let invoker =
            ComputeInvoker::new(&self.binary, &self.workdir).with_timeout(self.timeout);
        GenerationService::new(invoker, self.busy_policy)
    }
}
