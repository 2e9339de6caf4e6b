//! Command-line configuration for the server binary.

use crate::storage::{ExpiryConfig, DEFAULT_SWEEP_INTERVAL_MS};
use crate::{DEFAULT_HOST, DEFAULT_PORT};
use clap::Parser;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone, Parser)]
#[command(
    name = "respkv",
    version,
    about = "An in-memory key-value server speaking a subset of the Redis protocol",
    after_help = "Connect with any Redis client, e.g. `redis-cli -p 6379 SET name Ariz PX 5000`"
)]
pub struct Config {
    /// Host to bind to
    #[arg(short = 'H', long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Milliseconds between background sweeps for expired keys
    #[arg(
        long,
        default_value_t = DEFAULT_SWEEP_INTERVAL_MS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub sweep_interval_ms: u64,

    /// Do not run the background sweep; expired keys are then only removed when read
    #[arg(long)]
    pub no_sweeper: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            no_sweeper: false,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the sweeper configuration, or `None` when sweeping is disabled.
    pub fn expiry_config(&self) -> Option<ExpiryConfig> {
        (!self.no_sweeper).then(|| ExpiryConfig {
            interval: Duration::from_millis(self.sweep_interval_ms),
        })
    }
}
