//! Store configuration from the environment

use std::fmt;
use std::str::FromStr;

use telestore_core::{Result, StoreError};
use telestore_influx::InfluxConfig;
use telestore_postgres::{Dialect, PoolConfig};

/// Which storage engine backs the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Backend {
    #[default]
    Postgres,
    Timescale,
    Influx,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Postgres => "postgres",
            Backend::Timescale => "timescale",
            Backend::Influx => "influx",
        }
    }

    /// SQL dialect for the row-store backends
    pub fn dialect(&self) -> Option<Dialect> {
        match self {
            Backend::Postgres => Some(Dialect::Postgres),
            Backend::Timescale => Some(Dialect::Timescale),
            Backend::Influx => None,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Backend::Postgres),
            "timescale" | "timescaledb" => Ok(Backend::Timescale),
            "influx" | "influxdb" => Ok(Backend::Influx),
            other => Err(StoreError::Config(format!("unknown backend {:?}", other))),
        }
    }
}

/// Store configuration
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    pub backend: Backend,
    pub postgres: PoolConfig,
    pub influx: InfluxConfig,
}

impl StoreConfig {
    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        let backend = match std::env::var("TELESTORE_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => Backend::default(),
        };

        if let Ok(size) = std::env::var("TELESTORE_POSTGRES_POOL_SIZE") {
            size.parse::<usize>().map_err(|e| {
                StoreError::Config(format!("TELESTORE_POSTGRES_POOL_SIZE {:?}: {}", size, e))
            })?;
        }
        if let Ok(secs) = std::env::var("TELESTORE_INFLUX_TIMEOUT_SECS") {
            secs.parse::<u64>().map_err(|e| {
                StoreError::Config(format!("TELESTORE_INFLUX_TIMEOUT_SECS {:?}: {}", secs, e))
            })?;
        }

        Ok(Self {
            backend,
            postgres: PoolConfig::from_env(),
            influx: InfluxConfig::from_env(),
        })
    }
}
