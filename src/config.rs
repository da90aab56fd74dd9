use std::{collections::HashSet, fs, path::Path};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::daemon::PullMode;
use crate::error::GpioError;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    pub unix_socket: Option<String>,
    pub host: Option<String>,
    pub path: String,
    pub timeout: u64,
}

/// Behaviour switches for interrupt subscriptions on one connection.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(default)]
pub struct InterruptOptions {
    /// Float the pin again once its subscription is cancelled.
    pub reset_bias_on_unsubscribe: bool,
    /// Report `NotSubscribed` instead of succeeding when cancelling twice.
    pub strict_unsubscribe: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PinConfig {
    pub name: String,
    pub chip: String,
    pub line: u32,
    #[serde(default)]
    pub pull: Option<PullMode>,
    #[serde(default)]
    pub subscribe: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub pins: FxHashMap<u32, PinConfig>, // keyed by broadcom pin number
    pub broadcast_capacity: usize,
    pub event_history_capacity: usize,
    #[serde(default)]
    pub interrupts: InterruptOptions,
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, GpioError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| GpioError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| GpioError::Config(format!("Invalid config json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GpioError> {
        if self.broadcast_capacity == 0 {
            return Err(GpioError::Config(
                "broadcast_capacity must be greater than zero".into(),
            ));
        }
        if self.event_history_capacity == 0 {
            return Err(GpioError::Config(
                "event_history_capacity must be greater than zero".into(),
            ));
        }

        let mut names = HashSet::new();
        for (pin, cfg) in &self.pins {
            if cfg.name.trim().is_empty() {
                return Err(GpioError::Config(format!("pin {pin} is missing a name")));
            }
            if !names.insert(cfg.name.as_str()) {
                return Err(GpioError::Config(format!(
                    "pin name {} is used more than once",
                    cfg.name
                )));
            }
        }
        Ok(())
    }
}
