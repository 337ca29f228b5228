//! config.rs
//! Typed key/value configuration store.
//!
//! The controller reads gains, ranges, setpoints, sensor-role assignments, hub address and
//! token, and the valve inversion flag through typed accessors with defaults. The binary can
//! seed the store from a flat JSON object, e.g.
//!
//! ```json
//! { "flow_pid.kp": 3.0, "valve.invert": true, "sensors.room": "zone:Lounge",
//!   "neohub.monitored_zones": ["Kitchen", "Hall"] }
//! ```

use std::{collections::BTreeMap, fs, path::Path};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::control::io::{SensorRoles, TemperatureSource};

pub mod keys {
    pub const FLOW_KP: &str = "flow_pid.kp";
    pub const FLOW_TI: &str = "flow_pid.integral_time_s";
    pub const FLOW_TD: &str = "flow_pid.derivative_time_s";
    pub const VALVE_KP: &str = "valve_pid.kp";
    pub const VALVE_TI: &str = "valve_pid.integral_time_s";
    pub const VALVE_TD: &str = "valve_pid.derivative_time_s";
    pub const FLOW_MIN: &str = "flow.min_temperature";
    pub const FLOW_MAX: &str = "flow.max_temperature";
    pub const ROOM_SETPOINT: &str = "room.setpoint";
    pub const VALVE_INVERT: &str = "valve.invert";
    pub const SENSOR_ROOM: &str = "sensors.room";
    pub const SENSOR_FLOW: &str = "sensors.flow";
    pub const SENSOR_INPUT: &str = "sensors.input";
    pub const SENSOR_RETURN: &str = "sensors.return";
    pub const HUB_URL: &str = "neohub.url";
    pub const HUB_TOKEN: &str = "neohub.token";
    pub const HUB_MONITORED: &str = "neohub.monitored_zones";
    pub const HUB_COMMAND_TIMEOUT_MS: &str = "neohub.command_timeout_ms";
    pub const HUB_CONNECT_TIMEOUT_MS: &str = "neohub.connect_timeout_ms";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    values: BTreeMap<String, ConfigValue>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let values: BTreeMap<String, ConfigValue> = serde_json::from_str(text)?;
        debug!("[Config] loaded {} keys", values.len());
        Ok(Self { values })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn set(&mut self, key: &str, value: ConfigValue) {
        self.values.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    pub fn f64_or(&self, key: &str, default: f64) -> f64 {
        match self.values.get(key) {
            Some(ConfigValue::Number(n)) => *n,
            Some(ConfigValue::Text(t)) => t.trim().parse().unwrap_or_else(|_| {
                warn!("[Config] '{}' is not numeric ('{}'), using {}", key, t, default);
                default
            }),
            Some(other) => {
                warn!("[Config] '{}' has wrong type {:?}, using {}", key, other, default);
                default
            }
            None => default,
        }
    }

    pub fn u64_or(&self, key: &str, default: u64) -> u64 {
        let v = self.f64_or(key, default as f64);
        if v.is_finite() && v >= 0.0 { v as u64 } else { default }
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        match self.values.get(key) {
            Some(ConfigValue::Bool(b)) => *b,
            Some(ConfigValue::Number(n)) => *n != 0.0,
            Some(ConfigValue::Text(t)) => matches!(t.trim(), "true" | "1" | "yes" | "on"),
            _ => default,
        }
    }

    pub fn str_or(&self, key: &str, default: &str) -> String {
        match self.values.get(key) {
            Some(ConfigValue::Text(t)) => t.clone(),
            _ => default.to_string(),
        }
    }

    /// Lists may also be given as a comma separated string.
    pub fn list_or(&self, key: &str, default: &[&str]) -> Vec<String> {
        match self.values.get(key) {
            Some(ConfigValue::List(items)) => items.clone(),
            Some(ConfigValue::Text(t)) => t
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => default.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn sensor_roles(&self) -> SensorRoles {
        SensorRoles {
            room: TemperatureSource::parse(&self.str_or(keys::SENSOR_ROOM, "sensor:room")),
            flow: TemperatureSource::parse(&self.str_or(keys::SENSOR_FLOW, "sensor:flow")),
            input: TemperatureSource::parse(&self.str_or(keys::SENSOR_INPUT, "sensor:input")),
            return_: TemperatureSource::parse(&self.str_or(keys::SENSOR_RETURN, "sensor:return")),
        }
    }
}
