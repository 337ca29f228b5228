//! io.rs
//! Logical contracts of the hardware collaborators (temperature sensors, valve actuator)
//! and the mapping of control roles onto local sensors or remote zones.

use std::fmt;

use thiserror::Error;

/// Raw readings at or below this value mean "no reading" on the legacy sensor contract.
pub const NO_READING_THRESHOLD: f32 = -50.0;

/// Compatibility boundary: legacy sentinel in, explicit absence out.
#[inline]
pub fn reading_from_raw(raw: f32) -> Option<f64> {
    if raw.is_nan() || raw <= NO_READING_THRESHOLD {
        None
    } else {
        Some(raw as f64)
    }
}

/// Temperature sensor bus (OneWire in production). Values ≤ −50 mean unavailable.
pub trait TemperatureSensors: Send {
    fn read_temperature(&mut self, sensor_id: &str) -> f32;
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActuatorError {
    #[error("actuator not initialised")]
    NotInitialised,
    #[error("actuator init failed: {0}")]
    Init(String),
    #[error("actuator write failed: {0}")]
    Write(String),
}

/// Valve drive (DAC over I2C in production). Accepts 0..=100 percent.
pub trait Actuator: Send {
    fn init(&mut self) -> Result<(), ActuatorError>;
    fn set_output_percent(&mut self, percent: f64) -> Result<(), ActuatorError>;
}

/// Where a control input comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TemperatureSource {
    Sensor(String),
    Zone(String),
    #[default]
    Unassigned,
}

impl TemperatureSource {
    /// `sensor:<id>`, `zone:<name>` or empty.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if let Some(id) = text.strip_prefix("sensor:") {
            TemperatureSource::Sensor(id.trim().to_string())
        } else if let Some(name) = text.strip_prefix("zone:") {
            TemperatureSource::Zone(name.trim().to_string())
        } else if text.is_empty() {
            TemperatureSource::Unassigned
        } else {
            TemperatureSource::Sensor(text.to_string())
        }
    }

    pub fn zone_name(&self) -> Option<&str> {
        match self {
            TemperatureSource::Zone(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for TemperatureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemperatureSource::Sensor(id) => write!(f, "sensor:{}", id),
            TemperatureSource::Zone(name) => write!(f, "zone:{}", name),
            TemperatureSource::Unassigned => write!(f, "unassigned"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Room,
    Flow,
    Input,
    Return,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Room, Role::Flow, Role::Input, Role::Return];

    pub fn name(&self) -> &'static str {
        match self {
            Role::Room => "room",
            Role::Flow => "flow",
            Role::Input => "input",
            Role::Return => "return",
        }
    }
}

/// Sensor-role assignment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorRoles {
    pub room: TemperatureSource,
    pub flow: TemperatureSource,
    pub input: TemperatureSource,
    pub return_: TemperatureSource,
}

impl SensorRoles {
    pub fn source(&self, role: Role) -> &TemperatureSource {
        match role {
            Role::Room => &self.room,
            Role::Flow => &self.flow,
            Role::Input => &self.input,
            Role::Return => &self.return_,
        }
    }

    /// Zones that feed control directly; these are polled as "active".
    pub fn referenced_zones(&self) -> Vec<String> {
        let mut zones: Vec<String> = Role::ALL
            .iter()
            .filter_map(|r| self.source(*r).zone_name().map(str::to_string))
            .collect();
        zones.sort();
        zones.dedup();
        zones
    }
}
