//! manifold.rs
//! Simulated mixing manifold: a first-order thermal plant behind the sensor and actuator
//! interfaces, so the controller runs without hardware.
//!
//! - Flow temperature relaxes toward the mix of supply and return set by the valve.
//! - The room gains heat from the floor loop and loses it to outdoors.
//! - Readings carry small noise; a configurable share of reads drop out (report -127).

use std::{sync::Arc, time::Instant};

use log::debug;
use parking_lot::Mutex;
use rand::random_range;

use crate::control::io::{Actuator, ActuatorError, TemperatureSensors};

/// What a disconnected 1-wire probe reports.
pub const DROPOUT_READING: f32 = -127.0;

#[derive(Debug, Clone, PartialEq)]
pub struct PlantParams {
    pub supply_temperature: f64,
    pub outdoor_temperature: f64,
    /// Seconds for the flow temperature to settle after a valve move.
    pub flow_time_constant_s: f64,
    /// Room heating rate per kelvin of floor-room difference (1/s).
    pub room_gain: f64,
    /// Room loss rate per kelvin of room-outdoor difference (1/s).
    pub room_loss: f64,
    /// Simulated seconds per wall-clock second.
    pub time_scale: f64,
    pub noise: f64,
    pub dropout_probability: f64,
}

impl Default for PlantParams {
    fn default() -> Self {
        Self {
            supply_temperature: 60.0,
            outdoor_temperature: 5.0,
            flow_time_constant_s: 30.0,
            room_gain: 1.0 / 2_400.0,
            room_loss: 1.0 / 4_800.0,
            time_scale: 60.0,
            noise: 0.05,
            dropout_probability: 0.01,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlantState {
    pub room: f64,
    pub flow: f64,
    pub return_: f64,
    pub valve_percent: f64,
}

struct Plant {
    params: PlantParams,
    state: PlantState,
    last_step: Instant,
    actuator_online: bool,
    actuator_ready: bool,
}

impl Plant {
    fn step(&mut self, dt_s: f64) {
        let p = &self.params;
        let s = &mut self.state;
        let mix = s.return_ + (s.valve_percent / 100.0) * (p.supply_temperature - s.return_);
        let alpha = (dt_s / p.flow_time_constant_s).min(1.0);
        s.flow += (mix - s.flow) * alpha;
        s.room += (p.room_gain * (s.flow - s.room) - p.room_loss * (s.room - p.outdoor_temperature)) * dt_s;
        s.return_ = s.room + (s.flow - s.room) * 0.6;
    }

    fn catch_up(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_step).as_secs_f64() * self.params.time_scale;
        self.last_step = now;
        if dt > 0.0 {
            self.step(dt);
        }
    }
}

/// Cheap to clone; clones share one plant.
#[derive(Clone)]
pub struct SimulatedManifold {
    plant: Arc<Mutex<Plant>>,
}

impl SimulatedManifold {
    pub fn new(params: PlantParams) -> Self {
        let state = PlantState {
            room: 17.0,
            flow: 20.0,
            return_: 19.0,
            valve_percent: 0.0,
        };
        Self {
            plant: Arc::new(Mutex::new(Plant {
                params,
                state,
                last_step: Instant::now(),
                actuator_online: true,
                actuator_ready: false,
            })),
        }
    }

    /// Advance simulated time explicitly (seconds of plant time).
    pub fn advance(&self, plant_seconds: f64) {
        let mut plant = self.plant.lock();
        plant.last_step = Instant::now();
        plant.step(plant_seconds);
    }

    pub fn state(&self) -> PlantState {
        self.plant.lock().state.clone()
    }

    /// Fault injection: an offline actuator fails `init` and every write.
    pub fn set_actuator_online(&self, online: bool) {
        let mut plant = self.plant.lock();
        plant.actuator_online = online;
        if !online {
            plant.actuator_ready = false;
        }
    }

    pub fn set_dropout_probability(&self, p: f64) {
        self.plant.lock().params.dropout_probability = p.clamp(0.0, 1.0);
    }
}

impl TemperatureSensors for SimulatedManifold {
    fn read_temperature(&mut self, sensor_id: &str) -> f32 {
        let mut plant = self.plant.lock();
        plant.catch_up();
        let p = &plant.params;
        if p.dropout_probability > 0.0 && random_range(0.0..1.0) < p.dropout_probability {
            debug!("[SimulatedManifold] dropout on '{}'", sensor_id);
            return DROPOUT_READING;
        }
        let noise = if p.noise > 0.0 { random_range(-p.noise..p.noise) } else { 0.0 };
        let value = match sensor_id {
            "room" => plant.state.room,
            "flow" => plant.state.flow,
            "input" => p.supply_temperature,
            "return" => plant.state.return_,
            _ => return DROPOUT_READING,
        };
        (value + noise) as f32
    }
}

impl Actuator for SimulatedManifold {
    fn init(&mut self) -> Result<(), ActuatorError> {
        let mut plant = self.plant.lock();
        if !plant.actuator_online {
            return Err(ActuatorError::Init("valve driver not responding".into()));
        }
        plant.actuator_ready = true;
        Ok(())
    }

    fn set_output_percent(&mut self, percent: f64) -> Result<(), ActuatorError> {
        let mut plant = self.plant.lock();
        if !plant.actuator_online {
            return Err(ActuatorError::Write("valve driver not responding".into()));
        }
        if !plant.actuator_ready {
            return Err(ActuatorError::NotInitialised);
        }
        plant.catch_up();
        plant.state.valve_percent = percent.clamp(0.0, 100.0);
        Ok(())
    }
}
