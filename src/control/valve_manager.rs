//! valve_manager.rs
//! Cascaded room → flow → valve control driving the mixing-valve actuator.
//!
//! Flow controller : room temperature  → target flow temperature (configured flow range)
//! Valve controller: flow temperature  → valve position (0–100 %)
//!
//! - Bump-avoidance: the first valid flow reading warm-starts a flow controller still on a rail.
//! - Missing room reading: last target flow temperature is held, not an error.
//! - Manual override replaces the output while both loops keep ticking underneath,
//!   so resuming automatic control is bumpless.
//! - Actuator failures are logged and the cycle skipped; init is retried on the next send.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::{
    clock::Clock,
    config::{ConfigStore, keys},
    control::{
        io::Actuator,
        pid::{PidController, PidGains},
    },
};

pub const VALVE_MIN: f64 = 0.0;
pub const VALVE_MAX: f64 = 100.0;

const DEFAULT_FLOW_MIN: f64 = 20.0;
const DEFAULT_FLOW_MAX: f64 = 55.0;
const DEFAULT_ROOM_SETPOINT: f64 = 21.0;

/// Raw readings for one cycle. `None` = no reading this cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ValveManagerInputs {
    pub room: Option<f64>,
    pub flow: Option<f64>,
    pub input: Option<f64>,
    pub return_: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ValveManagerOutputs {
    pub target_flow_temperature: f64,
    pub target_valve_position: f64,
}

/// Per-controller diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopStatus {
    pub setpoint: f64,
    pub output: f64,
    pub gains: PidGains,
    pub p_term: f64,
    pub i_term: f64,
    pub d_term: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValveStatus {
    pub inputs: ValveManagerInputs,
    pub outputs: ValveManagerOutputs,
    pub room_setpoint: f64,
    pub manual_position: Option<f64>,
    pub inverted: bool,
    pub actuator_ready: bool,
    pub flow_loop: LoopStatus,
    pub valve_loop: LoopStatus,
}

#[inline]
pub fn invert(position: f64) -> f64 {
    VALVE_MAX - position
}

pub struct ValveManager {
    flow_controller: PidController,
    valve_controller: PidController,
    inputs: ValveManagerInputs,
    outputs: ValveManagerOutputs,
    room_setpoint: f64,
    configured_room_setpoint: f64,
    invert_valve: bool,
    manual_position: Option<f64>,
    bump_checked: bool,
    actuator: Box<dyn Actuator>,
    actuator_ready: bool,
}

impl ValveManager {
    pub fn new(actuator: Box<dyn Actuator>, clock: Arc<dyn Clock>) -> Self {
        let flow_controller = PidController::new("flow", DEFAULT_FLOW_MIN, DEFAULT_FLOW_MAX, clock.clone());
        let valve_controller = PidController::new("valve", VALVE_MIN, VALVE_MAX, clock);
        Self {
            outputs: ValveManagerOutputs {
                target_flow_temperature: flow_controller.output(),
                target_valve_position: valve_controller.output(),
            },
            flow_controller,
            valve_controller,
            inputs: ValveManagerInputs::default(),
            room_setpoint: DEFAULT_ROOM_SETPOINT,
            configured_room_setpoint: DEFAULT_ROOM_SETPOINT,
            invert_valve: false,
            manual_position: None,
            bump_checked: false,
            actuator,
            actuator_ready: false,
        }
    }

    /// Apply gains, ranges, room setpoint and inversion from configuration.
    pub fn load_config(&mut self, cfg: &ConfigStore) {
        let flow_min = cfg.f64_or(keys::FLOW_MIN, DEFAULT_FLOW_MIN);
        let flow_max = cfg.f64_or(keys::FLOW_MAX, DEFAULT_FLOW_MAX);
        self.flow_controller.set_output_range(flow_min, flow_max);
        self.flow_controller.configure_time_based(
            cfg.f64_or(keys::FLOW_KP, 3.0),
            cfg.f64_or(keys::FLOW_TI, 600.0),
            cfg.f64_or(keys::FLOW_TD, 0.0),
        );

        self.valve_controller.set_output_range(VALVE_MIN, VALVE_MAX);
        self.valve_controller.configure_time_based(
            cfg.f64_or(keys::VALVE_KP, 4.0),
            cfg.f64_or(keys::VALVE_TI, 60.0),
            cfg.f64_or(keys::VALVE_TD, 0.0),
        );

        self.configured_room_setpoint = cfg.f64_or(keys::ROOM_SETPOINT, DEFAULT_ROOM_SETPOINT);
        self.room_setpoint = self.configured_room_setpoint;
        self.invert_valve = cfg.bool_or(keys::VALVE_INVERT, false);

        info!(
            "[ValveManager] config: flow {:?} range {:.1}..{:.1}, valve {:?}, room sp {:.1}, invert={}",
            self.flow_controller.gains(),
            flow_min,
            flow_max,
            self.valve_controller.gains(),
            self.room_setpoint,
            self.invert_valve
        );
    }

    pub fn set_inputs(&mut self, inputs: ValveManagerInputs) {
        self.inputs = inputs;
    }

    /// Setpoint for the next cycles; the configured value is kept for `restore_room_setpoint`.
    pub fn set_room_setpoint(&mut self, setpoint: f64) {
        self.room_setpoint = setpoint;
    }

    pub fn restore_room_setpoint(&mut self) {
        self.room_setpoint = self.configured_room_setpoint;
    }

    pub fn room_setpoint(&self) -> f64 {
        self.room_setpoint
    }

    pub fn configured_room_setpoint(&self) -> f64 {
        self.configured_room_setpoint
    }

    /// One cascade step. Runs even under manual override.
    pub fn calculate_valve_position(&mut self) -> ValveManagerOutputs {
        if !self.bump_checked {
            if let Some(flow) = self.inputs.flow {
                self.bump_checked = true;
                let (min, max) = self.flow_controller.output_range();
                let current = self.flow_controller.output();
                if current == min || current == max {
                    self.flow_controller.set_output(flow);
                    info!(
                        "[ValveManager] flow controller warm-started at {:.2} (was on rail {:.2})",
                        self.flow_controller.output(),
                        current
                    );
                }
            }
        }

        match self.inputs.room {
            Some(room) => {
                self.flow_controller.set_setpoint(self.room_setpoint);
                self.flow_controller.set_input(Some(room));
                self.flow_controller.calculate_output();
            }
            None => debug!(
                "[ValveManager] no room reading, holding target flow {:.2}",
                self.flow_controller.output()
            ),
        }
        let target_flow = self.flow_controller.output();

        self.valve_controller.set_setpoint(target_flow);
        self.valve_controller.set_input(self.inputs.flow);
        self.valve_controller.calculate_output();

        self.outputs = ValveManagerOutputs {
            target_flow_temperature: target_flow,
            target_valve_position: self.valve_controller.output(),
        };
        self.outputs
    }

    /// Position the actuator should be at (manual override wins).
    pub fn valve_position(&self) -> f64 {
        self.manual_position.unwrap_or(self.outputs.target_valve_position)
    }

    pub fn send_outputs(&mut self) -> Option<f64> {
        self.send_current_valve_position()
    }

    /// Write the current position (inverted if configured). Returns the value written.
    pub fn send_current_valve_position(&mut self) -> Option<f64> {
        let position = self.valve_position().clamp(VALVE_MIN, VALVE_MAX);
        let wire = if self.invert_valve { invert(position) } else { position };

        if !self.actuator_ready {
            match self.actuator.init() {
                Ok(()) => {
                    self.actuator_ready = true;
                    info!("[ValveManager] actuator initialised");
                }
                Err(e) => {
                    warn!("[ValveManager] {}; output {:.1}% skipped this cycle", e, wire);
                    return None;
                }
            }
        }

        match self.actuator.set_output_percent(wire) {
            Ok(()) => Some(wire),
            Err(e) => {
                warn!("[ValveManager] {}; will re-initialise on next send", e);
                self.actuator_ready = false;
                None
            }
        }
    }

    pub fn set_manual_valve_position(&mut self, position: f64) {
        let position = position.clamp(VALVE_MIN, VALVE_MAX);
        info!("[ValveManager] manual valve position {:.1}%", position);
        self.manual_position = Some(position);
    }

    pub fn resume_automatic_valve_control(&mut self) {
        if self.manual_position.take().is_some() {
            info!(
                "[ValveManager] automatic control resumed at {:.1}%",
                self.outputs.target_valve_position
            );
        }
    }

    pub fn is_manual(&self) -> bool {
        self.manual_position.is_some()
    }

    pub fn inputs(&self) -> ValveManagerInputs {
        self.inputs
    }

    pub fn outputs(&self) -> ValveManagerOutputs {
        self.outputs
    }

    pub fn flow_controller(&self) -> &PidController {
        &self.flow_controller
    }

    pub fn valve_controller(&self) -> &PidController {
        &self.valve_controller
    }

    pub fn status(&self) -> ValveStatus {
        ValveStatus {
            inputs: self.inputs,
            outputs: self.outputs,
            room_setpoint: self.room_setpoint,
            manual_position: self.manual_position,
            inverted: self.invert_valve,
            actuator_ready: self.actuator_ready,
            flow_loop: loop_status(&self.flow_controller),
            valve_loop: loop_status(&self.valve_controller),
        }
    }
}

fn loop_status(pid: &PidController) -> LoopStatus {
    LoopStatus {
        setpoint: pid.setpoint(),
        output: pid.output(),
        gains: pid.gains(),
        p_term: pid.proportional_term(),
        i_term: pid.integral_term(),
        d_term: pid.derivative_term(),
    }
}
