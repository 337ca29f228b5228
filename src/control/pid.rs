//! pid.rs
//! PID control law with anti-windup, manual output override and jitter-tolerant timing.
//!
//! - Gains accepted in gain form (kp, ki, kd) or time form (kp, Ti, Td).
//! - `dt` is measured from the clock, never assumed: ticks may be late or skipped.
//! - Anti-windup constrains the integral *contribution* to the output range.
//! - `set_output` seeds the integral so the next ticks continue without a bump.

use std::sync::Arc;

use log::trace;

use crate::clock::Clock;

/// Canonical gain triple.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl PidGains {
    /// Time form: `ki = kp / Ti` (0 when `Ti == 0`, i.e. pure P/D), `kd = kp * Td`.
    pub fn from_times(kp: f64, integral_time_s: f64, derivative_time_s: f64) -> Self {
        let ki = if integral_time_s == 0.0 { 0.0 } else { kp / integral_time_s };
        Self { kp, ki, kd: kp * derivative_time_s }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerState {
    pub is_first_tick: bool,
    pub previous_tick_ms: u64,
    pub previous_error: f64,
    pub cumulative_error: f64,
    pub current_output: f64,
}

pub struct PidController {
    name: &'static str,
    gains: PidGains,
    min_output: f64,
    max_output: f64,
    input: Option<f64>,
    setpoint: f64,
    last_derivative: f64,
    state: ControllerState,
    clock: Arc<dyn Clock>,
}

impl PidController {
    /// New controller; output starts at `min_output`.
    pub fn new(name: &'static str, min_output: f64, max_output: f64, clock: Arc<dyn Clock>) -> Self {
        let mut pid = Self {
            name,
            gains: PidGains::default(),
            min_output,
            max_output,
            input: None,
            setpoint: 0.0,
            last_derivative: 0.0,
            state: ControllerState {
                is_first_tick: true,
                previous_tick_ms: 0,
                previous_error: 0.0,
                cumulative_error: 0.0,
                current_output: min_output,
            },
            clock,
        };
        pid.set_output(min_output);
        pid
    }

    pub fn configure_gains(&mut self, kp: f64, ki: f64, kd: f64) {
        self.apply_gains(PidGains { kp, ki, kd });
    }

    pub fn configure_time_based(&mut self, kp: f64, integral_time_s: f64, derivative_time_s: f64) {
        self.apply_gains(PidGains::from_times(kp, integral_time_s, derivative_time_s));
    }

    fn apply_gains(&mut self, gains: PidGains) {
        self.gains = gains;
        // Reset, keeping the output where it is.
        self.set_output(self.state.current_output);
    }

    pub fn set_output_range(&mut self, min_output: f64, max_output: f64) {
        self.min_output = min_output;
        self.max_output = max_output;
        self.set_output(self.state.current_output);
    }

    pub fn set_input(&mut self, value: Option<f64>) {
        self.input = value;
    }

    pub fn set_setpoint(&mut self, value: f64) {
        self.setpoint = value;
    }

    /// Force the output (manual override / bump-avoidance seed).
    pub fn set_output(&mut self, value: f64) {
        let value = clamp(value, self.min_output, self.max_output);
        self.state.current_output = value;
        self.state.cumulative_error = if self.gains.ki != 0.0 { value / self.gains.ki } else { 0.0 };
        self.state.previous_error = 0.0;
        self.state.is_first_tick = true;
        self.last_derivative = 0.0;
    }

    /// One control tick. Returns the (possibly unchanged) output.
    pub fn calculate_output(&mut self) -> f64 {
        let Some(input) = self.input else {
            trace!("[PID:{}] no reading, tick skipped", self.name);
            return self.state.current_output;
        };
        let now = self.clock.now_ms();
        let error = self.setpoint - input;

        if self.state.is_first_tick {
            self.state.is_first_tick = false;
            self.state.previous_tick_ms = now;
            self.state.previous_error = 0.0;
            return self.state.current_output;
        }

        if now <= self.state.previous_tick_ms {
            return self.state.current_output;
        }
        let dt = (now - self.state.previous_tick_ms) as f64 / 1000.0;

        self.state.cumulative_error += error * dt;
        if self.gains.ki != 0.0 {
            let a = self.min_output / self.gains.ki;
            let b = self.max_output / self.gains.ki;
            self.state.cumulative_error = clamp(self.state.cumulative_error, a.min(b), a.max(b));
        }

        let derivative = (error - self.state.previous_error) / dt;
        self.last_derivative = derivative;

        let raw = self.gains.kp * error
            + self.gains.ki * self.state.cumulative_error
            + self.gains.kd * derivative;
        self.state.current_output = clamp(raw, self.min_output, self.max_output);
        self.state.previous_tick_ms = now;
        self.state.previous_error = error;

        trace!(
            "[PID:{}] e={:.3} dt={:.3} P={:.3} I={:.3} D={:.3} out={:.3}",
            self.name,
            error,
            dt,
            self.proportional_term(),
            self.integral_term(),
            self.derivative_term(),
            self.state.current_output
        );
        self.state.current_output
    }

    #[inline]
    pub fn output(&self) -> f64 {
        self.state.current_output
    }

    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    pub fn output_range(&self) -> (f64, f64) {
        (self.min_output, self.max_output)
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn proportional_term(&self) -> f64 {
        self.gains.kp * self.state.previous_error
    }

    pub fn integral_term(&self) -> f64 {
        self.gains.ki * self.state.cumulative_error
    }

    pub fn derivative_term(&self) -> f64 {
        self.gains.kd * self.last_derivative
    }
}

// f64::clamp panics on inverted bounds; a misconfigured range must not take the loop down.
#[inline]
fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}
