//! task.rs
//! Control task and its periodic driver.
//!
//! The driver issues a `Tick` every period into a coalescing trigger queue; the control thread
//! (raised OS priority) consumes the latest tick, reads each input role from its source, runs
//! one cascade step and writes the valve. A slow cycle therefore skips ticks instead of
//! building a backlog.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};
use thread_priority::{ThreadBuilderExt, ThreadPriority};

use crate::{
    clock::Clock,
    concurrency::{DiagMutex, TriggerQueue},
    control::{
        io::{Role, SensorRoles, TemperatureSensors, TemperatureSource, reading_from_raw},
        valve_manager::{ValveManager, ValveManagerInputs, ValveManagerOutputs},
    },
    neohub::NeohubManager,
    utils::metrics::{SharedMetrics, push_capped, push_capped_u64},
};

pub const CONTROL_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub seq: u64,
    pub issued_at: Instant,
}

/// Remote zone data as seen by the control loop.
pub trait ZoneSource: Send + Sync {
    fn zone_temperature(&self, name: &str, now: DateTime<Utc>) -> Option<f64>;
    fn zone_setpoint(&self, name: &str, now: DateTime<Utc>) -> Option<f64>;
}

impl ZoneSource for NeohubManager {
    fn zone_temperature(&self, name: &str, now: DateTime<Utc>) -> Option<f64> {
        NeohubManager::zone_temperature(self, name, now)
    }

    fn zone_setpoint(&self, name: &str, now: DateTime<Utc>) -> Option<f64> {
        NeohubManager::zone_setpoint(self, name, now)
    }
}

pub type SharedSensors = Arc<DiagMutex<Box<dyn TemperatureSensors>>>;
pub type SharedValveManager = Arc<DiagMutex<ValveManager>>;

pub struct ControlTask {
    pub valve: SharedValveManager,
    pub sensors: SharedSensors,
    pub zones: Option<Arc<dyn ZoneSource>>,
    pub roles: SensorRoles,
    pub clock: Arc<dyn Clock>,
    pub metrics: SharedMetrics,
    pub triggers: Arc<TriggerQueue<Tick>>,
}

impl ControlTask {
    fn read_role(&self, role: Role, now: DateTime<Utc>) -> Option<f64> {
        match self.roles.source(role) {
            TemperatureSource::Sensor(id) => {
                let raw = self.sensors.lock("control.read_sensor").read_temperature(id);
                let reading = reading_from_raw(raw);
                if reading.is_none() {
                    self.metrics.lock("control.dropout").sensor_dropouts += 1;
                    debug!("[ControlTask] no reading from sensor '{}' ({})", id, role.name());
                }
                reading
            }
            TemperatureSource::Zone(name) => self.zones.as_ref()?.zone_temperature(name, now),
            TemperatureSource::Unassigned => None,
        }
    }

    pub fn read_inputs(&self) -> ValveManagerInputs {
        let now = self.clock.utc_now();
        ValveManagerInputs {
            room: self.read_role(Role::Room, now),
            flow: self.read_role(Role::Flow, now),
            input: self.read_role(Role::Input, now),
            return_: self.read_role(Role::Return, now),
        }
    }

    /// A zone-backed room role with a known setpoint overrides the configured one.
    fn zone_room_setpoint(&self) -> Option<f64> {
        let name = self.roles.room.zone_name()?;
        self.zones.as_ref()?.zone_setpoint(name, self.clock.utc_now())
    }

    /// One full control cycle.
    pub fn run_cycle(&self) -> ValveManagerOutputs {
        let started = Instant::now();
        let inputs = self.read_inputs();
        let setpoint = self.zone_room_setpoint();

        let (outputs, written, position) = {
            let mut valve = self.valve.lock("control.cycle");
            match setpoint {
                Some(sp) => valve.set_room_setpoint(sp),
                None => valve.restore_room_setpoint(),
            }
            valve.set_inputs(inputs);
            let outputs = valve.calculate_valve_position();
            let written = valve.send_outputs();
            (outputs, written, valve.valve_position())
        };

        let mut m = self.metrics.lock("control.metrics");
        m.total_cycles += 1;
        m.coalesced_triggers = self.triggers.coalesced_count();
        match inputs.room {
            Some(room) => push_capped(&mut m.room_temperature, room),
            None => m.room_held += 1,
        }
        if let Some(flow) = inputs.flow {
            push_capped(&mut m.flow_temperature, flow);
        }
        push_capped(&mut m.target_flow, outputs.target_flow_temperature);
        push_capped(&mut m.valve_position, position);
        if written.is_none() {
            m.actuator_failures += 1;
        }
        push_capped_u64(&mut m.cycle_us, started.elapsed().as_micros() as u64);
        outputs
    }

    /// Control thread at max OS priority. Exits once the trigger queue is closed.
    pub fn spawn(self) -> JoinHandle<()> {
        thread::Builder::new()
            .name("control".to_string())
            .spawn_with_priority(ThreadPriority::Max, move |priority| {
                if let Err(e) = priority {
                    warn!("[ControlTask] running at default priority: {:?}", e);
                }
                info!("[ControlTask] started");
                while let Some(tick) = self.triggers.wait() {
                    let lag = tick.issued_at.elapsed();
                    if lag > CONTROL_PERIOD {
                        debug!("[ControlTask] tick {} served {} ms late", tick.seq, lag.as_millis());
                    }
                    self.run_cycle();
                }
                info!("[ControlTask] stopped");
            })
            .expect("Failed to spawn control thread")
    }
}

/// Periodic release of control ticks until `running` clears. Blocks the caller.
pub fn run_periodic_driver(triggers: &TriggerQueue<Tick>, running: &AtomicBool, period: Duration) {
    let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
    let mut next_release = Instant::now();
    let mut seq: u64 = 1;

    while running.load(Ordering::Acquire) {
        let now = Instant::now();
        if now < next_release {
            sleeper.sleep(next_release - now);
        } else if now - next_release > period {
            // Fell more than a period behind (suspend, debugger); realign instead of bursting.
            next_release = now;
        }

        if triggers.trigger(Tick { seq, issued_at: Instant::now() }) {
            debug!("[Driver] tick {} replaced an unconsumed tick", seq);
        }
        next_release += period;
        seq += 1;
    }
    triggers.close();
}
