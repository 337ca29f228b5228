//! Closed-loop runs of the cascade against the simulated plant, on a hand-driven clock.

use std::sync::Arc;

use manifold_control::{
    clock::{Clock, ManualClock},
    config::{ConfigStore, ConfigValue, keys},
    control::{
        io::{TemperatureSensors, reading_from_raw},
        valve_manager::{ValveManager, ValveManagerInputs},
    },
    sim::{PlantParams, SimulatedManifold},
};

const STEP_S: u64 = 10;

fn quiet_plant() -> SimulatedManifold {
    SimulatedManifold::new(PlantParams {
        noise: 0.0,
        dropout_probability: 0.0,
        time_scale: 0.0,
        ..PlantParams::default()
    })
}

fn read(sim: &mut SimulatedManifold) -> ValveManagerInputs {
    ValveManagerInputs {
        room: reading_from_raw(sim.read_temperature("room")),
        flow: reading_from_raw(sim.read_temperature("flow")),
        input: reading_from_raw(sim.read_temperature("input")),
        return_: reading_from_raw(sim.read_temperature("return")),
    }
}

fn step(valve: &mut ValveManager, sim: &mut SimulatedManifold, clock: &ManualClock) {
    clock.advance_ms(STEP_S * 1_000);
    sim.advance(STEP_S as f64);
    valve.set_inputs(read(sim));
    valve.calculate_valve_position();
    valve.send_outputs();
}

#[test]
fn cold_room_warms_toward_setpoint_within_limits() {
    let clock = Arc::new(ManualClock::new(0));
    let mut sim = quiet_plant();
    let mut valve = ValveManager::new(Box::new(sim.clone()), clock.clone() as Arc<dyn Clock>);
    valve.load_config(&ConfigStore::new());

    for _ in 0..3_000 {
        step(&mut valve, &mut sim, &clock);
        let out = valve.outputs();
        assert!((0.0..=100.0).contains(&out.target_valve_position));
        assert!((20.0..=55.0).contains(&out.target_flow_temperature));
    }

    let room = sim.state().room;
    assert!(room > 19.5 && room < 23.5, "room settled at {room:.2}");
}

#[test]
fn inverted_valve_drives_plant_with_complement() {
    let clock = Arc::new(ManualClock::new(0));
    let mut sim = quiet_plant();
    let mut cfg = ConfigStore::new();
    cfg.set(keys::VALVE_INVERT, ConfigValue::Bool(true));
    let mut valve = ValveManager::new(Box::new(sim.clone()), clock.clone() as Arc<dyn Clock>);
    valve.load_config(&cfg);

    step(&mut valve, &mut sim, &clock);
    step(&mut valve, &mut sim, &clock);
    let commanded = valve.valve_position();
    assert!((sim.state().valve_percent - (100.0 - commanded)).abs() < 1e-9);
}

#[test]
fn actuator_outage_skips_cycles_and_recovers() {
    let clock = Arc::new(ManualClock::new(0));
    let mut sim = quiet_plant();
    let mut valve = ValveManager::new(Box::new(sim.clone()), clock.clone() as Arc<dyn Clock>);
    valve.load_config(&ConfigStore::new());

    sim.set_actuator_online(false);
    step(&mut valve, &mut sim, &clock);
    assert_eq!(valve.send_outputs(), None);
    assert_eq!(sim.state().valve_percent, 0.0);

    sim.set_actuator_online(true);
    step(&mut valve, &mut sim, &clock);
    let written = valve.send_outputs().expect("actuator back online");
    assert_eq!(sim.state().valve_percent, written);
}

#[test]
fn manual_override_is_bumpless_on_resume() {
    let clock = Arc::new(ManualClock::new(0));
    let mut sim = quiet_plant();
    let mut valve = ValveManager::new(Box::new(sim.clone()), clock.clone() as Arc<dyn Clock>);
    valve.load_config(&ConfigStore::new());

    for _ in 0..5 {
        step(&mut valve, &mut sim, &clock);
    }
    valve.set_manual_valve_position(35.0);
    step(&mut valve, &mut sim, &clock);
    assert_eq!(sim.state().valve_percent, 35.0);

    valve.resume_automatic_valve_control();
    assert!(!valve.is_manual());
    assert_eq!(valve.valve_position(), valve.outputs().target_valve_position);
}
