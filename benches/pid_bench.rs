use criterion::{criterion_group, criterion_main, Criterion};
use std::{hint::black_box, sync::Arc};

use manifold_control::{
    clock::{Clock, ManualClock},
    control::{
        io::{Actuator, ActuatorError},
        pid::PidController,
        valve_manager::{ValveManager, ValveManagerInputs},
    },
};

struct NullActuator;

impl Actuator for NullActuator {
    fn init(&mut self) -> Result<(), ActuatorError> {
        Ok(())
    }
    fn set_output_percent(&mut self, percent: f64) -> Result<(), ActuatorError> {
        black_box(percent);
        Ok(())
    }
}

fn pid_tick_bench(c: &mut Criterion) {
    let clock = Arc::new(ManualClock::new(0));
    let mut pid = PidController::new("bench", 0.0, 100.0, clock.clone() as Arc<dyn Clock>);
    pid.configure_time_based(2.0, 10.0, 1.0);
    pid.set_setpoint(20.0);

    c.bench_function("pid_calculate_output", |b| {
        b.iter(|| {
            clock.advance_ms(1_000);
            pid.set_input(black_box(Some(18.5)));
            black_box(pid.calculate_output());
        })
    });
}

fn cascade_cycle_bench(c: &mut Criterion) {
    let clock = Arc::new(ManualClock::new(0));
    let mut valve = ValveManager::new(Box::new(NullActuator), clock.clone() as Arc<dyn Clock>);
    let inputs = ValveManagerInputs {
        room: Some(19.0),
        flow: Some(31.0),
        input: Some(60.0),
        return_: Some(27.0),
    };

    // Calculate and send, as the control task does once per tick
    c.bench_function("cascade_calculate_and_send", |b| {
        b.iter(|| {
            clock.advance_ms(1_000);
            valve.set_inputs(black_box(inputs));
            black_box(valve.calculate_valve_position());
            black_box(valve.send_outputs());
        })
    });
}

criterion_group!(benches, pid_tick_bench, cascade_cycle_bench);
criterion_main!(benches);
