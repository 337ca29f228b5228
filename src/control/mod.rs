pub mod io;
pub mod pid;
pub mod task;
pub mod valve_manager;

pub use io::{Actuator, ActuatorError, Role, SensorRoles, TemperatureSensors, TemperatureSource, reading_from_raw};
pub use pid::{PidController, PidGains};
pub use task::{ControlTask, Tick, ZoneSource};
pub use valve_manager::{ValveManager, ValveManagerInputs, ValveManagerOutputs, invert};
