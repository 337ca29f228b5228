//! # Hydronic manifold control
//!
//! Cascaded PID control of an underfloor-heating mixing valve, with room temperatures and
//! setpoints optionally sourced from a remote heating hub over a websocket.
//!
//! ## Layout
//! - `control`: PID, the room → flow → valve cascade, the control task and its driver.
//! - `concurrency`: starvation-aware mutex and the coalescing trigger queue.
//! - `neohub`: positional conversation protocol, websocket transport and the zone cache.
//! - `app`: the context object `main` builds and shares.
//! - `sim`: simulated plant implementing the sensor and actuator contracts.
//! - `config`, `clock`, `utils::metrics`: ambient plumbing.

pub mod app;
pub mod clock;
pub mod concurrency;
pub mod config;
pub mod control;
pub mod neohub;
pub mod sim;
pub mod utils;
