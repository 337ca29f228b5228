//! Controller telemetry.
//!
//! Bounded histories (1000 points per series) of the temperatures and valve output the
//! control task sees, plus counters for the conditions worth watching in a long run:
//! held room updates, sensor dropouts, actuator failures and hub conversation outcomes.

use std::{collections::VecDeque, sync::Arc};

use crate::concurrency::DiagMutex;
use crate::neohub::ConnectionStats;

#[derive(Default, Clone, Debug)]
pub struct ControlMetrics {
    /// Inputs (last 1000 control cycles)
    pub room_temperature: VecDeque<f64>,
    pub flow_temperature: VecDeque<f64>,

    /// Outputs (last 1000 control cycles)
    pub target_flow: VecDeque<f64>,
    pub valve_position: VecDeque<f64>,

    /// Time spent in one control cycle (microseconds)
    pub cycle_us: VecDeque<u64>,

    pub total_cycles: u64,
    /// Cycles where the room loop held its target for lack of a room reading.
    pub room_held: u64,
    pub sensor_dropouts: u64,
    pub actuator_failures: u64,
    pub coalesced_triggers: u64,

    /// Hub conversation outcomes, copied from the connection.
    pub hub_completed: u64,
    pub hub_failed: u64,
    pub hub_timed_out: u64,
    pub hub_unexpected_frames: u64,
    pub hub_reconnects: u64,
}

impl ControlMetrics {
    pub fn absorb_connection(&mut self, stats: &ConnectionStats) {
        self.hub_completed = stats.queue.completed;
        self.hub_failed = stats.queue.failed;
        self.hub_timed_out = stats.queue.timed_out;
        self.hub_unexpected_frames = stats.queue.unexpected_frames;
        self.hub_reconnects = stats.connects.saturating_sub(1);
    }
}

pub type SharedMetrics = Arc<DiagMutex<ControlMetrics>>;

pub fn shared_metrics() -> SharedMetrics {
    Arc::new(DiagMutex::new("metrics", ControlMetrics::default()))
}

pub const MAX_POINTS: usize = 1_000;

/// Appends value to metrics buffer; removes oldest if at capacity (FIFO).
#[inline]
pub fn push_capped(buf: &mut VecDeque<f64>, val: f64) {
    if buf.len() >= MAX_POINTS {
        buf.pop_front();
    }
    buf.push_back(val);
}

#[inline]
pub fn push_capped_u64(buf: &mut VecDeque<u64>, val: u64) {
    if buf.len() >= MAX_POINTS {
        buf.pop_front();
    }
    buf.push_back(val);
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: usize,
}

/// Computes min, max, mean for float buffer.
pub fn calculate_stats(data: &VecDeque<f64>) -> Option<Stats> {
    if data.is_empty() {
        return None;
    }

    let count = data.len();
    let min = data.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = data.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mean = data.iter().sum::<f64>() / count as f64;

    Some(Stats { min, max, mean, count })
}

pub fn calculate_stats_u64(data: &VecDeque<u64>) -> Option<Stats> {
    let as_f64: VecDeque<f64> = data.iter().map(|&x| x as f64).collect();
    calculate_stats(&as_f64)
}

/// One-line summary for the periodic log.
pub fn summary_line(m: &ControlMetrics) -> String {
    let fmt = |s: Option<Stats>| match s {
        Some(s) => format!("{:.1}/{:.1}/{:.1}", s.min, s.mean, s.max),
        None => "-".to_string(),
    };
    format!(
        "cycles={} room[min/avg/max]={} flow={} target={} valve={} cycle_us={} held={} dropouts={} \
         actuator_failures={} coalesced={} hub ok/fail/timeout/unexpected={}/{}/{}/{} reconnects={}",
        m.total_cycles,
        fmt(calculate_stats(&m.room_temperature)),
        fmt(calculate_stats(&m.flow_temperature)),
        fmt(calculate_stats(&m.target_flow)),
        fmt(calculate_stats(&m.valve_position)),
        fmt(calculate_stats_u64(&m.cycle_us)),
        m.room_held,
        m.sensor_dropouts,
        m.actuator_failures,
        m.coalesced_triggers,
        m.hub_completed,
        m.hub_failed,
        m.hub_timed_out,
        m.hub_unexpected_frames,
        m.hub_reconnects,
    )
}
