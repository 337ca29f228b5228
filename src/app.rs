//! app.rs
//! Controller context: everything the threads share, built once in `main`.
//!
//! `start` spawns the control thread and (when a hub is configured) the zone poll loop.
//! `run_driver` blocks the caller as the periodic tick source. `shutdown` stops and joins
//! everything; it is safe to call more than once.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
    time::Duration,
};

use log::{info, warn};
use parking_lot::Mutex;

use crate::{
    clock::Clock,
    concurrency::{DiagMutex, TriggerQueue},
    config::ConfigStore,
    control::{
        io::{Actuator, SensorRoles, TemperatureSensors},
        task::{ControlTask, SharedSensors, SharedValveManager, Tick, ZoneSource, run_periodic_driver},
        valve_manager::{ValveManager, ValveStatus},
    },
    neohub::{NeohubManager, NeohubSettings, transport::Connector},
    utils::metrics::{ControlMetrics, SharedMetrics, shared_metrics},
};

pub struct ControllerContext {
    pub config: ConfigStore,
    pub clock: Arc<dyn Clock>,
    pub roles: SensorRoles,
    pub metrics: SharedMetrics,
    pub valve: SharedValveManager,
    pub sensors: SharedSensors,
    pub hub: Option<Arc<NeohubManager>>,
    triggers: Arc<TriggerQueue<Tick>>,
    running: Arc<AtomicBool>,
    started: AtomicBool,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ControllerContext {
    /// `connector` is ignored when no hub url is configured.
    pub fn new(
        config: ConfigStore,
        clock: Arc<dyn Clock>,
        sensors: Box<dyn TemperatureSensors>,
        actuator: Box<dyn Actuator>,
        connector: Option<Arc<dyn Connector>>,
    ) -> Self {
        let mut valve = ValveManager::new(actuator, Arc::clone(&clock));
        valve.load_config(&config);
        let roles = config.sensor_roles();
        info!(
            "[Context] roles: room={} flow={} input={} return={}",
            roles.room, roles.flow, roles.input, roles.return_
        );

        let settings = NeohubSettings::from_config(&config);
        let hub = match connector {
            Some(connector) if !settings.url.is_empty() => {
                let manager = NeohubManager::new(settings, connector, Arc::clone(&clock));
                manager.set_active_zones(roles.referenced_zones());
                Some(Arc::new(manager))
            }
            Some(_) => {
                warn!("[Context] no hub url configured; zone-backed roles will read nothing");
                None
            }
            None => None,
        };

        Self {
            config,
            clock,
            roles,
            metrics: shared_metrics(),
            valve: Arc::new(DiagMutex::new("valve_manager", valve)),
            sensors: Arc::new(DiagMutex::new("sensors", sensors)),
            hub,
            triggers: Arc::new(TriggerQueue::new()),
            running: Arc::new(AtomicBool::new(true)),
            started: AtomicBool::new(false),
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let zones = self.hub.clone().map(|hub| hub as Arc<dyn ZoneSource>);
        let task = ControlTask {
            valve: Arc::clone(&self.valve),
            sensors: Arc::clone(&self.sensors),
            zones,
            roles: self.roles.clone(),
            clock: Arc::clone(&self.clock),
            metrics: Arc::clone(&self.metrics),
            triggers: Arc::clone(&self.triggers),
        };
        let mut threads = self.threads.lock();
        threads.push(task.spawn());
        if let Some(hub) = &self.hub {
            threads.push(hub.spawn_poll_loop(Arc::clone(&self.running)));
        }
        info!("[Context] started {} threads", threads.len());
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Tick source for the control thread; returns after `stop`.
    pub fn run_driver(&self, period: Duration) {
        run_periodic_driver(&self.triggers, &self.running, period);
    }

    /// Issue one tick outside the periodic driver.
    pub fn trigger_now(&self, seq: u64) -> bool {
        self.triggers.trigger(Tick { seq, issued_at: std::time::Instant::now() })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.triggers.close();
    }

    pub fn shutdown(&self) {
        self.stop();
        let handles: Vec<_> = self.threads.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                warn!("[Context] a worker thread panicked");
            }
        }
        if let Some(hub) = &self.hub {
            hub.shutdown();
        }
        self.refresh_metrics();
        info!("[Context] shut down");
    }

    /// Copy hub conversation counters into the metrics.
    pub fn refresh_metrics(&self) {
        if let Some(hub) = &self.hub {
            let stats = hub.connection_stats();
            self.metrics.lock("context.refresh_metrics").absorb_connection(&stats);
        }
    }

    pub fn metrics_snapshot(&self) -> ControlMetrics {
        self.refresh_metrics();
        self.metrics.lock("context.metrics_snapshot").clone()
    }

    pub fn valve_status(&self) -> ValveStatus {
        self.valve.lock("context.valve_status").status()
    }
}

impl Drop for ControllerContext {
    fn drop(&mut self) {
        if self.started.load(Ordering::SeqCst) {
            self.shutdown();
        }
    }
}
