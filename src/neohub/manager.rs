//! manager.rs
//! Keeps the zone cache fed from the hub.
//!
//! Owns the connection and the zone table. The poll loop checks the connection every 30 s,
//! reloads zone names after each new connection and polls the active and monitored zones
//! every 5 s in batches.

use std::{
    collections::BTreeSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde_json::{Value, json};

use crate::{
    clock::Clock,
    concurrency::DiagMutex,
    config::{ConfigStore, keys},
    neohub::{
        connection::{ConnectionStats, DEFAULT_COMMAND_TIMEOUT, NeohubConnection},
        error::ConversationError,
        transport::Connector,
        zone::{ZoneRecord, ZoneTable},
    },
};

pub const DEFAULT_BATCH_SIZE: usize = 6;
pub const CONNECTION_CHECK_INTERVAL: Duration = Duration::from_secs(30);
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
const LOOP_TICK: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq)]
pub struct NeohubSettings {
    pub url: String,
    pub token: String,
    pub command_timeout: Duration,
    pub connect_timeout_ms: u64,
    pub monitored_zones: Vec<String>,
}

impl NeohubSettings {
    pub fn from_config(cfg: &ConfigStore) -> Self {
        Self {
            url: cfg.str_or(keys::HUB_URL, ""),
            token: cfg.str_or(keys::HUB_TOKEN, ""),
            command_timeout: Duration::from_millis(
                cfg.u64_or(keys::HUB_COMMAND_TIMEOUT_MS, DEFAULT_COMMAND_TIMEOUT.as_millis() as u64),
            ),
            connect_timeout_ms: cfg.u64_or(keys::HUB_CONNECT_TIMEOUT_MS, 5_000),
            monitored_zones: cfg.list_or(keys::HUB_MONITORED, &[]),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub batches: usize,
    pub updated: usize,
    pub failed: usize,
}

#[derive(Default)]
struct ZoneSets {
    active: BTreeSet<String>,
    monitored: BTreeSet<String>,
}

pub struct NeohubManager {
    settings: NeohubSettings,
    connection: NeohubConnection,
    zones: DiagMutex<ZoneTable>,
    sets: DiagMutex<ZoneSets>,
    clock: Arc<dyn Clock>,
    names_stale: AtomicBool,
    reconnect_now: Arc<AtomicBool>,
}

impl NeohubManager {
    pub fn new(settings: NeohubSettings, connector: Arc<dyn Connector>, clock: Arc<dyn Clock>) -> Self {
        let connection = NeohubConnection::new(connector);
        let reconnect_now = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&reconnect_now);
        connection.set_disconnect_handler(Arc::new(move |reason| {
            info!("[NeohubManager] hub disconnected ({}), reconnect scheduled", reason);
            flag.store(true, Ordering::SeqCst);
        }));

        let sets = ZoneSets {
            active: BTreeSet::new(),
            monitored: settings.monitored_zones.iter().cloned().collect(),
        };
        Self {
            settings,
            connection,
            zones: DiagMutex::new("zone_table", ZoneTable::new()),
            sets: DiagMutex::new("zone_sets", sets),
            clock,
            names_stale: AtomicBool::new(true),
            reconnect_now,
        }
    }

    pub fn connection(&self) -> &NeohubConnection {
        &self.connection
    }

    pub fn connection_stats(&self) -> ConnectionStats {
        self.connection.stats()
    }

    /// Returns at once when connected; otherwise opens and waits up to `timeout_ms`.
    pub fn ensure_connection(&self, timeout_ms: u64) -> bool {
        if self.connection.is_connected() {
            return true;
        }
        if self.settings.url.is_empty() {
            debug!("[NeohubManager] no hub url configured");
            return false;
        }
        if let Err(e) = self.connection.open(&self.settings.url, &self.settings.token) {
            warn!("[NeohubManager] cannot open {}: {}", self.settings.url, e);
            return false;
        }
        let connected = self.connection.wait_connected(Duration::from_millis(timeout_ms));
        if connected {
            self.names_stale.store(true, Ordering::SeqCst);
        } else {
            warn!("[NeohubManager] no connection to {} within {} ms", self.settings.url, timeout_ms);
            self.connection.abandon_connect();
        }
        connected
    }

    pub fn command(&self, command: &Value) -> Result<Value, ConversationError> {
        self.connection.command(&command.to_string(), self.settings.command_timeout)
    }

    /// Replace the id/name table from GET_ZONES.
    pub fn load_zone_names(&self) -> Result<usize, ConversationError> {
        let response = self.command(&json!({"GET_ZONES": 0}))?;
        let count = self.zones.lock("neohub.load_zone_names").apply_zone_names(&response)?;
        info!("[NeohubManager] hub reports {} zones", count);
        Ok(count)
    }

    /// Poll `names` with one INFO conversation per batch. All batches are queued before any
    /// reply is awaited.
    pub fn poll_zones(&self, names: &[String], batch_size: usize) -> PollSummary {
        let mut summary = PollSummary::default();
        if names.is_empty() {
            return summary;
        }
        let replies: Vec<_> = names
            .chunks(batch_size.max(1))
            .map(|batch| {
                let cmd = json!({ "INFO": batch }).to_string();
                self.connection.send(&cmd, self.settings.command_timeout)
            })
            .collect();
        summary.batches = replies.len();

        let wait = self.settings.command_timeout * (replies.len() as u32 + 1);
        for reply in replies {
            let command = reply.command().to_string();
            let result = reply.wait(wait).and_then(|response| {
                let now = self.clock.utc_now();
                self.zones.lock("neohub.poll_zones").apply_devices(&response, now)
            });
            match result {
                Ok(n) => summary.updated += n,
                Err(e) => {
                    summary.failed += 1;
                    warn!("[NeohubManager] poll '{}' failed: {}", command, e);
                }
            }
        }
        debug!(
            "[NeohubManager] polled {} zones in {} batches ({} failed)",
            summary.updated, summary.batches, summary.failed
        );
        summary
    }

    pub fn set_active_zones(&self, names: impl IntoIterator<Item = String>) {
        self.sets.lock("neohub.set_active").active = names.into_iter().collect();
    }

    pub fn set_monitored_zones(&self, names: impl IntoIterator<Item = String>) {
        self.sets.lock("neohub.set_monitored").monitored = names.into_iter().collect();
    }

    /// Union of active and monitored zones, sorted.
    pub fn polled_zones(&self) -> Vec<String> {
        let sets = self.sets.lock("neohub.polled_zones");
        sets.active.union(&sets.monitored).cloned().collect()
    }

    pub fn zone(&self, name: &str) -> Option<ZoneRecord> {
        self.zones.lock("neohub.zone").get(name).cloned()
    }

    pub fn zones(&self) -> Vec<ZoneRecord> {
        self.zones.lock("neohub.zones").records().cloned().collect()
    }

    /// Room temperature if the zone is known, online and not dead.
    pub fn zone_temperature(&self, name: &str, now: DateTime<Utc>) -> Option<f64> {
        self.usable(name, now).and_then(|z| z.room_temperature)
    }

    pub fn zone_setpoint(&self, name: &str, now: DateTime<Utc>) -> Option<f64> {
        self.usable(name, now).and_then(|z| z.room_setpoint)
    }

    fn usable(&self, name: &str, now: DateTime<Utc>) -> Option<ZoneRecord> {
        let zone = self.zone(name)?;
        if !zone.online || zone.is_dead(now) {
            return None;
        }
        if zone.is_aged(now) {
            debug!("[NeohubManager] zone '{}' data is aged", name);
        }
        Some(zone)
    }

    /// One pass of the poll loop. `last_check` and `last_poll` carry the schedule between passes.
    pub fn service(&self, now: Instant, last_check: &mut Option<Instant>, last_poll: &mut Option<Instant>) {
        let check_due = self.reconnect_now.swap(false, Ordering::SeqCst)
            || last_check.is_none_or(|t| now.duration_since(t) >= CONNECTION_CHECK_INTERVAL);
        if check_due {
            *last_check = Some(now);
            self.ensure_connection(self.settings.connect_timeout_ms);
        }
        if !self.connection.is_connected() {
            return;
        }
        if self.names_stale.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.load_zone_names() {
                warn!("[NeohubManager] zone list reload failed: {}", e);
                self.names_stale.store(true, Ordering::SeqCst);
            }
        }
        if last_poll.is_none_or(|t| now.duration_since(t) >= POLL_INTERVAL) {
            *last_poll = Some(now);
            self.poll_zones(&self.polled_zones(), DEFAULT_BATCH_SIZE);
        }
    }

    pub fn spawn_poll_loop(self: &Arc<Self>, running: Arc<AtomicBool>) -> thread::JoinHandle<()> {
        let manager = Arc::clone(self);
        thread::Builder::new()
            .name("neohub-poll".into())
            .spawn(move || {
                info!("[NeohubManager] poll loop started");
                let mut last_check = None;
                let mut last_poll = None;
                while running.load(Ordering::SeqCst) {
                    manager.service(Instant::now(), &mut last_check, &mut last_poll);
                    thread::sleep(LOOP_TICK);
                }
                info!("[NeohubManager] poll loop stopped");
            })
            .expect("Failed to spawn neohub poll thread")
    }

    pub fn shutdown(&self) {
        self.connection.shutdown();
    }
}
