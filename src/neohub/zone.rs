//! zone.rs
//! Cached state of the hub's zones.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info};
use serde_json::Value;

use crate::neohub::{
    envelope::{bool_field, number_field},
    error::ConversationError,
};

/// Data older than this is still used, with a note in the log.
pub const AGED_AFTER_MS: i64 = 30_000;
/// Data older than this is ignored.
pub const DEAD_AFTER_MS: i64 = 120_000;

#[derive(Debug, Clone, PartialEq)]
pub struct ZoneRecord {
    pub id: Option<i64>,
    pub name: String,
    pub last_updated: Option<DateTime<Utc>>,
    pub online: bool,
    pub room_temperature: Option<f64>,
    pub room_setpoint: Option<f64>,
    pub floor_temperature: Option<f64>,
    pub floor_limit_triggered: bool,
    pub demand: bool,
}

impl ZoneRecord {
    pub fn new(name: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            last_updated: None,
            online: false,
            room_temperature: None,
            room_setpoint: None,
            floor_temperature: None,
            floor_limit_triggered: false,
            demand: false,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        self.last_updated.map(|t| now - t)
    }

    pub fn is_aged(&self, now: DateTime<Utc>) -> bool {
        self.age(now).is_none_or(|age| age.num_milliseconds() > AGED_AFTER_MS)
    }

    /// Never-updated records count as dead.
    pub fn is_dead(&self, now: DateTime<Utc>) -> bool {
        self.age(now).is_none_or(|age| age.num_milliseconds() > DEAD_AFTER_MS)
    }

    /// Apply one object from an INFO `devices` array.
    pub fn update_from_device(&mut self, device: &Value, now: DateTime<Utc>) {
        self.online = !bool_field(device, "OFFLINE").unwrap_or(false);
        self.room_temperature = number_field(device, "CURRENT_TEMPERATURE");
        self.room_setpoint = number_field(device, "CURRENT_SET_TEMPERATURE");
        self.floor_temperature = number_field(device, "CURRENT_FLOOR_TEMPERATURE");
        self.floor_limit_triggered = bool_field(device, "FLOOR_LIMIT").unwrap_or(false);
        self.demand = bool_field(device, "HEATING").unwrap_or(false);
        self.last_updated = Some(now);
    }
}

#[derive(Debug, Default)]
pub struct ZoneTable {
    zones: BTreeMap<String, ZoneRecord>,
}

impl ZoneTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&ZoneRecord> {
        self.zones.get(name)
    }

    pub fn ensure(&mut self, name: &str) -> &mut ZoneRecord {
        self.zones
            .entry(name.to_string())
            .or_insert_with(|| ZoneRecord::new(name))
    }

    pub fn names(&self) -> Vec<String> {
        self.zones.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &ZoneRecord> {
        self.zones.values()
    }

    /// Resync from a GET_ZONES reply (`{"name": id, ...}`). Zones not named are evicted.
    pub fn apply_zone_names(&mut self, response: &Value) -> Result<usize, ConversationError> {
        let map = response
            .as_object()
            .ok_or_else(|| ConversationError::Shape(format!("GET_ZONES reply is not an object: {response}")))?;

        let present: BTreeSet<&str> = map.keys().map(String::as_str).collect();
        let before = self.zones.len();
        self.zones.retain(|name, _| present.contains(name.as_str()));
        let evicted = before - self.zones.len();
        if evicted > 0 {
            info!("[ZoneTable] evicted {} zones no longer on the hub", evicted);
        }

        for (name, id) in map {
            let record = self.ensure(name);
            record.id = id.as_i64().or_else(|| id.as_str().and_then(|s| s.parse().ok()));
        }
        Ok(map.len())
    }

    /// Apply an INFO reply (`{"devices": [{"device": name, ...}, ...]}`). Returns the number
    /// of records updated.
    pub fn apply_devices(&mut self, response: &Value, now: DateTime<Utc>) -> Result<usize, ConversationError> {
        let devices = response
            .get("devices")
            .and_then(Value::as_array)
            .ok_or_else(|| ConversationError::Shape("INFO reply has no devices array".into()))?;

        let mut updated = 0;
        for device in devices {
            let Some(name) = device.get("device").and_then(Value::as_str) else {
                debug!("[ZoneTable] skipping device without a name");
                continue;
            };
            self.ensure(name).update_from_device(device, now);
            updated += 1;
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn staleness_thresholds() {
        let mut z = ZoneRecord::new("Hall");
        assert!(z.is_dead(t(0)));
        z.last_updated = Some(t(0));
        assert!(!z.is_aged(t(30)));
        assert!(z.is_aged(t(31)) && !z.is_dead(t(31)));
        assert!(!z.is_dead(t(120)));
        assert!(z.is_dead(t(121)));
    }

    #[test]
    fn device_update_reads_lenient_fields() {
        let mut table = ZoneTable::new();
        let reply = json!({"devices": [
            {"device": "Kitchen", "OFFLINE": false, "CURRENT_TEMPERATURE": "20.4",
             "CURRENT_SET_TEMPERATURE": 21, "HEATING": true, "CURRENT_FLOOR_TEMPERATURE": 255,
             "FLOOR_LIMIT": false},
            {"OFFLINE": true}
        ]});
        assert_eq!(table.apply_devices(&reply, t(5)).unwrap(), 1);
        let k = table.get("Kitchen").unwrap();
        assert!(k.online && k.demand);
        assert_eq!(k.room_temperature, Some(20.4));
        assert_eq!(k.room_setpoint, Some(21.0));
        assert_eq!(k.last_updated, Some(t(5)));
    }

    #[test]
    fn zone_list_resync_evicts_missing() {
        let mut table = ZoneTable::new();
        table.apply_zone_names(&json!({"Kitchen": 1, "Hall": 2})).unwrap();
        table.apply_devices(&json!({"devices": [{"device": "Hall", "CURRENT_TEMPERATURE": 19}]}), t(0)).unwrap();
        table.apply_zone_names(&json!({"Hall": 2, "Study": "3"})).unwrap();
        assert_eq!(table.names(), vec!["Hall", "Study"]);
        assert_eq!(table.get("Hall").unwrap().room_temperature, Some(19.0));
        assert_eq!(table.get("Study").unwrap().id, Some(3));
    }

    #[test]
    fn malformed_replies_are_shape_errors() {
        let mut table = ZoneTable::new();
        assert!(matches!(table.apply_zone_names(&json!("ok")), Err(ConversationError::Shape(_))));
        assert!(matches!(table.apply_devices(&json!({}), t(0)), Err(ConversationError::Shape(_))));
    }
}
