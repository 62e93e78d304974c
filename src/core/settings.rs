//! Settings-store collaborator
//!
//! The frontend owns user preferences; this crate only reads and writes the
//! handful it needs through the `SettingsStore` trait. Typed helpers keep
//! the key layout and JSON shapes in one place. `MemorySettings` backs tests
//! and the headless binary.

use crate::hid::identity::DeviceId;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;

fn layer_mappings_key(device: &DeviceId) -> String {
    format!("devices.{}.layer_mappings", device)
}

fn default_layer_key(device: &DeviceId) -> String {
    format!("devices.{}.default_layer", device)
}

fn oled_enabled_key(device: &DeviceId) -> String {
    format!("devices.{}.oled_enabled", device)
}

/// String-keyed JSON settings owned by the embedding application.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);

    /// Application-to-layer table for one device. Entries that are not an
    /// object of small integers are skipped.
    fn layer_mappings(&self, device: &DeviceId) -> HashMap<String, u8> {
        let Some(Value::Object(map)) = self.get(&layer_mappings_key(device)) else {
            return HashMap::new();
        };
        map.into_iter()
            .filter_map(|(app, layer)| Some((app, u8::try_from(layer.as_u64()?).ok()?)))
            .collect()
    }

    fn set_layer_mapping(&self, device: &DeviceId, app: &str, layer: u8) {
        let mut mappings = self.layer_mappings(device);
        mappings.insert(app.to_string(), layer);
        self.set(&layer_mappings_key(device), json!(mappings));
    }

    fn remove_layer_mapping(&self, device: &DeviceId, app: &str) {
        let mut mappings = self.layer_mappings(device);
        mappings.remove(app);
        self.set(&layer_mappings_key(device), json!(mappings));
    }

    /// Layer used when the focused application has no mapping.
    fn default_layer(&self, device: &DeviceId) -> u8 {
        self.get(&default_layer_key(device))
            .and_then(|v| v.as_u64())
            .and_then(|v| u8::try_from(v).ok())
            .unwrap_or(0)
    }

    fn set_default_layer(&self, device: &DeviceId, layer: u8) {
        self.set(&default_layer_key(device), json!(layer));
    }

    /// Whether clock pushes to this device's OLED are wanted. Defaults on.
    fn oled_enabled(&self, device: &DeviceId) -> bool {
        self.get(&oled_enabled_key(device))
            .and_then(|v| v.as_bool())
            .unwrap_or(true)
    }

    fn set_oled_enabled(&self, device: &DeviceId, enabled: bool) {
        self.set(&oled_enabled_key(device), json!(enabled));
    }
}

/// In-memory store for tests and the headless binary.
#[derive(Default)]
pub struct MemorySettings {
    values: Mutex<HashMap<String, Value>>,
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        self.values.lock().insert(key.to_string(), value);
    }
}
