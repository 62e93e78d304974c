//! Application-driven layer switching
//!
//! Frontends report the focused application; this module maps it to a
//! firmware layer per device and pushes a `layerMove` only when the target
//! layer differs from the last one sent. Mappings live in the settings
//! store so they survive restarts.

use super::codec::{self, OpAction, Opcode};
use super::identity::{DeviceDescriptor, DeviceId};
use super::session::TransportSessions;
use crate::core::settings::SettingsStore;
use crate::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Move the device to a firmware layer.
pub async fn layer_move(
    sessions: &TransportSessions,
    descriptor: &DeviceDescriptor,
    layer: u8,
) -> Result<()> {
    let frame = codec::encode_command(Opcode::GpkRcOperation, OpAction::LayerMove.as_byte(), &[layer]);
    sessions.write_command(descriptor, &frame).await
}

/// Switches device layers to follow the focused application.
///
/// The delivered-layer cache is keyed by connection generation; a replugged
/// device boots into its own default layer, so entries from the previous
/// connection must not suppress the first switch after a reconnect.
pub struct AutoLayerSwitcher {
    sessions: Arc<TransportSessions>,
    settings: Arc<dyn SettingsStore>,
    last_applied: Mutex<HashMap<DeviceId, (u64, u8)>>,
}

impl AutoLayerSwitcher {
    pub fn new(sessions: Arc<TransportSessions>, settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            sessions,
            settings,
            last_applied: Mutex::new(HashMap::new()),
        }
    }

    /// Map an application identifier to a layer for one device.
    pub fn set_mapping(&self, id: &DeviceId, app: &str, layer: u8) {
        self.settings.set_layer_mapping(id, app, layer);
    }

    /// Remove an application mapping; the app falls back to the default layer.
    pub fn remove_mapping(&self, id: &DeviceId, app: &str) {
        self.settings.remove_layer_mapping(id, app);
    }

    /// Resolve the layer for an application, falling back to the device's
    /// default layer when nothing is mapped.
    pub fn layer_for(&self, id: &DeviceId, app: &str) -> u8 {
        self.settings
            .layer_mappings(id)
            .get(app)
            .copied()
            .unwrap_or_else(|| self.settings.default_layer(id))
    }

    /// React to an application focus change. Sends a `layerMove` only when
    /// the resolved layer differs from the last one delivered to the device.
    /// Failures are logged and dropped; the next focus change tries again.
    pub async fn apply_for_app(&self, descriptor: &DeviceDescriptor, app: &str) {
        let id = descriptor.id();
        let layer = self.layer_for(&id, app);
        let generation = self.sessions.generation(&id);
        if self.last_applied.lock().get(&id) == Some(&(generation, layer)) {
            return;
        }
        debug!(device = %id, app, layer, "switching layer for focused app");
        match layer_move(&self.sessions, descriptor, layer).await {
            Ok(()) => {
                self.last_applied.lock().insert(id, (generation, layer));
            }
            Err(err) => {
                warn!(device = %id, layer, error = %err, "layer switch failed");
            }
        }
    }

    /// Drop the delivered-layer cache for a device. Called on explicit stop.
    pub fn forget(&self, id: &DeviceId) {
        self.last_applied.lock().remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::settings::MemorySettings;

    fn switcher() -> AutoLayerSwitcher {
        AutoLayerSwitcher::new(TransportSessions::for_tests(), Arc::new(MemorySettings::default()))
    }

    fn descriptor() -> DeviceDescriptor {
        DeviceDescriptor::new("ACME", "GPK60", 0x1234, 0x5678)
    }

    #[test]
    fn test_unmapped_app_uses_default_layer() {
        let s = switcher();
        assert_eq!(s.layer_for(&descriptor().id(), "editor"), 0);
    }

    #[test]
    fn test_mapping_roundtrip() {
        let s = switcher();
        let id = descriptor().id();
        s.set_mapping(&id, "editor", 3);
        assert_eq!(s.layer_for(&id, "editor"), 3);
        s.remove_mapping(&id, "editor");
        assert_eq!(s.layer_for(&id, "editor"), 0);
    }

    #[test]
    fn test_mappings_are_per_device() {
        let s = switcher();
        let other = DeviceDescriptor::new("ACME", "GPK87", 0x1234, 0x9999);
        s.set_mapping(&descriptor().id(), "editor", 3);
        assert_eq!(s.layer_for(&other.id(), "editor"), 0);
    }

    #[tokio::test]
    async fn test_apply_skips_when_layer_unchanged() {
        let s = switcher();
        let id = descriptor().id();
        s.last_applied.lock().insert(id.clone(), (0, 2));
        s.set_mapping(&id, "editor", 2);
        // Already on layer 2; no write happens, cache stays put.
        s.apply_for_app(&descriptor(), "editor").await;
        assert_eq!(s.last_applied.lock().get(&id), Some(&(0, 2)));
    }

    #[tokio::test]
    async fn test_apply_failure_leaves_cache_untouched() {
        // No device is connected, so the write fails and the delivered-layer
        // cache must not record the attempt.
        let s = switcher();
        let id = descriptor().id();
        s.set_mapping(&id, "editor", 3);
        s.apply_for_app(&descriptor(), "editor").await;
        assert!(s.last_applied.lock().get(&id).is_none());
    }

    #[test]
    fn test_forget_clears_delivered_layer() {
        let s = switcher();
        let id = descriptor().id();
        s.last_applied.lock().insert(id.clone(), (0, 5));
        s.forget(&id);
        assert!(s.last_applied.lock().get(&id).is_none());
    }
}
