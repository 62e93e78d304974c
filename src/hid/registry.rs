//! Connection registry
//!
//! One shared object tracks everything known about each device: lifecycle
//! state, probed identity, cached firmware config, the transport handle
//! slot, and the bits of UI context (active tab, editing flag) that gate
//! background refreshes. Lookups never panic; an unknown id just reads as
//! disconnected. Lifecycle mutation stays inside this crate, frontends only
//! write the UI context.

use super::identity::DeviceId;
use super::led::{LedConfig, LedLayer};
use super::pomodoro::{PomodoroActiveStatus, PomodoroConfig};
use super::trackpad::TrackpadConfig;
use super::transport::HidHandle;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared slot holding the open transport handle for one device.
///
/// The reader thread and the write path both borrow through the slot, so a
/// reconnect can swap the handle without either holding a stale reference.
pub type HandleSlot = Arc<Mutex<Option<Box<dyn HidHandle>>>>;

/// Hardware family reported by the device-info probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceType {
    Keyboard,
    KeyboardOled,
    KeyboardTrackpad,
    Macropad,
    MacropadTrackpad,
    MacropadTrackpadButtons,
    /// Probe not answered yet, or an unrecognized type byte.
    #[default]
    Unknown,
}

impl DeviceType {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => DeviceType::Keyboard,
            1 => DeviceType::KeyboardOled,
            2 => DeviceType::KeyboardTrackpad,
            3 => DeviceType::Macropad,
            4 => DeviceType::MacropadTrackpad,
            5 => DeviceType::MacropadTrackpadButtons,
            _ => DeviceType::Unknown,
        }
    }
}

/// Per-device lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    /// Enumerating and opening the transport.
    Connecting,
    /// Transport open, waiting for the device-info probe answer.
    Initializing,
    /// Probe answered; fully usable.
    Connected,
}

/// Everything the registry knows about one device's liveness.
#[derive(Debug, Clone, Default)]
pub struct DeviceStatus {
    pub state: SessionState,
    pub device_type: DeviceType,
    pub firmware_version: u8,
}

impl DeviceStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self.state, SessionState::Initializing | SessionState::Connected)
    }
}

/// Firmware config cache, refreshed by inbound get-value reports.
#[derive(Debug, Clone, Default)]
pub struct DeviceConfig {
    pub trackpad: Option<TrackpadConfig>,
    pub pomodoro: Option<PomodoroConfig>,
    pub pomodoro_active: Option<PomodoroActiveStatus>,
    pub led: Option<LedConfig>,
    pub led_layers: Option<Vec<LedLayer>>,
}

/// Shared connection bookkeeping, passed by reference to every collaborator.
#[derive(Default)]
pub struct ConnectionRegistry {
    statuses: Mutex<HashMap<DeviceId, DeviceStatus>>,
    configs: Mutex<HashMap<DeviceId, DeviceConfig>>,
    handles: Mutex<HashMap<DeviceId, HandleSlot>>,
    active_tabs: Mutex<HashMap<DeviceId, String>>,
    editing: Mutex<HashMap<DeviceId, bool>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status for a device; unknown ids read as disconnected.
    pub fn status(&self, id: &DeviceId) -> DeviceStatus {
        self.statuses.lock().get(id).cloned().unwrap_or_default()
    }

    pub fn state(&self, id: &DeviceId) -> SessionState {
        self.status(id).state
    }

    pub fn is_connected(&self, id: &DeviceId) -> bool {
        self.status(id).is_connected()
    }

    /// Cached firmware config; `None` until a report has populated it.
    pub fn config(&self, id: &DeviceId) -> Option<DeviceConfig> {
        self.configs.lock().get(id).cloned()
    }

    /// Ids with any tracked status entry.
    pub fn tracked_ids(&self) -> Vec<DeviceId> {
        self.statuses.lock().keys().cloned().collect()
    }

    /// Ids currently in a live state.
    pub fn connected_ids(&self) -> Vec<DeviceId> {
        self.statuses
            .lock()
            .iter()
            .filter(|(_, status)| status.is_connected())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Whether the registry has ever tracked this id.
    pub fn is_tracked(&self, id: &DeviceId) -> bool {
        self.statuses.lock().contains_key(id)
    }

    pub(crate) fn set_state(&self, id: &DeviceId, state: SessionState) {
        self.statuses.lock().entry(id.clone()).or_default().state = state;
    }

    /// Atomically move `from` to `to`. Returns false when the device was in
    /// any other state, so racing transitions collapse to one winner.
    pub(crate) fn transition(&self, id: &DeviceId, from: SessionState, to: SessionState) -> bool {
        let mut statuses = self.statuses.lock();
        let status = statuses.entry(id.clone()).or_default();
        if status.state == from {
            status.state = to;
            true
        } else {
            false
        }
    }

    /// Record the probe answer. Leaves the lifecycle state alone; the
    /// dispatcher decides when INITIALIZING becomes CONNECTED.
    pub(crate) fn set_device_info(&self, id: &DeviceId, device_type: DeviceType, firmware_version: u8) {
        let mut statuses = self.statuses.lock();
        let status = statuses.entry(id.clone()).or_default();
        status.device_type = device_type;
        status.firmware_version = firmware_version;
    }

    /// Mutate the cached config in place, creating the entry if needed.
    pub(crate) fn update_config(&self, id: &DeviceId, apply: impl FnOnce(&mut DeviceConfig)) {
        let mut configs = self.configs.lock();
        apply(configs.entry(id.clone()).or_default());
    }

    /// The handle slot for a device, created empty on first use. The slot
    /// itself is stable across reconnects; only its contents change.
    pub(crate) fn handle_slot(&self, id: &DeviceId) -> HandleSlot {
        self.handles.lock().entry(id.clone()).or_default().clone()
    }

    /// Whether a transport handle is currently installed.
    pub fn has_handle(&self, id: &DeviceId) -> bool {
        self.handles
            .lock()
            .get(id)
            .is_some_and(|slot| slot.lock().is_some())
    }

    /// Passive loss: drop the handle and mark disconnected, keeping the
    /// cached config so a reconnect can re-hydrate the frontend.
    pub(crate) fn detach(&self, id: &DeviceId) {
        if let Some(slot) = self.handles.lock().get(id) {
            slot.lock().take();
        }
        self.set_state(id, SessionState::Disconnected);
    }

    /// Explicit stop: forget the device entirely.
    pub(crate) fn remove(&self, id: &DeviceId) {
        if let Some(slot) = self.handles.lock().remove(id) {
            slot.lock().take();
        }
        self.statuses.lock().remove(id);
        self.configs.lock().remove(id);
        self.active_tabs.lock().remove(id);
        self.editing.lock().remove(id);
    }

    /// Which settings tab the frontend shows for this device, if any.
    pub fn active_tab(&self, id: &DeviceId) -> Option<String> {
        self.active_tabs.lock().get(id).cloned()
    }

    pub fn set_active_tab(&self, id: &DeviceId, tab: Option<&str>) {
        match tab {
            Some(tab) => {
                self.active_tabs.lock().insert(id.clone(), tab.to_string());
            }
            None => {
                self.active_tabs.lock().remove(id);
            }
        }
    }

    /// Whether the user is mid-edit on this device's config form. Background
    /// refreshes hold off while set.
    pub fn is_editing(&self, id: &DeviceId) -> bool {
        self.editing.lock().get(id).copied().unwrap_or(false)
    }

    pub fn set_editing(&self, id: &DeviceId, editing: bool) {
        self.editing.lock().insert(id.clone(), editing);
    }
}
