//! Orchestration facade
//!
//! `GpkService` wires the registry, transport sessions, report dispatch,
//! health monitor, and feature modules together and is the one type an
//! embedding frontend talks to. Construction is plain dependency injection;
//! the caller owns the event channel and hands in the settings store and
//! transport backend.

use crate::core::config::GpkConfig;
use crate::core::events::EventSender;
use crate::core::settings::SettingsStore;
use crate::error::Result;
use crate::hid::dispatch::ReportDispatcher;
use crate::hid::identity::{DeviceDescriptor, DeviceId};
use crate::hid::layers::{self, AutoLayerSwitcher};
use crate::hid::led::{self, LedLayer, LedState};
use crate::hid::monitor::HealthMonitor;
use crate::hid::oled::OledWriter;
use crate::hid::pomodoro::{self, PomodoroConfig};
use crate::hid::registry::{ConnectionRegistry, DeviceConfig, DeviceStatus};
use crate::hid::session::TransportSessions;
use crate::hid::trackpad::{self, TrackpadConfig};
use crate::hid::transport::{HidApiBackend, HidBackend};
use std::sync::Arc;
use tracing::{info, warn};

pub struct GpkService {
    registry: Arc<ConnectionRegistry>,
    sessions: Arc<TransportSessions>,
    monitor: HealthMonitor,
    oled: OledWriter,
    layers: AutoLayerSwitcher,
    settings: Arc<dyn SettingsStore>,
}

impl GpkService {
    pub fn new(
        config: &GpkConfig,
        backend: Arc<dyn HidBackend>,
        settings: Arc<dyn SettingsStore>,
        events: EventSender,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Arc::new(ReportDispatcher::new(registry.clone(), events.clone()));
        let sessions = Arc::new(TransportSessions::new(
            registry.clone(),
            backend,
            config.timing.clone(),
            events.clone(),
            dispatcher,
        ));
        let monitor = HealthMonitor::new(sessions.clone(), events);
        let oled = OledWriter::new(sessions.clone());
        let layers = AutoLayerSwitcher::new(sessions.clone(), settings.clone());
        Self {
            registry,
            sessions,
            monitor,
            oled,
            layers,
            settings,
        }
    }

    /// Construct over the real `hidapi` backend.
    pub fn with_hidapi(
        config: &GpkConfig,
        settings: Arc<dyn SettingsStore>,
        events: EventSender,
    ) -> Result<Self> {
        let backend = Arc::new(HidApiBackend::new(config.hid.clone())?);
        Ok(Self::new(config, backend, settings, events))
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    /// Raw-HID devices currently visible to the OS.
    pub fn list_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        self.sessions.list_devices()
    }

    /// Open a session for one device and make sure the health sweep is
    /// running while anything is connected.
    pub async fn connect(&self, descriptor: &DeviceDescriptor) -> Result<()> {
        self.sessions.connect(descriptor).await?;
        self.monitor.ensure_started();
        Ok(())
    }

    /// Connect every currently visible device. Individual failures are
    /// logged and skipped; returns how many sessions are live afterwards.
    pub async fn connect_all(&self) -> usize {
        let devices = match self.list_devices() {
            Ok(devices) => devices,
            Err(err) => {
                warn!(error = %err, "device enumeration failed");
                return self.registry.connected_ids().len();
            }
        };
        for descriptor in devices {
            if let Err(err) = self.connect(&descriptor).await {
                warn!(device = %descriptor.id(), error = %err, "connect failed");
            }
        }
        self.registry.connected_ids().len()
    }

    /// Stop one device and drop every cache tied to its sessions.
    pub async fn stop(&self, descriptor: &DeviceDescriptor) {
        let id = descriptor.id();
        self.sessions.stop(descriptor).await;
        self.oled.forget(&id);
        self.layers.forget(&id);
    }

    /// Stop everything, including the health sweep.
    pub async fn stop_all(&self) {
        info!("stopping all device sessions");
        self.monitor.stop();
        let ids = self.registry.tracked_ids();
        self.sessions.stop_all().await;
        for id in &ids {
            self.oled.forget(id);
            self.layers.forget(id);
        }
    }

    pub fn status(&self, id: &DeviceId) -> DeviceStatus {
        self.registry.status(id)
    }

    pub fn config(&self, id: &DeviceId) -> Option<DeviceConfig> {
        self.registry.config(id)
    }

    pub fn connected_ids(&self) -> Vec<DeviceId> {
        self.registry.connected_ids()
    }

    pub async fn request_trackpad_config(&self, descriptor: &DeviceDescriptor) -> Result<()> {
        trackpad::request_config(&self.sessions, descriptor).await
    }

    pub async fn save_trackpad_config(
        &self,
        descriptor: &DeviceDescriptor,
        config: &TrackpadConfig,
    ) -> Result<()> {
        trackpad::save_config(&self.sessions, descriptor, config).await
    }

    pub async fn request_pomodoro_config(&self, descriptor: &DeviceDescriptor) -> Result<()> {
        pomodoro::request_config(&self.sessions, descriptor).await
    }

    pub async fn request_pomodoro_status(&self, descriptor: &DeviceDescriptor) -> Result<()> {
        pomodoro::request_active_status(&self.sessions, descriptor).await
    }

    pub async fn save_pomodoro_config(
        &self,
        descriptor: &DeviceDescriptor,
        config: &PomodoroConfig,
    ) -> Result<()> {
        pomodoro::save_config(&self.sessions, descriptor, config).await
    }

    pub async fn request_led_config(&self, descriptor: &DeviceDescriptor) -> Result<()> {
        led::request_config(&self.sessions, descriptor).await
    }

    pub async fn request_led_layers(&self, descriptor: &DeviceDescriptor) -> Result<()> {
        led::request_layers(&self.sessions, descriptor).await
    }

    pub async fn save_led_state(
        &self,
        descriptor: &DeviceDescriptor,
        state: &LedState,
    ) -> Result<()> {
        led::save_state(&self.sessions, descriptor, state).await
    }

    pub async fn save_led_layers(
        &self,
        descriptor: &DeviceDescriptor,
        layers: &[LedLayer],
    ) -> Result<()> {
        led::save_layers(&self.sessions, descriptor, layers).await
    }

    /// Push arbitrary text to the device OLED. `force` repaints even when
    /// the panel already shows the text.
    pub async fn write_oled_text(
        &self,
        descriptor: &DeviceDescriptor,
        text: &str,
        force: bool,
    ) -> Result<bool> {
        self.oled.write_text(descriptor, text, force).await
    }

    /// Push the standby clock, honoring the per-device OLED setting.
    /// Returns `Ok(false)` when disabled or when the panel is up to date.
    pub async fn write_oled_clock(&self, descriptor: &DeviceDescriptor) -> Result<bool> {
        if !self.settings.oled_enabled(&descriptor.id()) {
            return Ok(false);
        }
        self.oled.write_clock(descriptor).await
    }

    pub async fn move_layer(&self, descriptor: &DeviceDescriptor, layer: u8) -> Result<()> {
        layers::layer_move(&self.sessions, descriptor, layer).await
    }

    /// Feed one foreground-application change into the auto layer switcher.
    pub async fn apply_layer_for_app(&self, descriptor: &DeviceDescriptor, app: &str) {
        self.layers.apply_for_app(descriptor, app).await;
    }

    pub fn set_layer_mapping(&self, id: &DeviceId, app: &str, layer: u8) {
        self.layers.set_mapping(id, app, layer);
    }

    pub fn remove_layer_mapping(&self, id: &DeviceId, app: &str) {
        self.layers.remove_mapping(id, app);
    }

    pub fn set_default_layer(&self, id: &DeviceId, layer: u8) {
        self.settings.set_default_layer(id, layer);
    }

    pub fn active_tab(&self, id: &DeviceId) -> Option<String> {
        self.registry.active_tab(id)
    }

    pub fn set_active_tab(&self, id: &DeviceId, tab: Option<&str>) {
        self.registry.set_active_tab(id, tab);
    }

    pub fn is_editing(&self, id: &DeviceId) -> bool {
        self.registry.is_editing(id)
    }

    pub fn set_editing(&self, id: &DeviceId, editing: bool) {
        self.registry.set_editing(id, editing);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::{channel, DeviceEvent, EventReceiver};
    use crate::core::settings::MemorySettings;
    use crate::hid::registry::{DeviceType, SessionState};
    use crate::hid::session::test_timing;
    use crate::hid::transport::MockBackend;
    use std::time::Duration;

    struct Rig {
        service: GpkService,
        backend: Arc<MockBackend>,
        settings: Arc<MemorySettings>,
        events: EventReceiver,
    }

    fn rig() -> Rig {
        let config = GpkConfig {
            timing: test_timing(),
            ..Default::default()
        };
        let backend = Arc::new(MockBackend::new());
        let settings = Arc::new(MemorySettings::default());
        let (tx, events) = channel();
        let service = GpkService::new(
            &config,
            backend.clone() as Arc<dyn HidBackend>,
            settings.clone() as Arc<dyn SettingsStore>,
            tx,
        );
        Rig {
            service,
            backend,
            settings,
            events,
        }
    }

    fn descriptor() -> DeviceDescriptor {
        DeviceDescriptor::new("ACME", "GPK60", 0x1234, 0x5678)
    }

    fn drain(events: &mut EventReceiver) -> Vec<DeviceEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_connect_starts_monitor_and_notifies() {
        let mut r = rig();
        let d = descriptor();
        r.backend.add_device(d.clone());

        r.service.connect(&d).await.unwrap();

        assert!(r.service.monitor.is_running());
        assert!(r.service.status(&d.id()).is_connected());
        assert!(matches!(
            drain(&mut r.events).as_slice(),
            [DeviceEvent::Connected { .. }]
        ));
    }

    #[tokio::test]
    async fn test_identity_report_completes_connect_flow() {
        let mut r = rig();
        let d = descriptor();
        r.backend.add_device(d.clone());

        r.service.connect(&d).await.unwrap();
        assert_eq!(r.service.status(&d.id()).state, SessionState::Initializing);
        drain(&mut r.events);

        // The firmware answers the info request; the reader thread carries
        // the report through the dispatcher into the registry.
        r.backend.push_report(&d, &[0xFA, 0x02, 0x01, 2, 7]);
        tokio::time::sleep(Duration::from_millis(30)).await;

        let status = r.service.status(&d.id());
        assert_eq!(status.state, SessionState::Connected);
        assert_eq!(status.device_type, DeviceType::KeyboardTrackpad);
        assert_eq!(status.firmware_version, 7);
        let events = drain(&mut r.events);
        assert!(events.iter().any(|event| matches!(
            event,
            DeviceEvent::Ready {
                device_type: DeviceType::KeyboardTrackpad,
                firmware_version: 7,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_connect_all_skips_failures() {
        let r = rig();
        let bad = descriptor();
        let good = DeviceDescriptor::new("ACME", "GPK87", 0x1234, 0x9999);
        r.backend.add_device(bad.clone());
        r.backend.add_device(good.clone());
        // Burn the first device's whole open budget; the second device's
        // connect runs on a fresh one.
        for _ in 0..3 {
            r.backend.fail_next_open("resource busy");
        }

        let connected = r.service.connect_all().await;

        assert_eq!(connected, 1);
        assert!(!r.service.status(&bad.id()).is_connected());
        assert!(r.service.status(&good.id()).is_connected());
    }

    #[tokio::test]
    async fn test_stop_all_halts_monitor() {
        let r = rig();
        let d = descriptor();
        r.backend.add_device(d.clone());
        r.service.connect(&d).await.unwrap();

        r.service.stop_all().await;

        assert!(r.service.connected_ids().is_empty());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!r.service.monitor.is_running());
    }

    #[tokio::test]
    async fn test_save_trackpad_writes_set_frame() {
        let r = rig();
        let d = descriptor();
        r.backend.add_device(d.clone());
        r.service.connect(&d).await.unwrap();

        r.service
            .save_trackpad_config(&d, &TrackpadConfig::default())
            .await
            .unwrap();

        let written = r.backend.written(&d);
        assert!(written
            .iter()
            .any(|frame| frame[2] == 0x01 && frame[3] == 0x02));
    }

    #[tokio::test]
    async fn test_oled_clock_honors_setting() {
        let r = rig();
        let d = descriptor();
        r.backend.add_device(d.clone());
        r.service.connect(&d).await.unwrap();
        r.settings.set_oled_enabled(&d.id(), false);

        assert!(!r.service.write_oled_clock(&d).await.unwrap());
        assert!(r
            .backend
            .written(&d)
            .iter()
            .all(|frame| frame[2] != 0x03 || frame[3] != 0x02));

        r.settings.set_oled_enabled(&d.id(), true);
        assert!(r.service.write_oled_clock(&d).await.unwrap());
    }

    #[tokio::test]
    async fn test_layer_mapping_flows_through_switcher() {
        let r = rig();
        let d = descriptor();
        r.backend.add_device(d.clone());
        r.service.connect(&d).await.unwrap();
        r.service.set_layer_mapping(&d.id(), "terminal", 3);

        r.service.apply_layer_for_app(&d, "terminal").await;

        let written = r.backend.written(&d);
        assert!(written
            .iter()
            .any(|frame| frame[2] == 0x03 && frame[3] == 0x01 && frame[4] == 3));
    }

    #[tokio::test]
    async fn test_stop_clears_feature_caches() {
        let r = rig();
        let d = descriptor();
        r.backend.add_device(d.clone());
        r.service.connect(&d).await.unwrap();
        r.service.write_oled_text(&d, "hello", false).await.unwrap();

        r.service.stop(&d).await;
        assert!(!r.service.registry().is_tracked(&d.id()));

        // Reconnect; the forgotten cache lets the same text go out again.
        r.service.connect(&d).await.unwrap();
        assert!(r.service.write_oled_text(&d, "hello", false).await.unwrap());
    }
}
