//! Inbound report dispatch
//!
//! Reader threads hand every frame to the dispatcher, which decodes it,
//! refreshes the registry's cached view of the device, and notifies the
//! frontend. This is the only place inbound payload layouts are interpreted.

use super::codec::{self, GetAction, Opcode, SetAction};
use super::identity::DeviceDescriptor;
use super::led;
use super::pomodoro;
use super::registry::{ConnectionRegistry, DeviceType, SessionState};
use super::session::ReportSink;
use super::trackpad;
use crate::core::events::{ConfigKind, DeviceEvent, EventSender};
use std::sync::Arc;
use tracing::{debug, info, trace};

pub struct ReportDispatcher {
    registry: Arc<ConnectionRegistry>,
    events: EventSender,
}

impl ReportDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>, events: EventSender) -> Self {
        Self { registry, events }
    }

    fn on_get(&self, descriptor: &DeviceDescriptor, action: u8, payload: &[u8]) {
        let id = descriptor.id();
        match GetAction::from_byte(action) {
            Some(GetAction::DeviceGetValue) => {
                let device_type = DeviceType::from_byte(codec::byte_at(payload, 0));
                let firmware_version = codec::byte_at(payload, 1);
                self.registry.set_device_info(&id, device_type, firmware_version);
                // First identity answer completes initialization; the
                // transition collapses the race with the init watchdog so
                // Ready fires exactly once per connection.
                if self.registry.transition(
                    &id,
                    SessionState::Initializing,
                    SessionState::Connected,
                ) {
                    info!(device = %id, ?device_type, firmware_version, "device identified");
                    let _ = self.events.send(DeviceEvent::Ready {
                        device: id,
                        device_type,
                        firmware_version,
                    });
                }
            }
            Some(GetAction::TrackpadGetValue) => {
                let config = trackpad::decode_config(payload);
                self.registry.update_config(&id, |cached| {
                    cached.trackpad = Some(config);
                });
                self.notify_config(&id, ConfigKind::Trackpad);
            }
            Some(GetAction::PomodoroGetValue) => {
                let config = pomodoro::decode_config(payload);
                self.registry.update_config(&id, |cached| {
                    cached.pomodoro = Some(config);
                });
                self.notify_config(&id, ConfigKind::Pomodoro);
            }
            Some(GetAction::PomodoroActiveGetValue) => {
                let status = pomodoro::decode_active_status(payload);
                self.registry.update_config(&id, |cached| {
                    cached.pomodoro_active = Some(status);
                });
                let _ = self
                    .events
                    .send(DeviceEvent::PomodoroPhase { device: id, status });
            }
            Some(GetAction::LedGetValue) => {
                let config = led::decode_config(payload);
                self.registry.update_config(&id, |cached| {
                    cached.led = Some(config);
                });
                self.notify_config(&id, ConfigKind::Led);
            }
            Some(GetAction::LedLayerGetValue) => {
                let layers = led::decode_layers(payload);
                self.registry.update_config(&id, |cached| {
                    cached.led_layers = Some(layers);
                });
                self.notify_config(&id, ConfigKind::LedLayers);
            }
            None => trace!(device = %id, action, "unhandled get action"),
        }
    }

    fn on_set(&self, descriptor: &DeviceDescriptor, action: u8) {
        let id = descriptor.id();
        match SetAction::from_byte(action) {
            Some(SetAction::ValueComplete) => {
                debug!(device = %id, "firmware confirmed save");
                let _ = self.events.send(DeviceEvent::SaveComplete { device: id });
            }
            _ => trace!(device = %id, action, "unhandled set action"),
        }
    }

    fn notify_config(&self, id: &super::identity::DeviceId, kind: ConfigKind) {
        debug!(device = %id, ?kind, "cached config refreshed");
        let _ = self.events.send(DeviceEvent::ConfigUpdated {
            device: id.clone(),
            kind,
        });
    }
}

impl ReportSink for ReportDispatcher {
    fn handle_report(&self, descriptor: &DeviceDescriptor, frame: &[u8]) {
        let id = descriptor.id();
        let Some(report) = codec::decode_report(frame) else {
            debug!(device = %id, len = frame.len(), "discarding frame without report prefix");
            return;
        };
        trace!(
            device = %id,
            opcode = report.opcode,
            action = report.action,
            "report received"
        );

        // Any decodable frame proves the transport is alive. A device the
        // write path detached moments ago gets promoted back; stopped
        // (untracked) devices stay forgotten.
        if self.registry.is_tracked(&id) {
            self.registry
                .transition(&id, SessionState::Disconnected, SessionState::Connected);
        }

        match Opcode::from_byte(report.opcode) {
            Some(Opcode::CustomGetValue) => self.on_get(descriptor, report.action, report.payload),
            Some(Opcode::CustomSetValue) => self.on_set(descriptor, report.action),
            Some(Opcode::GpkRcOperation) | None => {
                trace!(device = %id, opcode = report.opcode, "report carries no host-side handling");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::{channel, EventReceiver};
    use crate::hid::pomodoro::PomodoroPhase;

    struct Rig {
        dispatcher: ReportDispatcher,
        registry: Arc<ConnectionRegistry>,
        events: EventReceiver,
    }

    fn rig() -> Rig {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, events) = channel();
        Rig {
            dispatcher: ReportDispatcher::new(registry.clone(), tx),
            registry,
            events,
        }
    }

    fn descriptor() -> DeviceDescriptor {
        DeviceDescriptor::new("ACME", "GPK60", 0x1234, 0x5678)
    }

    fn frame(opcode: u8, action: u8, payload: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0xFA, opcode, action];
        bytes.extend_from_slice(payload);
        bytes
    }

    fn drain(events: &mut EventReceiver) -> Vec<DeviceEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn test_identity_report_completes_initialization() {
        let mut r = rig();
        let d = descriptor();
        r.registry.set_state(&d.id(), SessionState::Initializing);

        r.dispatcher.handle_report(&d, &frame(0x02, 0x01, &[3, 12]));

        let status = r.registry.status(&d.id());
        assert_eq!(status.state, SessionState::Connected);
        assert_eq!(status.device_type, DeviceType::Macropad);
        assert_eq!(status.firmware_version, 12);
        let events = drain(&mut r.events);
        assert!(matches!(
            events.as_slice(),
            [DeviceEvent::Ready {
                device_type: DeviceType::Macropad,
                firmware_version: 12,
                ..
            }]
        ));
    }

    #[test]
    fn test_ready_fires_once_per_connection() {
        let mut r = rig();
        let d = descriptor();
        r.registry.set_state(&d.id(), SessionState::Initializing);

        r.dispatcher.handle_report(&d, &frame(0x02, 0x01, &[3, 12]));
        r.dispatcher.handle_report(&d, &frame(0x02, 0x01, &[3, 13]));

        // Later identity answers refresh the info without another Ready.
        assert_eq!(r.registry.status(&d.id()).firmware_version, 13);
        let readies = drain(&mut r.events)
            .iter()
            .filter(|event| matches!(event, DeviceEvent::Ready { .. }))
            .count();
        assert_eq!(readies, 1);
    }

    #[test]
    fn test_trackpad_report_updates_cache() {
        let mut r = rig();
        let d = descriptor();
        let payload = trackpad::encode_config(&trackpad::TrackpadConfig {
            scroll_step: 9,
            tap_term: 220,
            ..Default::default()
        });

        r.dispatcher.handle_report(&d, &frame(0x02, 0x02, &payload));

        let config = r.registry.config(&d.id()).unwrap();
        assert_eq!(config.trackpad.unwrap().scroll_step, 9);
        assert_eq!(config.trackpad.unwrap().tap_term, 220);
        let events = drain(&mut r.events);
        assert!(matches!(
            events.as_slice(),
            [DeviceEvent::ConfigUpdated {
                kind: ConfigKind::Trackpad,
                ..
            }]
        ));
    }

    #[test]
    fn test_pomodoro_config_report_updates_cache() {
        let mut r = rig();
        let d = descriptor();

        r.dispatcher
            .handle_report(&d, &frame(0x02, 0x03, &[25, 5, 15, 4, 0, 0, 0xA1, 2]));

        let pomodoro = r.registry.config(&d.id()).unwrap().pomodoro.unwrap();
        assert_eq!(pomodoro.work_time, 25);
        assert!(pomodoro.timer_active);
        assert!(matches!(
            drain(&mut r.events).as_slice(),
            [DeviceEvent::ConfigUpdated {
                kind: ConfigKind::Pomodoro,
                ..
            }]
        ));
    }

    #[test]
    fn test_pomodoro_push_emits_phase_event() {
        let mut r = rig();
        let d = descriptor();

        r.dispatcher
            .handle_report(&d, &frame(0x02, 0x04, &[0x81, 14, 30, 2, 1]));

        let status = r.registry.config(&d.id()).unwrap().pomodoro_active.unwrap();
        assert!(status.timer_active);
        assert_eq!(status.minutes, 14);
        let events = drain(&mut r.events);
        assert!(matches!(
            events.as_slice(),
            [DeviceEvent::PomodoroPhase { status, .. }]
                if status.phase == PomodoroPhase::Break && status.seconds == 30
        ));
    }

    #[test]
    fn test_led_reports_split_config_and_layers() {
        let mut r = rig();
        let d = descriptor();
        let state = led::LedState {
            config: led::LedConfig {
                enabled: true,
                ..Default::default()
            },
            layers: vec![led::LedLayer {
                layer: 2,
                color: led::Rgb { r: 1, g: 2, b: 3 },
            }],
        };

        r.dispatcher
            .handle_report(&d, &frame(0x02, 0x05, &led::encode_state(&state)));
        r.dispatcher
            .handle_report(&d, &frame(0x02, 0x06, &led::encode_layers(&state.layers)));

        let config = r.registry.config(&d.id()).unwrap();
        assert!(config.led.unwrap().enabled);
        assert_eq!(config.led_layers.unwrap(), state.layers);
        let kinds: Vec<_> = drain(&mut r.events)
            .into_iter()
            .filter_map(|event| match event {
                DeviceEvent::ConfigUpdated { kind, .. } => Some(kind),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec![ConfigKind::Led, ConfigKind::LedLayers]);
    }

    #[test]
    fn test_save_ack_emits_save_complete() {
        let mut r = rig();
        let d = descriptor();

        r.dispatcher.handle_report(&d, &frame(0x01, 0x01, &[]));

        assert!(matches!(
            drain(&mut r.events).as_slice(),
            [DeviceEvent::SaveComplete { .. }]
        ));
    }

    #[test]
    fn test_frame_without_prefix_is_discarded() {
        let mut r = rig();
        let d = descriptor();

        r.dispatcher.handle_report(&d, &[0x00, 0x02, 0x01, 3, 12]);

        assert!(r.registry.config(&d.id()).is_none());
        assert!(drain(&mut r.events).is_empty());
    }

    #[test]
    fn test_unknown_action_is_liveness_only() {
        let mut r = rig();
        let d = descriptor();
        r.registry.set_state(&d.id(), SessionState::Disconnected);

        r.dispatcher.handle_report(&d, &frame(0x02, 0x7F, &[1, 2]));

        assert_eq!(r.registry.state(&d.id()), SessionState::Connected);
        assert!(drain(&mut r.events).is_empty());
    }

    #[test]
    fn test_reports_do_not_resurrect_stopped_devices() {
        let r = rig();
        let d = descriptor();

        r.dispatcher.handle_report(&d, &frame(0x03, 0x01, &[]));

        assert!(!r.registry.is_tracked(&d.id()));
    }

    #[test]
    fn test_short_identity_payload_zero_fills() {
        let mut r = rig();
        let d = descriptor();
        r.registry.set_state(&d.id(), SessionState::Initializing);

        r.dispatcher.handle_report(&d, &frame(0x02, 0x01, &[]));

        // Absent bytes read as zero: type byte 0 is a plain keyboard.
        let status = r.registry.status(&d.id());
        assert_eq!(status.device_type, DeviceType::Keyboard);
        assert_eq!(status.firmware_version, 0);
        assert!(!drain(&mut r.events).is_empty());
    }
}
