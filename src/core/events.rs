//! Device event definitions
//!
//! The transport pushes notifications to the embedding frontend through an
//! unbounded channel of `DeviceEvent`s. Sends are fire-and-forget; a closed
//! receiver never disturbs device handling.

use crate::hid::identity::DeviceId;
use crate::hid::pomodoro::PomodoroActiveStatus;
use crate::hid::registry::DeviceType;
use tokio::sync::mpsc;

/// Sender half used throughout the transport.
pub type EventSender = mpsc::UnboundedSender<DeviceEvent>;

/// Receiver half handed to the frontend.
pub type EventReceiver = mpsc::UnboundedReceiver<DeviceEvent>;

/// Create the notification channel.
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Which cached device config a report refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKind {
    Trackpad,
    Pomodoro,
    Led,
    LedLayers,
}

/// Notifications emitted by the device layer.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// Transport opened; the device has not answered the info probe yet
    Connected { device: DeviceId },

    /// Device answered the info probe and is fully usable
    Ready {
        device: DeviceId,
        device_type: DeviceType,
        firmware_version: u8,
    },

    /// Transport gone, explicitly stopped or lost
    Disconnected { device: DeviceId },

    /// A get-value report refreshed part of the cached config
    ConfigUpdated { device: DeviceId, kind: ConfigKind },

    /// Pomodoro timer pushed a phase/status report
    PomodoroPhase {
        device: DeviceId,
        status: PomodoroActiveStatus,
    },

    /// Firmware acknowledged that a save cycle finished
    SaveComplete { device: DeviceId },
}
