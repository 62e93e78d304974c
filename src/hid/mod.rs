//! USB raw HID communication with GPK keyboards and macropads
//!
//! Layered bottom-up: `codec` and `identity` are pure, `registry` is the
//! shared state store, `transport`/`session` own the hardware, `dispatch`
//! interprets inbound reports, `monitor` reconciles, and the feature modules
//! (`trackpad`, `pomodoro`, `led`, `oled`, `layers`) sit on top of the
//! session write path.

pub mod codec;
pub mod dispatch;
pub mod identity;
pub mod layers;
pub mod led;
pub mod monitor;
pub mod oled;
pub mod pomodoro;
pub mod registry;
pub mod session;
pub mod trackpad;
pub mod transport;

pub use identity::{DeviceDescriptor, DeviceId};
pub use registry::{ConnectionRegistry, DeviceConfig, DeviceStatus, DeviceType, SessionState};
pub use session::TransportSessions;
