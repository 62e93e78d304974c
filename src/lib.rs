//! GPK Companion
//!
//! Host-side device layer for GPK keyboard and macropad firmware, speaking
//! the firmware's custom protocol over USB raw HID.
//!
//! # What lives here
//! - 64-byte packet codec for the `0xFA`-prefixed command protocol
//! - Deterministic device identity keys and the connection registry
//! - Per-device transport sessions with write retry and auto-reconnect
//! - Inbound report dispatch into a cached device view plus an event stream
//! - Background health sweep over live sessions
//! - Feature operations: trackpad tuning, pomodoro timer, LED colors,
//!   OLED text/clock, and focus-driven layer switching
//!
//! [`service::GpkService`] bundles all of it behind one facade; frontends
//! construct it, hold the event receiver, and call operations by device
//! descriptor.

pub mod core;
pub mod error;
pub mod hid;
pub mod service;

pub use crate::core::config::GpkConfig;
pub use crate::core::events::{ConfigKind, DeviceEvent, EventReceiver, EventSender};
pub use crate::core::settings::{MemorySettings, SettingsStore};
pub use crate::error::{DeviceError, Result};
pub use crate::hid::{DeviceDescriptor, DeviceId, DeviceStatus, DeviceType};
pub use crate::service::GpkService;
