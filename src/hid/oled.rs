//! OLED text pushes with per-device deduplication
//!
//! The firmware redraws the panel on every write, so repeating the same
//! text (a clock that only changes once a minute, for instance) just burns
//! USB bandwidth and causes flicker. `OledWriter` remembers the last text
//! sent to each device and skips exact repeats unless forced.

use super::codec::{self, OpAction, Opcode};
use super::identity::{DeviceDescriptor, DeviceId};
use super::session::TransportSessions;
use crate::Result;
use chrono::{DateTime, Local, TimeZone};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// strftime layout for the standby clock, e.g. `25/08/24 Sun 14:30`.
pub const CLOCK_FORMAT: &str = "%y/%m/%d %a %H:%M";

/// Render a timestamp in the standby-clock layout.
pub fn format_clock<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    now.format(CLOCK_FORMAT).to_string()
}

/// Pushes text to device OLEDs, skipping writes that would repaint the
/// panel with what it already shows.
///
/// The cache is keyed by connection generation, so a replugged device (whose
/// panel content is unknown) never matches an entry from its previous life.
pub struct OledWriter {
    sessions: Arc<TransportSessions>,
    last_text: Mutex<HashMap<DeviceId, (u64, String)>>,
}

impl OledWriter {
    pub fn new(sessions: Arc<TransportSessions>) -> Self {
        Self {
            sessions,
            last_text: Mutex::new(HashMap::new()),
        }
    }

    /// Send `text` to the device's OLED. Returns `Ok(false)` when the write
    /// was skipped because the panel already shows this text; `force`
    /// bypasses the check.
    pub async fn write_text(
        &self,
        descriptor: &DeviceDescriptor,
        text: &str,
        force: bool,
    ) -> Result<bool> {
        let id = descriptor.id();
        let generation = self.sessions.generation(&id);
        if !force && !self.is_new_text(generation, &id, text) {
            debug!(device = %id, "skipping duplicate oled text");
            return Ok(false);
        }

        let frame = codec::encode_command(
            Opcode::GpkRcOperation,
            OpAction::OledWrite.as_byte(),
            &codec::encode_text(text),
        );
        self.sessions.write_command(descriptor, &frame).await?;
        // Only a delivered write updates the cache, so a failed push is
        // retried on the next tick. The generation read before the write may
        // be one behind after a mid-write reconnect; that only means one
        // extra repaint.
        self.last_text.lock().insert(id, (generation, text.to_string()));
        Ok(true)
    }

    /// Send the current local time in the standby-clock layout. Dedup keeps
    /// this to one real write per minute no matter how often it is called.
    pub async fn write_clock(&self, descriptor: &DeviceDescriptor) -> Result<bool> {
        let text = format_clock(&Local::now());
        self.write_text(descriptor, &text, false).await
    }

    /// Drop the cached text for a device, forcing the next write through.
    /// Called when a device is explicitly stopped.
    pub fn forget(&self, id: &DeviceId) {
        self.last_text.lock().remove(id);
    }

    fn is_new_text(&self, generation: u64, id: &DeviceId, text: &str) -> bool {
        match self.last_text.lock().get(id) {
            Some((cached_generation, cached)) => {
                *cached_generation != generation || cached != text
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn writer() -> OledWriter {
        OledWriter::new(TransportSessions::for_tests())
    }

    fn descriptor() -> DeviceDescriptor {
        DeviceDescriptor::new("ACME", "GPK60", 0x1234, 0x5678)
    }

    #[test]
    fn test_first_text_is_new() {
        let w = writer();
        assert!(w.is_new_text(0, &descriptor().id(), "hello"));
    }

    #[test]
    fn test_repeat_text_is_not_new() {
        let w = writer();
        let id = descriptor().id();
        w.last_text.lock().insert(id.clone(), (0, "hello".to_string()));
        assert!(!w.is_new_text(0, &id, "hello"));
        assert!(w.is_new_text(0, &id, "hello2"));
    }

    #[test]
    fn test_new_connection_invalidates_cache() {
        let w = writer();
        let id = descriptor().id();
        w.last_text.lock().insert(id.clone(), (1, "hello".to_string()));
        assert!(w.is_new_text(2, &id, "hello"));
    }

    #[test]
    fn test_forget_clears_cache() {
        let w = writer();
        let id = descriptor().id();
        w.last_text.lock().insert(id.clone(), (0, "hello".to_string()));
        w.forget(&id);
        assert!(w.is_new_text(0, &id, "hello"));
    }

    #[test]
    fn test_cache_is_per_device() {
        let w = writer();
        let other = DeviceDescriptor::new("ACME", "GPK87", 0x1234, 0x9999);
        w.last_text.lock().insert(descriptor().id(), (0, "hello".to_string()));
        assert!(w.is_new_text(0, &other.id(), "hello"));
    }

    #[test]
    fn test_clock_format() {
        let tz = FixedOffset::east_opt(0).unwrap();
        let dt = tz.with_ymd_and_hms(2025, 8, 24, 14, 30, 59).unwrap();
        assert_eq!(format_clock(&dt), "25/08/24 Sun 14:30");
    }

    #[test]
    fn test_clock_format_pads_fields() {
        let tz = FixedOffset::east_opt(0).unwrap();
        let dt = tz.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(format_clock(&dt), "26/01/02 Fri 03:04");
    }
}
