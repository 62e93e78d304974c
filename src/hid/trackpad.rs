//! Trackpad tuning sub-protocol
//!
//! The firmware packs the whole trackpad configuration into 19 bytes, with
//! several fields straddling byte boundaries. The packed layout:
//!
//! ```text
//! 0      hf_waveform_number
//! 1      [7] can_hf_for_layer [6] can_drag [5..0] scroll_term hi
//! 2      [7..4] scroll_term lo [3..0] drag_term hi
//! 3      [7..2] drag_term lo [1] can_trackpad_layer [0] can_reverse_scrolling_direction
//! 4      [7] drag_strength_mode [6..2] drag_strength [1..0] default_speed hi
//! 5      [7..4] default_speed lo [3..0] scroll_step
//! 6      [7] can_short_scroll
//! 7..18  tap/swipe/pinch/gesture/short_scroll terms, pinch_distance (u16 BE each)
//! ```

use super::codec::{self, byte_at, u16_be_at, GetAction, Opcode, SetAction};
use super::identity::DeviceDescriptor;
use super::session::TransportSessions;
use crate::Result;
use serde::{Deserialize, Serialize};

/// Packed size of the trackpad config payload.
pub const PAYLOAD_LEN: usize = 19;

/// Trackpad configuration as the firmware stores it.
///
/// Multi-bit fields keep firmware ranges: `scroll_term`/`drag_term` are
/// 10-bit, `default_speed` 6-bit, `drag_strength` 5-bit, `scroll_step`
/// 4-bit. Encoding masks values down to those widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrackpadConfig {
    pub hf_waveform_number: u8,
    pub can_hf_for_layer: bool,
    pub can_drag: bool,
    pub scroll_term: u16,
    pub drag_term: u16,
    pub can_trackpad_layer: bool,
    pub can_reverse_scrolling_direction: bool,
    pub drag_strength_mode: bool,
    pub drag_strength: u8,
    pub default_speed: u8,
    pub scroll_step: u8,
    pub can_short_scroll: bool,
    pub tap_term: u16,
    pub swipe_term: u16,
    pub pinch_term: u16,
    pub gesture_term: u16,
    pub short_scroll_term: u16,
    pub pinch_distance: u16,
}

/// Pack a trackpad config into its 19-byte wire form.
pub fn encode_config(config: &TrackpadConfig) -> [u8; PAYLOAD_LEN] {
    let mut bytes = [0u8; PAYLOAD_LEN];
    bytes[0] = config.hf_waveform_number;
    bytes[1] = ((config.can_hf_for_layer as u8) << 7)
        | ((config.can_drag as u8) << 6)
        | ((config.scroll_term >> 4) & 0x3F) as u8;
    bytes[2] = (((config.scroll_term & 0x0F) << 4) as u8) | ((config.drag_term >> 6) & 0x0F) as u8;
    bytes[3] = (((config.drag_term & 0x3F) << 2) as u8)
        | ((config.can_trackpad_layer as u8) << 1)
        | config.can_reverse_scrolling_direction as u8;
    bytes[4] = ((config.drag_strength_mode as u8) << 7)
        | ((config.drag_strength & 0x1F) << 2)
        | ((config.default_speed >> 4) & 0x03);
    bytes[5] = ((config.default_speed & 0x0F) << 4) | (config.scroll_step & 0x0F);
    bytes[6] = (config.can_short_scroll as u8) << 7;
    bytes[7..9].copy_from_slice(&config.tap_term.to_be_bytes());
    bytes[9..11].copy_from_slice(&config.swipe_term.to_be_bytes());
    bytes[11..13].copy_from_slice(&config.pinch_term.to_be_bytes());
    bytes[13..15].copy_from_slice(&config.gesture_term.to_be_bytes());
    bytes[15..17].copy_from_slice(&config.short_scroll_term.to_be_bytes());
    bytes[17..19].copy_from_slice(&config.pinch_distance.to_be_bytes());
    bytes
}

/// Unpack a trackpad config payload. Bytes past the end of a short report
/// read as zero.
pub fn decode_config(payload: &[u8]) -> TrackpadConfig {
    let b1 = byte_at(payload, 1);
    let b2 = byte_at(payload, 2);
    let b3 = byte_at(payload, 3);
    let b4 = byte_at(payload, 4);
    let b5 = byte_at(payload, 5);
    TrackpadConfig {
        hf_waveform_number: byte_at(payload, 0),
        can_hf_for_layer: b1 & 0x80 != 0,
        can_drag: b1 & 0x40 != 0,
        scroll_term: (((b1 & 0x3F) as u16) << 4) | ((b2 & 0xF0) >> 4) as u16,
        drag_term: (((b2 & 0x0F) as u16) << 6) | ((b3 & 0xFC) >> 2) as u16,
        can_trackpad_layer: b3 & 0x02 != 0,
        can_reverse_scrolling_direction: b3 & 0x01 != 0,
        drag_strength_mode: b4 & 0x80 != 0,
        drag_strength: (b4 & 0x7C) >> 2,
        default_speed: ((b4 & 0x03) << 4) | ((b5 & 0xF0) >> 4),
        scroll_step: b5 & 0x0F,
        can_short_scroll: byte_at(payload, 6) & 0x80 != 0,
        tap_term: u16_be_at(payload, 7),
        swipe_term: u16_be_at(payload, 9),
        pinch_term: u16_be_at(payload, 11),
        gesture_term: u16_be_at(payload, 13),
        short_scroll_term: u16_be_at(payload, 15),
        pinch_distance: u16_be_at(payload, 17),
    }
}

/// Ask the firmware to report its trackpad config. The payload arrives later
/// through the read path; success only means the request went out.
pub async fn request_config(sessions: &TransportSessions, descriptor: &DeviceDescriptor) -> Result<()> {
    let frame = codec::encode_command(Opcode::CustomGetValue, GetAction::TrackpadGetValue.as_byte(), &[]);
    sessions.write_command(descriptor, &frame).await
}

/// Write a trackpad config to the firmware, then wait out the EEPROM settle
/// window so an immediately following get cannot race the persist.
pub async fn save_config(
    sessions: &TransportSessions,
    descriptor: &DeviceDescriptor,
    config: &TrackpadConfig,
) -> Result<()> {
    let frame = codec::encode_command(
        Opcode::CustomSetValue,
        SetAction::TrackpadSetValue.as_byte(),
        &encode_config(config),
    );
    sessions.write_command(descriptor, &frame).await?;
    tokio::time::sleep(sessions.timing().save_settle()).await;
    Ok(())
}
