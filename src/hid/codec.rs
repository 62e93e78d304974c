//! Wire format for GPK firmware communication
//!
//! Frame layout, based on the firmware's raw HID handler:
//! - Outbound: `[0x00 (report id), 0xFA, opcode, action, payload…]`,
//!   zero-padded to the next 64-byte boundary
//! - Inbound: `[0xFA, opcode, action, payload…]` (no report id byte)
//!
//! Everything in this module is pure byte manipulation; no I/O.

/// Reports are padded to multiples of this many bytes.
pub const PACKET_PADDING: usize = 64;

/// First data byte of every GPK frame in both directions.
pub const REPORT_PREFIX: u8 = 0xFA;

/// Top-level command category byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Write a config value to the firmware
    CustomSetValue = 0x01,
    /// Request a config value from the firmware
    CustomGetValue = 0x02,
    /// One-shot operation (layer move, OLED write)
    GpkRcOperation = 0x03,
}

impl Opcode {
    /// Convert opcode to byte value
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parse opcode from byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Opcode::CustomSetValue),
            0x02 => Some(Opcode::CustomGetValue),
            0x03 => Some(Opcode::GpkRcOperation),
            _ => None,
        }
    }
}

/// Action ids under [`Opcode::CustomSetValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SetAction {
    /// Firmware acknowledgment that a set has been persisted
    ValueComplete = 0x01,
    TrackpadSetValue = 0x02,
    PomodoroSetValue = 0x03,
    LedSetValue = 0x04,
    LedLayerSetValue = 0x05,
}

impl SetAction {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(SetAction::ValueComplete),
            0x02 => Some(SetAction::TrackpadSetValue),
            0x03 => Some(SetAction::PomodoroSetValue),
            0x04 => Some(SetAction::LedSetValue),
            0x05 => Some(SetAction::LedLayerSetValue),
            _ => None,
        }
    }
}

/// Action ids under [`Opcode::CustomGetValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GetAction {
    DeviceGetValue = 0x01,
    TrackpadGetValue = 0x02,
    PomodoroGetValue = 0x03,
    PomodoroActiveGetValue = 0x04,
    LedGetValue = 0x05,
    LedLayerGetValue = 0x06,
}

impl GetAction {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(GetAction::DeviceGetValue),
            0x02 => Some(GetAction::TrackpadGetValue),
            0x03 => Some(GetAction::PomodoroGetValue),
            0x04 => Some(GetAction::PomodoroActiveGetValue),
            0x05 => Some(GetAction::LedGetValue),
            0x06 => Some(GetAction::LedLayerGetValue),
            _ => None,
        }
    }
}

/// Action ids under [`Opcode::GpkRcOperation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpAction {
    LayerMove = 0x01,
    OledWrite = 0x02,
}

impl OpAction {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(OpAction::LayerMove),
            0x02 => Some(OpAction::OledWrite),
            _ => None,
        }
    }
}

/// Decoded view of an inbound report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report<'a> {
    pub opcode: u8,
    pub action: u8,
    pub payload: &'a [u8],
}

/// Build an outbound command frame.
///
/// The leading `0x00` is the report-id placeholder the HID layer expects on
/// every platform. Padding follows the firmware's rule: the pad is
/// `64 - (len % 64)` and is appended even when the unpadded frame already
/// sits on a 64-byte boundary, so a 64-byte frame goes out as 128 bytes.
/// The firmware relies on that trailing block; do not "fix" it.
pub fn encode_command(opcode: Opcode, action: u8, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(4 + payload.len() + PACKET_PADDING);
    bytes.push(0x00);
    bytes.push(REPORT_PREFIX);
    bytes.push(opcode.as_byte());
    bytes.push(action);
    bytes.extend_from_slice(payload);

    let pad = PACKET_PADDING - (bytes.len() % PACKET_PADDING);
    bytes.resize(bytes.len() + pad, 0);
    bytes
}

/// Encode text for the OLED: one byte per UTF-16 code unit, code point
/// truncated to its low byte, NUL-terminated. Matches the firmware's
/// single-byte glyph table.
pub fn encode_text(text: &str) -> Vec<u8> {
    text.encode_utf16()
        .map(|unit| unit as u8)
        .chain(std::iter::once(0x00))
        .collect()
}

/// Decode an inbound report. Returns `None` unless the buffer starts with
/// [`REPORT_PREFIX`]; short buffers yield zeroed opcode/action and an empty
/// payload rather than failing (the firmware occasionally sends short reads
/// and expects the host to treat absent bytes as zero).
pub fn decode_report(buffer: &[u8]) -> Option<Report<'_>> {
    if buffer.first().copied() != Some(REPORT_PREFIX) {
        return None;
    }
    Some(Report {
        opcode: byte_at(buffer, 1),
        action: byte_at(buffer, 2),
        payload: buffer.get(3..).unwrap_or(&[]),
    })
}

/// Read a byte, substituting zero past the end of the buffer.
pub(crate) fn byte_at(buffer: &[u8], index: usize) -> u8 {
    buffer.get(index).copied().unwrap_or(0)
}

/// Read a big-endian u16, substituting zero for missing bytes.
pub(crate) fn u16_be_at(buffer: &[u8], index: usize) -> u16 {
    ((byte_at(buffer, index) as u16) << 8) | byte_at(buffer, index + 1) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_command_layout() {
        let frame = encode_command(Opcode::CustomGetValue, GetAction::DeviceGetValue.as_byte(), &[]);
        assert_eq!(frame.len(), PACKET_PADDING);
        assert_eq!(frame[0], 0x00);
        assert_eq!(frame[1], REPORT_PREFIX);
        assert_eq!(frame[2], 0x02);
        assert_eq!(frame[3], 0x01);
        assert!(frame[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_encode_command_payload_bytes() {
        let frame = encode_command(Opcode::CustomSetValue, SetAction::PomodoroSetValue.as_byte(), &[25, 5, 15]);
        assert_eq!(&frame[4..7], &[25, 5, 15]);
        assert_eq!(frame.len(), PACKET_PADDING);
    }

    #[test]
    fn test_padding_always_appended() {
        // 4 header bytes + 60 payload bytes = exactly 64 unpadded, which still
        // gets a full 64-byte pad block appended.
        let frame = encode_command(Opcode::CustomSetValue, 0x04, &[0xFF; 60]);
        assert_eq!(frame.len(), 2 * PACKET_PADDING);
        assert!(frame[64..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_padding_property_all_lengths() {
        for len in 0..=256usize {
            let payload = vec![0xAB; len];
            let frame = encode_command(Opcode::GpkRcOperation, 0x02, &payload);
            assert_eq!(frame.len() % PACKET_PADDING, 0, "len={}", len);
            assert!(!frame.is_empty(), "len={}", len);
            // Padding is never zero-length: the frame always outgrows header+payload.
            assert!(frame.len() > 4 + len, "len={}", len);
        }
    }

    #[test]
    fn test_encode_text_ascii() {
        assert_eq!(encode_text("GPK"), vec![b'G', b'P', b'K', 0x00]);
    }

    #[test]
    fn test_encode_text_truncates_code_units() {
        // U+2192 RIGHTWARDS ARROW is one UTF-16 code unit, 0x2192 -> 0x92.
        assert_eq!(encode_text("\u{2192}"), vec![0x92, 0x00]);
        // U+1D11E is a surrogate pair (0xD834, 0xDD1E) -> two truncated bytes.
        assert_eq!(encode_text("\u{1D11E}"), vec![0x34, 0x1E, 0x00]);
    }

    #[test]
    fn test_encode_text_empty_is_terminator_only() {
        assert_eq!(encode_text(""), vec![0x00]);
    }

    #[test]
    fn test_decode_report_requires_prefix() {
        assert!(decode_report(&[0x00, 0x02, 0x01]).is_none());
        assert!(decode_report(&[]).is_none());

        let buf = [REPORT_PREFIX, 0x02, 0x01, 0xAA, 0xBB];
        let report = decode_report(&buf).unwrap();
        assert_eq!(report.opcode, 0x02);
        assert_eq!(report.action, 0x01);
        assert_eq!(report.payload, &[0xAA, 0xBB]);
    }

    #[test]
    fn test_decode_report_short_buffer() {
        let report = decode_report(&[REPORT_PREFIX]).unwrap();
        assert_eq!(report.opcode, 0);
        assert_eq!(report.action, 0);
        assert!(report.payload.is_empty());

        let report = decode_report(&[REPORT_PREFIX, 0x03]).unwrap();
        assert_eq!(report.opcode, 0x03);
        assert_eq!(report.action, 0);
    }

    #[test]
    fn test_opcode_roundtrip() {
        for opcode in [Opcode::CustomSetValue, Opcode::CustomGetValue, Opcode::GpkRcOperation] {
            assert_eq!(Opcode::from_byte(opcode.as_byte()), Some(opcode));
        }
        assert_eq!(Opcode::from_byte(0x00), None);
        assert_eq!(Opcode::from_byte(0xFF), None);
    }

    #[test]
    fn test_action_tables() {
        assert_eq!(SetAction::ValueComplete.as_byte(), 0x01);
        assert_eq!(SetAction::LedLayerSetValue.as_byte(), 0x05);
        assert_eq!(GetAction::DeviceGetValue.as_byte(), 0x01);
        assert_eq!(GetAction::LedLayerGetValue.as_byte(), 0x06);
        assert_eq!(OpAction::LayerMove.as_byte(), 0x01);
        assert_eq!(OpAction::OledWrite.as_byte(), 0x02);
        assert_eq!(GetAction::from_byte(0x04), Some(GetAction::PomodoroActiveGetValue));
        assert_eq!(OpAction::from_byte(0x07), None);
    }

    #[test]
    fn test_u16_be_at_zero_fill() {
        assert_eq!(u16_be_at(&[0x12, 0x34], 0), 0x1234);
        assert_eq!(u16_be_at(&[0x12], 0), 0x1200);
        assert_eq!(u16_be_at(&[], 0), 0);
    }
}
