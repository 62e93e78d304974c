//! LED color sub-protocol
//!
//! Wire form is 16 fixed bytes (enable flag plus five RGB triples) followed
//! by an optional layer table: one count byte, then `[layer_id, r, g, b]`
//! per entry. Saves push the combined frame; the firmware reports the fixed
//! block and the layer table under separate get actions.

use super::codec::{self, byte_at, GetAction, Opcode, SetAction};
use super::identity::DeviceDescriptor;
use super::session::TransportSessions;
use crate::Result;
use serde::{Deserialize, Serialize};

/// Length of the fixed (non-layer) part of the LED payload.
pub const FIXED_LEN: usize = 16;

/// Bytes per layer-table entry.
pub const LAYER_ENTRY_LEN: usize = 4;

/// One RGB triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// The fixed 16-byte LED configuration block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LedConfig {
    pub enabled: bool,
    /// Flash color while mouse-speed acceleration is active
    pub mouse_speed_accel: Rgb,
    /// Flash color while scroll-step acceleration is active
    pub scroll_step_accel: Rgb,
    pub pomodoro_work: Rgb,
    pub pomodoro_break: Rgb,
    pub pomodoro_long_break: Rgb,
}

/// Indicator color for one firmware layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LedLayer {
    pub layer: u8,
    pub color: Rgb,
}

/// Combined LED state: fixed block plus layer table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LedState {
    pub config: LedConfig,
    pub layers: Vec<LedLayer>,
}

fn rgb_at(payload: &[u8], index: usize) -> Rgb {
    Rgb::new(byte_at(payload, index), byte_at(payload, index + 1), byte_at(payload, index + 2))
}

/// Pack the fixed LED block.
pub fn encode_config(config: &LedConfig) -> [u8; FIXED_LEN] {
    let mut bytes = [0u8; FIXED_LEN];
    bytes[0] = config.enabled as u8;
    for (offset, rgb) in [
        (1, config.mouse_speed_accel),
        (4, config.scroll_step_accel),
        (7, config.pomodoro_work),
        (10, config.pomodoro_break),
        (13, config.pomodoro_long_break),
    ] {
        bytes[offset] = rgb.r;
        bytes[offset + 1] = rgb.g;
        bytes[offset + 2] = rgb.b;
    }
    bytes
}

/// Unpack the fixed LED block; missing bytes read as zero.
pub fn decode_config(payload: &[u8]) -> LedConfig {
    LedConfig {
        enabled: byte_at(payload, 0) != 0,
        mouse_speed_accel: rgb_at(payload, 1),
        scroll_step_accel: rgb_at(payload, 4),
        pomodoro_work: rgb_at(payload, 7),
        pomodoro_break: rgb_at(payload, 10),
        pomodoro_long_break: rgb_at(payload, 13),
    }
}

/// Pack a layer table as `[count, (layer, r, g, b)…]`. The count byte caps
/// the table at 255 entries; anything past that is dropped so the count
/// always matches the entries that follow.
pub fn encode_layers(layers: &[LedLayer]) -> Vec<u8> {
    let count = layers.len().min(u8::MAX as usize);
    let mut bytes = Vec::with_capacity(1 + count * LAYER_ENTRY_LEN);
    bytes.push(count as u8);
    for entry in &layers[..count] {
        bytes.push(entry.layer);
        bytes.push(entry.color.r);
        bytes.push(entry.color.g);
        bytes.push(entry.color.b);
    }
    bytes
}

/// Unpack a layer table. The count byte is trusted; entries past the end of
/// a short payload decode as zeros, mirroring the firmware's tolerance.
pub fn decode_layers(payload: &[u8]) -> Vec<LedLayer> {
    let count = byte_at(payload, 0) as usize;
    (0..count)
        .map(|i| {
            let base = 1 + i * LAYER_ENTRY_LEN;
            LedLayer {
                layer: byte_at(payload, base),
                color: rgb_at(payload, base + 1),
            }
        })
        .collect()
}

/// Pack the combined variable-length frame: fixed block, count, entries.
pub fn encode_state(state: &LedState) -> Vec<u8> {
    let mut bytes = encode_config(&state.config).to_vec();
    bytes.extend_from_slice(&encode_layers(&state.layers));
    bytes
}

/// Unpack the combined frame. A bare 16-byte payload yields an empty table.
pub fn decode_state(payload: &[u8]) -> LedState {
    LedState {
        config: decode_config(payload),
        layers: decode_layers(payload.get(FIXED_LEN..).unwrap_or(&[])),
    }
}

/// Ask the firmware for the fixed LED block (reply arrives via the read path).
pub async fn request_config(sessions: &TransportSessions, descriptor: &DeviceDescriptor) -> Result<()> {
    let frame = codec::encode_command(Opcode::CustomGetValue, GetAction::LedGetValue.as_byte(), &[]);
    sessions.write_command(descriptor, &frame).await
}

/// Ask the firmware for the per-layer color table.
pub async fn request_layers(sessions: &TransportSessions, descriptor: &DeviceDescriptor) -> Result<()> {
    let frame = codec::encode_command(Opcode::CustomGetValue, GetAction::LedLayerGetValue.as_byte(), &[]);
    sessions.write_command(descriptor, &frame).await
}

/// Write the combined LED state.
pub async fn save_state(
    sessions: &TransportSessions,
    descriptor: &DeviceDescriptor,
    state: &LedState,
) -> Result<()> {
    let frame = codec::encode_command(Opcode::CustomSetValue, SetAction::LedSetValue.as_byte(), &encode_state(state));
    sessions.write_command(descriptor, &frame).await
}

/// Write only the layer color table.
pub async fn save_layers(
    sessions: &TransportSessions,
    descriptor: &DeviceDescriptor,
    layers: &[LedLayer],
) -> Result<()> {
    let frame = codec::encode_command(
        Opcode::CustomSetValue,
        SetAction::LedLayerSetValue.as_byte(),
        &encode_layers(layers),
    );
    sessions.write_command(descriptor, &frame).await
}
