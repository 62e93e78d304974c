//! Pomodoro timer sub-protocol
//!
//! Two payloads share one packed state byte (`[7] timer_active,
//! [6] notify_haptic_enable, [5] continuous_mode, [1..0] phase`):
//! the 8-byte stored configuration and the 5-byte live countdown status the
//! firmware pushes while the timer runs.

use super::codec::{self, byte_at, GetAction, Opcode, SetAction};
use super::identity::DeviceDescriptor;
use super::session::TransportSessions;
use crate::Result;
use serde::{Deserialize, Serialize};

/// Packed size of the stored pomodoro config.
pub const CONFIG_LEN: usize = 8;

/// Packed size of the live status payload.
pub const ACTIVE_STATUS_LEN: usize = 5;

/// Timer phase carried in the low two bits of the state byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum PomodoroPhase {
    #[default]
    Work = 0,
    Break = 1,
    LongBreak = 2,
}

impl PomodoroPhase {
    /// Two-bit field; the firmware never emits 3, which reads as `Work`.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            1 => PomodoroPhase::Break,
            2 => PomodoroPhase::LongBreak,
            _ => PomodoroPhase::Work,
        }
    }

    pub fn as_bits(self) -> u8 {
        self as u8
    }
}

/// Stored pomodoro configuration (8 bytes on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PomodoroConfig {
    /// Work phase length, minutes
    pub work_time: u8,
    /// Short break length, minutes
    pub break_time: u8,
    /// Long break length, minutes
    pub long_break_time: u8,
    /// Work phases per long-break cycle
    pub work_interval: u8,
    /// Haptic pattern id played entering work
    pub work_hf_pattern: u8,
    /// Haptic pattern id played entering a break
    pub rest_hf_pattern: u8,
    pub timer_active: bool,
    pub notify_haptic_enable: bool,
    pub continuous_mode: bool,
    pub phase: PomodoroPhase,
    pub pomodoro_cycle: u8,
}

/// Live countdown status (5 bytes on the wire; firmware-pushed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PomodoroActiveStatus {
    pub timer_active: bool,
    pub notify_haptic_enable: bool,
    pub continuous_mode: bool,
    pub phase: PomodoroPhase,
    pub minutes: u8,
    pub seconds: u8,
    pub current_work_interval: u8,
    pub current_pomodoro_cycle: u8,
}

fn pack_state(timer_active: bool, notify_haptic_enable: bool, continuous_mode: bool, phase: PomodoroPhase) -> u8 {
    ((timer_active as u8) << 7)
        | ((notify_haptic_enable as u8) << 6)
        | ((continuous_mode as u8) << 5)
        | phase.as_bits()
}

/// Pack a pomodoro config into its 8-byte wire form.
pub fn encode_config(config: &PomodoroConfig) -> [u8; CONFIG_LEN] {
    [
        config.work_time,
        config.break_time,
        config.long_break_time,
        config.work_interval,
        config.work_hf_pattern,
        config.rest_hf_pattern,
        pack_state(
            config.timer_active,
            config.notify_haptic_enable,
            config.continuous_mode,
            config.phase,
        ),
        config.pomodoro_cycle,
    ]
}

/// Unpack a pomodoro config payload; missing bytes read as zero.
pub fn decode_config(payload: &[u8]) -> PomodoroConfig {
    let state = byte_at(payload, 6);
    PomodoroConfig {
        work_time: byte_at(payload, 0),
        break_time: byte_at(payload, 1),
        long_break_time: byte_at(payload, 2),
        work_interval: byte_at(payload, 3),
        work_hf_pattern: byte_at(payload, 4),
        rest_hf_pattern: byte_at(payload, 5),
        timer_active: state & 0x80 != 0,
        notify_haptic_enable: state & 0x40 != 0,
        continuous_mode: state & 0x20 != 0,
        phase: PomodoroPhase::from_bits(state),
        pomodoro_cycle: byte_at(payload, 7),
    }
}

/// Unpack a live status payload; missing bytes read as zero.
pub fn decode_active_status(payload: &[u8]) -> PomodoroActiveStatus {
    let state = byte_at(payload, 0);
    PomodoroActiveStatus {
        timer_active: state & 0x80 != 0,
        notify_haptic_enable: state & 0x40 != 0,
        continuous_mode: state & 0x20 != 0,
        phase: PomodoroPhase::from_bits(state),
        minutes: byte_at(payload, 1),
        seconds: byte_at(payload, 2),
        current_work_interval: byte_at(payload, 3),
        current_pomodoro_cycle: byte_at(payload, 4),
    }
}

/// Pack a live status (used by tests and exports; the device is the usual producer).
pub fn encode_active_status(status: &PomodoroActiveStatus) -> [u8; ACTIVE_STATUS_LEN] {
    [
        pack_state(
            status.timer_active,
            status.notify_haptic_enable,
            status.continuous_mode,
            status.phase,
        ),
        status.minutes,
        status.seconds,
        status.current_work_interval,
        status.current_pomodoro_cycle,
    ]
}

/// Ask the firmware for its stored pomodoro config (reply arrives via the read path).
pub async fn request_config(sessions: &TransportSessions, descriptor: &DeviceDescriptor) -> Result<()> {
    let frame = codec::encode_command(Opcode::CustomGetValue, GetAction::PomodoroGetValue.as_byte(), &[]);
    sessions.write_command(descriptor, &frame).await
}

/// Ask the firmware for the live countdown snapshot.
pub async fn request_active_status(sessions: &TransportSessions, descriptor: &DeviceDescriptor) -> Result<()> {
    let frame = codec::encode_command(Opcode::CustomGetValue, GetAction::PomodoroActiveGetValue.as_byte(), &[]);
    sessions.write_command(descriptor, &frame).await
}

/// Write a pomodoro config, then wait out the EEPROM settle window.
pub async fn save_config(
    sessions: &TransportSessions,
    descriptor: &DeviceDescriptor,
    config: &PomodoroConfig,
) -> Result<()> {
    let frame = codec::encode_command(
        Opcode::CustomSetValue,
        SetAction::PomodoroSetValue.as_byte(),
        &encode_config(config),
    );
    sessions.write_command(descriptor, &frame).await?;
    tokio::time::sleep(sessions.timing().save_settle()).await;
    Ok(())
}
