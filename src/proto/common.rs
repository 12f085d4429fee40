//! Shared wire primitives for the 2015-2020 protocol family: the control and
//! request bitflags, and the length-prefixed tag encoding for
//! joystick/datetime/timezone blocks.

use bytes::{BufMut, BytesMut};
use chrono::{Datelike, Timelike, Utc};

use crate::config::ControlMode;
use crate::joystick::Joystick;

bitflags! {
    /// Control byte on outgoing robot packets.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ControlBits: u8 {
        const TEST = 0x01;
        const AUTONOMOUS = 0x02;
        const ENABLED = 0x04;
        const FMS_CONNECTED = 0x08;
        const ESTOP = 0x80;
    }
}

impl ControlBits {
    pub fn for_mode(mode: ControlMode, enabled: bool, fms_connected: bool, estopped: bool) -> ControlBits {
        let mut bits = match mode {
            ControlMode::Test => ControlBits::TEST,
            ControlMode::Autonomous => ControlBits::AUTONOMOUS,
            ControlMode::Teleoperated => ControlBits::empty(),
        };
        if enabled {
            bits |= ControlBits::ENABLED;
        }
        if fms_connected {
            bits |= ControlBits::FMS_CONNECTED;
        }
        if estopped {
            bits |= ControlBits::ESTOP;
        }
        bits
    }
}

bitflags! {
    /// Request byte on outgoing robot packets.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RequestBits: u8 {
        const NORMAL = 0x80;
        const RESTART_CODE = 0x04;
        const REBOOT = 0x08;
    }
}

impl RequestBits {
    pub fn for_request(robot_comms: bool, reboot: bool, restart_code: bool) -> RequestBits {
        if !robot_comms {
            return RequestBits::empty();
        }
        let mut bits = RequestBits::NORMAL;
        if reboot {
            bits |= RequestBits::REBOOT;
        }
        if restart_code {
            bits |= RequestBits::RESTART_CODE;
        }
        bits
    }
}

bitflags! {
    /// FMS control byte on the DS→FMS packet, a distinct
    /// bitfield from [`ControlBits`] that shares the mode/enabled/estop bits
    /// but adds FMS-specific comms-status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FmsControlBits: u8 {
        const TEST = 0x01;
        const AUTONOMOUS = 0x02;
        const ENABLED = 0x04;
        const ROBOT_PING = 0x08;
        const RADIO_PING = 0x10;
        const ROBOT_COMMS = 0x20;
        const ESTOP = 0x80;
    }
}

impl FmsControlBits {
    pub fn for_state(
        mode: ControlMode,
        enabled: bool,
        estopped: bool,
        radio_comms: bool,
        robot_comms: bool,
    ) -> FmsControlBits {
        let mut bits = match mode {
            ControlMode::Test => FmsControlBits::TEST,
            ControlMode::Autonomous => FmsControlBits::AUTONOMOUS,
            ControlMode::Teleoperated => FmsControlBits::empty(),
        };
        if enabled {
            bits |= FmsControlBits::ENABLED;
        }
        if estopped {
            bits |= FmsControlBits::ESTOP;
        }
        if radio_comms {
            bits |= FmsControlBits::RADIO_PING;
        }
        if robot_comms {
            bits |= FmsControlBits::ROBOT_PING | FmsControlBits::ROBOT_COMMS;
        }
        bits
    }
}

/// Encodes a battery voltage as the two-byte wire form:
/// `upper = floor(V)`, `lower = floor(fract(V) * 256)`.
pub fn encode_voltage(volts: f32) -> (u8, u8) {
    let volts = volts.max(0.0);
    let upper = volts.trunc() as u8;
    let lower = ((volts.fract()) * 256.0) as u8;
    (upper, lower)
}

/// Decodes the two-byte wire form back to volts: `upper + lower / 255`. The
/// asymmetric divisor (255, not 256) is preserved for wire compatibility
/// with existing roboRIO firmware.
pub fn decode_voltage(upper: u8, lower: u8) -> f32 {
    upper as f32 + lower as f32 / 255.0
}

/// Packs up to 16 button states into a 2-byte big-endian bitfield, button 0
/// at bit 0 of the low-order byte.
fn pack_buttons(buttons: &[bool]) -> [u8; 2] {
    let mut word: u16 = 0;
    for (i, &pressed) in buttons.iter().enumerate().take(16) {
        if pressed {
            word |= 1 << i;
        }
    }
    word.to_be_bytes()
}

/// Appends one joystick's tag block (`0x0c`): axes count, axes (signed
/// bytes, `f * 127` rounded toward zero and clamped), buttons count, 2-byte
/// big-endian button bitfield, hats count, then each hat as a 2-byte
/// big-endian angle.
pub fn encode_joystick_tag(buf: &mut BytesMut, js: &Joystick) {
    let axes: Vec<i8> = js
        .axes()
        .iter()
        .map(|&f| (f.clamp(-1.0, 1.0) * 127.0).trunc() as i8)
        .collect();
    let button_bytes = pack_buttons(js.buttons());

    // Reproduces the original DS's get_joystick_size formula exactly
    // (buttons + axes + 2*hats + 5), not a self-consistent payload length,
    // since the robot-side parser expects this exact size byte.
    let size = js.buttons().len() + axes.len() + 2 * js.hats().len() + 5;
    buf.put_u8(size as u8);
    buf.put_u8(0x0c);
    buf.put_u8(axes.len() as u8);
    for a in &axes {
        buf.put_i8(*a);
    }
    buf.put_u8(js.buttons().len() as u8);
    buf.put_slice(&button_bytes);
    buf.put_u8(js.hats().len() as u8);
    for h in js.hats() {
        buf.put_i16(*h);
    }
}

/// Appends the date/time tag (`0x0f`) and timezone tag (`0x10`), sent only
/// when the robot's previous packet requested it.
pub fn encode_timezone_block(buf: &mut BytesMut, tz_name: &str) {
    let now = Utc::now();
    let millis = now.timestamp_subsec_millis();
    let time = now.time();
    let date = now.date_naive();

    buf.put_u8(0x0f);
    buf.put_u32(millis);
    buf.put_u8(time.second() as u8);
    buf.put_u8(time.minute() as u8);
    buf.put_u8(time.hour() as u8);
    buf.put_u8(date.ordinal0() as u8);
    buf.put_u8(date.month0() as u8);
    buf.put_u8((date.year() - 1900) as u8);

    let tz_bytes = tz_name.as_bytes();
    buf.put_u8(0x10);
    buf.put_u8(tz_bytes.len() as u8);
    buf.put_slice(tz_bytes);
}

/// Normalizes one core's CPU utilization quarters into a single percentage
/// using the `(crit + 0.9*above + 0.75*norm + 0.25*low) / (crit+above+norm+low)`
/// weighting.
pub fn combine_cpu_quarters(critical: f32, above_normal: f32, normal: f32, low: f32) -> f32 {
    let total = critical + above_normal + normal + low;
    if total == 0.0 {
        return 0.0;
    }
    (critical + 0.9 * above_normal + 0.75 * normal + 0.25 * low) / total
}

/// Fields needed to build the robot packet's fixed 7-byte header: 2-byte
/// counter, tag byte `0x01`, control byte, request byte, station byte.
pub struct RobotPacketFields {
    pub seq: u16,
    pub control: ControlBits,
    pub request: RequestBits,
    pub station: u8,
}

pub fn build_robot_header(buf: &mut BytesMut, fields: &RobotPacketFields) {
    buf.put_u16(fields.seq);
    buf.put_u8(0x01);
    buf.put_u8(fields.control.bits());
    buf.put_u8(fields.request.bits());
    buf.put_u8(fields.station);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn voltage_round_trips_within_tolerance() {
        let (upper, lower) = encode_voltage(12.5);
        assert_eq!((upper, lower), (12, 128));
        let decoded = decode_voltage(upper, lower);
        assert!((decoded - 12.502).abs() < 0.01, "decoded={decoded}");
    }

    #[test]
    fn control_bits_match_the_documented_bit_layout() {
        let bits = ControlBits::for_mode(ControlMode::Autonomous, true, true, false);
        assert_eq!(bits.bits(), 0x02 | 0x04 | 0x08);

        let estopped = ControlBits::for_mode(ControlMode::Teleoperated, false, false, true);
        assert_eq!(estopped.bits(), 0x80);
    }

    #[test]
    fn request_bits_are_disconnected_without_robot_comms() {
        assert_eq!(RequestBits::for_request(false, true, true).bits(), 0x00);
        assert_eq!(RequestBits::for_request(true, false, false).bits(), 0x80);
        assert_eq!(RequestBits::for_request(true, true, false).bits(), 0x80 | 0x08);
    }

    #[test]
    fn fms_control_bits_set_ping_and_comms_on_robot_presence() {
        let bits = FmsControlBits::for_state(ControlMode::Teleoperated, false, false, true, true);
        assert!(bits.contains(FmsControlBits::RADIO_PING));
        assert!(bits.contains(FmsControlBits::ROBOT_PING));
        assert!(bits.contains(FmsControlBits::ROBOT_COMMS));
    }
}
