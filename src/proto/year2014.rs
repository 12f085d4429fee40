//! The 2014 season: a fixed 1024-byte robot packet, a different control
//! bitfield, and a CRC32 trailer, different enough from 2015+ that it gets
//! its own [`Protocol`] implementation rather than a branch in
//! [`super::modern`].
//!
//! Fixed fields: the control enum, joystick layout (6 axes + a 16-bit
//! button field per joystick, up to 4 joysticks starting at offset 8), the
//! DS-version signature at offset 72, and the CRC32 trailer at the last 4
//! bytes. The CRC32 polynomial/seed are an open question left undocumented
//! by any source this crate could ground on; it uses `CRC-32/ISO-HDLC` with
//! a zero seed, the `crc` crate's default and the most common CRC32
//! variant, and treats that as a documented assumption (see DESIGN.md)
//! rather than deferring 2014 support entirely.

use std::sync::atomic::{AtomicBool, Ordering};

use crc::{CRC_32_ISO_HDLC, Crc};

use super::common::{decode_voltage, encode_voltage};
use super::{FmsBuildContext, FmsParseOutput, Protocol, RobotBuildContext, RobotParseOutput, SocketSpec};
use crate::config::ControlMode;
use crate::socket::SocketKind;
use crate::util::ip;

const PACKET_LEN: usize = 1024;
const SIGNATURE_OFFSET: usize = 72;
const SIGNATURE: &[u8; 8] = b"04011600";
const CRC_OFFSET: usize = PACKET_LEN - 4;
const MAX_JOYSTICKS: usize = 4;
const AXES_PER_JOYSTICK: usize = 6;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct ControlBits2014: u8 {
        const ESTOP_OFF = 0x40;
        const TEST = 0x02;
        const AUTONOMOUS = 0x10;
        const ENABLED = 0x20;
        const FMS_CONNECTED = 0x08;
        const RESYNC = 0x04;
        const REBOOT = 0x80;
    }
}

pub struct Year2014 {
    reboot_pending: AtomicBool,
    resync_pending: AtomicBool,
}

impl Year2014 {
    pub fn new() -> Self {
        Year2014 {
            reboot_pending: AtomicBool::new(false),
            resync_pending: AtomicBool::new(true),
        }
    }
}

impl Default for Year2014 {
    fn default() -> Self {
        Year2014::new()
    }
}

impl Protocol for Year2014 {
    fn name(&self) -> &'static str {
        "FRC 2014"
    }

    fn fms_address(&self, _team: u32) -> String {
        String::new()
    }

    fn radio_address(&self, team: u32) -> String {
        ip(10, team, 1)
    }

    fn robot_address(&self, team: u32) -> String {
        ip(10, team, 2)
    }

    fn fms_socket(&self) -> SocketSpec {
        SocketSpec { in_port: 1120, out_port: 1160, kind: SocketKind::Udp, broadcast: false }
    }

    /// No radio packet payload is defined for this season.
    fn radio_socket(&self) -> SocketSpec {
        SocketSpec { in_port: 0, out_port: 0, kind: SocketKind::Disabled, broadcast: false }
    }

    fn robot_socket(&self) -> SocketSpec {
        SocketSpec { in_port: 1150, out_port: 1110, kind: SocketKind::Udp, broadcast: false }
    }

    /// 2014 has no netconsole UDP port of its own; it instead carries
    /// joystick/match-info extensions over TCP (the socket is opened but
    /// the extension framing itself isn't implemented, see DESIGN.md).
    fn netconsole_socket(&self) -> SocketSpec {
        SocketSpec { in_port: 0, out_port: 0, kind: SocketKind::Disabled, broadcast: false }
    }

    fn fms_send_interval_ms(&self) -> u64 {
        500
    }

    fn radio_send_interval_ms(&self) -> u64 {
        0
    }

    fn robot_send_interval_ms(&self) -> u64 {
        20
    }

    fn max_voltage(&self) -> f32 {
        13.0
    }

    fn build_robot_packet(&self, ctx: &RobotBuildContext<'_>) -> Vec<u8> {
        let mut data = vec![0u8; PACKET_LEN];

        data[0] = (ctx.seq >> 8) as u8;
        data[1] = (ctx.seq & 0xff) as u8;

        let mut control = if ctx.emergency_stopped {
            ControlBits2014::empty()
        } else {
            let mut c = ControlBits2014::ESTOP_OFF;
            c |= match ctx.control_mode {
                ControlMode::Test => ControlBits2014::TEST,
                ControlMode::Autonomous => ControlBits2014::AUTONOMOUS,
                ControlMode::Teleoperated => ControlBits2014::empty(),
            };
            if ctx.robot_enabled {
                c |= ControlBits2014::ENABLED;
            }
            if ctx.fms_connected {
                c |= ControlBits2014::FMS_CONNECTED;
            }
            if self.resync_pending.load(Ordering::Relaxed) {
                c |= ControlBits2014::RESYNC;
            }
            c
        };
        if self.reboot_pending.load(Ordering::Relaxed) {
            control = ControlBits2014::REBOOT;
        }
        data[2] = control.bits();
        data[3] = 0x00; // digital inputs, unused by this crate

        // station byte: alliance packed in the high bit, position (1-3) in
        // the low bits. The single-byte station representation is used
        // here rather than two separate ASCII codes that would collide at
        // the same offset.
        let alliance_bit = match ctx.station < 3 {
            true => 0u8,
            false => 0x80,
        };
        let position = (ctx.station % 3) + 1;
        data[6] = alliance_bit | position;

        for (i, js) in ctx.joysticks.iter().take(MAX_JOYSTICKS).enumerate() {
            let base = 8 + i * (AXES_PER_JOYSTICK + 2);
            for axis in 0..AXES_PER_JOYSTICK {
                let value = js.axes().get(axis).copied().unwrap_or(0.0);
                data[base + axis] = (value.clamp(-1.0, 1.0) * 127.0) as i8 as u8;
            }
            let mut buttons: u16 = 0;
            for (bit, &pressed) in js.buttons().iter().enumerate().take(16) {
                if pressed {
                    buttons |= 1 << bit;
                }
            }
            data[base + AXES_PER_JOYSTICK] = (buttons >> 8) as u8;
            data[base + AXES_PER_JOYSTICK + 1] = (buttons & 0xff) as u8;
        }

        data[SIGNATURE_OFFSET..SIGNATURE_OFFSET + SIGNATURE.len()].copy_from_slice(SIGNATURE);

        let checksum = CRC32.checksum(&data[..CRC_OFFSET]);
        data[CRC_OFFSET..].copy_from_slice(&checksum.to_be_bytes());

        data
    }

    fn parse_robot_packet(&self, data: &[u8], out: &mut RobotParseOutput) -> bool {
        if data.len() < PACKET_LEN {
            return false;
        }

        let checksum = CRC32.checksum(&data[..CRC_OFFSET]);
        if checksum.to_be_bytes() != data[CRC_OFFSET..] {
            return false;
        }

        let status = data[2];
        *out = RobotParseOutput {
            emergency_stopped: status & ControlBits2014::ESTOP_OFF.bits() == 0,
            robot_code: data[3] != 0,
            voltage: decode_voltage(data[4], data[5]),
            ..RobotParseOutput::default()
        };

        true
    }

    fn build_fms_packet(&self, ctx: &FmsBuildContext) -> Vec<u8> {
        let (upper, lower) = encode_voltage(ctx.voltage);
        vec![
            (ctx.seq >> 8) as u8,
            (ctx.seq & 0xff) as u8,
            0x00,
            if ctx.control_mode == ControlMode::Autonomous { 0x53 } else { 0x43 },
            (ctx.team >> 8) as u8,
            (ctx.team & 0xff) as u8,
            upper,
            lower,
        ]
    }

    /// The 2014 FMS packet is a length check and nothing else: the season's
    /// own `read_fms_packet` never decoded control mode or station from the
    /// FMS packet either (see DESIGN.md). This isn't a gap introduced by
    /// this crate, it's a faithful reproduction of that season's protocol.
    fn parse_fms_packet(&self, data: &[u8], _out: &mut FmsParseOutput) -> bool {
        data.len() > 8
    }

    fn reboot_robot(&self) {
        self.reboot_pending.store(true, Ordering::Relaxed);
    }

    /// A no-op for this season: `original_source/src/protocols/frc_2014.c`
    /// sets its own `RESTART_CODE` flag here but never reads it back when
    /// building the control byte (only `REBOOT_ROBOT` is), so there is no
    /// wire bit to raise without inventing one.
    fn restart_robot_code(&self) {}

    fn reset_robot(&self) {
        self.resync_pending.store(true, Ordering::Relaxed);
        self.reboot_pending.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::joystick::Joystick;

    fn protocol() -> Year2014 {
        Year2014::new()
    }

    fn sample_ctx<'a>(joysticks: &'a [Joystick]) -> RobotBuildContext<'a> {
        RobotBuildContext {
            seq: 1,
            station: 0,
            control_mode: ControlMode::Teleoperated,
            robot_enabled: true,
            fms_connected: false,
            emergency_stopped: false,
            robot_comms: true,
            joysticks,
            send_joysticks: true,
            send_timezone: false,
            timezone_name: "UTC",
        }
    }

    #[test]
    fn robot_packet_is_fixed_1024_bytes_with_signature_and_crc() {
        let p = protocol();
        let packet = p.build_robot_packet(&sample_ctx(&[]));
        assert_eq!(packet.len(), PACKET_LEN);
        assert_eq!(&packet[SIGNATURE_OFFSET..SIGNATURE_OFFSET + 8], SIGNATURE);

        let checksum = CRC32.checksum(&packet[..CRC_OFFSET]);
        assert_eq!(&packet[CRC_OFFSET..], &checksum.to_be_bytes());
    }

    #[test]
    fn control_byte_reflects_enabled_and_mode() {
        let p = protocol();
        let packet = p.build_robot_packet(&sample_ctx(&[]));
        let expected = ControlBits2014::ESTOP_OFF | ControlBits2014::ENABLED | ControlBits2014::RESYNC;
        assert_eq!(packet[2], expected.bits());
    }

    #[test]
    fn estop_forces_control_byte_to_zero() {
        let p = protocol();
        let mut ctx = sample_ctx(&[]);
        ctx.emergency_stopped = true;
        let packet = p.build_robot_packet(&ctx);
        assert_eq!(packet[2], 0x00);
    }

    #[test]
    fn parse_rejects_corrupted_crc() {
        let p = protocol();
        let mut packet = p.build_robot_packet(&sample_ctx(&[]));
        let last = packet.len() - 1;
        packet[last] ^= 0xff;
        let mut out = RobotParseOutput::default();
        assert!(!p.parse_robot_packet(&packet, &mut out));
    }

    #[test]
    fn parse_accepts_well_formed_packet_and_recovers_code_presence() {
        let p = protocol();
        let packet = p.build_robot_packet(&sample_ctx(&[]));
        let mut out = RobotParseOutput::default();
        assert!(p.parse_robot_packet(&packet, &mut out));
        assert!(!out.emergency_stopped);
    }

    #[tokio::test]
    async fn joystick_axes_are_written_as_scaled_signed_bytes() {
        let events = crate::events::EventQueue::new(1);
        let registry = crate::joystick::JoystickRegistry::new(events.sender());
        registry.add(2, 0, 1).await;
        registry.set_axis(0, 0, 1.0).await;
        let joysticks = registry.snapshot(true).await;

        let p = protocol();
        let packet = p.build_robot_packet(&sample_ctx(&joysticks));
        assert_eq!(packet[8] as i8, 127);
    }
}
