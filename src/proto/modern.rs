//! The shared 2015/2016/2018/2019/2020 protocol family. These seasons'
//! wire formats are near-identical, differing only in the robot hostname
//! format, the netconsole input port (2015 only), and the protocol's
//! display name. Rather than five structurally-duplicated `Protocol`
//! implementations, this module carries one implementation parameterized
//! over [`ProtocolYear`].

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{BufMut, BytesMut};

use super::common::{
    ControlBits, FmsControlBits, RequestBits, RobotPacketFields, build_robot_header,
    decode_voltage, encode_joystick_tag, encode_timezone_block, encode_voltage,
};
use super::{
    FmsBuildContext, FmsParseOutput, Protocol, ProtocolYear, RobotBuildContext, RobotParseOutput,
    SocketSpec,
};
use crate::config::{Alliance, ControlMode, Position};
use crate::socket::SocketKind;
use crate::util::ip;

const RAM_TOTAL_BYTES: f32 = 256_000_000.0;
const DISK_TOTAL_BYTES: f32 = 512_000_000.0;

pub struct ModernProtocol {
    year: ProtocolYear,
    reboot_pending: AtomicBool,
    restart_pending: AtomicBool,
}

impl ModernProtocol {
    pub fn new(year: ProtocolYear) -> Self {
        ModernProtocol {
            year,
            reboot_pending: AtomicBool::new(false),
            restart_pending: AtomicBool::new(false),
        }
    }

    /// 2015 exposes a netconsole *input* port the later seasons dropped;
    /// everyone keeps the same output port.
    fn netconsole_in_port(&self) -> u16 {
        match self.year {
            ProtocolYear::Y2015 => 6666,
            _ => 0,
        }
    }
}

impl Protocol for ModernProtocol {
    fn name(&self) -> &'static str {
        match self.year {
            ProtocolYear::Y2015 => "FRC 2015",
            ProtocolYear::Y2016 => "FRC 2016",
            ProtocolYear::Y2018 => "FRC 2018",
            ProtocolYear::Y2019 => "FRC 2019",
            ProtocolYear::Y2020 => "FRC 2020",
            ProtocolYear::Y2014 => unreachable!("2014 has its own Protocol impl"),
        }
    }

    /// The FMS address is unknown until its packet reveals its own source
    /// address; an empty host string falls back to the wildcard address at
    /// socket-resolve time.
    fn fms_address(&self, _team: u32) -> String {
        String::new()
    }

    fn radio_address(&self, team: u32) -> String {
        ip(10, team, 1)
    }

    fn robot_address(&self, team: u32) -> String {
        match self.year {
            ProtocolYear::Y2015 => format!("roboRIO-{team}.local"),
            _ => format!("roboRIO-{team}-FRC.local"),
        }
    }

    fn fms_socket(&self) -> SocketSpec {
        SocketSpec { in_port: 1120, out_port: 1160, kind: SocketKind::Udp, broadcast: false }
    }

    /// No season defines a radio packet payload worth inventing a wire
    /// format for (see DESIGN.md): the radio endpoint stays disabled, so
    /// radio comms tracks only whatever the host sets directly.
    fn radio_socket(&self) -> SocketSpec {
        SocketSpec { in_port: 0, out_port: 0, kind: SocketKind::Disabled, broadcast: false }
    }

    fn robot_socket(&self) -> SocketSpec {
        SocketSpec { in_port: 1150, out_port: 1110, kind: SocketKind::Udp, broadcast: false }
    }

    fn netconsole_socket(&self) -> SocketSpec {
        SocketSpec {
            in_port: self.netconsole_in_port(),
            out_port: 6668,
            kind: SocketKind::Udp,
            broadcast: true,
        }
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
        let mut buf = BytesMut::with_capacity(64);
        let control =
            ControlBits::for_mode(ctx.control_mode, ctx.robot_enabled, ctx.fms_connected, ctx.emergency_stopped);
        let request = RequestBits::for_request(
            ctx.robot_comms,
            self.reboot_pending.load(Ordering::Relaxed),
            self.restart_pending.load(Ordering::Relaxed),
        );
        build_robot_header(
            &mut buf,
            &RobotPacketFields { seq: ctx.seq, control, request, station: ctx.station },
        );

        if ctx.send_timezone {
            encode_timezone_block(&mut buf, ctx.timezone_name);
        } else if ctx.send_joysticks {
            for js in ctx.joysticks {
                encode_joystick_tag(&mut buf, js);
            }
        }

        buf.to_vec()
    }

    fn parse_robot_packet(&self, data: &[u8], out: &mut RobotParseOutput) -> bool {
        if data.len() < 7 {
            return false;
        }
        let control = data[3];
        let status = data[4];
        // The request byte lives one past the guaranteed 7-byte minimum;
        // a packet that's exactly 7 bytes just carries no request state.
        let request = data.get(7).copied().unwrap_or(0);

        *out = RobotParseOutput {
            emergency_stopped: control & 0x80 != 0,
            robot_code: status & 0x20 != 0,
            voltage: decode_voltage(data[5], data[6]),
            wants_timezone: request == 0x01,
            ..RobotParseOutput::default()
        };

        let mut idx = 8;
        while idx + 1 < data.len() {
            let len = data[idx] as usize;
            let tag_id = data[idx + 1];
            let payload_start = idx + 2;
            let data_len = len.saturating_sub(1);
            let payload_end = payload_start + data_len;
            if payload_end > data.len() {
                break;
            }
            let payload = &data[payload_start..payload_end];
            let float_at = |o: usize| f32::from_be_bytes(payload[o..o + 4].try_into().unwrap());

            match tag_id {
                0x0e if payload.len() >= 4 => {
                    out.can_pct = Some(float_at(0).clamp(0.0, 100.0) as u8);
                }
                0x05 if payload.len() >= 36 => {
                    // Four quarters (crit/above/normal/low) per core, each a
                    // 4-byte float. Unlike CAN/Disk, the CPU tag's floats
                    // start 4 bytes into the payload, not at its front.
                    let quarter = |core: usize| {
                        let base = 4 + core * 16;
                        super::common::combine_cpu_quarters(
                            float_at(base),
                            float_at(base + 4),
                            float_at(base + 8),
                            float_at(base + 12),
                        )
                    };
                    let avg = (quarter(0) + quarter(1)) / 2.0 * 100.0;
                    out.cpu_pct = Some(avg.clamp(0.0, 100.0) as u8);
                }
                0x06 if payload.len() >= 8 => {
                    // Like the CPU tag, the RAM tag's float starts 4 bytes
                    // into the payload rather than at its front.
                    let free = float_at(4);
                    let used_pct = 100.0 - (free / RAM_TOTAL_BYTES * 100.0);
                    out.ram_pct = Some(used_pct.clamp(0.0, 100.0) as u8);
                }
                0x04 if payload.len() >= 4 => {
                    let free = float_at(0);
                    let used_pct = 100.0 - (free / DISK_TOTAL_BYTES * 100.0);
                    out.disk_pct = Some(used_pct.clamp(0.0, 100.0) as u8);
                }
                _ => {}
            }

            idx = payload_end;
        }

        true
    }

    fn build_fms_packet(&self, ctx: &FmsBuildContext) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(8);
        let control = FmsControlBits::for_state(
            ctx.control_mode,
            ctx.robot_enabled,
            ctx.emergency_stopped,
            ctx.radio_comms,
            ctx.robot_comms,
        );
        let (upper, lower) = encode_voltage(ctx.voltage);

        buf.put_u16(ctx.seq);
        buf.put_u8(0x00);
        buf.put_u8(control.bits());
        buf.put_u16(ctx.team as u16);
        buf.put_u8(upper);
        buf.put_u8(lower);

        buf.to_vec()
    }

    fn parse_fms_packet(&self, data: &[u8], out: &mut FmsParseOutput) -> bool {
        if data.len() < 22 {
            return false;
        }
        let mode_byte = data[3];
        let station_byte = data[5];

        out.control_mode = match mode_byte & 0x03 {
            0x01 => ControlMode::Test,
            0x02 => ControlMode::Autonomous,
            _ => ControlMode::Teleoperated,
        };
        out.robot_enabled = mode_byte & 0x04 != 0;
        out.alliance = if station_byte < 3 { Alliance::Red } else { Alliance::Blue };
        out.position = match station_byte % 3 {
            0 => Position::P1,
            1 => Position::P2,
            _ => Position::P3,
        };

        true
    }

    fn reboot_robot(&self) {
        self.reboot_pending.store(true, Ordering::Relaxed);
    }

    fn restart_robot_code(&self) {
        self.restart_pending.store(true, Ordering::Relaxed);
    }

    fn reset_robot(&self) {
        self.reboot_pending.store(false, Ordering::Relaxed);
        self.restart_pending.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn protocol() -> ModernProtocol {
        ModernProtocol::new(ProtocolYear::Y2020)
    }

    #[test]
    fn robot_address_differs_by_year() {
        assert_eq!(ModernProtocol::new(ProtocolYear::Y2015).robot_address(3794), "roboRIO-3794.local");
        assert_eq!(ModernProtocol::new(ProtocolYear::Y2020).robot_address(3794), "roboRIO-3794-FRC.local");
    }

    #[test]
    fn robot_packet_round_trips_control_request_and_station() {
        let p = protocol();
        let ctx = RobotBuildContext {
            seq: 7,
            station: 3,
            control_mode: ControlMode::Autonomous,
            robot_enabled: true,
            fms_connected: false,
            emergency_stopped: false,
            robot_comms: true,
            joysticks: &[],
            send_joysticks: false,
            send_timezone: false,
            timezone_name: "UTC",
        };
        let packet = p.build_robot_packet(&ctx);
        assert_eq!(u16::from_be_bytes([packet[0], packet[1]]), 7);
        assert_eq!(packet[2], 0x01); // tag byte
        assert_eq!(packet[3], 0x02 | 0x04); // AUTONOMOUS | ENABLED
        assert_eq!(packet[4], 0x80); // NORMAL request
        assert_eq!(packet[5], 3); // station byte
    }

    #[test]
    fn robot_packet_carries_pending_reboot_request() {
        let p = protocol();
        p.reboot_robot();
        let ctx = RobotBuildContext {
            seq: 0,
            station: 0,
            control_mode: ControlMode::Teleoperated,
            robot_enabled: false,
            fms_connected: false,
            emergency_stopped: false,
            robot_comms: true,
            joysticks: &[],
            send_joysticks: false,
            send_timezone: false,
            timezone_name: "UTC",
        };
        let packet = p.build_robot_packet(&ctx);
        assert_eq!(packet[4], 0x80 | 0x08);
        p.reset_robot();
        let packet = p.build_robot_packet(&ctx);
        assert_eq!(packet[4], 0x80);
    }

    #[test]
    fn parse_robot_packet_recovers_estop_code_and_voltage() {
        let p = protocol();
        let data = [0, 1, 0x01, 0x80, 0x20, 12, 128, 0x01];
        let mut out = RobotParseOutput::default();
        assert!(p.parse_robot_packet(&data, &mut out));
        assert!(out.emergency_stopped);
        assert!(out.robot_code);
        assert!((out.voltage - 12.502).abs() < 0.01);
        assert!(out.wants_timezone);
    }

    #[test]
    fn parse_robot_packet_rejects_short_buffers() {
        let p = protocol();
        let mut out = RobotParseOutput::default();
        assert!(!p.parse_robot_packet(&[0, 1, 0], &mut out));
    }

    #[test]
    fn fms_packet_round_trips_team_and_mode() {
        let p = protocol();
        let ctx = FmsBuildContext {
            seq: 42,
            team: 3794,
            control_mode: ControlMode::Teleoperated,
            robot_enabled: true,
            emergency_stopped: false,
            radio_comms: true,
            robot_comms: true,
            voltage: 12.0,
        };
        let packet = p.build_fms_packet(&ctx);
        assert_eq!(packet.len(), 8);
        assert_eq!(u16::from_be_bytes([packet[0], packet[1]]), 42);
        assert_eq!(u16::from_be_bytes([packet[4], packet[5]]), 3794);
    }

    #[test]
    fn parse_fms_packet_recovers_mode_and_station() {
        let p = protocol();
        let mut data = vec![0u8; 22];
        data[3] = 0x02 | 0x04; // autonomous + enabled
        data[5] = 4; // Blue2
        let mut out = FmsParseOutput::default();
        assert!(p.parse_fms_packet(&data, &mut out));
        assert_eq!(out.control_mode, ControlMode::Autonomous);
        assert!(out.robot_enabled);
        assert_eq!(out.alliance, Alliance::Blue);
        assert_eq!(out.position, Position::P2);
    }

    #[test]
    fn parse_robot_packet_decodes_extended_can_and_ram_as_floats() {
        let p = protocol();
        let mut data = vec![0u8, 1, 0x01, 0x00, 0x20, 0, 0, 0x00];

        // CAN tag: size=5 (tag + 4-byte float), value 42.0%.
        data.push(5);
        data.push(0x0e);
        data.extend_from_slice(&42.0f32.to_be_bytes());

        // RAM tag: size=9 (tag + 4 padding bytes + 4-byte float), half of
        // the 256MB budget free. The float sits 4 bytes into the payload.
        data.push(9);
        data.push(0x06);
        data.extend_from_slice(&[0; 4]);
        data.extend_from_slice(&(RAM_TOTAL_BYTES / 2.0).to_be_bytes());

        let mut out = RobotParseOutput::default();
        assert!(p.parse_robot_packet(&data, &mut out));
        assert_eq!(out.can_pct, Some(42));
        assert_eq!(out.ram_pct, Some(50));
    }
}
