//! Protocol definition & registry (C7): the per-year vtable the dispatcher
//! drives, packet build/parse, timings, ports, addresses.
//!
//! A trait object is the natural fit here since [`crate::dispatcher`] needs
//! to hold whichever protocol is currently installed behind a single
//! pointer and swap it at runtime.

pub mod common;
pub mod modern;
pub mod year2014;

use crate::config::{Alliance, ControlMode, Position};
use crate::joystick::Joystick;

/// Port/kind pair describing one of a protocol's four socket descriptors
/// (FMS, radio, robot, netconsole).
#[derive(Debug, Clone, Copy)]
pub struct SocketSpec {
    pub in_port: u16,
    pub out_port: u16,
    pub kind: crate::socket::SocketKind,
    pub broadcast: bool,
}

/// Inputs needed to build one outgoing robot packet.
pub struct RobotBuildContext<'a> {
    pub seq: u16,
    pub station: u8,
    pub control_mode: ControlMode,
    pub robot_enabled: bool,
    pub fms_connected: bool,
    pub emergency_stopped: bool,
    pub robot_comms: bool,
    pub joysticks: &'a [Joystick],
    /// True once `seq` has passed the five-packet warm-up window.
    pub send_joysticks: bool,
    /// True when the robot's previous packet asked for a timezone update.
    pub send_timezone: bool,
    pub timezone_name: &'a str,
}

/// Fields recovered from a successfully parsed robot packet.
#[derive(Debug, Clone, Copy, Default)]
pub struct RobotParseOutput {
    pub emergency_stopped: bool,
    pub robot_code: bool,
    pub voltage: f32,
    pub cpu_pct: Option<u8>,
    pub ram_pct: Option<u8>,
    pub disk_pct: Option<u8>,
    pub can_pct: Option<u8>,
    pub wants_timezone: bool,
}

/// Inputs needed to build one outgoing FMS packet.
pub struct FmsBuildContext {
    pub seq: u16,
    pub team: u32,
    pub control_mode: ControlMode,
    pub robot_enabled: bool,
    pub emergency_stopped: bool,
    pub radio_comms: bool,
    pub robot_comms: bool,
    pub voltage: f32,
}

/// Fields recovered from a successfully parsed FMS packet.
#[derive(Debug, Clone, Copy, Default)]
pub struct FmsParseOutput {
    pub robot_enabled: bool,
    pub control_mode: ControlMode,
    pub alliance: Alliance,
    pub position: Position,
}

/// Per-year protocol definition. Address closures are recomputed on demand
/// (the team number may change without reinstalling the protocol); build
/// and parse are pure functions over the context structs above plus the raw
/// bytes; no protocol implementation reaches back into shared state on its
/// own.
pub trait Protocol: Send + Sync {
    fn name(&self) -> &'static str;

    fn fms_address(&self, team: u32) -> String;
    fn radio_address(&self, team: u32) -> String;
    fn robot_address(&self, team: u32) -> String;

    fn fms_socket(&self) -> SocketSpec;
    fn radio_socket(&self) -> SocketSpec;
    fn robot_socket(&self) -> SocketSpec;
    fn netconsole_socket(&self) -> SocketSpec;

    fn fms_send_interval_ms(&self) -> u64;
    fn radio_send_interval_ms(&self) -> u64;
    fn robot_send_interval_ms(&self) -> u64;

    fn max_voltage(&self) -> f32;

    fn build_robot_packet(&self, ctx: &RobotBuildContext<'_>) -> Vec<u8>;
    fn parse_robot_packet(&self, data: &[u8], out: &mut RobotParseOutput) -> bool;

    fn build_fms_packet(&self, ctx: &FmsBuildContext) -> Vec<u8>;
    fn parse_fms_packet(&self, data: &[u8], out: &mut FmsParseOutput) -> bool;

    /// Raises the one-shot reboot-robot request flag.
    fn reboot_robot(&self);
    /// Raises the one-shot restart-robot-code request flag.
    fn restart_robot_code(&self);

    /// Clears per-peer one-shot state. The robot variant clears the
    /// reboot/restart flags (cleared when the robot watchdog fires); FMS
    /// and radio have none, so their default impls are no-ops.
    fn reset_fms(&self) {}
    fn reset_radio(&self) {}
    fn reset_robot(&self) {}
}

/// The seasons this crate speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolYear {
    Y2014,
    Y2015,
    Y2016,
    Y2018,
    Y2019,
    Y2020,
}

/// Builds the protocol implementation for a given season.
pub fn year(which: ProtocolYear) -> Box<dyn Protocol> {
    match which {
        ProtocolYear::Y2014 => Box::new(year2014::Year2014::new()),
        other => Box::new(modern::ModernProtocol::new(other)),
    }
}
