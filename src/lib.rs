//! `ds-core`, the periodic communications engine behind a competition robot
//! driver station.
//!
//! This crate is the hard part of a driver station: a protocol dispatcher
//! that talks to the Field Management System, a radio/bridge, and a robot
//! controller over UDP (and, for the 2014 season, TCP), a watchdog subsystem
//! that notices when a peer goes quiet, a shared configuration store, and an
//! event queue the host drains on its own thread. Terminal UIs, joystick
//! polling, and language bindings are thin presentation layers over
//! [`DriverStation`] and are not this crate's concern.

#[macro_use]
extern crate bitflags;

pub mod config;
pub mod dispatcher;
mod ds;
pub mod events;
pub mod joystick;
pub mod proto;
pub mod socket;
pub mod timer;
mod util;

pub use config::{Alliance, ControlMode, Position};
pub use ds::{DriverStation, JoystickValue};
pub use events::Event;
pub use joystick::Joystick;
pub use proto::{ProtocolYear, year};
pub use socket::SocketKind;

/// Errors fatal enough to abort startup.
/// Everything else the engine encounters (transient I/O failures, malformed
/// packets, operations on a socket that hasn't finished opening) is
/// recovered silently and never crosses this boundary.
#[derive(Debug, thiserror::Error)]
pub enum DsError {
    #[error("failed to spawn the dispatcher worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),
    #[error("failed to initialize a socket: {0}")]
    SocketInit(#[source] std::io::Error),
}

/// General-purpose result type used by the parts of the public API that can
/// fail at the caller's request (e.g. a malformed game-specific message).
/// Internally the engine also uses this for packet decode failures, which
/// are never propagated past the dispatcher.
pub type Result<T> = anyhow::Result<T>;
