//! Client façade (C9): the public surface the host talks to, getters and
//! setters over the configuration store, protocol installation, lifecycle.
//!
//! Covers custom addresses with default fallback, runtime protocol
//! switching via `configure_protocol`, and explicit `new`/`close` ordering
//! rather than folding startup into the constructor.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::config::{Alliance, ConfigStore, ControlMode, Position};
use crate::dispatcher::{DispatcherHandle, ProtocolSlot, Sockets};
use crate::events::{Event, EventQueue};
use crate::joystick::JoystickRegistry;
use crate::proto::{ProtocolYear, year};
use crate::Result;

/// One value from a physical joystick, bound for the roboRIO's next outgoing
/// packet. One variant per input kind, each self-identifying by `id`, since
/// host code builds these directly from whatever joystick polling library
/// it uses.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum JoystickValue {
    /// Ranges `-1.0..=1.0`, or `0.0..=1.0` for a trigger axis.
    Axis { id: u8, value: f32 },
    Button { id: u8, pressed: bool },
    /// A POV/D-pad angle in degrees, or -1 when centered.
    POV { id: u8, angle: i16 },
}

impl JoystickValue {
    pub const fn id(self) -> u8 {
        match self {
            JoystickValue::Axis { id, .. } => id,
            JoystickValue::Button { id, .. } => id,
            JoystickValue::POV { id, .. } => id,
        }
    }

    pub const fn is_axis(self) -> bool {
        matches!(self, JoystickValue::Axis { .. })
    }

    pub const fn is_button(self) -> bool {
        matches!(self, JoystickValue::Button { .. })
    }

    pub const fn is_pov(self) -> bool {
        matches!(self, JoystickValue::POV { .. })
    }
}

/// The communications engine handle. Construct with [`DriverStation::new`],
/// shut down with [`DriverStation::close`] (also run on `Drop` as a
/// best-effort fallback).
pub struct DriverStation {
    config: Arc<ConfigStore>,
    joysticks: Arc<JoystickRegistry>,
    events: EventQueue,
    protocol: Arc<ProtocolSlot>,
    team: Arc<AtomicU32>,
    dispatcher: Option<DispatcherHandle>,
}

impl DriverStation {
    /// Starts every subsystem in order: client store, event queue, sockets,
    /// joysticks, protocols. Returns [`crate::DsError::WorkerSpawn`] only if
    /// the dispatcher task itself cannot be spawned; every other failure
    /// inside the engine is recovered silently.
    pub async fn new(team_number: u32, initial_protocol: ProtocolYear) -> Result<DriverStation> {
        let events = EventQueue::default();
        let config = Arc::new(ConfigStore::new(events.sender()));
        config.set_team_number(team_number).await;

        let joysticks = Arc::new(JoystickRegistry::new(events.sender()));
        let sockets = Arc::new(Sockets::disabled());
        let protocol = Arc::new(ProtocolSlot::new(Arc::from(year(initial_protocol))));
        let team = Arc::new(AtomicU32::new(team_number));

        let dispatcher = DispatcherHandle::spawn(
            config.clone(),
            joysticks.clone(),
            events.sender(),
            protocol.clone(),
            sockets,
            team.clone(),
        )?;

        Ok(DriverStation {
            config,
            joysticks,
            events,
            protocol,
            team,
            dispatcher: Some(dispatcher),
        })
    }

    /// Tears down in the reverse of `new`'s startup order: stops the
    /// dispatcher (which closes its own sockets on exit), leaving the
    /// configuration store and joystick registry reset for reuse.
    pub async fn close(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.close().await;
        }
        self.config.reset().await;
        self.joysticks.reset().await;
    }

    /// Drains one pending event, if any is queued.
    pub async fn poll_event(&self) -> Option<Event> {
        self.events.poll().await
    }

    pub fn team_number(&self) -> u32 {
        self.team.load(Ordering::Relaxed)
    }

    /// Changes the team number used for address derivation (radio/robot
    /// defaults, FMS team field). Takes effect on the dispatcher's next
    /// protocol reinstall or next address resolution, whichever comes
    /// first. It does not by itself force a socket rebuild.
    pub async fn set_team_number(&self, team_number: u32) {
        self.team.store(team_number.min(25599), Ordering::Relaxed);
        self.config.set_team_number(team_number).await;
    }

    pub async fn alliance(&self) -> Alliance {
        self.config.alliance().await
    }

    pub async fn set_alliance(&self, alliance: Alliance) {
        self.config.set_alliance(alliance).await;
    }

    pub async fn position(&self) -> Position {
        self.config.position().await
    }

    pub async fn set_position(&self, position: Position) {
        self.config.set_position(position).await;
    }

    pub async fn control_mode(&self) -> ControlMode {
        self.config.control_mode().await
    }

    pub async fn set_control_mode(&self, mode: ControlMode) {
        self.config.set_control_mode(mode).await;
    }

    pub async fn enabled(&self) -> bool {
        self.config.robot_enabled().await
    }

    pub async fn enable(&self) {
        self.config.set_enabled(true).await;
    }

    pub async fn disable(&self) {
        self.config.set_enabled(false).await;
    }

    /// Pure function of the three enable preconditions: robot code
    /// present, robot comms up, not e-stopped.
    pub async fn get_can_be_enabled(&self) -> bool {
        self.config.can_be_enabled().await
    }

    pub async fn estopped(&self) -> bool {
        self.config.emergency_stopped().await
    }

    /// Disables outputs and sets the sticky emergency-stop flag. There is no
    /// corresponding "un-estop": this flag must survive `enable()` calls
    /// until the robot's own watchdog or a fresh `DriverStation` clears it.
    pub async fn estop(&self) {
        self.config.set_emergency_stopped(true).await;
    }

    pub async fn status_string(&self) -> String {
        self.config.status_string().await
    }

    pub async fn voltage(&self) -> f32 {
        self.config.voltage().await
    }

    pub async fn robot_code(&self) -> bool {
        self.config.robot_code().await
    }

    pub async fn robot_comms(&self) -> bool {
        self.config.robot_comms().await
    }

    pub async fn fms_comms(&self) -> bool {
        self.config.fms_comms().await
    }

    pub async fn radio_comms(&self) -> bool {
        self.config.radio_comms().await
    }

    pub async fn cpu_usage(&self) -> u8 {
        self.config.cpu_usage().await
    }

    pub async fn ram_usage(&self) -> u8 {
        self.config.ram_usage().await
    }

    pub async fn disk_usage(&self) -> u8 {
        self.config.disk_usage().await
    }

    pub async fn can_utilization(&self) -> u8 {
        self.config.can_utilization().await
    }

    /// Empty string means "use the protocol's default".
    pub async fn set_custom_fms_address(&self, address: impl Into<String>) {
        self.config.set_custom_fms_address(address.into()).await;
    }

    pub async fn set_custom_radio_address(&self, address: impl Into<String>) {
        self.config.set_custom_radio_address(address.into()).await;
    }

    pub async fn set_custom_robot_address(&self, address: impl Into<String>) {
        self.config.set_custom_robot_address(address.into()).await;
    }

    /// Returns the custom override if non-empty, else the currently
    /// installed protocol's default for the team number in force.
    pub async fn get_applied_fms_address(&self) -> String {
        let protocol = self.protocol.current().await;
        let default = protocol.fms_address(self.team_number());
        self.config.applied_fms_address(&default).await
    }

    pub async fn get_applied_radio_address(&self) -> String {
        let protocol = self.protocol.current().await;
        let default = protocol.radio_address(self.team_number());
        self.config.applied_radio_address(&default).await
    }

    pub async fn get_applied_robot_address(&self) -> String {
        let protocol = self.protocol.current().await;
        let default = protocol.robot_address(self.team_number());
        self.config.applied_robot_address(&default).await
    }

    /// Requests the dispatcher install a different protocol on its next
    /// tick. Returns immediately; the swap itself happens off this call's
    /// stack on the dispatcher task.
    pub async fn configure_protocol(&self, which: ProtocolYear) {
        self.protocol.request(Arc::from(year(which))).await;
    }

    /// Raises the current protocol's one-shot reboot-robot request flag.
    pub async fn reboot_robot(&self) {
        self.protocol.current().await.reboot_robot();
    }

    /// Raises the current protocol's one-shot restart-robot-code flag.
    pub async fn restart_robot_code(&self) {
        self.protocol.current().await.restart_robot_code();
    }

    /// Appends bytes to the NetConsole outbound buffer; drained by the
    /// dispatcher on its next tick.
    pub async fn send_netconsole_message(&self, bytes: &[u8]) {
        self.config.queue_netconsole_message(bytes).await;
    }

    /// Registers a new logical joystick with neutral state; returns its
    /// index.
    pub async fn add_joystick(&self, num_axes: usize, num_hats: usize, num_buttons: usize) -> usize {
        self.joysticks.add(num_axes, num_hats, num_buttons).await
    }

    pub async fn joystick_count(&self) -> usize {
        self.joysticks.count().await
    }

    /// Clears the joystick table.
    pub async fn reset_joysticks(&self) {
        self.joysticks.reset().await;
    }

    /// Applies one reported value to the given joystick index, routed
    /// through the registry's per-field setters rather than a
    /// whole-joystick supplier closure, since this engine's dispatcher
    /// pulls a snapshot each tick instead of calling back into host code.
    pub async fn update_joystick(&self, index: usize, value: JoystickValue) {
        match value {
            JoystickValue::Axis { id, value } => self.joysticks.set_axis(index, id as usize, value).await,
            JoystickValue::Button { id, pressed } => self.joysticks.set_button(index, id as usize, pressed).await,
            JoystickValue::POV { id, angle } => self.joysticks.set_hat(index, id as usize, angle).await,
        }
    }
}

impl Drop for DriverStation {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            // `close` is async but `Drop` is not; spawn a detached shutdown
            // rather than block. Best-effort: fires the shutdown signal
            // without waiting for the worker to join.
            tokio::spawn(async move {
                dispatcher.close().await;
            });
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn applied_address_falls_back_to_protocol_default() {
        let ds = DriverStation::new(3794, ProtocolYear::Y2016).await.unwrap();
        let default = ds.get_applied_robot_address().await;
        assert_eq!(default, "roboRIO-3794-FRC.local");

        ds.set_custom_robot_address("10.0.0.5").await;
        assert_eq!(ds.get_applied_robot_address().await, "10.0.0.5");
    }

    #[tokio::test]
    async fn enable_without_preconditions_is_rejected() {
        let ds = DriverStation::new(3794, ProtocolYear::Y2016).await.unwrap();
        ds.enable().await;
        assert!(!ds.enabled().await);
    }

    #[tokio::test]
    async fn estop_is_sticky_across_enable_calls() {
        let ds = DriverStation::new(3794, ProtocolYear::Y2016).await.unwrap();
        ds.estop().await;
        ds.enable().await;
        assert!(!ds.enabled().await);
        assert!(ds.estopped().await);
    }

    #[tokio::test]
    async fn joystick_updates_route_to_the_registry() {
        let ds = DriverStation::new(3794, ProtocolYear::Y2016).await.unwrap();
        let idx = ds.add_joystick(4, 1, 10).await;
        ds.update_joystick(idx, JoystickValue::Axis { id: 0, value: 0.5 }).await;
        ds.update_joystick(idx, JoystickValue::Button { id: 2, pressed: true }).await;
        assert_eq!(ds.joystick_count().await, 1);
    }

    #[test]
    fn joystick_value_id_and_kind_helpers() {
        let axis = JoystickValue::Axis { id: 3, value: 1.0 };
        assert_eq!(axis.id(), 3);
        assert!(axis.is_axis());
        assert!(!axis.is_button());
    }
}
