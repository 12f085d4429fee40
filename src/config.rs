//! Configuration store (C5): the process-wide state every other component
//! reads and writes, plus the three watchdog-expiry hooks that pull the
//! engine back into a safe state when a peer disappears.
//!
//! All mutable state lives behind a single `tokio::sync::RwLock` rather than
//! split across several smaller locks, since the struct must enforce one
//! cross-field invariant (`robot_enabled ⇒ ¬emergency_stopped`) that a
//! field-split can't express cleanly.

use crate::events::{Event, EventSender};
use crate::util::ByteBuffer;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlMode {
    Test,
    Autonomous,
    #[default]
    Teleoperated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alliance {
    #[default]
    Red,
    Blue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Position {
    #[default]
    P1,
    P2,
    P3,
}

impl Position {
    pub const fn index(self) -> u8 {
        match self {
            Position::P1 => 0,
            Position::P2 => 1,
            Position::P3 => 2,
        }
    }
}

/// Station byte as sent on the wire: Red1=0 .. Blue3=5.
pub fn station_byte(alliance: Alliance, position: Position) -> u8 {
    let base = match alliance {
        Alliance::Red => 0,
        Alliance::Blue => 3,
    };
    base + position.index()
}

fn clamp_pct(value: u8) -> u8 {
    value.min(100)
}

/// The singleton state. Not `pub` directly, every access goes through
/// [`ConfigStore`] so that writes stay paired with their event emission.
#[derive(Debug, Clone)]
struct Configuration {
    team_number: u32,
    voltage: f32,
    cpu: u8,
    ram: u8,
    disk: u8,
    can: u8,
    robot_code: bool,
    robot_enabled: bool,
    emergency_stopped: bool,
    fms_comms: bool,
    radio_comms: bool,
    robot_comms: bool,
    control_mode: ControlMode,
    alliance: Alliance,
    position: Position,
    netconsole_out: ByteBuffer,
    custom_fms_address: String,
    custom_radio_address: String,
    custom_robot_address: String,
    status_string: String,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            team_number: 0,
            voltage: 0.0,
            cpu: 0,
            ram: 0,
            disk: 0,
            can: 0,
            robot_code: false,
            robot_enabled: false,
            emergency_stopped: false,
            fms_comms: false,
            radio_comms: false,
            robot_comms: false,
            control_mode: ControlMode::default(),
            alliance: Alliance::default(),
            position: Position::default(),
            netconsole_out: ByteBuffer::new(),
            custom_fms_address: String::new(),
            custom_radio_address: String::new(),
            custom_robot_address: String::new(),
            status_string: compute_status_string(&StatusInputs {
                robot_comms: false,
                robot_code: false,
                robot_enabled: false,
                emergency_stopped: false,
                control_mode: ControlMode::Teleoperated,
            }),
        }
    }
}

struct StatusInputs {
    robot_comms: bool,
    robot_code: bool,
    robot_enabled: bool,
    emergency_stopped: bool,
    control_mode: ControlMode,
}

fn compute_status_string(s: &StatusInputs) -> String {
    if s.emergency_stopped {
        return "Emergency Stopped".to_string();
    }
    if !s.robot_comms {
        return "No Robot Communication".to_string();
    }
    if !s.robot_code {
        return "No Robot Code".to_string();
    }

    let mode = match s.control_mode {
        ControlMode::Test => "Test",
        ControlMode::Autonomous => "Autonomous",
        ControlMode::Teleoperated => "Teleoperated",
    };
    let state = if s.robot_enabled { "Enabled" } else { "Disabled" };
    format!("{mode} {state}")
}

/// The process-wide configuration store, shared behind an `Arc` by the
/// façade, the dispatcher, and every protocol build/parse call.
pub struct ConfigStore {
    inner: RwLock<Configuration>,
    events: EventSender,
}

impl ConfigStore {
    pub fn new(events: EventSender) -> Self {
        ConfigStore {
            inner: RwLock::new(Configuration::default()),
            events,
        }
    }

    /// Resets every field to its default, as on engine close. Does not emit
    /// events: a closed engine has no consumer left to observe them.
    pub async fn reset(&self) {
        *self.inner.write().await = Configuration::default();
    }

    fn recompute_status(cfg: &mut Configuration, events: &EventSender) {
        let new_status = compute_status_string(&StatusInputs {
            robot_comms: cfg.robot_comms,
            robot_code: cfg.robot_code,
            robot_enabled: cfg.robot_enabled,
            emergency_stopped: cfg.emergency_stopped,
            control_mode: cfg.control_mode,
        });
        if new_status != cfg.status_string {
            cfg.status_string = new_status.clone();
            events.push(Event::StatusStringChanged(new_status));
        }
    }

    /// Enforces the invariant `robot_enabled ⇒ ¬emergency_stopped ∧
    /// robot_code ∧ robot_comms`. Called after every write that could affect
    /// one of those four fields; clears `robot_enabled` (emitting the event)
    /// if it's violated.
    fn enforce_enabled_invariant(cfg: &mut Configuration, events: &EventSender) {
        let should_clear = cfg.robot_enabled
            && (cfg.emergency_stopped || !cfg.robot_code || !cfg.robot_comms);
        if should_clear {
            cfg.robot_enabled = false;
            events.push(Event::RobotEnabledChanged(false));
        }
    }

    pub async fn team_number(&self) -> u32 {
        self.inner.read().await.team_number
    }

    pub async fn set_team_number(&self, team: u32) {
        let mut cfg = self.inner.write().await;
        cfg.team_number = team.min(25599);
    }

    pub async fn voltage(&self) -> f32 {
        self.inner.read().await.voltage
    }

    pub async fn set_voltage(&self, voltage: f32) {
        let mut cfg = self.inner.write().await;
        if cfg.voltage != voltage {
            cfg.voltage = voltage;
            self.events.push(Event::VoltageChanged(voltage));
        }
    }

    pub async fn cpu_usage(&self) -> u8 {
        self.inner.read().await.cpu
    }

    pub async fn set_cpu_usage(&self, pct: u8) {
        let value = clamp_pct(pct);
        let mut cfg = self.inner.write().await;
        if cfg.cpu != value {
            cfg.cpu = value;
            self.events.push(Event::CpuChanged(value));
        }
    }

    pub async fn ram_usage(&self) -> u8 {
        self.inner.read().await.ram
    }

    pub async fn set_ram_usage(&self, pct: u8) {
        let value = clamp_pct(pct);
        let mut cfg = self.inner.write().await;
        if cfg.ram != value {
            cfg.ram = value;
            self.events.push(Event::RamChanged(value));
        }
    }

    pub async fn disk_usage(&self) -> u8 {
        self.inner.read().await.disk
    }

    pub async fn set_disk_usage(&self, pct: u8) {
        let value = clamp_pct(pct);
        let mut cfg = self.inner.write().await;
        if cfg.disk != value {
            cfg.disk = value;
            self.events.push(Event::DiskChanged(value));
        }
    }

    pub async fn can_utilization(&self) -> u8 {
        self.inner.read().await.can
    }

    pub async fn set_can_utilization(&self, pct: u8) {
        let value = clamp_pct(pct);
        let mut cfg = self.inner.write().await;
        if cfg.can != value {
            cfg.can = value;
            self.events.push(Event::CanChanged(value));
        }
    }

    pub async fn robot_code(&self) -> bool {
        self.inner.read().await.robot_code
    }

    pub async fn set_robot_code(&self, present: bool) {
        let mut cfg = self.inner.write().await;
        if cfg.robot_code != present {
            cfg.robot_code = present;
            self.events.push(Event::RobotCodeChanged(present));
            Self::enforce_enabled_invariant(&mut cfg, &self.events);
        }
        Self::recompute_status(&mut cfg, &self.events);
    }

    pub async fn robot_comms(&self) -> bool {
        self.inner.read().await.robot_comms
    }

    pub async fn set_robot_comms(&self, connected: bool) {
        let mut cfg = self.inner.write().await;
        if cfg.robot_comms != connected {
            cfg.robot_comms = connected;
            self.events.push(Event::RobotCommsChanged(connected));
            Self::enforce_enabled_invariant(&mut cfg, &self.events);
        }
        Self::recompute_status(&mut cfg, &self.events);
    }

    pub async fn fms_comms(&self) -> bool {
        self.inner.read().await.fms_comms
    }

    pub async fn set_fms_comms(&self, connected: bool) {
        let mut cfg = self.inner.write().await;
        if cfg.fms_comms != connected {
            cfg.fms_comms = connected;
            self.events.push(Event::FmsCommsChanged(connected));
        }
    }

    pub async fn radio_comms(&self) -> bool {
        self.inner.read().await.radio_comms
    }

    pub async fn set_radio_comms(&self, connected: bool) {
        let mut cfg = self.inner.write().await;
        if cfg.radio_comms != connected {
            cfg.radio_comms = connected;
            self.events.push(Event::RadioCommsChanged(connected));
        }
    }

    pub async fn emergency_stopped(&self) -> bool {
        self.inner.read().await.emergency_stopped
    }

    pub async fn set_emergency_stopped(&self, stopped: bool) {
        let mut cfg = self.inner.write().await;
        if cfg.emergency_stopped != stopped {
            cfg.emergency_stopped = stopped;
            self.events.push(Event::EStopChanged(stopped));
            Self::enforce_enabled_invariant(&mut cfg, &self.events);
        }
        Self::recompute_status(&mut cfg, &self.events);
    }

    /// Whether the preconditions for enabling are currently met: robot code
    /// present, robot comms up, not e-stopped. Pure function of state,
    /// exposed directly on the façade as `get_can_be_enabled`.
    pub async fn can_be_enabled(&self) -> bool {
        let cfg = self.inner.read().await;
        cfg.robot_code && cfg.robot_comms && !cfg.emergency_stopped
    }

    pub async fn robot_enabled(&self) -> bool {
        self.inner.read().await.robot_enabled
    }

    /// Sets `robot_enabled`. Enabling requires
    /// `robot_code ∧ robot_comms ∧ ¬emergency_stopped`; if that doesn't
    /// hold, the write is silently replaced with `false` (which is a no-op
    /// when the field is already `false`, so no event fires).
    pub async fn set_enabled(&self, enabled: bool) {
        let mut cfg = self.inner.write().await;
        let effective =
            enabled && cfg.robot_code && cfg.robot_comms && !cfg.emergency_stopped;
        if cfg.robot_enabled != effective {
            cfg.robot_enabled = effective;
            self.events.push(Event::RobotEnabledChanged(effective));
        }
        Self::recompute_status(&mut cfg, &self.events);
    }

    pub async fn control_mode(&self) -> ControlMode {
        self.inner.read().await.control_mode
    }

    pub async fn set_control_mode(&self, mode: ControlMode) {
        let mut cfg = self.inner.write().await;
        if cfg.control_mode != mode {
            cfg.control_mode = mode;
            self.events.push(Event::ControlModeChanged(mode));
        }
        Self::recompute_status(&mut cfg, &self.events);
    }

    pub async fn alliance(&self) -> Alliance {
        self.inner.read().await.alliance
    }

    pub async fn position(&self) -> Position {
        self.inner.read().await.position
    }

    pub async fn set_alliance(&self, alliance: Alliance) {
        let mut cfg = self.inner.write().await;
        if cfg.alliance != alliance {
            cfg.alliance = alliance;
            self.events.push(Event::StationChanged {
                alliance: cfg.alliance,
                position: cfg.position,
            });
        }
    }

    pub async fn set_position(&self, position: Position) {
        let mut cfg = self.inner.write().await;
        if cfg.position != position {
            cfg.position = position;
            self.events.push(Event::StationChanged {
                alliance: cfg.alliance,
                position: cfg.position,
            });
        }
    }

    pub async fn station_byte(&self) -> u8 {
        let cfg = self.inner.read().await;
        station_byte(cfg.alliance, cfg.position)
    }

    /// Appends to the NetConsole outbound buffer; drained by the dispatcher
    /// every tick.
    pub async fn queue_netconsole_message(&self, bytes: &[u8]) {
        let mut cfg = self.inner.write().await;
        cfg.netconsole_out.extend(bytes);
    }

    /// Drains and clears the NetConsole outbound buffer.
    pub async fn drain_netconsole(&self) -> Vec<u8> {
        self.inner.write().await.netconsole_out.take()
    }

    pub async fn set_custom_fms_address(&self, address: String) {
        self.inner.write().await.custom_fms_address = address;
    }

    pub async fn set_custom_radio_address(&self, address: String) {
        self.inner.write().await.custom_radio_address = address;
    }

    pub async fn set_custom_robot_address(&self, address: String) {
        self.inner.write().await.custom_robot_address = address;
    }

    /// `get_applied_X`: the custom override if non-empty, else `default`.
    pub async fn applied_fms_address(&self, default: &str) -> String {
        let cfg = self.inner.read().await;
        if cfg.custom_fms_address.is_empty() {
            default.to_string()
        } else {
            cfg.custom_fms_address.clone()
        }
    }

    pub async fn applied_radio_address(&self, default: &str) -> String {
        let cfg = self.inner.read().await;
        if cfg.custom_radio_address.is_empty() {
            default.to_string()
        } else {
            cfg.custom_radio_address.clone()
        }
    }

    pub async fn applied_robot_address(&self, default: &str) -> String {
        let cfg = self.inner.read().await;
        if cfg.custom_robot_address.is_empty() {
            default.to_string()
        } else {
            cfg.custom_robot_address.clone()
        }
    }

    pub async fn status_string(&self) -> String {
        self.inner.read().await.status_string.clone()
    }

    /// FMS watchdog-expiry hook: clears FMS comms.
    pub async fn on_fms_timeout(&self) {
        self.set_fms_comms(false).await;
    }

    /// Radio watchdog-expiry hook: clears radio comms.
    pub async fn on_radio_timeout(&self) {
        self.set_radio_comms(false).await;
    }

    /// Robot watchdog-expiry hook: the engine's safe state on robot loss.
    /// Clears code/enabled/estop/voltage/cpu/ram/disk/comms and resets
    /// control mode to Teleoperated.
    pub async fn on_robot_timeout(&self) {
        let mut cfg = self.inner.write().await;

        if cfg.robot_code {
            cfg.robot_code = false;
            self.events.push(Event::RobotCodeChanged(false));
        }
        if cfg.voltage != 0.0 {
            cfg.voltage = 0.0;
            self.events.push(Event::VoltageChanged(0.0));
        }
        if cfg.cpu != 0 {
            cfg.cpu = 0;
            self.events.push(Event::CpuChanged(0));
        }
        if cfg.ram != 0 {
            cfg.ram = 0;
            self.events.push(Event::RamChanged(0));
        }
        if cfg.disk != 0 {
            cfg.disk = 0;
            self.events.push(Event::DiskChanged(0));
        }
        if cfg.can != 0 {
            cfg.can = 0;
            self.events.push(Event::CanChanged(0));
        }
        if cfg.robot_comms {
            cfg.robot_comms = false;
            self.events.push(Event::RobotCommsChanged(false));
        }
        if cfg.control_mode != ControlMode::Teleoperated {
            cfg.control_mode = ControlMode::Teleoperated;
            self.events.push(Event::ControlModeChanged(ControlMode::Teleoperated));
        }
        if cfg.robot_enabled {
            cfg.robot_enabled = false;
            self.events.push(Event::RobotEnabledChanged(false));
        }

        Self::recompute_status(&mut cfg, &self.events);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::events::EventQueue;

    fn store() -> (ConfigStore, EventQueue) {
        let q = EventQueue::new(64);
        let store = ConfigStore::new(q.sender());
        (store, q)
    }

    #[tokio::test]
    async fn enabling_without_preconditions_is_silently_rejected() {
        let (store, queue) = store();
        store.set_enabled(true).await;
        assert!(!store.robot_enabled().await);
        // StatusStringChanged may fire, but no RobotEnabledChanged.
        while let Some(ev) = queue.poll().await {
            assert!(!matches!(ev, Event::RobotEnabledChanged(_)));
        }
    }

    #[tokio::test]
    async fn enabling_with_preconditions_met_succeeds() {
        let (store, _queue) = store();
        store.set_robot_code(true).await;
        store.set_robot_comms(true).await;
        store.set_enabled(true).await;
        assert!(store.robot_enabled().await);
    }

    #[tokio::test]
    async fn estop_clears_enabled_and_is_sticky() {
        let (store, queue) = store();
        store.set_robot_code(true).await;
        store.set_robot_comms(true).await;
        store.set_enabled(true).await;
        assert!(store.robot_enabled().await);

        store.set_emergency_stopped(true).await;
        assert!(!store.robot_enabled().await);

        store.set_enabled(true).await;
        assert!(!store.robot_enabled().await, "estop must stay sticky");

        let mut estop_events = 0;
        while let Some(ev) = queue.poll().await {
            if matches!(ev, Event::EStopChanged(true)) {
                estop_events += 1;
            }
        }
        assert_eq!(estop_events, 1);
    }

    #[tokio::test]
    async fn robot_timeout_resets_to_safe_state() {
        let (store, _queue) = store();
        store.set_robot_code(true).await;
        store.set_robot_comms(true).await;
        store.set_enabled(true).await;
        store.set_voltage(12.5).await;
        store.set_control_mode(ControlMode::Autonomous).await;

        store.on_robot_timeout().await;

        assert!(!store.robot_code().await);
        assert!(!store.robot_comms().await);
        assert!(!store.robot_enabled().await);
        assert_eq!(store.voltage().await, 0.0);
        assert_eq!(store.control_mode().await, ControlMode::Teleoperated);
    }

    #[tokio::test]
    async fn event_count_matches_value_changing_writes() {
        let (store, queue) = store();
        store.set_cpu_usage(10).await;
        store.set_cpu_usage(10).await; // no-op, must not emit
        store.set_cpu_usage(20).await;

        let mut cpu_events = 0;
        while let Some(ev) = queue.poll().await {
            if matches!(ev, Event::CpuChanged(_)) {
                cpu_events += 1;
            }
        }
        assert_eq!(cpu_events, 2);
    }

    #[tokio::test]
    async fn applied_address_falls_back_to_default_when_custom_empty() {
        let (store, _queue) = store();
        assert_eq!(store.applied_robot_address("roboRIO-1-FRC.local").await, "roboRIO-1-FRC.local");
        store.set_custom_robot_address("10.0.0.5".to_string()).await;
        assert_eq!(store.applied_robot_address("roboRIO-1-FRC.local").await, "10.0.0.5");
    }

    #[test]
    fn station_byte_matches_spec_table() {
        assert_eq!(station_byte(Alliance::Red, Position::P1), 0);
        assert_eq!(station_byte(Alliance::Red, Position::P2), 1);
        assert_eq!(station_byte(Alliance::Red, Position::P3), 2);
        assert_eq!(station_byte(Alliance::Blue, Position::P1), 3);
        assert_eq!(station_byte(Alliance::Blue, Position::P2), 4);
        assert_eq!(station_byte(Alliance::Blue, Position::P3), 5);
    }
}
