//! Protocol dispatcher (C8): the periodic send/receive/watchdog loop that
//! drives the socket multiplexer (C4) and protocol definition (C7) against
//! the configuration store (C5) and joystick registry (C6).
//!
//! One spawned task loops on a fixed tick, reading each socket without
//! blocking and reacting to a side-channel shutdown signal: a single
//! robot-only send/receive cycle generalized into a three-peer, six-timer
//! loop (FMS, radio, and robot each get an independent send timer and
//! receive watchdog).

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;

use crate::config::ConfigStore;
use crate::events::{Event, EventSender};
use crate::joystick::JoystickRegistry;
use crate::proto::{FmsBuildContext, FmsParseOutput, Protocol, RobotBuildContext, RobotParseOutput};
use crate::socket::{TcpEndpoint, UdpEndpoint};
use crate::timer::{Timer, sleep_ms, watchdog_period_ms};
use crate::{DsError, Result};

const TICK_MS: u64 = 5;
const JOYSTICK_WARMUP_PACKETS: u16 = 5;
const TIMEZONE_NAME: &str = "UTC";

/// Holds whichever protocol is currently installed plus one pending swap
/// requested by the façade. Only the dispatcher task ever performs the
/// swap: sockets and timers are touched only by the dispatcher task, so
/// `configure_protocol` just publishes the request here.
pub struct ProtocolSlot {
    current: RwLock<Arc<dyn Protocol>>,
    pending: Mutex<Option<Arc<dyn Protocol>>>,
}

impl ProtocolSlot {
    pub fn new(initial: Arc<dyn Protocol>) -> Self {
        ProtocolSlot { current: RwLock::new(initial), pending: Mutex::new(None) }
    }

    pub async fn current(&self) -> Arc<dyn Protocol> {
        self.current.read().await.clone()
    }

    /// Requests a protocol swap; takes effect on the dispatcher's next tick.
    pub async fn request(&self, protocol: Arc<dyn Protocol>) {
        *self.pending.lock().await = Some(protocol);
    }

    async fn take_pending(&self) -> Option<Arc<dyn Protocol>> {
        self.pending.lock().await.take()
    }
}

/// The four UDP endpoints plus the 2014-only TCP extension socket, held
/// behind locks so the dispatcher can rebuild them in place on a protocol
/// reinstall, when a protocol swap is applied and when the engine first
/// starts up.
pub struct Sockets {
    pub fms: RwLock<UdpEndpoint>,
    pub radio: RwLock<UdpEndpoint>,
    pub robot: RwLock<UdpEndpoint>,
    pub netconsole: RwLock<UdpEndpoint>,
    pub tcp2014: RwLock<TcpEndpoint>,
}

impl Sockets {
    pub fn disabled() -> Self {
        use crate::socket::SocketKind;
        Sockets {
            fms: RwLock::new(UdpEndpoint::new(SocketKind::Disabled, 0, 0, false)),
            radio: RwLock::new(UdpEndpoint::new(SocketKind::Disabled, 0, 0, false)),
            robot: RwLock::new(UdpEndpoint::new(SocketKind::Disabled, 0, 0, false)),
            netconsole: RwLock::new(UdpEndpoint::new(SocketKind::Disabled, 0, 0, false)),
            tcp2014: RwLock::new(TcpEndpoint::new(SocketKind::Disabled, 0)),
        }
    }

    async fn close_all(&self) {
        self.fms.read().await.close().await;
        self.radio.read().await.close().await;
        self.robot.read().await.close().await;
        self.netconsole.read().await.close().await;
        self.tcp2014.read().await.close().await;
    }

    /// Rebuilds every endpoint from `protocol`'s socket specs and opens
    /// them against `team`'s addresses.
    async fn reinstall(&self, protocol: &dyn Protocol, team: u32) {
        use crate::socket::SocketKind;

        self.close_all().await;

        let fms_spec = protocol.fms_socket();
        let fms = UdpEndpoint::new(fms_spec.kind, fms_spec.in_port, fms_spec.out_port, fms_spec.broadcast);
        fms.open(protocol.fms_address(team));
        *self.fms.write().await = fms;

        let radio_spec = protocol.radio_socket();
        let radio =
            UdpEndpoint::new(radio_spec.kind, radio_spec.in_port, radio_spec.out_port, radio_spec.broadcast);
        radio.open(protocol.radio_address(team));
        *self.radio.write().await = radio;

        let robot_spec = protocol.robot_socket();
        let robot =
            UdpEndpoint::new(robot_spec.kind, robot_spec.in_port, robot_spec.out_port, robot_spec.broadcast);
        robot.open(protocol.robot_address(team));
        *self.robot.write().await = robot;

        let nc_spec = protocol.netconsole_socket();
        let netconsole =
            UdpEndpoint::new(nc_spec.kind, nc_spec.in_port, nc_spec.out_port, nc_spec.broadcast);
        netconsole.open(protocol.robot_address(team));
        *self.netconsole.write().await = netconsole;

        // Only the 2014 season uses the TCP extension socket; every other
        // year's protocol never calls for it, so the endpoint stays
        // disabled by construction for them.
        let tcp_kind = if protocol.name() == "FRC 2014" { SocketKind::Tcp } else { SocketKind::Disabled };
        let tcp = TcpEndpoint::new(tcp_kind, 1740);
        tcp.open(protocol.robot_address(team));
        *self.tcp2014.write().await = tcp;
    }
}

struct SixTimers {
    fms_send: Timer,
    radio_send: Timer,
    robot_send: Timer,
    fms_watch: Timer,
    radio_watch: Timer,
    robot_watch: Timer,
}

impl SixTimers {
    fn program(protocol: &dyn Protocol) -> SixTimers {
        let fms_interval = protocol.fms_send_interval_ms();
        let radio_interval = protocol.radio_send_interval_ms();
        let robot_interval = protocol.robot_send_interval_ms();
        SixTimers {
            fms_send: Timer::init(fms_interval),
            radio_send: Timer::init(radio_interval),
            robot_send: Timer::init(robot_interval),
            fms_watch: Timer::init(watchdog_period_ms(fms_interval.max(1))),
            radio_watch: Timer::init(watchdog_period_ms(radio_interval.max(1))),
            robot_watch: Timer::init(watchdog_period_ms(robot_interval.max(1))),
        }
    }

    fn reprogram(&mut self, protocol: &dyn Protocol) {
        let fms_interval = protocol.fms_send_interval_ms();
        let radio_interval = protocol.radio_send_interval_ms();
        let robot_interval = protocol.robot_send_interval_ms();
        self.fms_send.reprogram(fms_interval);
        self.radio_send.reprogram(radio_interval);
        self.robot_send.reprogram(robot_interval);
        self.fms_watch.reprogram(watchdog_period_ms(fms_interval.max(1)));
        self.radio_watch.reprogram(watchdog_period_ms(radio_interval.max(1)));
        self.robot_watch.reprogram(watchdog_period_ms(robot_interval.max(1)));
    }

    fn start_all(&mut self) {
        self.fms_send.start();
        self.radio_send.start();
        self.robot_send.start();
        self.fms_watch.start();
        self.radio_watch.start();
        self.robot_watch.start();
    }

    fn tick_all(&mut self, delta_ms: u64) {
        self.fms_send.tick(delta_ms);
        self.radio_send.tick(delta_ms);
        self.robot_send.tick(delta_ms);
        self.fms_watch.tick(delta_ms);
        self.radio_watch.tick(delta_ms);
        self.robot_watch.tick(delta_ms);
    }
}

/// Handle to the running dispatcher worker. Dropping it does not stop the
/// loop; call [`DispatcherHandle::close`] to shut down and join.
pub struct DispatcherHandle {
    shutdown_tx: watch::Sender<bool>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl DispatcherHandle {
    /// Spawns the dispatcher worker. The only fatal condition is failing to
    /// spawn this worker in the first place, everything after that is
    /// swallowed and logged.
    pub fn spawn(
        config: Arc<ConfigStore>,
        joysticks: Arc<JoystickRegistry>,
        events: EventSender,
        protocol: Arc<ProtocolSlot>,
        sockets: Arc<Sockets>,
        team: Arc<std::sync::atomic::AtomicU32>,
    ) -> Result<DispatcherHandle> {
        let rt = tokio::runtime::Handle::try_current()
            .map_err(|e| DsError::WorkerSpawn(std::io::Error::other(e)))?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = rt.spawn(run(config, joysticks, events, protocol, sockets, team, shutdown_rx));
        Ok(DispatcherHandle { shutdown_tx, join: Mutex::new(Some(join)) })
    }

    /// Signals the worker to stop and joins it.
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(join) = self.join.lock().await.take() {
            let _ = join.await;
        }
    }
}

async fn run(
    config: Arc<ConfigStore>,
    joysticks: Arc<JoystickRegistry>,
    events: EventSender,
    protocol: Arc<ProtocolSlot>,
    sockets: Arc<Sockets>,
    team: Arc<std::sync::atomic::AtomicU32>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut current = protocol.current().await;
    sockets.reinstall(current.as_ref(), team.load(Ordering::Relaxed)).await;
    let mut timers = SixTimers::program(current.as_ref());
    timers.start_all();

    let mut fms_seq: u16 = 0;
    let mut robot_seq: u16 = 0;
    let mut send_timezone_next = false;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // Step 5: apply a pending protocol swap before this tick's work.
        if let Some(new_protocol) = protocol.take_pending().await {
            tracing::debug!(target: "ds::dispatcher", protocol = new_protocol.name(), "installing protocol");
            sockets.reinstall(new_protocol.as_ref(), team.load(Ordering::Relaxed)).await;
            timers.reprogram(new_protocol.as_ref());
            timers.start_all();
            fms_seq = 0;
            robot_seq = 0;
            send_timezone_next = false;
            *protocol.current.write().await = new_protocol.clone();
            current = new_protocol;
        }

        // Step 1: sends.
        if timers.fms_send.expired() {
            send_fms_packet(&config, current.as_ref(), &sockets, fms_seq).await;
            fms_seq = fms_seq.wrapping_add(1);
            timers.fms_send.reset();
        }
        if timers.robot_send.expired() {
            send_robot_packet(&config, &joysticks, current.as_ref(), &sockets, robot_seq, send_timezone_next).await;
            send_timezone_next = false;
            robot_seq = robot_seq.wrapping_add(1);
            timers.robot_send.reset();
        }
        // The radio send timer never expires while its interval is 0
        // (radio output is disabled), so there is nothing to send.

        // Step 2: flush the netconsole outbound buffer.
        let outbound = config.drain_netconsole().await;
        if !outbound.is_empty() {
            sockets.netconsole.read().await.send(&outbound).await;
        }

        // Step 3: non-blocking reads, fed to the protocol's parser.
        let fms_success = read_and_apply_fms(&config, current.as_ref(), &sockets).await;
        let robot_success = read_and_apply_robot(&config, current.as_ref(), &sockets, &mut send_timezone_next).await;
        let radio_success = !sockets.radio.read().await.read().await.is_empty();
        if radio_success {
            config.set_radio_comms(true).await;
        }

        let netconsole_in = sockets.netconsole.read().await.read().await;
        if !netconsole_in.is_empty() {
            events.push(Event::NetConsoleMessage(netconsole_in));
        }

        // Step 4: watchdog reset/expiry.
        if fms_success {
            timers.fms_watch.reset();
        } else if timers.fms_watch.expired() {
            config.on_fms_timeout().await;
            current.reset_fms();
            timers.fms_watch.reset();
        }
        if radio_success {
            timers.radio_watch.reset();
        } else if timers.radio_watch.expired() {
            config.on_radio_timeout().await;
            current.reset_radio();
            timers.radio_watch.reset();
        }
        if robot_success {
            timers.robot_watch.reset();
        } else if timers.robot_watch.expired() {
            config.on_robot_timeout().await;
            current.reset_robot();
            timers.robot_watch.reset();
        }

        timers.tick_all(TICK_MS);

        // Step 6: sleep one precision tick, waking early on shutdown.
        tokio::select! {
            _ = sleep_ms(TICK_MS) => {}
            _ = shutdown_rx.changed() => {}
        }
    }

    sockets.close_all().await;
}

async fn send_fms_packet(config: &ConfigStore, protocol: &dyn Protocol, sockets: &Sockets, seq: u16) {
    let ctx = FmsBuildContext {
        seq,
        team: config.team_number().await,
        control_mode: config.control_mode().await,
        robot_enabled: config.robot_enabled().await,
        emergency_stopped: config.emergency_stopped().await,
        radio_comms: config.radio_comms().await,
        robot_comms: config.robot_comms().await,
        voltage: config.voltage().await,
    };
    let packet = protocol.build_fms_packet(&ctx);
    sockets.fms.read().await.send(&packet).await;
}

/// Builds and sends the outgoing robot packet. `send_timezone` carries
/// whatever the most recently parsed robot packet requested; the timezone
/// block is sent only when asked for, and the caller clears the flag
/// immediately after this call so it only fires once per request.
async fn send_robot_packet(
    config: &ConfigStore,
    joysticks: &JoystickRegistry,
    protocol: &dyn Protocol,
    sockets: &Sockets,
    seq: u16,
    send_timezone: bool,
) {
    let robot_enabled = config.robot_enabled().await;
    let snapshot = joysticks.snapshot(robot_enabled).await;
    let ctx = RobotBuildContext {
        seq,
        station: config.station_byte().await,
        control_mode: config.control_mode().await,
        robot_enabled,
        fms_connected: config.fms_comms().await,
        emergency_stopped: config.emergency_stopped().await,
        robot_comms: config.robot_comms().await,
        joysticks: &snapshot,
        send_joysticks: seq > JOYSTICK_WARMUP_PACKETS,
        send_timezone,
        timezone_name: TIMEZONE_NAME,
    };
    let packet = protocol.build_robot_packet(&ctx);
    sockets.robot.read().await.send(&packet).await;
}

async fn read_and_apply_fms(config: &ConfigStore, protocol: &dyn Protocol, sockets: &Sockets) -> bool {
    let bytes = sockets.fms.read().await.read().await;
    if bytes.is_empty() {
        return false;
    }
    let mut parsed = FmsParseOutput::default();
    if !protocol.parse_fms_packet(&bytes, &mut parsed) {
        return false;
    }
    config.set_fms_comms(true).await;
    config.set_control_mode(parsed.control_mode).await;
    config.set_alliance(parsed.alliance).await;
    config.set_position(parsed.position).await;
    config.set_enabled(parsed.robot_enabled).await;
    true
}

async fn read_and_apply_robot(
    config: &ConfigStore,
    protocol: &dyn Protocol,
    sockets: &Sockets,
    send_timezone_next: &mut bool,
) -> bool {
    let bytes = sockets.robot.read().await.read().await;
    if bytes.is_empty() {
        return false;
    }
    let mut parsed = RobotParseOutput::default();
    if !protocol.parse_robot_packet(&bytes, &mut parsed) {
        return false;
    }

    config.set_robot_comms(true).await;
    config.set_robot_code(parsed.robot_code).await;
    config.set_emergency_stopped(parsed.emergency_stopped).await;
    config.set_voltage(parsed.voltage).await;
    if let Some(cpu) = parsed.cpu_pct {
        config.set_cpu_usage(cpu).await;
    }
    if let Some(ram) = parsed.ram_pct {
        config.set_ram_usage(ram).await;
    }
    if let Some(disk) = parsed.disk_pct {
        config.set_disk_usage(disk).await;
    }
    if let Some(can) = parsed.can_pct {
        config.set_can_utilization(can).await;
    }
    *send_timezone_next = parsed.wants_timezone;

    true
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::proto::{ProtocolYear, year};

    #[tokio::test]
    async fn protocol_slot_swaps_on_request_and_read_back() {
        let slot = ProtocolSlot::new(Arc::from(year(ProtocolYear::Y2016)));
        assert_eq!(slot.current().await.name(), "FRC 2016");

        slot.request(Arc::from(year(ProtocolYear::Y2020))).await;
        let pending = slot.take_pending().await;
        assert!(pending.is_some());
        assert_eq!(pending.unwrap().name(), "FRC 2020");
        assert!(slot.take_pending().await.is_none());
    }

    #[tokio::test]
    async fn sockets_disabled_are_all_no_ops() {
        let sockets = Sockets::disabled();
        assert_eq!(sockets.fms.read().await.send(b"x").await, 0);
        assert_eq!(sockets.robot.read().await.read().await, Vec::<u8>::new());
    }

    #[tokio::test]
    async fn reinstall_opens_sockets_matching_protocol_spec() {
        let sockets = Sockets::disabled();
        let protocol = year(ProtocolYear::Y2016);
        sockets.reinstall(protocol.as_ref(), 3794).await;
        // A freshly reinstalled robot endpoint is enabled, even if the
        // background bind hasn't published a socket yet.
        assert!(!sockets.robot.read().await.disabled());
        assert!(sockets.radio.read().await.disabled());
    }
}
