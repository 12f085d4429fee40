//! Socket multiplexer (C4): UDP/TCP endpoints with non-blocking receive and
//! asynchronous bind, one per peer (FMS, radio, robot) plus NetConsole.
//!
//! Each endpoint binds a receive socket and a separately-bound, unconnected
//! send socket per peer; a disabled or not-yet-open endpoint is always a
//! no-op rather than an error. `tokio::net::UdpSocket` doesn't expose
//! `SO_REUSEPORT`, so endpoints are built through `socket2` and converted
//! (see DESIGN.md).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Socket, Type};
use tokio::net::{TcpStream, UdpSocket, lookup_host};
use tokio::sync::RwLock;

const SEND_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Udp,
    Tcp,
    Disabled,
}

fn bind_udp(port: u16, broadcast: bool) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    if broadcast {
        socket.set_broadcast(true)?;
    }
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

/// Resolves `host:port` to a `SocketAddr`, falling back to the wildcard
/// address on lookup failure.
async fn resolve(host: &str, port: u16) -> SocketAddr {
    match lookup_host((host, port)).await {
        Ok(mut addrs) => addrs
            .next()
            .unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)),
        Err(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
    }
}

struct UdpState {
    recv: Option<UdpSocket>,
    send: Option<UdpSocket>,
    target: Option<SocketAddr>,
}

/// A UDP endpoint: a receive socket bound to `in_port` and an unconnected
/// send socket targeting `out_port` on the peer's resolved address.
pub struct UdpEndpoint {
    kind: SocketKind,
    in_port: u16,
    out_port: u16,
    broadcast: bool,
    state: Arc<RwLock<UdpState>>,
}

impl UdpEndpoint {
    pub fn new(kind: SocketKind, in_port: u16, out_port: u16, broadcast: bool) -> Self {
        UdpEndpoint {
            kind,
            in_port,
            out_port,
            broadcast,
            state: Arc::new(RwLock::new(UdpState {
                recv: None,
                send: None,
                target: None,
            })),
        }
    }

    pub fn disabled(&self) -> bool {
        self.kind != SocketKind::Udp
    }

    /// Binds the input port and spawns a background task to resolve
    /// `address` and stand up the output socket; returns immediately.
    /// Reads/sends before the task completes are no-ops.
    pub fn open(&self, address: String) {
        if self.disabled() {
            return;
        }

        let state = self.state.clone();
        let in_port = self.in_port;
        let out_port = self.out_port;
        let broadcast = self.broadcast;

        tokio::spawn(async move {
            let recv = match bind_udp(in_port, false) {
                Ok(s) => Some(s),
                Err(e) => {
                    tracing::warn!(target: "ds::socket", error = %e, "failed to bind udp recv socket");
                    None
                }
            };
            let send = match bind_udp(0, broadcast) {
                Ok(s) => Some(s),
                Err(e) => {
                    tracing::warn!(target: "ds::socket", error = %e, "failed to bind udp send socket");
                    None
                }
            };
            let target = resolve(&address, out_port).await;

            let mut guard = state.write().await;
            guard.recv = recv;
            guard.send = send;
            guard.target = Some(target);
        });
    }

    pub async fn close(&self) {
        let mut guard = self.state.write().await;
        guard.recv = None;
        guard.send = None;
        guard.target = None;
    }

    /// Re-resolves the target address without rebuilding the sockets.
    pub fn change_address(&self, address: String) {
        if self.disabled() {
            return;
        }
        let state = self.state.clone();
        let out_port = self.out_port;
        tokio::spawn(async move {
            let target = resolve(&address, out_port).await;
            state.write().await.target = Some(target);
        });
    }

    /// Sends `bytes`, returning the number of bytes actually sent. A
    /// disabled endpoint, or one whose background open hasn't published a
    /// socket yet, is a no-op that reports zero bytes sent.
    pub async fn send(&self, bytes: &[u8]) -> usize {
        if self.disabled() {
            return 0;
        }
        let guard = self.state.read().await;
        let (Some(socket), Some(target)) = (guard.send.as_ref(), guard.target) else {
            return 0;
        };

        match tokio::time::timeout(SEND_TIMEOUT, socket.send_to(bytes, target)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                tracing::debug!(target: "ds::socket", error = %e, "udp send failed");
                0
            }
            Err(_) => {
                tracing::warn!(target: "ds::socket", "udp send timed out");
                0
            }
        }
    }

    /// Non-blocking read: returns immediately with an empty vec if nothing
    /// is queued, the socket isn't open yet, or the endpoint is disabled.
    pub async fn read(&self) -> Vec<u8> {
        if self.disabled() {
            return Vec::new();
        }
        let guard = self.state.read().await;
        let Some(socket) = guard.recv.as_ref() else {
            return Vec::new();
        };

        let mut buf = [0u8; 4096];
        match socket.try_recv(&mut buf) {
            Ok(n) => buf[..n].to_vec(),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Vec::new(),
            Err(e) => {
                tracing::debug!(target: "ds::socket", error = %e, "udp read failed");
                Vec::new()
            }
        }
    }
}

struct TcpState {
    stream: Option<TcpStream>,
}

/// A TCP endpoint, used only by the 2014 protocol's extensions. `open`
/// connects the output half in a background task.
pub struct TcpEndpoint {
    kind: SocketKind,
    port: u16,
    state: Arc<RwLock<TcpState>>,
}

impl TcpEndpoint {
    pub fn new(kind: SocketKind, port: u16) -> Self {
        TcpEndpoint {
            kind,
            port,
            state: Arc::new(RwLock::new(TcpState { stream: None })),
        }
    }

    pub fn disabled(&self) -> bool {
        self.kind != SocketKind::Tcp
    }

    pub fn open(&self, address: String) {
        if self.disabled() {
            return;
        }
        let state = self.state.clone();
        let port = self.port;
        tokio::spawn(async move {
            match TcpStream::connect((address.as_str(), port)).await {
                Ok(stream) => state.write().await.stream = Some(stream),
                Err(e) => {
                    tracing::debug!(target: "ds::socket", error = %e, "tcp connect failed");
                }
            }
        });
    }

    pub async fn close(&self) {
        self.state.write().await.stream = None;
    }

    pub async fn send(&self, bytes: &[u8]) -> usize {
        use tokio::io::AsyncWriteExt;
        if self.disabled() {
            return 0;
        }
        let mut guard = self.state.write().await;
        let Some(stream) = guard.stream.as_mut() else {
            return 0;
        };
        match tokio::time::timeout(SEND_TIMEOUT, stream.write_all(bytes)).await {
            Ok(Ok(())) => bytes.len(),
            _ => 0,
        }
    }

    pub async fn read(&self) -> Vec<u8> {
        use tokio::io::AsyncReadExt;
        if self.disabled() {
            return Vec::new();
        }
        let mut guard = self.state.write().await;
        let Some(stream) = guard.stream.as_mut() else {
            return Vec::new();
        };
        let mut buf = [0u8; 4096];
        match stream.try_read(&mut buf) {
            Ok(0) | Err(_) => Vec::new(),
            Ok(n) => buf[..n].to_vec(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn disabled_endpoint_is_a_no_op() {
        let ep = UdpEndpoint::new(SocketKind::Disabled, 1150, 1110, false);
        ep.open("127.0.0.1".to_string());
        assert_eq!(ep.send(b"hi").await, 0);
        assert_eq!(ep.read().await, Vec::<u8>::new());
    }

    #[tokio::test]
    async fn unopened_endpoint_reads_and_sends_are_noops() {
        let ep = UdpEndpoint::new(SocketKind::Udp, 0, 0, false);
        assert_eq!(ep.send(b"hi").await, 0);
        assert_eq!(ep.read().await, Vec::<u8>::new());
    }

    #[tokio::test]
    async fn udp_endpoint_round_trips_a_datagram() {
        let recv_ep = UdpEndpoint::new(SocketKind::Udp, 0, 0, false);
        recv_ep.open("127.0.0.1".to_string());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let recv_port = {
            let guard = recv_ep.state.read().await;
            guard.recv.as_ref().unwrap().local_addr().unwrap().port()
        };

        let send_ep = UdpEndpoint::new(SocketKind::Udp, 0, recv_port, false);
        send_ep.open("127.0.0.1".to_string());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(send_ep.send(b"hello").await, 5);

        for _ in 0..20 {
            let data = recv_ep.read().await;
            if !data.is_empty() {
                assert_eq!(data, b"hello");
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("datagram never arrived");
    }
}
