//! Event queue (C3): a bounded, multi-producer/single-consumer FIFO of
//! state-change notifications the host drains with one polling call.
//!
//! Events are pushed from the dispatcher task and drained by a single
//! polling call on the host thread. `tokio::sync::mpsc` gives us that
//! discipline directly: `try_send` drops silently once the bounded channel
//! is full, `try_recv` never blocks the host.

use crate::config::{Alliance, ControlMode, Position};
use tokio::sync::{Mutex, mpsc};

/// Default event queue capacity.
pub const DEFAULT_CAPACITY: usize = 256;

/// A single state-change notification. Each variant carries exactly the
/// datum that changed.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    FmsCommsChanged(bool),
    RadioCommsChanged(bool),
    RobotCommsChanged(bool),
    RobotEnabledChanged(bool),
    RobotCodeChanged(bool),
    ControlModeChanged(ControlMode),
    StationChanged { alliance: Alliance, position: Position },
    EStopChanged(bool),
    VoltageChanged(f32),
    CpuChanged(u8),
    RamChanged(u8),
    DiskChanged(u8),
    CanChanged(u8),
    JoystickCountChanged(usize),
    NetConsoleMessage(Vec<u8>),
    StatusStringChanged(String),
}

/// Producer handle. Cheaply cloneable; held by the configuration store, the
/// joystick registry, and the dispatcher.
#[derive(Clone)]
pub struct EventSender(mpsc::Sender<Event>);

impl EventSender {
    /// Pushes an event. Drops it silently if the queue is at capacity; this
    /// is the expected behavior under backpressure, not an error.
    pub fn push(&self, event: Event) {
        let _ = self.0.try_send(event);
    }
}

/// The queue itself, owned by the [`DriverStation`](crate::DriverStation)
/// façade. The host calls [`EventQueue::poll`]; everything else in the
/// engine pushes through a cloned [`EventSender`].
pub struct EventQueue {
    tx: mpsc::Sender<Event>,
    rx: Mutex<mpsc::Receiver<Event>>,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        EventQueue {
            tx,
            rx: Mutex::new(rx),
        }
    }

    pub fn sender(&self) -> EventSender {
        EventSender(self.tx.clone())
    }

    /// Drains one event, if any is queued. Mirrors `DS_PollEvent`'s
    /// `(event, bool)` return shape via `Option`.
    pub async fn poll(&self) -> Option<Event> {
        self.rx.lock().await.try_recv().ok()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        EventQueue::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn poll_returns_none_when_empty() {
        let q = EventQueue::new(4);
        assert_eq!(q.poll().await, None);
    }

    #[tokio::test]
    async fn push_then_poll_is_fifo() {
        let q = EventQueue::new(4);
        let tx = q.sender();
        tx.push(Event::VoltageChanged(12.0));
        tx.push(Event::CpuChanged(50));

        assert_eq!(q.poll().await, Some(Event::VoltageChanged(12.0)));
        assert_eq!(q.poll().await, Some(Event::CpuChanged(50)));
        assert_eq!(q.poll().await, None);
    }

    #[tokio::test]
    async fn overflow_drops_silently_instead_of_blocking_or_panicking() {
        let q = EventQueue::new(2);
        let tx = q.sender();
        tx.push(Event::CpuChanged(1));
        tx.push(Event::CpuChanged(2));
        tx.push(Event::CpuChanged(3)); // dropped, queue full

        assert_eq!(q.poll().await, Some(Event::CpuChanged(1)));
        assert_eq!(q.poll().await, Some(Event::CpuChanged(2)));
        assert_eq!(q.poll().await, None);
    }
}
