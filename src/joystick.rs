//! Joystick registry (C6): an indexed table of logical joysticks, written by
//! the host and read by the dispatcher when it builds the next outbound
//! packet.
//!
//! Out-of-range reads return zero. When `robot_enabled` is false, axis/hat/
//! button reads must return neutral values regardless of what's stored, a
//! safety property enforced at every read path (the per-axis getters and
//! the dispatcher's snapshot alike), not at the individual setters.

use crate::events::{Event, EventSender};
use tokio::sync::RwLock;

/// A single joystick's state. All arrays are zero-initialized on `add`.
#[derive(Debug, Clone)]
pub struct Joystick {
    axes: Vec<f32>,
    hats: Vec<i16>,
    buttons: Vec<bool>,
}

impl Joystick {
    fn new(num_axes: usize, num_hats: usize, num_buttons: usize) -> Self {
        Joystick {
            axes: vec![0.0; num_axes],
            hats: vec![0; num_hats],
            buttons: vec![false; num_buttons],
        }
    }

    pub fn num_axes(&self) -> usize {
        self.axes.len()
    }

    pub fn num_hats(&self) -> usize {
        self.hats.len()
    }

    pub fn num_buttons(&self) -> usize {
        self.buttons.len()
    }

    pub fn axes(&self) -> &[f32] {
        &self.axes
    }

    pub fn hats(&self) -> &[i16] {
        &self.hats
    }

    pub fn buttons(&self) -> &[bool] {
        &self.buttons
    }
}

/// The registry itself, shared behind an `Arc` by the façade and the
/// dispatcher.
pub struct JoystickRegistry {
    inner: RwLock<Vec<Joystick>>,
    events: EventSender,
}

impl JoystickRegistry {
    pub fn new(events: EventSender) -> Self {
        JoystickRegistry {
            inner: RwLock::new(Vec::new()),
            events,
        }
    }

    /// Appends a joystick with neutral state, pushing `JoystickCountChanged`.
    pub async fn add(&self, num_axes: usize, num_hats: usize, num_buttons: usize) -> usize {
        let mut joysticks = self.inner.write().await;
        joysticks.push(Joystick::new(num_axes, num_hats, num_buttons));
        let count = joysticks.len();
        self.events.push(Event::JoystickCountChanged(count));
        count - 1
    }

    /// Empties the table, pushing `JoystickCountChanged(0)`.
    pub async fn reset(&self) {
        let mut joysticks = self.inner.write().await;
        if !joysticks.is_empty() {
            joysticks.clear();
            self.events.push(Event::JoystickCountChanged(0));
        }
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn set_axis(&self, index: usize, which: usize, value: f32) {
        let mut joysticks = self.inner.write().await;
        if let Some(js) = joysticks.get_mut(index) {
            if let Some(slot) = js.axes.get_mut(which) {
                *slot = value.clamp(-1.0, 1.0);
            }
        }
    }

    pub async fn set_hat(&self, index: usize, which: usize, angle: i16) {
        let mut joysticks = self.inner.write().await;
        if let Some(js) = joysticks.get_mut(index) {
            if let Some(slot) = js.hats.get_mut(which) {
                *slot = angle;
            }
        }
    }

    pub async fn set_button(&self, index: usize, which: usize, pressed: bool) {
        let mut joysticks = self.inner.write().await;
        if let Some(js) = joysticks.get_mut(index) {
            if let Some(slot) = js.buttons.get_mut(which) {
                *slot = pressed;
            }
        }
    }

    /// Reads one axis. Out-of-range returns neutral. When `robot_enabled` is
    /// false this returns neutral regardless of stored content, the same
    /// safety property [`JoystickRegistry::snapshot`] enforces for the wire
    /// path.
    pub async fn axis(&self, index: usize, which: usize, robot_enabled: bool) -> f32 {
        if !robot_enabled {
            return 0.0;
        }
        self.inner
            .read()
            .await
            .get(index)
            .and_then(|js| js.axes.get(which).copied())
            .unwrap_or(0.0)
    }

    /// Reads one hat. See [`JoystickRegistry::axis`] for the disabled-reads
    /// safety property.
    pub async fn hat(&self, index: usize, which: usize, robot_enabled: bool) -> i16 {
        if !robot_enabled {
            return 0;
        }
        self.inner
            .read()
            .await
            .get(index)
            .and_then(|js| js.hats.get(which).copied())
            .unwrap_or(0)
    }

    /// Reads one button. See [`JoystickRegistry::axis`] for the
    /// disabled-reads safety property.
    pub async fn button(&self, index: usize, which: usize, robot_enabled: bool) -> bool {
        if !robot_enabled {
            return false;
        }
        self.inner
            .read()
            .await
            .get(index)
            .and_then(|js| js.buttons.get(which).copied())
            .unwrap_or(false)
    }

    /// A published snapshot of every joystick's state, used by the
    /// dispatcher to build the outbound joystick block. When
    /// `robot_enabled` is false, every axis/hat/button is forced neutral,
    /// a safety property, not merely a display choice.
    pub async fn snapshot(&self, robot_enabled: bool) -> Vec<Joystick> {
        let joysticks = self.inner.read().await;
        if robot_enabled {
            joysticks.clone()
        } else {
            joysticks
                .iter()
                .map(|js| Joystick::new(js.num_axes(), js.num_hats(), js.num_buttons()))
                .collect()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::events::EventQueue;

    fn registry() -> (JoystickRegistry, EventQueue) {
        let q = EventQueue::new(64);
        (JoystickRegistry::new(q.sender()), q)
    }

    #[tokio::test]
    async fn add_appends_neutral_joystick_and_emits_count() {
        let (reg, queue) = registry();
        let idx = reg.add(4, 1, 10).await;
        assert_eq!(idx, 0);
        assert_eq!(reg.count().await, 1);
        assert_eq!(reg.axis(0, 0, true).await, 0.0);
        assert_eq!(reg.hat(0, 0, true).await, 0);
        assert_eq!(reg.button(0, 0, true).await, false);
        assert_eq!(queue.poll().await, Some(Event::JoystickCountChanged(1)));
    }

    #[tokio::test]
    async fn out_of_range_reads_return_neutral() {
        let (reg, _q) = registry();
        reg.add(2, 1, 4).await;
        assert_eq!(reg.axis(0, 9, true).await, 0.0);
        assert_eq!(reg.axis(5, 0, true).await, 0.0);
        assert_eq!(reg.hat(0, 9, true).await, 0);
        assert_eq!(reg.button(5, 0, true).await, false);
    }

    #[tokio::test]
    async fn disabled_snapshot_is_always_neutral_regardless_of_stored_values() {
        let (reg, _q) = registry();
        reg.add(2, 1, 2).await;
        reg.set_axis(0, 0, 0.75).await;
        reg.set_button(0, 1, true).await;
        reg.set_hat(0, 0, 180).await;

        let disabled = reg.snapshot(false).await;
        assert_eq!(disabled[0].axes(), &[0.0, 0.0]);
        assert_eq!(disabled[0].buttons(), &[false, false]);
        assert_eq!(disabled[0].hats(), &[0]);

        let enabled = reg.snapshot(true).await;
        assert_eq!(enabled[0].axes()[0], 0.75);
        assert!(enabled[0].buttons()[1]);
        assert_eq!(enabled[0].hats()[0], 180);
    }

    #[tokio::test]
    async fn disabled_getters_are_always_neutral_regardless_of_stored_values() {
        let (reg, _q) = registry();
        reg.add(2, 1, 2).await;
        reg.set_axis(0, 0, 0.75).await;
        reg.set_button(0, 1, true).await;
        reg.set_hat(0, 0, 180).await;

        assert_eq!(reg.axis(0, 0, false).await, 0.0);
        assert_eq!(reg.button(0, 1, false).await, false);
        assert_eq!(reg.hat(0, 0, false).await, 0);

        assert_eq!(reg.axis(0, 0, true).await, 0.75);
        assert!(reg.button(0, 1, true).await);
        assert_eq!(reg.hat(0, 0, true).await, 180);
    }

    #[tokio::test]
    async fn reset_empties_table_and_emits_zero() {
        let (reg, queue) = registry();
        reg.add(1, 0, 1).await;
        let _ = queue.poll().await;
        reg.reset().await;
        assert_eq!(reg.count().await, 0);
        assert_eq!(queue.poll().await, Some(Event::JoystickCountChanged(0)));
    }
}
