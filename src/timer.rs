//! Timer & watchdog (C2).
//!
//! Rather than one `tokio::time::interval` per timer (six of them, ticking
//! at three different cadences), the dispatcher (C8) drives all of them off
//! one shared ~5ms ticker and calls [`Timer::tick`] on each.

use std::time::Duration;

/// A send-cadence ticker or receive-watchdog, advanced externally by the
/// dispatcher's precision tick.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    period_ms: u64,
    elapsed_ms: u64,
    enabled: bool,
    expired: bool,
}

impl Timer {
    /// Creates a timer with the given period, stopped.
    pub fn init(period_ms: u64) -> Timer {
        Timer {
            period_ms,
            elapsed_ms: 0,
            enabled: false,
            expired: false,
        }
    }

    /// Replaces the period (used when a protocol reinstall reprograms the
    /// send timers and receive watchdogs) and resets.
    pub fn reprogram(&mut self, period_ms: u64) {
        self.period_ms = period_ms;
        self.reset();
    }

    pub fn start(&mut self) {
        self.enabled = true;
        self.elapsed_ms = 0;
        self.expired = false;
    }

    /// Stops the timer, clearing `enabled`, `expired`, and `elapsed`.
    pub fn stop(&mut self) {
        self.enabled = false;
        self.expired = false;
        self.elapsed_ms = 0;
    }

    /// Zeroes elapsed time and the expired flag without changing `enabled`.
    pub fn reset(&mut self) {
        self.elapsed_ms = 0;
        self.expired = false;
    }

    /// Advances the timer by `delta_ms`. `expired` becomes true once
    /// `elapsed >= period` while the timer is enabled; a disabled or
    /// zero-period (disabled-by-convention) timer never expires.
    pub fn tick(&mut self, delta_ms: u64) {
        if !self.enabled || self.period_ms == 0 {
            return;
        }

        self.elapsed_ms = self.elapsed_ms.saturating_add(delta_ms);
        if self.elapsed_ms >= self.period_ms {
            self.expired = true;
        }
    }

    pub fn expired(&self) -> bool {
        self.expired
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }
}

/// The receive-watchdog period for a peer given its send interval:
/// `min(interval * 50, 1000ms)`. A zero send interval (the radio peer has
/// no send cadence) still wants a meaningful watchdog period, so the caller
/// passes the protocol's own recommended watchdog constant in that case.
pub fn watchdog_period_ms(send_interval_ms: u64) -> u64 {
    (send_interval_ms.saturating_mul(50)).min(1000)
}

/// Blocking pause used by the dispatcher loop between precision ticks.
/// 1ms precision is sufficient for this purpose.
pub async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn expires_once_elapsed_reaches_period() {
        let mut t = Timer::init(20);
        t.start();
        assert!(!t.expired());
        t.tick(15);
        assert!(!t.expired());
        t.tick(5);
        assert!(t.expired());
    }

    #[test]
    fn stop_clears_enabled_expired_and_elapsed() {
        let mut t = Timer::init(20);
        t.start();
        t.tick(25);
        assert!(t.expired());
        t.stop();
        assert!(!t.enabled());
        assert!(!t.expired());
        t.tick(25);
        assert!(!t.expired(), "a stopped timer must not advance");
    }

    #[test]
    fn reset_clears_expired_but_keeps_enabled() {
        let mut t = Timer::init(20);
        t.start();
        t.tick(25);
        assert!(t.expired());
        t.reset();
        assert!(t.enabled());
        assert!(!t.expired());
    }

    #[test]
    fn watchdog_period_caps_at_one_second() {
        assert_eq!(watchdog_period_ms(20), 1000);
        assert_eq!(watchdog_period_ms(500), 1000);
        assert_eq!(watchdog_period_ms(5), 250);
    }
}
