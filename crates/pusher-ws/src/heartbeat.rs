//! Silence watchdog for the price service connection.
//!
//! The price service pushes updates continuously while subscribed, so a quiet
//! socket is the first sign of a half-open connection. After `interval` of
//! silence the watchdog asks for a ping; if nothing at all arrives within
//! `timeout` of that ping, the connection is declared dead.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// What the connection loop should do after a watchdog check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogAction {
    /// Traffic is flowing or a ping is still within its timeout.
    Idle,
    /// Quiet for too long: send a ping.
    SendPing,
    /// The outstanding ping went unanswered.
    TimedOut,
}

#[derive(Debug, Clone, Copy)]
enum Probe {
    Quiet,
    PingSent(Instant),
}

#[derive(Debug)]
struct WatchState {
    last_frame: Instant,
    probe: Probe,
}

#[derive(Debug)]
pub struct SilenceWatchdog {
    interval: Duration,
    timeout: Duration,
    state: Mutex<WatchState>,
}

impl SilenceWatchdog {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            state: Mutex::new(WatchState {
                last_frame: Instant::now(),
                probe: Probe::Quiet,
            }),
        }
    }

    /// Start watching a fresh connection.
    pub fn reset(&self) {
        self.record_frame();
    }

    /// Any inbound frame proves the peer is alive, pong or not.
    pub fn record_frame(&self) {
        let mut state = self.state.lock();
        state.last_frame = Instant::now();
        state.probe = Probe::Quiet;
    }

    pub fn record_ping(&self) {
        self.state.lock().probe = Probe::PingSent(Instant::now());
    }

    pub fn silent_for(&self) -> Duration {
        self.state.lock().last_frame.elapsed()
    }

    pub fn check(&self) -> WatchdogAction {
        let state = self.state.lock();
        match state.probe {
            Probe::PingSent(at) if at.elapsed() > self.timeout => WatchdogAction::TimedOut,
            Probe::PingSent(_) => WatchdogAction::Idle,
            Probe::Quiet if state.last_frame.elapsed() >= self.interval => WatchdogAction::SendPing,
            Probe::Quiet => WatchdogAction::Idle,
        }
    }

    /// Sleep until the next check is due.
    pub async fn tick(&self) {
        let period = (self.interval / 2).min(self.timeout).max(Duration::from_millis(1));
        tokio::time::sleep(period).await;
    }
}
