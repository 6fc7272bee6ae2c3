//! Status indicator and watchdog collaborators

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error};

/// Status light driven by the session: breathing while connected
pub trait Indicator: Send + Sync {
    fn start_breathing(&self);
    fn end_breathing(&self);
}

/// Indicator that only logs transitions
#[derive(Debug, Default)]
pub struct LogIndicator {
    breathing: AtomicBool,
}

impl Indicator for LogIndicator {
    fn start_breathing(&self) {
        if !self.breathing.swap(true, Ordering::AcqRel) {
            debug!("Indicator breathing");
        }
    }

    fn end_breathing(&self) {
        if self.breathing.swap(false, Ordering::AcqRel) {
            debug!("Indicator idle");
        }
    }
}

/// Liveness supervisor that reboots the device when it stops being fed
pub trait Watchdog: Send + Sync {
    /// Record that the main loop is alive
    fn feed(&self);

    /// Check the last feed; reboots and returns `false` when it is too old
    fn interrogate(&self) -> bool;

    fn reboot(&self);
}

/// Watchdog measuring the time since the last feed
pub struct StallWatchdog {
    threshold: Duration,
    base: Instant,
    last_feed_ms: AtomicU64,
    on_reboot: Box<dyn Fn() + Send + Sync>,
}

impl StallWatchdog {
    /// `on_reboot` runs when the stall threshold is exceeded
    pub fn new(threshold: Duration, on_reboot: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            threshold,
            base: Instant::now(),
            last_feed_ms: AtomicU64::new(0),
            on_reboot: Box::new(on_reboot),
        }
    }

    /// Watchdog whose reboot terminates the process so a supervisor restarts it
    pub fn exiting(threshold: Duration) -> Self {
        Self::new(threshold, || std::process::exit(70))
    }

    fn now_ms(&self) -> u64 {
        self.base.elapsed().as_millis() as u64
    }

    pub fn since_last_feed(&self) -> Duration {
        let last = self.last_feed_ms.load(Ordering::Acquire);
        Duration::from_millis(self.now_ms().saturating_sub(last))
    }
}

impl fmt::Debug for StallWatchdog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StallWatchdog")
            .field("threshold", &self.threshold)
            .field("since_last_feed", &self.since_last_feed())
            .finish_non_exhaustive()
    }
}

impl Watchdog for StallWatchdog {
    fn feed(&self) {
        self.last_feed_ms.store(self.now_ms(), Ordering::Release);
    }

    fn interrogate(&self) -> bool {
        let stalled_for = self.since_last_feed();
        if stalled_for > self.threshold {
            error!(
                stalled_secs = stalled_for.as_secs(),
                "Main loop stalled, rebooting"
            );
            self.reboot();
            return false;
        }
        true
    }

    fn reboot(&self) {
        (self.on_reboot)();
    }
}
