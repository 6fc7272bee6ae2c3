//! Background timers that only raise flags
//!
//! Timer tasks never touch session state. They set an atomic flag that the
//! owning task consumes on its next pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

/// Raises its flag every `period` until stopped
#[derive(Debug)]
pub struct PeriodicFlag {
    period: Duration,
    flag: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl PeriodicFlag {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            flag: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    /// Start, or restart from zero if already running
    pub fn start(&mut self) {
        self.stop();
        let flag = self.flag.clone();
        let period = self.period;
        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                flag.store(true, Ordering::Release);
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.flag.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Consume the flag, returning whether it was raised
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }

    /// Raise the flag immediately
    pub fn raise(&self) {
        self.flag.store(true, Ordering::Release);
    }
}

impl Drop for PeriodicFlag {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Raises its flag once, `delay` after being armed
#[derive(Debug, Default)]
pub struct OneShotFlag {
    fired: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl OneShotFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, delay: Duration) {
        self.disarm();
        let fired = self.fired.clone();
        self.task = Some(tokio::spawn(async move {
            sleep(delay).await;
            fired.store(true, Ordering::Release);
        }));
    }

    pub fn disarm(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.fired.store(false, Ordering::Release);
    }

    pub fn is_armed(&self) -> bool {
        self.task.is_some()
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

impl Drop for OneShotFlag {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
