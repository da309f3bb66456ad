//! Aligned Scheduler
//!
//! Computes the next wall-clock-aligned wake instant and arms a one-shot
//! absolute-time wake for it. Each firing pushes a trigger through the
//! orchestrator's guard path and re-arms — self-perpetuating rather than
//! fixed-period, so ticks stay glued to wall-clock boundaries across
//! drift, DST shifts and sleep instead of accumulating phase error.

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::types::FetchReason;

/// Round `now` up to the next multiple of `interval_minutes` (minimum
/// 1) with seconds and subseconds truncated. Always strictly in the
/// future, so a firing at an aligned instant re-arms the following one.
pub fn next_aligned(now: DateTime<Utc>, interval_minutes: u32) -> DateTime<Utc> {
    let interval = interval_minutes.max(1) as i64;
    let minute_of_day = (now.hour() * 60 + now.minute()) as i64;
    let next_minute = (minute_of_day / interval + 1) * interval;

    let midnight = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc();
    midnight + ChronoDuration::minutes(next_minute)
}

/// Self-re-arming one-shot scheduler feeding the trigger channel
pub struct AlignedScheduler {
    interval_minutes: u32,
    trigger_tx: mpsc::Sender<FetchReason>,
    wake: Mutex<Option<JoinHandle<()>>>,
}

impl AlignedScheduler {
    pub fn new(interval_minutes: u32, trigger_tx: mpsc::Sender<FetchReason>) -> Self {
        Self {
            interval_minutes,
            trigger_tx,
            wake: Mutex::new(None),
        }
    }

    /// Arm the wake for the next aligned instant, replacing any wake
    /// already armed. Called once at startup and again after every
    /// firing.
    pub fn arm_next(&self, now: DateTime<Utc>) {
        let at = next_aligned(now, self.interval_minutes);
        let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let tx = self.trigger_tx.clone();

        debug!(%at, delay_ms = delay.as_millis() as u64, "arming aligned wake");

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(FetchReason::Periodic).await.is_err() {
                // Trigger channel gone: nothing re-arms us until another
                // external trigger path is wired back up
                error!("trigger channel closed, scheduler disarmed");
            }
        });

        let mut guard = match self.wake.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = guard.replace(handle) {
            previous.abort();
        }
    }

    /// Cancel a pending wake without re-arming
    pub fn cancel(&self) {
        let mut guard = match self.wake.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(handle) = guard.take() {
            handle.abort();
        }
    }
}
