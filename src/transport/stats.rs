//! Packet counter and periodic rate sampler.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::warn;

#[derive(Debug, Default)]
struct Counters {
    packets: AtomicU64,
    last_sampled: AtomicU64,
    /// `f64` bits.
    rate: AtomicU64,
}

/// Cumulative packet count plus a packets-per-second figure refreshed by a sampler task.
#[derive(Debug, Default)]
pub(crate) struct LinkStats {
    counters: Arc<Counters>,
    sampler: Mutex<Option<JoinHandle<()>>>,
}

impl LinkStats {
    pub(crate) fn record_packet(&self) {
        self.counters.packets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn packets(&self) -> u64 {
        self.counters.packets.load(Ordering::Relaxed)
    }

    pub(crate) fn rate(&self) -> f64 {
        f64::from_bits(self.counters.rate.load(Ordering::Relaxed))
    }

    pub(crate) fn reset(&self) {
        self.counters.packets.store(0, Ordering::Relaxed);
        self.counters.last_sampled.store(0, Ordering::Relaxed);
        self.counters.rate.store(0f64.to_bits(), Ordering::Relaxed);
    }

    /// Start (or restart) the sampler. Must be called from within a runtime.
    ///
    /// A period too long to schedule leaves the sampler stopped.
    pub(crate) fn start_sampler(&self, period: Duration) {
        let Some(first_tick) = Instant::now().checked_add(period) else {
            warn!(?period, "rate sampling period out of range, sampler not started");
            self.stop_sampler();
            return;
        };
        let counters: Weak<Counters> = Arc::downgrade(&self.counters);
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(first_tick, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let seconds = period.as_secs_f64();
            loop {
                ticker.tick().await;
                let Some(counters) = counters.upgrade() else {
                    break;
                };
                let now = counters.packets.load(Ordering::Relaxed);
                let before = counters.last_sampled.swap(now, Ordering::Relaxed);
                let rate = now.saturating_sub(before) as f64 / seconds;
                counters.rate.store(rate.to_bits(), Ordering::Relaxed);
            }
        });

        if let Some(previous) = self.sampler.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stop the sampler and zero the rate. The packet count is kept.
    pub(crate) fn stop_sampler(&self) {
        if let Some(handle) = self.sampler.lock().take() {
            handle.abort();
        }
        self.counters.rate.store(0f64.to_bits(), Ordering::Relaxed);
    }
}

impl Drop for LinkStats {
    fn drop(&mut self) {
        if let Some(handle) = self.sampler.get_mut().take() {
            handle.abort();
        }
    }
}
