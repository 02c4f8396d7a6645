//! Process health monitor.
//!
//! The router boundary catches panic-equivalents, logs them and reports
//! them here; too many in a short window marks the process unhealthy so
//! the supervisor can recycle it.

use std::sync::Mutex;
use std::time::{Duration, Instant};

const MAX_PANICS: u32 = 50;
const PANIC_WINDOW: Duration = Duration::from_secs(120);

#[derive(Default)]
struct PanicState {
    count: u32,
    last: Option<Instant>,
    failed: bool,
}

/// Injected health service owning the panic counter.
#[derive(Default)]
pub struct HealthMonitor {
    state: Mutex<PanicState>,
}

impl HealthMonitor {
    pub fn new() -> HealthMonitor {
        HealthMonitor::default()
    }

    /// Record a recovered panic.
    pub fn record_panic(&self) {
        self.record_panic_at(Instant::now());
    }

    fn record_panic_at(&self, now: Instant) {
        let mut state = self.state.lock().expect("health state poisoned");
        // Counter restarts when the last panic fell out of the window.
        if let Some(last) = state.last {
            if now.duration_since(last) > PANIC_WINDOW {
                state.count = 0;
            }
        }
        state.count += 1;
        state.last = Some(now);
        if state.count > MAX_PANICS {
            state.failed = true;
            tracing::error!(count = state.count, "too many recovered panics, marking unhealthy");
        }
    }

    pub fn healthy(&self) -> bool {
        !self.state.lock().expect("health state poisoned").failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_until_threshold_exceeded() {
        let monitor = HealthMonitor::new();
        for _ in 0..MAX_PANICS {
            monitor.record_panic();
        }
        assert!(monitor.healthy());
        monitor.record_panic();
        assert!(!monitor.healthy());
    }

    #[test]
    fn counter_resets_after_quiet_window() {
        let monitor = HealthMonitor::new();
        let start = Instant::now();
        for _ in 0..MAX_PANICS {
            monitor.record_panic_at(start);
        }
        // One more, but long after the window: the streak restarts.
        monitor.record_panic_at(start + PANIC_WINDOW + Duration::from_secs(1));
        assert!(monitor.healthy());
    }
}
