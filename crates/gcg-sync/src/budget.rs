use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

/// Process-wide wall-clock budget, checked cooperatively between sets and items.
#[derive(Debug, Clone)]
pub struct RunBudget {
    started: Instant,
    limit: Duration,
    exhausted: Arc<AtomicBool>,
}

impl RunBudget {
    pub fn new(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
            exhausted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(Duration::MAX)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Latches: once exhausted, every clone reports exhausted for the rest of the run.
    pub fn is_exhausted(&self) -> bool {
        if self.exhausted.load(Ordering::Acquire) {
            return true;
        }
        if self.elapsed() >= self.limit {
            self.exhaust();
            return true;
        }
        false
    }

    pub fn exhaust(&self) {
        if !self.exhausted.swap(true, Ordering::AcqRel) {
            warn!(
                elapsed_secs = self.elapsed().as_secs(),
                limit_secs = self.limit.as_secs(),
                "runtime budget exhausted; halting discovery and scraping"
            );
        }
    }
}
