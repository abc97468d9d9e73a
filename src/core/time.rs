//! Time sources for cycle budgets

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic time source consulted by the scheduler's time budget
pub trait Clock: Send + Sync {
    /// Time elapsed since an arbitrary, fixed origin
    fn now(&self) -> Duration;
}

/// Wall clock backed by [`Instant`]
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock that only moves when told to
///
/// Clones share the same counter, so a test can keep one handle and hand
/// another to the point cloud.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

/// Clock advancing a fixed step on every read
///
/// Lets tests exhaust a time budget after a known number of reads.
#[derive(Debug)]
pub struct SteppingClock {
    step: Duration,
    reads: AtomicU64,
}

impl SteppingClock {
    pub fn new(step: Duration) -> Self {
        Self { step, reads: AtomicU64::new(0) }
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> Duration {
        let reads = self.reads.fetch_add(1, Ordering::SeqCst);
        self.step * reads as u32
    }
}
