//! Per-cycle admission budget for visibility updates
//!
//! Tracks the points and nodes admitted during one scheduler cycle against
//! the visible point target, and the wall-clock time spent against the
//! cycle's time budget.

use crate::core::time::Clock;
use std::time::Duration;

/// Point and time budget of a single update cycle
///
/// Admission is strict: a node is accepted only while the admitted total
/// stays below the target, so a cycle never ends above the target.
#[derive(Clone, Debug)]
pub struct CycleBudget {
    /// Maximum number of visible points
    point_target: u64,
    /// Wall-clock time a cycle may spend traversing
    time_budget: Duration,
    /// Clock reading when the cycle started
    started: Duration,
    /// Points admitted so far
    visible_points: u64,
    /// Nodes admitted so far
    visible_nodes: usize,
}

impl CycleBudget {
    /// Start a budget at the clock's current time
    ///
    /// # Arguments
    /// * `point_target` - Visible point target
    /// * `time_budget` - Maximum traversal time
    /// * `clock` - Time source, read once here and once per check
    pub fn start(point_target: u64, time_budget: Duration, clock: &dyn Clock) -> Self {
        Self {
            point_target,
            time_budget,
            started: clock.now(),
            visible_points: 0,
            visible_nodes: 0,
        }
    }

    // --- Tracking methods ---

    /// Check if a node with `num_points` fits in the remaining budget
    pub fn can_admit(&self, num_points: u64) -> bool {
        self.visible_points.saturating_add(num_points) < self.point_target
    }

    /// Count an admitted node
    pub fn admit(&mut self, num_points: u64) {
        self.visible_points = self.visible_points.saturating_add(num_points);
        self.visible_nodes += 1;
    }

    // --- Query methods ---

    pub fn visible_points(&self) -> u64 {
        self.visible_points
    }

    pub fn visible_nodes(&self) -> usize {
        self.visible_nodes
    }

    /// Points still available before the target is reached
    pub fn remaining_points(&self) -> u64 {
        self.point_target.saturating_sub(self.visible_points)
    }

    /// Time since the cycle started
    pub fn elapsed(&self, clock: &dyn Clock) -> Duration {
        clock.now().saturating_sub(self.started)
    }

    /// True once the cycle has run longer than its time budget
    pub fn time_exceeded(&self, clock: &dyn Clock) -> bool {
        self.elapsed(clock) > self.time_budget
    }
}
