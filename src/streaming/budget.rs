//! Per-tick budgets for draining completed builds
//!
//! Draining is bounded by wall-clock time, total vertices handed to the
//! render sink, and item count. Whichever limit is hit first ends the drain.

use std::time::{Duration, Instant};

/// Limits applied to one drain
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrainBudget {
    /// Wall-clock time allowed for the drain
    pub max_time: Duration,
    /// Total vertices that may be drained
    pub max_vertices: usize,
    /// Results that may be drained
    pub max_items: usize,
}

impl DrainBudget {
    /// Create a new drain budget
    ///
    /// # Arguments
    /// * `max_time_ms` - Wall-clock milliseconds per drain
    /// * `max_vertices` - Vertex limit per drain
    /// * `max_items` - Result limit per drain
    pub fn new(max_time_ms: f32, max_vertices: usize, max_items: usize) -> Self {
        Self {
            max_time: Duration::from_micros((max_time_ms.max(0.0) * 1000.0).round() as u64),
            max_vertices,
            max_items,
        }
    }

    /// Budget with no limits, for shutdown and tests
    pub fn unlimited() -> Self {
        Self {
            max_time: Duration::MAX,
            max_vertices: usize::MAX,
            max_items: usize::MAX,
        }
    }

    /// Start metering a drain against this budget
    pub fn start(&self) -> DrainMeter {
        DrainMeter {
            budget: *self,
            started: Instant::now(),
            vertices: 0,
            items: 0,
        }
    }
}

impl Default for DrainBudget {
    fn default() -> Self {
        Self::new(1.5, 250_000, 6)
    }
}

/// Running totals of one drain
#[derive(Debug)]
pub struct DrainMeter {
    budget: DrainBudget,
    started: Instant,
    vertices: usize,
    items: usize,
}

impl DrainMeter {
    // --- Decision methods ---

    /// Whether another item may be taken at all
    ///
    /// Time is checked after items are taken, so the first item of a drain
    /// is never refused on time alone.
    pub fn has_room(&self) -> bool {
        if self.items >= self.budget.max_items {
            return false;
        }
        self.items == 0 || self.started.elapsed() < self.budget.max_time
    }

    /// Whether an item with `vertices` fits the vertex budget
    ///
    /// An oversized item is admitted only as the first of a drain so it
    /// cannot starve.
    pub fn admits(&self, vertices: usize) -> bool {
        self.items == 0 || self.vertices.saturating_add(vertices) <= self.budget.max_vertices
    }

    // --- Tracking methods ---

    /// Account for an item that was taken
    pub fn record(&mut self, vertices: usize) {
        self.items += 1;
        self.vertices = self.vertices.saturating_add(vertices);
    }

    // --- Query methods ---

    pub fn items(&self) -> usize {
        self.items
    }

    pub fn vertices(&self) -> usize {
        self.vertices
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
