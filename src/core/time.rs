//! Fixed-rate tick timing for the host and client loops

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Tick-rate statistics for a time window
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TickWindow {
    pub avg: f32,
    pub min: f32,
    pub max: f32,
}

/// Measures tick deltas and paces a loop to a target rate
pub struct TickTimer {
    target: Duration,
    last_tick: Instant,
    delta: Duration,
    tick_count: u64,
    /// (timestamp, tick_time_secs) for the rolling window
    history: VecDeque<(Instant, f32)>,
}

impl TickTimer {
    /// Create a timer that paces ticks at `ticks_per_second`
    pub fn new(ticks_per_second: u32) -> Self {
        let rate = ticks_per_second.max(1);
        Self {
            target: Duration::from_secs(1) / rate,
            last_tick: Instant::now(),
            delta: Duration::ZERO,
            tick_count: 0,
            history: VecDeque::new(),
        }
    }

    /// Call once per tick to update timing
    pub fn tick(&mut self) {
        let now = Instant::now();
        self.delta = now - self.last_tick;
        self.last_tick = now;
        self.tick_count += 1;

        self.history.push_back((now, self.delta.as_secs_f32()));

        let cutoff = now.checked_sub(Duration::from_secs(5)).unwrap_or(now);
        while let Some(&(timestamp, _)) = self.history.front() {
            if timestamp < cutoff {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }

    /// Sleep for whatever remains of the current tick's time slice
    pub fn sleep_remaining(&self) {
        let elapsed = self.last_tick.elapsed();
        if elapsed < self.target {
            std::thread::sleep(self.target - elapsed);
        }
    }

    /// Get delta time in seconds
    pub fn delta_secs(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    /// Get delta time as Duration
    pub fn delta(&self) -> Duration {
        self.delta
    }

    /// Get total tick count
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Target duration of one tick
    pub fn target(&self) -> Duration {
        self.target
    }

    /// Rolling tick-rate statistics over the last five seconds
    pub fn rate_stats(&self) -> TickWindow {
        let mut count = 0;
        let mut total = 0.0f32;
        let mut min_rate = f32::INFINITY;
        let mut max_rate = 0.0f32;

        for &(_, tick_time) in self.history.iter() {
            count += 1;
            total += tick_time;
            let rate = if tick_time > 0.0 { 1.0 / tick_time } else { 0.0 };
            min_rate = min_rate.min(rate);
            max_rate = max_rate.max(rate);
        }

        if count == 0 {
            return TickWindow { avg: 0.0, min: 0.0, max: 0.0 };
        }

        TickWindow {
            avg: if total > 0.0 { count as f32 / total } else { 0.0 },
            min: min_rate,
            max: max_rate,
        }
    }
}

impl Default for TickTimer {
    fn default() -> Self {
        Self::new(30)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_from_rate() {
        let timer = TickTimer::new(20);
        assert_eq!(timer.target(), Duration::from_millis(50));
    }

    #[test]
    fn test_zero_rate_is_clamped() {
        let timer = TickTimer::new(0);
        assert_eq!(timer.target(), Duration::from_secs(1));
    }

    #[test]
    fn test_tick_counts_and_stats() {
        let mut timer = TickTimer::new(1000);
        assert_eq!(timer.rate_stats(), TickWindow { avg: 0.0, min: 0.0, max: 0.0 });

        std::thread::sleep(Duration::from_millis(2));
        timer.tick();
        std::thread::sleep(Duration::from_millis(2));
        timer.tick();

        assert_eq!(timer.tick_count(), 2);
        assert!(timer.delta() >= Duration::from_millis(2));
        let stats = timer.rate_stats();
        assert!(stats.avg > 0.0);
        assert!(stats.min <= stats.max);
    }
}
