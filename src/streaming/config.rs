//! Streaming and build scheduling configuration

use serde::{Deserialize, Serialize};

use super::budget::DrainBudget;
use super::desired::WorldSizeTier;

/// Knobs for the desired-set scheduler and the build pipeline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Square radius of chunks kept around each viewpoint
    pub render_radius: i32,
    /// Bounds the world to a fixed square
    pub world_size: WorldSizeTier,
    /// Extra chunks beyond the render radius before eviction
    pub unload_pad: i32,
    /// Seconds between desired-set updates
    pub update_interval_secs: f32,
    /// Build jobs that may be in flight at once
    pub max_concurrent_jobs: usize,
    /// New builds started per streaming update
    pub max_enqueues_per_tick: usize,
    /// Wall-clock drain budget per tick (ms)
    pub drain_time_budget_ms: f32,
    /// Vertices drained per tick
    pub drain_max_vertices: usize,
    /// Results drained per tick
    pub drain_max_items: usize,
    /// Worker threads for builds and saves; 0 picks one per core
    pub worker_threads: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            render_radius: 6,
            world_size: WorldSizeTier::Small,
            unload_pad: 1,
            update_interval_secs: 0.15,
            max_concurrent_jobs: 8,
            max_enqueues_per_tick: 6,
            drain_time_budget_ms: 1.5,
            drain_max_vertices: 250_000,
            drain_max_items: 6,
            worker_threads: 0,
        }
    }
}

impl StreamingConfig {
    pub fn drain_budget(&self) -> DrainBudget {
        DrainBudget::new(
            self.drain_time_budget_ms,
            self.drain_max_vertices,
            self.drain_max_items,
        )
    }

    pub fn world_limit(&self) -> i32 {
        self.world_size.radius_limit()
    }

    /// Clamp values into their legal ranges, logging each correction
    pub fn validate(&mut self) {
        if self.render_radius < 0 {
            log::warn!("render_radius {} clamped to 0", self.render_radius);
            self.render_radius = 0;
        }
        // Beyond twice the limit even a viewpoint at one edge gains nothing
        let max_radius = self.world_limit() * 2;
        if self.render_radius > max_radius {
            log::warn!(
                "render_radius {} clamped to {} for {:?} world",
                self.render_radius,
                max_radius,
                self.world_size
            );
            self.render_radius = max_radius;
        }
        if self.unload_pad < 0 {
            log::warn!("unload_pad {} clamped to 0", self.unload_pad);
            self.unload_pad = 0;
        }
        if self.update_interval_secs.is_nan() || self.update_interval_secs < 0.0 {
            log::warn!("update_interval_secs {} reset to 0.15", self.update_interval_secs);
            self.update_interval_secs = 0.15;
        }
        if self.max_concurrent_jobs == 0 {
            log::warn!("max_concurrent_jobs must be at least 1");
            self.max_concurrent_jobs = 1;
        }
        if self.max_enqueues_per_tick == 0 {
            log::warn!("max_enqueues_per_tick must be at least 1");
            self.max_enqueues_per_tick = 1;
        }
        if self.drain_time_budget_ms < 0.2 {
            log::warn!("drain_time_budget_ms {} clamped to 0.2", self.drain_time_budget_ms);
            self.drain_time_budget_ms = 0.2;
        }
        if self.drain_max_vertices < 10_000 {
            log::warn!("drain_max_vertices {} clamped to 10000", self.drain_max_vertices);
            self.drain_max_vertices = 10_000;
        }
        if self.drain_max_items == 0 {
            log::warn!("drain_max_items must be at least 1");
            self.drain_max_items = 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StreamingConfig::default();
        assert_eq!(config.render_radius, 6);
        assert_eq!(config.world_limit(), 16);
        assert_eq!(config.drain_budget(), DrainBudget::default());
    }

    #[test]
    fn test_validate_clamps() {
        let mut config = StreamingConfig {
            render_radius: -2,
            max_concurrent_jobs: 0,
            drain_time_budget_ms: 0.0,
            drain_max_vertices: 5,
            update_interval_secs: f32::NAN,
            ..StreamingConfig::default()
        };
        config.validate();
        assert_eq!(config.render_radius, 0);
        assert_eq!(config.max_concurrent_jobs, 1);
        assert_eq!(config.drain_time_budget_ms, 0.2);
        assert_eq!(config.drain_max_vertices, 10_000);
        assert_eq!(config.update_interval_secs, 0.15);
    }

    #[test]
    fn test_validate_caps_radius_at_world_size() {
        let mut config = StreamingConfig {
            render_radius: 10_000,
            world_size: WorldSizeTier::Small,
            ..StreamingConfig::default()
        };
        config.validate();
        assert_eq!(config.render_radius, 32);

        config.world_size = WorldSizeTier::Large;
        config.render_radius = 40;
        config.validate();
        assert_eq!(config.render_radius, 40);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: StreamingConfig =
            serde_json::from_str(r#"{ "render_radius": 3, "world_size": "Large" }"#).unwrap();
        assert_eq!(config.render_radius, 3);
        assert_eq!(config.world_size, WorldSizeTier::Large);
        assert_eq!(config.max_enqueues_per_tick, 6);
    }
}
