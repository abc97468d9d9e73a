//! Streaming configuration

use crate::core::error::Error;
use crate::core::types::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables for the streaming engine
///
/// Every field has a default, so a JSON file only needs the values it changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Upper bound on points admitted to the display list per cycle
    pub visible_point_target: u64,
    /// Children projecting to fewer pixels (radius) than this are pruned
    pub min_node_pixel_size: f32,
    /// Cache capacity in nodes; the cache is trimmed to this after each cycle
    pub max_nodes_in_memory: usize,
    /// Number of loader worker threads
    pub loader_threads: usize,
    /// Bounded capacity of the load request queue
    pub load_queue_capacity: usize,
    /// Depth loaded synchronously when the cloud is opened
    pub preload_to_level: u32,
    /// Wall-clock budget for one visibility cycle, in milliseconds
    pub update_time_budget_ms: u64,
    /// Angle used for the projection factor `1 / tan(fov)`, in radians
    pub projection_fov: f32,
    /// Prune children whose bounding sphere is entirely behind the camera
    pub cull_behind_camera: bool,
    /// Start the loader gate closed; requests queue up until `resume`
    pub start_loader_paused: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            visible_point_target: 1_000_000,
            min_node_pixel_size: 100.0,
            max_nodes_in_memory: 20_000,
            loader_threads: 2,
            load_queue_capacity: 256,
            preload_to_level: 2,
            update_time_budget_ms: 150,
            projection_fov: 0.6,
            cull_behind_camera: true,
            start_loader_paused: false,
        }
    }
}

impl StreamingConfig {
    /// Parse a configuration from JSON, filling unspecified fields with defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.loader_threads == 0 {
            return Err(Error::Config("loader_threads must be at least 1".into()));
        }
        if self.load_queue_capacity == 0 {
            return Err(Error::Config("load_queue_capacity must be at least 1".into()));
        }
        if !(self.projection_fov > 0.0 && self.projection_fov < std::f32::consts::FRAC_PI_2) {
            return Err(Error::Config(format!(
                "projection_fov must lie in (0, pi/2), got {}",
                self.projection_fov
            )));
        }
        if !self.min_node_pixel_size.is_finite() || self.min_node_pixel_size < 0.0 {
            return Err(Error::Config("min_node_pixel_size must be a non-negative number".into()));
        }
        Ok(())
    }

    /// Projection factor applied to `radius / sqrt(d^2 - r^2)`
    pub fn projection_factor(&self) -> f32 {
        1.0 / self.projection_fov.tan()
    }

    pub fn update_time_budget(&self) -> Duration {
        Duration::from_millis(self.update_time_budget_ms)
    }
}
