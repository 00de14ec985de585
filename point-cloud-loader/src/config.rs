/// Loader configuration with defaults from the shared constants crate
use std::path::Path;
use std::time::Duration;

use constants::buffer_pool::{MAX_POOL_DEPTH, MAX_POOLED_BYTES, PREALLOCATION_FACTOR};
use constants::downsampling::{DOWNSAMPLE_THRESHOLD, TARGET_POINTS};
use constants::ply::MAX_HEADER_BYTES;
use constants::streaming::{
    CHUNK_SIZE, DEFAULT_MAX_WORKERS, IDLE_FALLBACK_MS, IDLE_TIMEOUT_MS, UPDATE_INTERVAL_MS,
};
use serde::{Deserialize, Serialize};

/// Whether oversized files are thinned before streaming.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum QualityMode {
    #[default]
    Downsampled,
    Original,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Concurrent parse workers; hardware concurrency when unset
    pub max_workers: Option<usize>,
    pub chunk_size: usize,
    pub downsample_threshold: usize,
    pub target_point_count: usize,
    pub update_interval_ms: u64,
    pub idle_timeout_ms: u64,
    pub idle_fallback_ms: u64,
    /// Defer incremental updates to idle slots, otherwise use a fixed timer
    pub use_idle_scheduling: bool,
    pub max_header_bytes: usize,
    pub pool_max_bytes: usize,
    pub pool_max_depth: usize,
    pub preallocation_factor: f64,
    pub quality_mode: QualityMode,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_workers: None,
            chunk_size: CHUNK_SIZE,
            downsample_threshold: DOWNSAMPLE_THRESHOLD,
            target_point_count: TARGET_POINTS,
            update_interval_ms: UPDATE_INTERVAL_MS,
            idle_timeout_ms: IDLE_TIMEOUT_MS,
            idle_fallback_ms: IDLE_FALLBACK_MS,
            use_idle_scheduling: true,
            max_header_bytes: MAX_HEADER_BYTES,
            pool_max_bytes: MAX_POOLED_BYTES,
            pool_max_depth: MAX_POOL_DEPTH,
            preallocation_factor: PREALLOCATION_FACTOR,
            quality_mode: QualityMode::Downsampled,
        }
    }
}

impl LoaderConfig {
    /// Load a JSON config; absent keys keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Configured worker count, or available parallelism with a fallback of 4.
    pub fn worker_limit(&self) -> usize {
        self.max_workers
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(DEFAULT_MAX_WORKERS)
            })
            .max(1)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn idle_fallback(&self) -> Duration {
        Duration::from_millis(self.idle_fallback_ms)
    }
}
