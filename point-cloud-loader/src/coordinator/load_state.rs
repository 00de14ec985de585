use std::time::Instant;

use serde::Serialize;

use super::geometry::PointGeometry;
use super::handle::Completion;
use crate::chunk::Chunk;
use crate::worker::{LoadId, WorkerHandle};

/// A request waiting for a worker slot.
pub(crate) struct LoadTask {
    pub url: String,
    pub filename: String,
    pub completion: Completion,
}

/// Bookkeeping for one in-flight file.
pub(crate) struct LoadState {
    pub load_id: LoadId,
    pub url: String,
    pub worker: Option<WorkerHandle>,
    pub completion: Completion,
    pub started: Instant,
    pub chunks: Vec<Chunk>,
    /// From worker metadata, before any reduction
    pub total_points: usize,
    /// From chunk headers, after any reduction
    pub stream_total: usize,
    pub received_points: usize,
    pub was_downsampled: bool,
    pub last_update: Option<Instant>,
    /// Grown in place by idle updates once the first one has run
    pub live_geometry: Option<PointGeometry>,
    pub last_chunk_index: usize,
}

impl LoadState {
    pub fn new(load_id: LoadId, task: LoadTask, worker: WorkerHandle) -> Self {
        Self {
            load_id,
            url: task.url,
            worker: Some(worker),
            completion: task.completion,
            started: Instant::now(),
            chunks: Vec::new(),
            total_points: 0,
            stream_total: 0,
            received_points: 0,
            was_downsampled: false,
            last_update: None,
            live_geometry: None,
            last_chunk_index: 0,
        }
    }

    /// Expected total for progress: the stream total once chunks arrive,
    /// the parsed count before that.
    pub fn expected_points(&self) -> usize {
        if self.stream_total > 0 {
            self.stream_total
        } else {
            self.total_points
        }
    }

    pub fn progress(&self) -> LoadProgress {
        let total = self.expected_points();
        LoadProgress {
            received: self.received_points,
            total,
            percentage: if total > 0 {
                self.received_points as f64 / total as f64 * 100.0
            } else {
                0.0
            },
        }
    }
}

/// Snapshot returned by [`LoadCoordinator::progress`](super::LoadCoordinator::progress).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoadProgress {
    pub received: usize,
    pub total: usize,
    pub percentage: f64,
}
