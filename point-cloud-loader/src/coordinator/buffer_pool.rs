use std::collections::VecDeque;

use constants::buffer_pool::{MAX_POOL_DEPTH, MAX_POOLED_BYTES};

use super::geometry::{AttributeKind, PointGeometry};

/// Reuse counters for a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub reused: usize,
    pub allocated: usize,
    pub released: usize,
    pub discarded: usize,
}

/// Scratch `f32` arrays kept per attribute kind for reuse by later
/// geometry builds. Oversized arrays are never kept and the oldest entry
/// is evicted once a kind holds more than `max_depth`.
#[derive(Debug)]
pub struct BufferPool {
    positions: VecDeque<Vec<f32>>,
    colors: VecDeque<Vec<f32>>,
    normals: VecDeque<Vec<f32>>,
    max_floats: usize,
    max_depth: usize,
    stats: PoolStats,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(MAX_POOLED_BYTES, MAX_POOL_DEPTH)
    }
}

impl BufferPool {
    pub fn new(max_bytes: usize, max_depth: usize) -> Self {
        Self {
            positions: VecDeque::new(),
            colors: VecDeque::new(),
            normals: VecDeque::new(),
            max_floats: max_bytes / size_of::<f32>(),
            max_depth,
            stats: PoolStats::default(),
        }
    }

    fn queue(&mut self, kind: AttributeKind) -> &mut VecDeque<Vec<f32>> {
        match kind {
            AttributeKind::Position => &mut self.positions,
            AttributeKind::Color => &mut self.colors,
            AttributeKind::Normal => &mut self.normals,
        }
    }

    /// First pooled array holding at least `floats`, or a fresh zeroed one.
    /// Reused arrays keep stale contents past whatever the caller writes.
    pub fn acquire(&mut self, kind: AttributeKind, floats: usize) -> Vec<f32> {
        if floats == 0 {
            return Vec::new();
        }

        let queue = self.queue(kind);
        if let Some(index) = queue.iter().position(|buffer| buffer.len() >= floats) {
            if let Some(buffer) = queue.remove(index) {
                self.stats.reused += 1;
                return buffer;
            }
        }

        self.stats.allocated += 1;
        vec![0.0; floats]
    }

    pub fn release(&mut self, kind: AttributeKind, buffer: Vec<f32>) {
        if buffer.is_empty() || buffer.len() > self.max_floats {
            self.stats.discarded += 1;
            return;
        }

        let max_depth = self.max_depth;
        let queue = self.queue(kind);
        queue.push_back(buffer);
        if queue.len() > max_depth {
            queue.pop_front();
        }
        self.stats.released += 1;
    }

    /// Return a pooled geometry's storage; unpooled geometry is just dropped.
    pub fn release_geometry(&mut self, geometry: PointGeometry) {
        if !geometry.is_pooled() {
            return;
        }
        for (kind, storage) in geometry.into_storage() {
            self.release(kind, storage);
        }
    }

    /// Arrays currently held for `kind`.
    pub fn depth(&self, kind: AttributeKind) -> usize {
        match kind {
            AttributeKind::Position => self.positions.len(),
            AttributeKind::Color => self.colors.len(),
            AttributeKind::Normal => self.normals.len(),
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    pub fn clear(&mut self) {
        for kind in AttributeKind::ALL {
            self.queue(kind).clear();
        }
    }
}
