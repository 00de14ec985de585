/// Bounded point slices streamed from a worker to the coordinator
use constants::streaming::CHUNK_SIZE;

use crate::point_set::{DEFAULT_COLOUR, PointSet};

/// Owned slice of a point stream covering `[chunk_start, chunk_end)`.
///
/// Arrays are copies of the producer's data so that sending a chunk moves
/// its storage across threads without aliasing.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub positions: Vec<[f32; 3]>,
    /// Always present; white when the source carried no colour
    pub colors: Vec<[f32; 3]>,
    pub normals: Option<Vec<[f32; 3]>>,
    pub is_first: bool,
    pub is_last: bool,
    pub total_points: usize,
    pub chunk_start: usize,
    pub chunk_end: usize,
    pub was_downsampled: bool,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.chunk_end - self.chunk_start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Slices point sets into fixed-size chunks.
#[derive(Debug, Clone, Copy)]
pub struct ChunkTransmitter {
    chunk_size: usize,
}

impl Default for ChunkTransmitter {
    fn default() -> Self {
        Self::new(CHUNK_SIZE)
    }
}

impl ChunkTransmitter {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of chunks a set of `total_points` produces.
    pub fn chunk_count(&self, total_points: usize) -> usize {
        total_points.div_ceil(self.chunk_size)
    }

    /// Iterate the set's chunks in index order.
    pub fn chunks<'a>(&self, set: &'a PointSet, was_downsampled: bool) -> Chunks<'a> {
        Chunks {
            set,
            chunk_size: self.chunk_size,
            sent: 0,
            was_downsampled,
        }
    }

    /// Feed every chunk to `sink` until it returns `false`.
    /// Returns the number of chunks the sink accepted.
    pub fn transmit(
        &self,
        set: &PointSet,
        was_downsampled: bool,
        mut sink: impl FnMut(Chunk) -> bool,
    ) -> usize {
        let mut delivered = 0;
        for chunk in self.chunks(set, was_downsampled) {
            if !sink(chunk) {
                break;
            }
            delivered += 1;
        }
        delivered
    }
}

/// Iterator over owned chunks of a point set.
pub struct Chunks<'a> {
    set: &'a PointSet,
    chunk_size: usize,
    sent: usize,
    was_downsampled: bool,
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let total_points = self.set.len();
        if self.sent >= total_points {
            return None;
        }

        let start = self.sent;
        let end = (start + self.chunk_size).min(total_points);
        let range = start..end;

        let colors = match &self.set.colors {
            Some(colors) => colors[range.clone()].to_vec(),
            None => vec![DEFAULT_COLOUR; end - start],
        };

        self.sent = end;

        Some(Chunk {
            positions: self.set.positions[range.clone()].to_vec(),
            colors,
            normals: self.set.normals.as_ref().map(|n| n[range].to_vec()),
            is_first: start == 0,
            is_last: end >= total_points,
            total_points,
            chunk_start: start,
            chunk_end: end,
            was_downsampled: self.was_downsampled,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.set.len() - self.sent).div_ceil(self.chunk_size);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Chunks<'_> {}
