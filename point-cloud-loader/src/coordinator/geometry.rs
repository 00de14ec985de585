/// Consumer-facing point geometry rebuilt from streamed chunks
use constants::buffer_pool::GROWTH_FACTOR;
use rayon::prelude::*;

use crate::bounds::PointCloudBounds;
use crate::chunk::Chunk;
use crate::point_set::PointSet;

/// Attribute a buffer holds; also keys the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    Position,
    Color,
    Normal,
}

impl AttributeKind {
    pub const ALL: [AttributeKind; 3] = [
        AttributeKind::Position,
        AttributeKind::Color,
        AttributeKind::Normal,
    ];
}

/// Flat `f32` storage with a logical length smaller than or equal to its
/// capacity. Appends write into spare capacity and only reallocate when it
/// runs out, growing geometrically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeBuffer {
    storage: Vec<f32>,
    len: usize,
    reallocations: usize,
}

impl AttributeBuffer {
    /// Empty buffer over existing storage; the whole vector is capacity.
    pub fn from_storage(storage: Vec<f32>) -> Self {
        Self {
            storage,
            len: 0,
            reallocations: 0,
        }
    }

    /// Floats in use.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Floats available before the next reallocation.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// How many times appends had to move the data to larger storage.
    pub fn reallocations(&self) -> usize {
        self.reallocations
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.storage[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.storage[..self.len]
    }

    /// The used range as xyz triples.
    pub fn as_points(&self) -> &[[f32; 3]] {
        bytemuck::cast_slice(self.as_slice())
    }

    /// The used range as raw bytes, ready for upload.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.as_slice())
    }

    /// Make room for `required` floats in total.
    /// Grows to `max(required, capacity * 2)` and copies the used range.
    pub fn reserve_total(&mut self, required: usize) {
        let capacity = self.capacity();
        if required <= capacity {
            return;
        }

        let new_capacity = required.max(capacity * GROWTH_FACTOR);
        let mut grown = vec![0.0; new_capacity];
        grown[..self.len].copy_from_slice(self.as_slice());
        self.storage = grown;
        self.reallocations += 1;
    }

    pub fn extend_from_points(&mut self, points: &[[f32; 3]]) {
        let flat: &[f32] = bytemuck::cast_slice(points);
        let end = self.len + flat.len();
        self.reserve_total(end);
        self.storage[self.len..end].copy_from_slice(flat);
        self.len = end;
    }

    pub fn extend_zeroed(&mut self, points: usize) {
        let end = self.len + points * 3;
        self.reserve_total(end);
        self.storage[self.len..end].fill(0.0);
        self.len = end;
    }

    pub(crate) fn into_storage(self) -> Vec<f32> {
        self.storage
    }
}

/// Renderable point geometry: positions, colours and normals plus bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct PointGeometry {
    positions: AttributeBuffer,
    colors: AttributeBuffer,
    normals: AttributeBuffer,
    bounds: PointCloudBounds,
    normals_from_source: bool,
    pooled: bool,
}

impl PointGeometry {
    /// Build exactly sized geometry from chunks.
    pub fn from_chunks(chunks: &[Chunk]) -> Self {
        Self::assemble(chunks, false, |_, floats| vec![0.0; floats])
    }

    /// Build geometry over storage from `allocate`, which receives the
    /// attribute kind and the floats required.
    pub(crate) fn assemble(
        chunks: &[Chunk],
        pooled: bool,
        mut allocate: impl FnMut(AttributeKind, usize) -> Vec<f32>,
    ) -> Self {
        let floats = chunks.iter().map(Chunk::len).sum::<usize>() * 3;
        let normals_from_source = chunks.first().is_some_and(|c| c.normals.is_some());

        let mut geometry = Self {
            positions: AttributeBuffer::from_storage(allocate(AttributeKind::Position, floats)),
            colors: AttributeBuffer::from_storage(allocate(AttributeKind::Color, floats)),
            normals: AttributeBuffer::from_storage(allocate(AttributeKind::Normal, floats)),
            bounds: PointCloudBounds::new(),
            normals_from_source,
            pooled,
        };
        geometry.append_chunks(chunks);
        geometry
    }

    /// Append chunks in order, growing storage once for the whole batch.
    /// Computed normals are refreshed from the first triangle the batch
    /// touches.
    pub fn append_chunks(&mut self, chunks: &[Chunk]) {
        let added: usize = chunks.iter().map(Chunk::len).sum();
        if added == 0 {
            return;
        }

        let old_points = self.point_count();
        let required = (old_points + added) * 3;
        self.positions.reserve_total(required);
        self.colors.reserve_total(required);
        self.normals.reserve_total(required);

        for chunk in chunks {
            self.positions.extend_from_points(&chunk.positions);
            self.colors.extend_from_points(&chunk.colors);
            match (&chunk.normals, self.normals_from_source) {
                (Some(normals), true) => self.normals.extend_from_points(normals),
                _ => self.normals.extend_zeroed(chunk.len()),
            }
            self.bounds
                .merge(&PointCloudBounds::from_positions(&chunk.positions));
        }

        if !self.normals_from_source {
            compute_vertex_normals(
                self.positions.as_slice(),
                self.normals.as_mut_slice(),
                old_points,
            );
        }
    }

    pub fn point_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &AttributeBuffer {
        &self.positions
    }

    pub fn colors(&self) -> &AttributeBuffer {
        &self.colors
    }

    pub fn normals(&self) -> &AttributeBuffer {
        &self.normals
    }

    pub fn bounds(&self) -> &PointCloudBounds {
        &self.bounds
    }

    /// `false` when the normals were computed from triangle triples.
    pub fn normals_from_source(&self) -> bool {
        self.normals_from_source
    }

    /// Whether the storage came from a buffer pool.
    pub fn is_pooled(&self) -> bool {
        self.pooled
    }

    /// Copy the used ranges out into a point set.
    pub fn to_point_set(&self) -> PointSet {
        PointSet::new(
            self.positions.as_points().to_vec(),
            Some(self.colors.as_points().to_vec()),
            Some(self.normals.as_points().to_vec()),
        )
    }

    pub(crate) fn into_storage(self) -> [(AttributeKind, Vec<f32>); 3] {
        [
            (AttributeKind::Position, self.positions.into_storage()),
            (AttributeKind::Color, self.colors.into_storage()),
            (AttributeKind::Normal, self.normals.into_storage()),
        ]
    }
}

/// Vertex normals for an unindexed triangle soup.
///
/// Every consecutive triple of points is a triangle whose unit face normal
/// is written to all three vertices. Trailing points that do not complete a
/// triangle get a zero normal. Work starts at the triangle containing
/// `from_point`.
pub fn compute_vertex_normals(positions: &[f32], normals: &mut [f32], from_point: usize) {
    debug_assert_eq!(positions.len(), normals.len());
    let start = ((from_point / 3) * 9).min(positions.len());

    normals[start..]
        .par_chunks_mut(9)
        .zip(positions[start..].par_chunks(9))
        .for_each(|(normal, corners)| {
            if corners.len() < 9 {
                normal.fill(0.0);
                return;
            }

            let a = [corners[0], corners[1], corners[2]];
            let b = [corners[3], corners[4], corners[5]];
            let c = [corners[6], corners[7], corners[8]];
            let face = normalize(cross(sub(c, b), sub(a, b)));

            for vertex in normal.chunks_exact_mut(3) {
                vertex.copy_from_slice(&face);
            }
        });
}

fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn normalize(v: [f32; 3]) -> [f32; 3] {
    let length = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if length == 0.0 {
        return v;
    }
    [v[0] / length, v[1] / length, v[2] / length]
}
