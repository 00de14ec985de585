/// Deterministic voxel-grid point reduction
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use constants::downsampling::{
    COPY_PROGRESS_INTERVAL, MIN_AXIS_EXTENT, MIN_GRID_SIZE, SCAN_PROGRESS_INTERVAL,
    TARGET_POINTS, VOXEL_AXIS_BITS,
};

use crate::bounds::PointCloudBounds;
use crate::error::{LoadError, LoadResult};
use crate::point_set::{DEFAULT_COLOUR, PointSet};

const AXIS_MASK: u64 = (1 << VOXEL_AXIS_BITS) - 1;

/// Largest cell index an axis may produce without overflowing its key bits,
/// kept one below the mask so rounding at the far edge stays in range.
const MAX_AXIS_CELLS: f64 = (AXIS_MASK - 1) as f64;

/// Packed cell coordinates of a point relative to the grid origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoxelKey(pub u64);

/// Axis-aligned grid anchored at a bounding box minimum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelGrid {
    pub origin: (f64, f64, f64),
    pub cell_size: f64,
    inv_cell_size: f64,
}

impl VoxelGrid {
    pub fn new(origin: (f64, f64, f64), cell_size: f64) -> Self {
        Self {
            origin,
            cell_size,
            inv_cell_size: 1.0 / cell_size,
        }
    }

    /// Grid sized so a uniformly filled bounding box yields about
    /// `target_points` occupied cells.
    pub fn for_bounds(bounds: &PointCloudBounds, target_points: usize) -> Self {
        Self::new(bounds.min(), grid_size_for(bounds, target_points))
    }

    /// Cell index per axis, floored relative to the origin.
    #[inline]
    pub fn cell(&self, p: [f32; 3]) -> (u64, u64, u64) {
        let axis =
            |c: f32, min: f64| ((c as f64 - min) * self.inv_cell_size).floor().max(0.0) as u64;
        (
            axis(p[0], self.origin.0),
            axis(p[1], self.origin.1),
            axis(p[2], self.origin.2),
        )
    }

    #[inline]
    pub fn key(&self, p: [f32; 3]) -> VoxelKey {
        let (cx, cy, cz) = self.cell(p);
        VoxelKey(
            (cx & AXIS_MASK)
                | ((cy & AXIS_MASK) << VOXEL_AXIS_BITS)
                | ((cz & AXIS_MASK) << (2 * VOXEL_AXIS_BITS)),
        )
    }
}

/// Voxel edge length for a point cloud extent and target count.
/// Never below 1mm, and never so small that an axis index needs more than
/// 21 bits.
pub fn grid_size_for(bounds: &PointCloudBounds, target_points: usize) -> f64 {
    let (dx, dy, dz) = bounds.dimensions();
    let volume = dx.max(MIN_AXIS_EXTENT) * dy.max(MIN_AXIS_EXTENT) * dz.max(MIN_AXIS_EXTENT);

    let grid_size = (volume / target_points.max(1) as f64).cbrt().max(MIN_GRID_SIZE);

    let max_extent = dx.max(dy).max(dz);
    grid_size.max(max_extent / MAX_AXIS_CELLS)
}

/// Result of a reduction pass
#[derive(Debug, Clone, PartialEq)]
pub struct DownsampleOutcome {
    pub points: PointSet,
    pub grid_size: f64,
    pub source_points: usize,
}

/// Keeps the first point that lands in each voxel cell.
#[derive(Debug, Clone)]
pub struct Downsampler {
    target_points: usize,
    cancel: Option<Arc<AtomicBool>>,
}

impl Default for Downsampler {
    fn default() -> Self {
        Self::new(TARGET_POINTS)
    }
}

impl Downsampler {
    pub fn new(target_points: usize) -> Self {
        Self {
            target_points,
            cancel: None,
        }
    }

    /// Abandon a running pass with [`LoadError::Cancelled`] once `cancel`
    /// is set. Checked at every progress report.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn check_cancelled(&self) -> LoadResult<()> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(LoadError::Cancelled),
            _ => Ok(()),
        }
    }

    pub fn target_points(&self) -> usize {
        self.target_points
    }

    /// Indices of kept points in input order.
    pub fn select(
        &self,
        positions: &[[f32; 3]],
        grid: &VoxelGrid,
        progress: &mut dyn FnMut(&str, f32),
    ) -> LoadResult<Vec<usize>> {
        let total = positions.len();
        let mut seen_cells: HashSet<VoxelKey> = HashSet::new();
        let mut kept = Vec::new();

        for (i, &p) in positions.iter().enumerate() {
            if seen_cells.insert(grid.key(p)) {
                kept.push(i);
            }

            if i % SCAN_PROGRESS_INTERVAL == 0 {
                self.check_cancelled()?;
                progress("Downsampling...", (i as f32 / total as f32) * 50.0);
            }
        }

        Ok(kept)
    }

    /// Reduce a point set to at most one point per occupied cell.
    /// The output keeps input order and always carries colours, white when
    /// the source had none.
    pub fn downsample(
        &self,
        set: &PointSet,
        progress: &mut dyn FnMut(&str, f32),
    ) -> LoadResult<DownsampleOutcome> {
        progress("Downsampling...", 0.0);

        let grid = VoxelGrid::for_bounds(&set.bounds(), self.target_points);
        let kept = self.select(&set.positions, &grid, progress)?;

        progress("Constructing geometry...", 50.0);

        let result_count = kept.len();
        let mut positions = Vec::with_capacity(result_count);
        let mut colors = Vec::with_capacity(result_count);
        let mut normals = set.normals.as_ref().map(|_| Vec::with_capacity(result_count));

        for (i, &src) in kept.iter().enumerate() {
            positions.push(set.positions[src]);
            colors.push(set.colors.as_ref().map_or(DEFAULT_COLOUR, |c| c[src]));
            if let (Some(out), Some(source)) = (normals.as_mut(), set.normals.as_ref()) {
                out.push(source[src]);
            }

            if i % COPY_PROGRESS_INTERVAL == 0 {
                self.check_cancelled()?;
                progress(
                    "Constructing geometry...",
                    50.0 + (i as f32 / result_count as f32) * 50.0,
                );
            }
        }

        progress(
            &format!(
                "Downsampled from {} to {} points",
                format_count(set.len()),
                format_count(result_count)
            ),
            100.0,
        );

        log::debug!(
            "Voxel grid {:.4} reduced {} points to {}",
            grid.cell_size,
            set.len(),
            result_count
        );

        Ok(DownsampleOutcome {
            points: PointSet::new(positions, Some(colors), normals),
            grid_size: grid.cell_size,
            source_points: set.len(),
        })
    }
}

/// Thousands separated count for progress messages.
pub fn format_count(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
