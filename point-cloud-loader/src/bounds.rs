/// Point cloud coordinate bounds tracking
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Points per rayon task when reducing bounds over a large set
const BOUNDS_CHUNK_SIZE: usize = 25_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointCloudBounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
    pub min_z: f64,
    pub max_z: f64,
}

impl Default for PointCloudBounds {
    fn default() -> Self {
        Self::new()
    }
}

impl PointCloudBounds {
    /// Create new bounds initialised to infinity values
    pub fn new() -> Self {
        Self {
            min_x: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            min_y: f64::INFINITY,
            max_y: f64::NEG_INFINITY,
            min_z: f64::INFINITY,
            max_z: f64::NEG_INFINITY,
        }
    }

    /// Calculate bounds of a position array with parallel chunked reduction.
    /// Min/max are order independent so the result is identical to a serial pass.
    pub fn from_positions(positions: &[[f32; 3]]) -> Self {
        positions
            .par_chunks(BOUNDS_CHUNK_SIZE)
            .map(|chunk| {
                let mut local_bounds = PointCloudBounds::new();
                for p in chunk {
                    local_bounds.update(p[0] as f64, p[1] as f64, p[2] as f64);
                }
                local_bounds
            })
            .reduce_with(|mut a, b| {
                a.merge(&b);
                a
            })
            .unwrap_or_else(PointCloudBounds::new)
    }

    /// Update bounds with a new point
    pub fn update(&mut self, x: f64, y: f64, z: f64) {
        self.min_x = self.min_x.min(x);
        self.max_x = self.max_x.max(x);
        self.min_y = self.min_y.min(y);
        self.max_y = self.max_y.max(y);
        self.min_z = self.min_z.min(z);
        self.max_z = self.max_z.max(z);
    }

    /// Extend bounds to cover another set of bounds
    pub fn merge(&mut self, other: &PointCloudBounds) {
        self.min_x = self.min_x.min(other.min_x);
        self.max_x = self.max_x.max(other.max_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_y = self.max_y.max(other.max_y);
        self.min_z = self.min_z.min(other.min_z);
        self.max_z = self.max_z.max(other.max_z);
    }

    /// True until at least one point has been added
    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x
    }

    /// World space dimensions, zero for empty bounds
    pub fn dimensions(&self) -> (f64, f64, f64) {
        if self.is_empty() {
            return (0.0, 0.0, 0.0);
        }
        (
            self.max_x - self.min_x,
            self.max_y - self.min_y,
            self.max_z - self.min_z,
        )
    }

    pub fn min(&self) -> (f64, f64, f64) {
        (self.min_x, self.min_y, self.min_z)
    }

    pub fn center(&self) -> (f64, f64, f64) {
        (
            (self.min_x + self.max_x) * 0.5,
            (self.min_y + self.max_y) * 0.5,
            (self.min_z + self.max_z) * 0.5,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parallel_bounds_match_serial_pass() {
        let positions: Vec<[f32; 3]> = (0..100_000)
            .map(|i| {
                let t = i as f32;
                [t.sin() * 10.0, (t * 0.5).cos() * 4.0 - 2.0, t * 0.001]
            })
            .collect();

        let mut serial = PointCloudBounds::new();
        for p in &positions {
            serial.update(p[0] as f64, p[1] as f64, p[2] as f64);
        }

        assert_eq!(PointCloudBounds::from_positions(&positions), serial);
    }

    #[test]
    fn empty_positions_give_empty_bounds() {
        let bounds = PointCloudBounds::from_positions(&[]);
        assert!(bounds.is_empty());
        assert_eq!(bounds.dimensions(), (0.0, 0.0, 0.0));
    }

    #[test]
    fn single_point_has_zero_extent() {
        let bounds = PointCloudBounds::from_positions(&[[1.0, 2.0, 3.0]]);
        assert!(!bounds.is_empty());
        assert_eq!(bounds.dimensions(), (0.0, 0.0, 0.0));
        assert_eq!(bounds.center(), (1.0, 2.0, 3.0));
    }
}
