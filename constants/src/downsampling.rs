/// Point count above which the downsampled quality tier reduces a file
pub const DOWNSAMPLE_THRESHOLD: usize = 4_000_000;

/// Approximate point count the voxel grid is sized for
pub const TARGET_POINTS: usize = 3_000_000;

/// Smallest voxel edge length (1mm)
pub const MIN_GRID_SIZE: f64 = 0.001;

/// Floor applied to each bounding box extent before computing volume
pub const MIN_AXIS_EXTENT: f64 = 0.001;

/// Bits available per axis in a packed voxel key
pub const VOXEL_AXIS_BITS: u32 = 21;

/// Progress cadence of the cell-marking pass (points)
pub const SCAN_PROGRESS_INTERVAL: usize = 100_000;

/// Progress cadence of the copy pass (kept points)
pub const COPY_PROGRESS_INTERVAL: usize = 20_000;
