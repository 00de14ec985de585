/// Largest scratch array accepted back into the pool (bytes)
pub const MAX_POOLED_BYTES: usize = 50 * 1024 * 1024;

/// Pooled arrays kept per attribute kind
pub const MAX_POOL_DEPTH: usize = 5;

/// Extra capacity reserved on a full geometry build to absorb later appends
pub const PREALLOCATION_FACTOR: f64 = 1.5;

/// Geometric growth factor once reserved capacity is exhausted
pub const GROWTH_FACTOR: usize = 2;
