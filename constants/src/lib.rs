/// Shared tuning constants for the point cloud streaming pipeline
pub mod buffer_pool;
pub mod downsampling;
pub mod ply;
pub mod streaming;
