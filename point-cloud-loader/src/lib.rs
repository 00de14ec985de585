/// Streaming PLY ingestion with voxel downsampling and chunked geometry assembly
pub mod bounds;
pub mod chunk;
pub mod config;
pub mod coordinator;
pub mod downsample;
pub mod error;
pub mod fetch;
pub mod listener;
pub mod ply;
pub mod point_set;
pub mod worker;

pub use bounds::PointCloudBounds;
pub use chunk::{Chunk, ChunkTransmitter};
pub use config::{LoaderConfig, QualityMode};
pub use coordinator::{LoadCoordinator, LoadHandle, LoadProgress, PointGeometry};
pub use downsample::{Downsampler, VoxelGrid, VoxelKey};
pub use error::{LoadError, LoadResult};
pub use fetch::{HttpFetcher, MemoryFetcher, SourceFetcher};
pub use listener::{LoadInfo, LoadListener};
pub use ply::{parse_ply, write_binary_ply};
pub use point_set::PointSet;
