/// Points per chunk sent from a parse worker to the coordinator
pub const CHUNK_SIZE: usize = 500_000;

/// Worker pool size used when hardware concurrency cannot be queried
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Minimum time between incremental geometry rebuilds for one file (ms)
pub const UPDATE_INTERVAL_MS: u64 = 500;

/// Longest an idle update may wait for an idle slot before it is forced (ms)
pub const IDLE_TIMEOUT_MS: u64 = 100;

/// Fixed delay used when idle scheduling is disabled (ms)
pub const IDLE_FALLBACK_MS: u64 = 16;
