/// Load failure taxonomy shared by the codec, workers and coordinator.
///
/// Every variant is scoped to a single file's load. Errors cross the worker
/// channel by value, hence `Clone`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to fetch {url}: HTTP {status}")]
    Fetch { url: String, status: u16 },

    #[error("Failed to read {url}: {message}")]
    Transport { url: String, message: String },

    #[error("Malformed PLY header: {0}")]
    MalformedHeader(String),

    #[error("Missing position attribute: {0}")]
    MissingPositionAttribute(String),

    #[error("Truncated vertex data: expected {expected} bytes, found {actual}")]
    TruncatedBody { expected: usize, actual: usize },

    #[error("Worker fault: {0}")]
    WorkerFault(String),

    #[error("Load cancelled")]
    Cancelled,
}

pub type LoadResult<T> = Result<T, LoadError>;
