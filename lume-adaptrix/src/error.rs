use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdaptrixError {
    #[error("geometry operation failed: {0}")]
    Geometry(String),

    #[error("index {index} of cluster group does not fit in 10 bits")]
    IndexOverflow { index: u32 },

    #[error("cluster index count {count} does not fit in 8 bits")]
    ClusterIndexCountOverflow { count: usize },

    #[error("page {page} exceeds u32-addressable size ({values} values)")]
    PageOverflow { page: usize, values: u64 },

    #[error("no baked mesh detected in {0}")]
    MissingBake(String),

    #[error("corrupt bake file {path}: {reason}")]
    CorruptFile { path: String, reason: String },

    #[error("bake cancelled")]
    Cancelled,

    #[error("streaming engine is not initialized")]
    NotInitialized,

    #[error("gpu error: {0}")]
    Gpu(#[from] lume_core::LumeError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AdaptrixResult<T> = Result<T, AdaptrixError>;
