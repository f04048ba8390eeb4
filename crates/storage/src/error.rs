use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("storage adapter is not open")]
    NotOpen,

    #[error("storage invariant violated: {0}")]
    Invariant(String),

    #[error("malformed leaf record for index {index}: {reason}")]
    MalformedRecord { index: u64, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("codec error: {0}")]
    Codec(#[from] accumulator_codec::error::CodecError),
}
