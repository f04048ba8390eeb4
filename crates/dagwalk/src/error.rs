use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DagWalkError {
    #[error("block {0} not found")]
    NotFound(String),

    #[error("block bytes do not rehash to their claimed CID")]
    CidMismatch,

    #[error("resolve was cancelled")]
    Cancelled,

    #[error("unexpected node shape while resolving the tree")]
    UnexpectedShape,

    #[error("codec error: {0}")]
    Codec(#[from] accumulator_codec::error::CodecError),
}

impl From<accumulator_blockstore::BlockStoreError> for DagWalkError {
    fn from(err: accumulator_blockstore::BlockStoreError) -> Self {
        match err {
            accumulator_blockstore::BlockStoreError::NotFound(cid) => Self::NotFound(cid),
            accumulator_blockstore::BlockStoreError::CidMismatch => Self::CidMismatch,
            other => Self::NotFound(other.to_string()),
        }
    }
}
