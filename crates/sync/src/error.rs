use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    #[error("pipeline invariant violated: {0}")]
    Invariant(String),

    #[error("storage error: {0}")]
    Storage(#[from] accumulator_storage::StorageError),

    #[error("chain error: {0}")]
    Chain(#[from] accumulator_chain::ChainError),

    #[error("mmr error: {0}")]
    Mmr(#[from] accumulator_mmr::MmrError),

    #[error("dag walk error: {0}")]
    DagWalk(#[from] accumulator_dagwalk::DagWalkError),

    #[error("codec error: {0}")]
    Codec(#[from] accumulator_codec::error::CodecError),

    #[error("block store error: {0}")]
    BlockStore(#[from] accumulator_blockstore::BlockStoreError),
}
