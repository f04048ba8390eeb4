use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BlockStoreError {
    #[error("block {0} not found at gateway")]
    NotFound(String),

    #[error("block bytes do not rehash to their claimed CID")]
    CidMismatch,

    #[error("capability disabled: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),
}
