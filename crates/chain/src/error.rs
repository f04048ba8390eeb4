use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ChainError {
    #[error("malformed ABI response: {0}")]
    Abi(String),

    #[error("chain invariant violated: {0}")]
    Invariant(String),

    #[error("endpoint unreachable or misconfigured: {0}")]
    Config(String),

    #[error("transport error after exhausting retries: {0}")]
    Transport(String),

    #[error("codec error: {0}")]
    Codec(#[from] accumulator_codec::error::CodecError),
}
