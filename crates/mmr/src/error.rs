use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MmrError {
    #[error("append called with leaf_index {given}, expected {expected}")]
    OutOfOrder { given: u64, expected: u64 },

    #[error("peak count {0} exceeds the 32-peak invariant")]
    Invariant(usize),
}
