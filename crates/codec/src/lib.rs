//! dag-cbor encoding and CIDv1 handling for the MMR accumulator archive.
//!
//! This crate hand-implements the exact wire subset the archive needs: a
//! deterministic CBOR profile (`cbor`) and CIDv1 framing over sha2-256
//! (`cid`). See each module for the invariants it upholds.

pub mod cbor;
pub mod cid;
pub mod error;

pub use cbor::{Node, Value};
pub use cid::Cid;
pub use error::CodecError;

use sha2::{Digest, Sha256};

/// Maximum payload size for a single leaf, per the accumulator contract.
pub const MAX_LEAF_PAYLOAD_BYTES: usize = 1_000_000;

/// A block ready to be stored or transmitted: its CID and its encoded bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedBlock {
    pub cid: Cid,
    pub encoded: Vec<u8>,
}

#[must_use]
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Encodes `value` as dag-cbor and wraps the result in its CID.
#[must_use]
pub fn encode_block(value: &Value) -> EncodedBlock {
    let encoded = cbor::encode(value);
    let cid = Cid::from_digest(sha256(&encoded));
    EncodedBlock { cid, encoded }
}

/// Recomputes the CID of `encoded` and compares it against `expected`.
#[must_use]
pub fn verify_cid(encoded: &[u8], expected: &Cid) -> bool {
    Cid::from_digest(sha256(encoded)) == *expected
}

/// As [`verify_cid`], but returns [`CodecError::CidMismatch`] on failure.
pub fn verify_cid_checked(encoded: &[u8], expected: &Cid) -> Result<(), CodecError> {
    if verify_cid(encoded, expected) {
        Ok(())
    } else {
        Err(CodecError::CidMismatch)
    }
}

/// Wraps a raw 32-byte digest (e.g. a peak digest read straight off-chain)
/// as a CID without rehashing it — the digest already *is* the hash of the
/// dag-cbor block it names.
#[must_use]
pub fn wrap_raw_digest(digest: [u8; 32]) -> Cid {
    Cid::from_digest(digest)
}

/// The CID of the dag-cbor encoding of `null` — the root of an empty MMR.
#[must_use]
pub fn null_cid() -> Cid {
    encode_block(&Value::Null).cid
}

pub const NULL_CID_TEXT: &str = "bafyreifqwkmiw256ojf2zws6tzjeonw6bpd5vza4i22ccpcq4hjv2ts7cm";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_block_determinism() {
        let v = Value::leaf(vec![1, 2, 3]);
        let a = encode_block(&v);
        let b = encode_block(&v);
        assert_eq!(a, b);
    }

    #[test]
    fn null_cid_matches_published_constant() {
        assert_eq!(null_cid().to_string_form(), NULL_CID_TEXT);
    }

    #[test]
    fn verify_cid_roundtrip() {
        let block = encode_block(&Value::leaf(vec![9; 10]));
        assert!(verify_cid(&block.encoded, &block.cid));
        assert!(verify_cid_checked(&block.encoded, &block.cid).is_ok());
    }

    #[test]
    fn verify_cid_detects_mismatch() {
        let block = encode_block(&Value::leaf(vec![9; 10]));
        let other = encode_block(&Value::leaf(vec![8; 10]));
        assert!(!verify_cid(&block.encoded, &other.cid));
    }
}
