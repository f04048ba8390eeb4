use thiserror::Error;

/// Errors raised by the codec: malformed dag-cbor, bad CID framing, or a
/// CID that doesn't match the bytes it is supposed to describe.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    #[error("unexpected end of input while decoding dag-cbor")]
    UnexpectedEof,

    #[error("unsupported dag-cbor major type {0}")]
    UnsupportedMajorType(u8),

    #[error("map key must be a text string")]
    NonStringMapKey,

    #[error("tag 42 payload must start with 0x00, got {0:#04x}")]
    BadLinkTagPrefix(u8),

    #[error("unsupported cbor tag {0}")]
    UnsupportedTag(u64),

    #[error("trailing bytes after decoding a single dag-cbor value")]
    TrailingBytes,

    #[error("malformed CID bytes: expected 36 bytes, got {0}")]
    MalformedCid(usize),

    #[error("unsupported CID codec {0:#04x}, expected 0x71")]
    UnsupportedCidCodec(u8),

    #[error("unsupported multihash algorithm {0:#04x}, expected 0x12")]
    UnsupportedHashAlgorithm(u8),

    #[error("unsupported multihash digest length {0}, expected 32")]
    UnsupportedDigestLength(u8),

    #[error("malformed CID text form")]
    MalformedCidText,

    #[error("decoded value does not match the expected node shape")]
    UnexpectedShape,

    #[error("block bytes do not hash to the expected CID")]
    CidMismatch,
}
