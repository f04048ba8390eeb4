//! Decoding for the accumulator contract's packed state word and the
//! `LeafAppended` event. This is hand-rolled rather than delegated to a full
//! ABI-codegen crate: the shapes involved are a handful of fixed layouts,
//! not a general contract interface.

use accumulator_codec::{wrap_raw_digest, Cid};

use crate::error::ChainError;

/// One `(peaks_count, leaf_count, previous_append_block, deploy_block)`
/// decode of the packed 256-bit state word, plus the peak heights packed
/// into its low 160 bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainState {
    pub peak_heights: Vec<u8>,
    pub peak_count: u8,
    pub leaf_count: u64,
    pub previous_append_block: u64,
    pub deploy_block: u64,
}

fn mask(len: u32) -> u128 {
    if len >= 128 {
        u128::MAX
    } else {
        (1_u128 << len) - 1
    }
}

/// Extracts `len` bits starting at bit `start` (bit 0 = least significant
/// bit of the 256-bit word) from its `(low, high)` 128-bit halves.
fn extract_bits(low: u128, high: u128, start: u32, len: u32) -> u128 {
    if start >= 128 {
        (high >> (start - 128)) & mask(len)
    } else if start + len <= 128 {
        (low >> start) & mask(len)
    } else {
        let low_bits = 128 - start;
        let high_bits = len - low_bits;
        let low_part = low >> start;
        let high_part = (high & mask(high_bits)) << low_bits;
        low_part | high_part
    }
}

/// Decodes the packed state word. `word` is the raw 32-byte big-endian
/// `uint256` as returned by the chain.
pub fn decode_state_word(word: &[u8; 32]) -> Result<ChainState, ChainError> {
    let mut high_bytes = [0_u8; 16];
    let mut low_bytes = [0_u8; 16];
    high_bytes.copy_from_slice(&word[0..16]);
    low_bytes.copy_from_slice(&word[16..32]);
    let high = u128::from_be_bytes(high_bytes);
    let low = u128::from_be_bytes(low_bytes);

    let peak_count = extract_bits(low, high, 160, 5) as u8;
    if usize::from(peak_count) > 32 {
        return Err(ChainError::Invariant(format!(
            "state word reports peak_count {peak_count} exceeding the 32-peak invariant"
        )));
    }

    let peak_heights = (0..u32::from(peak_count))
        .map(|i| extract_bits(low, high, 5 * i, 5) as u8)
        .collect();

    let leaf_count = extract_bits(low, high, 165, 32) as u64;
    let previous_append_block = extract_bits(low, high, 197, 32) as u64;
    let deploy_block = extract_bits(low, high, 229, 27) as u64;

    Ok(ChainState {
        peak_heights,
        peak_count,
        leaf_count,
        previous_append_block,
        deploy_block,
    })
}

/// Wraps a raw 32-byte peak digest read off-chain as a CID. This never
/// rehashes: the digest already *is* the hash of the dag-cbor block it
/// names.
#[must_use]
pub fn peak_digest_to_cid(digest: [u8; 32]) -> Cid {
    wrap_raw_digest(digest)
}

/// A decoded `LeafAppended(uint32 indexed leafIndex, uint32
/// previousAppendBlockNumber, bytes newData, bytes32[] leftInputs)` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafAppendedEvent {
    pub leaf_index: u32,
    pub previous_append_block: u32,
    pub new_data: Vec<u8>,
    pub left_inputs: Vec<Cid>,
    pub block_number: u64,
}

fn read_u256_slot(data: &[u8], offset: usize) -> Result<&[u8; 32], ChainError> {
    data.get(offset..offset + 32)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| ChainError::Abi(format!("truncated ABI word at offset {offset}")))
}

fn read_u32_be(word: &[u8; 32]) -> u32 {
    u32::from_be_bytes([word[28], word[29], word[30], word[31]])
}

fn read_usize_be(word: &[u8; 32]) -> Result<usize, ChainError> {
    usize::try_from(u64::from_be_bytes([
        word[24], word[25], word[26], word[27], word[28], word[29], word[30], word[31],
    ]))
    .map_err(|_| ChainError::Abi("length word overflows usize".to_owned()))
}

/// Decodes the indexed `leafIndex` topic: a `uint32` right-aligned in the
/// 32-byte topic word.
pub fn decode_leaf_index_topic(topic: &[u8; 32]) -> u32 {
    read_u32_be(topic)
}

/// Decodes the non-indexed event payload: `(uint32, bytes, bytes32[])`.
pub fn decode_leaf_appended_data(
    leaf_index: u32,
    data: &[u8],
    block_number: u64,
) -> Result<LeafAppendedEvent, ChainError> {
    let previous_append_block = read_u32_be(read_u256_slot(data, 0)?);

    let new_data_offset = read_usize_be(read_u256_slot(data, 32)?)?;
    let left_inputs_offset = read_usize_be(read_u256_slot(data, 64)?)?;

    let new_data_len = read_usize_be(read_u256_slot(data, new_data_offset)?)?;
    let new_data = data
        .get(new_data_offset + 32..new_data_offset + 32 + new_data_len)
        .ok_or_else(|| ChainError::Abi("newData extends past end of ABI payload".to_owned()))?
        .to_vec();

    let left_inputs_len = read_usize_be(read_u256_slot(data, left_inputs_offset)?)?;
    let mut left_inputs = Vec::with_capacity(left_inputs_len);
    for i in 0..left_inputs_len {
        let word = read_u256_slot(data, left_inputs_offset + 32 + 32 * i)?;
        left_inputs.push(peak_digest_to_cid(*word));
    }

    Ok(LeafAppendedEvent {
        leaf_index,
        previous_append_block,
        new_data,
        left_inputs,
        block_number,
    })
}

/// Decodes a bare `bytes` ABI return, the shape `root_cid()` and similar
/// single-dynamic-value view calls return: a head offset word, a length
/// word, then the bytes themselves. Per the observed ABI, the length lives
/// in the last 4 bytes of the second word (offset 60..64) and the payload
/// starts at byte 64.
pub fn decode_bare_bytes_response(response: &[u8]) -> Result<Vec<u8>, ChainError> {
    let length_word = response
        .get(32..64)
        .ok_or_else(|| ChainError::Abi("response shorter than the length word".to_owned()))?;
    let length = u32::from_be_bytes([length_word[28], length_word[29], length_word[30], length_word[31]]) as usize;
    response
        .get(64..64 + length)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| ChainError::Abi("response shorter than its declared length".to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack_state_word(
        heights: &[u8],
        leaf_count: u64,
        previous_append_block: u64,
        deploy_block: u64,
    ) -> [u8; 32] {
        let mut low: u128 = 0;
        let mut high: u128 = 0;
        for (i, &h) in heights.iter().enumerate() {
            let start = 5 * i as u32;
            if start + 5 <= 128 {
                low |= u128::from(h) << start;
            } else {
                high |= u128::from(h) << (start - 128);
            }
        }
        high |= (heights.len() as u128 & mask(5)) << (160 - 128);
        high |= (u128::from(leaf_count) & mask(32)) << (165 - 128);
        high |= (u128::from(previous_append_block) & mask(32)) << (197 - 128);
        high |= (u128::from(deploy_block) & mask(27)) << (229 - 128);

        let mut word = [0_u8; 32];
        word[0..16].copy_from_slice(&high.to_be_bytes());
        word[16..32].copy_from_slice(&low.to_be_bytes());
        word
    }

    #[test]
    fn decodes_packed_state_word() {
        let word = pack_state_word(&[2, 0], 3, 1000, 42);
        let state = decode_state_word(&word).unwrap();
        assert_eq!(state.peak_heights, vec![2, 0]);
        assert_eq!(state.peak_count, 2);
        assert_eq!(state.leaf_count, 3);
        assert_eq!(state.previous_append_block, 1000);
        assert_eq!(state.deploy_block, 42);
    }

    #[test]
    fn decodes_leaf_appended_event() {
        let mut data = Vec::new();
        data.extend_from_slice(&[0_u8; 28]);
        data.extend_from_slice(&999_u32.to_be_bytes()); // previousAppendBlockNumber
        data.extend_from_slice(&[0_u8; 31]);
        data.push(0x60); // newData offset = 96
        data.extend_from_slice(&[0_u8; 31]);
        data.push(0xA0); // leftInputs offset = 160

        // newData: length 3, bytes [0xAA,0xBB,0xCC] padded to 32
        data.extend_from_slice(&[0_u8; 31]);
        data.push(3);
        let mut padded = vec![0xAA, 0xBB, 0xCC];
        padded.resize(32, 0);
        data.extend_from_slice(&padded);

        // leftInputs: length 1, one bytes32 digest
        data.extend_from_slice(&[0_u8; 31]);
        data.push(1);
        data.extend_from_slice(&[7_u8; 32]);

        let event = decode_leaf_appended_data(5, &data, 123).unwrap();
        assert_eq!(event.leaf_index, 5);
        assert_eq!(event.previous_append_block, 999);
        assert_eq!(event.new_data, vec![0xAA, 0xBB, 0xCC]);
        assert_eq!(event.left_inputs, vec![peak_digest_to_cid([7_u8; 32])]);
        assert_eq!(event.block_number, 123);
    }

    #[test]
    fn decodes_bare_bytes_response() {
        let mut response = vec![0_u8; 32];
        response[31] = 0x20; // head offset = 32
        response.extend_from_slice(&[0_u8; 32]);
        let len_idx = 32 + 28;
        response[len_idx..len_idx + 4].copy_from_slice(&4_u32.to_be_bytes());
        response.extend_from_slice(&[1, 2, 3, 4]);

        let bytes = decode_bare_bytes_response(&response).unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4]);
    }
}
