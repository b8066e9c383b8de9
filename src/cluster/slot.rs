/// Redis Cluster slot hashing.
///
/// Grounded on `crate::utils::crc16` (already the correct CRC16/CCITT used
/// by Redis Cluster) and the hash-tag scan from
/// `modes/redis/mod.rs::SlotMapping::calculate_slot`, corrected to match the
/// `{tag}` rule exactly: the closing `}` must come *after* the opening `{`,
/// and the brace is ignored (whole key hashed) if no such `}` exists or the
/// tag between them is empty.
use crate::utils::crc16;

pub const SLOT_COUNT: u16 = 16384;

/// Compute the 14-bit hash slot `[0, 16383]` for a key.
pub fn slot_of(key: &[u8]) -> u16 {
    crc16(hash_tag(key)) & (SLOT_COUNT - 1)
}

/// Return the bytes that should actually be hashed: the `{tag}` sub-key if
/// one is present and non-empty, otherwise the whole key.
fn hash_tag(key: &[u8]) -> &[u8] {
    let Some(open) = key.iter().position(|&b| b == b'{') else {
        return key;
    };
    let Some(close_rel) = key[open + 1..].iter().position(|&b| b == b'}') else {
        return key;
    };
    let close = open + 1 + close_rel;
    if close == open + 1 {
        // "{}" — empty tag, fall back to the whole key.
        return key;
    }
    &key[open + 1..close]
}
