//! The key-to-slot hash shared by clients and partitions.
//!
//! Both sides must agree bit-for-bit on this mapping: the client uses it to
//! route, partitions use it to verify ownership and to decide which keys a
//! migration covers.

use xxhash_rust::xxh3::xxh3_64;

/// Hashes a key to its 32-bit slot.
#[must_use]
pub fn slot_hash(key: &[u8]) -> u32 {
    // Slots are the upper half of the 64-bit xxh3 digest.
    (xxh3_64(key) >> 32) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_hash_is_deterministic() {
        assert_eq!(slot_hash(b"key1"), slot_hash(b"key1"));
        assert_ne!(slot_hash(b"key1"), slot_hash(b"key2"));
    }

    #[test]
    fn test_slot_hash_spreads_keys() {
        // 64 distinct keys should not all collapse into one quarter of
        // the slot space.
        let mut quarters = [0_u32; 4];
        for i in 0..64 {
            let key = format!("spread-{i}");
            let slot = slot_hash(key.as_bytes());
            quarters[(slot >> 30) as usize] += 1;
        }
        assert!(quarters.iter().all(|&count| count > 0), "quarters: {quarters:?}");
    }
}
