//! Deterministic 64-bit identity hashing.
//!
//! Every entity in the scene state is addressed by a stable u64 key derived
//! from its name (objects) or its position in a comb tree (instances, paths).
//! Keys must be identical across processes and runs so that cached data can
//! be reused, so all hashing goes through blake3 with no per-process seed.

/// Hash arbitrary bytes to a 64-bit key (first 8 bytes of the blake3
/// digest, little-endian).
pub fn data_hash(data: &[u8]) -> u64 {
    let digest = blake3::hash(data);
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

/// Hash an object name.
pub fn name_hash(name: &str) -> u64 {
    data_hash(name.as_bytes())
}

/// Hash a pair of keys into one. Used for comb instance identity
/// (parent comb name hash + unique instance reference hash).
pub fn pair_hash(a: u64, b: u64) -> u64 {
    let mut buf = [0u8; 16];
    buf[..8].copy_from_slice(&a.to_le_bytes());
    buf[8..].copy_from_slice(&b.to_le_bytes());
    data_hash(&buf)
}

/// Hash a sequence of element keys, optionally truncated to `max_len`
/// elements (0 means the full sequence).
///
/// Two sequences that agree up to `max_len` hash identically - the
/// contract expand/collapse set deduplication relies on.
pub fn seq_hash(elements: &[u64], max_len: usize) -> u64 {
    let mlen = if max_len == 0 || max_len > elements.len() {
        elements.len()
    } else {
        max_len
    };
    let mut buf = Vec::with_capacity(mlen * 8);
    for e in &elements[..mlen] {
        buf.extend_from_slice(&e.to_le_bytes());
    }
    data_hash(&buf)
}

/// Order-independent hash of a set of keys. The keys are sorted before
/// hashing so iteration order of the source container does not matter.
pub fn set_hash<I: IntoIterator<Item = u64>>(keys: I) -> u64 {
    let mut sorted: Vec<u64> = keys.into_iter().collect();
    sorted.sort_unstable();
    seq_hash(&sorted, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_hash_deterministic() {
        assert_eq!(name_hash("all.g"), name_hash("all.g"));
        assert_ne!(name_hash("all.g"), name_hash("all.h"));
        assert_ne!(name_hash(""), name_hash(" "));
    }

    #[test]
    fn test_seq_hash_truncation() {
        let seq = [name_hash("a"), name_hash("b"), name_hash("c")];
        assert_eq!(seq_hash(&seq, 0), seq_hash(&seq, 3));
        assert_eq!(seq_hash(&seq, 2), seq_hash(&seq[..2], 0));
        assert_ne!(seq_hash(&seq, 2), seq_hash(&seq, 3));
        // Over-long max_len clamps to the full sequence
        assert_eq!(seq_hash(&seq, 10), seq_hash(&seq, 0));
    }

    #[test]
    fn test_pair_hash_asymmetric() {
        let a = name_hash("parent");
        let b = name_hash("child");
        assert_ne!(pair_hash(a, b), pair_hash(b, a));
    }

    #[test]
    fn test_set_hash_order_independent() {
        let a = [1u64, 2, 3];
        let b = [3u64, 1, 2];
        assert_eq!(set_hash(a), set_hash(b));
        assert_ne!(set_hash([1u64, 2]), set_hash([1u64, 2, 3]));
    }
}
