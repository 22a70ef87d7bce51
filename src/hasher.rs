//! Hasher seam and record byte codecs.
//!
//! The vault never interprets digests beyond their leading bytes: the first
//! `prefix_size` bytes pick the bucket and the first `L` bytes are compared
//! during lookup. The [`NonceHasher`] trait keeps the digest function
//! pluggable; production uses BLAKE3 via [`Blake3Hasher`], tests substitute
//! deterministic hashers.

/// Width in bytes of a stored nonce record.
pub const NONCE_SIZE: usize = 5;

/// Number of leading digest bytes that select a bucket.
pub const PREFIX_SIZE: usize = 3;

/// Longest digest any caller may request.
pub const MAX_DIGEST_LEN: usize = 32;

/// A keyed digest function over nonce bytes.
///
/// Implementations must be deterministic: the same nonce bytes always yield
/// the same digest stream, and a shorter request is a prefix of a longer one.
pub trait NonceHasher: Sync {
    /// Fill `out` with the first `out.len()` digest bytes of `nonce`.
    fn digest(&self, nonce: &[u8], out: &mut [u8]);
}

/// BLAKE3 in extendable-output mode, so any requested digest length is a
/// prefix of the same stream.
#[derive(Clone, Copy, Debug, Default)]
pub struct Blake3Hasher;

impl NonceHasher for Blake3Hasher {
    fn digest(&self, nonce: &[u8], out: &mut [u8]) {
        let mut hasher = blake3::Hasher::new();
        hasher.update(nonce);
        hasher.finalize_xof().fill(out);
    }
}

/// Serialise a nonce index into `out` (little-endian, truncated to the
/// record width).
#[inline]
pub fn encode_nonce(index: u64, out: &mut [u8]) {
    let le = index.to_le_bytes();
    let n = out.len().min(le.len());
    out[..n].copy_from_slice(&le[..n]);
    for b in &mut out[n..] {
        *b = 0;
    }
}

/// Recover the nonce index from record bytes.
#[inline]
pub fn decode_nonce(record: &[u8]) -> u64 {
    let mut le = [0u8; 8];
    let n = record.len().min(8);
    le[..n].copy_from_slice(&record[..n]);
    u64::from_le_bytes(le)
}

/// The all-zero record is the empty sentinel; nonce 0 is unrepresentable.
#[inline]
pub fn is_empty_record(record: &[u8]) -> bool {
    record.iter().all(|&b| b == 0)
}

/// Interpret the first `len` bytes of `bytes` as a big-endian unsigned
/// integer. Used both for bucket addressing and for prefix comparisons.
#[inline]
pub fn big_endian_value(bytes: &[u8], len: usize) -> u64 {
    let mut value = 0u64;
    for &b in &bytes[..len] {
        value = (value << 8) | u64::from(b);
    }
    value
}
