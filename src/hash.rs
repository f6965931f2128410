//! The pool's "enhanced" 32-bit rolling hash.
//!
//! Every search strategy (sequential, host-parallel, OpenCL) must agree with
//! [`enhanced_hash`] bit for bit, otherwise results stop being interchangeable.

use std::fmt::Write as _;

/// Hash a byte sequence with the enhanced rolling hash.
#[inline(always)]
pub fn enhanced_hash(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |h, &b| mix(h, b))
}

/// One round of the rolling hash for a single input byte.
#[inline(always)]
pub fn mix(h: u32, b: u8) -> u32 {
    let h = h.wrapping_mul(31).wrapping_add(b as u32);
    let h = h ^ h.rotate_left(13);
    let h = h.wrapping_mul(17);
    h.rotate_left(5)
}

/// Lowercase hex, zero-padded to 8 characters.
pub fn to_hex(hash: u32) -> String {
    format!("{:08x}", hash)
}

/// Hash a string's UTF-8 bytes and render it as hex.
pub fn hex_digest(input: &str) -> String {
    to_hex(enhanced_hash(input.as_bytes()))
}

/// Builds `"{number}{base}{content}"` candidate inputs without reallocating.
///
/// The suffix is fixed for a task, so only the leading number changes per
/// candidate.
#[derive(Debug, Clone)]
pub struct CandidateInput {
    suffix: String,
    buf: String,
}

impl CandidateInput {
    pub fn new(base_string_chain: &str, blockchain_content: &str) -> Self {
        let mut suffix = String::with_capacity(base_string_chain.len() + blockchain_content.len());
        suffix.push_str(base_string_chain);
        suffix.push_str(blockchain_content);
        Self {
            buf: String::with_capacity(suffix.len() + 20),
            suffix,
        }
    }

    /// The full hash input for `number`.
    pub fn build(&mut self, number: u64) -> &[u8] {
        self.buf.clear();
        // Writing to a String never fails.
        let _ = write!(self.buf, "{}", number);
        self.buf.push_str(&self.suffix);
        self.buf.as_bytes()
    }

    /// Hash the input for `number`.
    #[inline]
    pub fn hash(&mut self, number: u64) -> u32 {
        enhanced_hash(self.build(number))
    }

    /// Byte length of the fixed suffix.
    pub fn suffix_len(&self) -> usize {
        self.suffix.len()
    }
}
