use crate::error::{MinerError, MinerResult};

/// Max prefix length: a hash renders as 8 hex chars.
pub const MAX_PREFIX_LEN: usize = 8;

/// Target prefix checker for hash matching
///
/// Matching is done on the raw `u32` by comparing the top `4 * len` bits,
/// which is equivalent to `to_hex(hash).starts_with(prefix)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetChecker {
    prefix: String,
    value: u32,
    prefix_len: usize,
}

impl TargetChecker {
    /// Create a new TargetChecker from a lowercase hex prefix string
    pub fn from_hex_prefix(hex_prefix: &str) -> MinerResult<Self> {
        let prefix_len = hex_prefix.len();

        if prefix_len > MAX_PREFIX_LEN {
            return Err(MinerError::InvalidPrefix(
                hex_prefix.to_string(),
                "longer than 8 hex chars",
            ));
        }

        // Hashes render lowercase, so an uppercase digit could never match.
        if !hex_prefix
            .bytes()
            .all(|c| c.is_ascii_digit() || (b'a'..=b'f').contains(&c))
        {
            return Err(MinerError::InvalidPrefix(
                hex_prefix.to_string(),
                "expected lowercase hex digits",
            ));
        }

        let value = if prefix_len == 0 {
            0
        } else {
            u32::from_str_radix(hex_prefix, 16)
                .map_err(|_| MinerError::InvalidPrefix(hex_prefix.to_string(), "not hex"))?
        };

        Ok(Self {
            prefix: hex_prefix.to_string(),
            value,
            prefix_len,
        })
    }

    /// Check if the given hash matches the target prefix
    #[inline(always)]
    pub fn matches(&self, hash: u32) -> bool {
        if self.prefix_len == 0 {
            return true;
        }
        (hash >> (32 - 4 * self.prefix_len as u32)) == self.value
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Get the difficulty (number of hex characters to match)
    pub fn difficulty(&self) -> usize {
        self.prefix_len
    }

    /// Estimate attempts needed (average case)
    pub fn estimated_attempts(&self) -> u64 {
        16u64.pow(self.prefix_len as u32)
    }

    /// Prefix as (value, bit shift) for the GPU kernel. A shift of 32 matches everything.
    pub fn kernel_args(&self) -> (u32, u32) {
        (self.value, 32 - 4 * self.prefix_len as u32)
    }
}
