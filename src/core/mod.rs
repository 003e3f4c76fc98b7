//! Core proof-of-work types and arithmetic
//!
//! Everything in this module is a pure function over byte arrays: no I/O,
//! no shared state, safe to call from any task.

pub mod blake2b;
pub mod header;
pub mod pow;
pub mod target;

pub use blake2b::ckb_blake2b_256;
pub use header::{Epoch, RawHeader};
pub use pow::{eaglesong_hash, pow_hash_for_nonce, pow_message};
pub use target::{Target, U256};

/// Fixed sizes of the CKB mining protocol
pub mod constants {
    /// Packed raw header width in bytes (nonce excluded)
    pub const RAW_HEADER_SIZE: usize = 192;

    /// Nonce width in bytes
    pub const NONCE_SIZE: usize = 16;

    /// pow_hash width in bytes
    pub const POW_HASH_SIZE: usize = 32;

    /// Mining message width: pow_hash || nonce
    pub const POW_MESSAGE_SIZE: usize = POW_HASH_SIZE + NONCE_SIZE;

    /// Hash and target width in bytes
    pub const HASH_SIZE: usize = 32;
}

#[cfg(test)]
mod tests {
    use super::constants::*;

    #[test]
    fn test_constants() {
        assert_eq!(RAW_HEADER_SIZE, 192);
        assert_eq!(NONCE_SIZE, 16);
        assert_eq!(POW_MESSAGE_SIZE, 48);
        assert_eq!(HASH_SIZE, 32);
    }
}
