//! Raw header packing
//!
//! The `pow_hash` miners grind on is the CKB Blake2b-256 of the packed
//! 192-byte raw header, nonce excluded. Field order and widths follow the
//! molecule `RawHeader` schema:
//!
//! ```text
//! version           u32  LE   offset   0
//! compact_target    u32  LE   offset   4
//! timestamp         u64  LE   offset   8
//! number            u64  LE   offset  16
//! epoch             u64  LE   offset  24
//! parent_hash       [32]      offset  32
//! transactions_root [32]      offset  64
//! proposals_hash    [32]      offset  96
//! extra_hash        [32]      offset 128
//! dao               [32]      offset 160
//! ```

use crate::core::blake2b::ckb_blake2b_256;
use crate::core::constants::RAW_HEADER_SIZE;
use crate::error::{Error, Result};

/// Block header fields that feed the proof-of-work hash.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct RawHeader {
    pub version: u32,
    pub compact_target: u32,
    pub timestamp: u64,
    pub number: u64,
    pub epoch: u64,
    pub parent_hash: [u8; 32],
    pub transactions_root: [u8; 32],
    pub proposals_hash: [u8; 32],
    pub extra_hash: [u8; 32],
    pub dao: [u8; 32],
}

impl RawHeader {
    /// Pack into the fixed 192-byte layout.
    pub fn serialize(&self) -> [u8; RAW_HEADER_SIZE] {
        let mut buf = [0u8; RAW_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.version.to_le_bytes());
        buf[4..8].copy_from_slice(&self.compact_target.to_le_bytes());
        buf[8..16].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[16..24].copy_from_slice(&self.number.to_le_bytes());
        buf[24..32].copy_from_slice(&self.epoch.to_le_bytes());
        buf[32..64].copy_from_slice(&self.parent_hash);
        buf[64..96].copy_from_slice(&self.transactions_root);
        buf[96..128].copy_from_slice(&self.proposals_hash);
        buf[128..160].copy_from_slice(&self.extra_hash);
        buf[160..192].copy_from_slice(&self.dao);
        buf
    }

    /// The hash miners feed into Eaglesong.
    pub fn pow_hash(&self) -> [u8; 32] {
        ckb_blake2b_256(&self.serialize())
    }
}

/// Decoded view of the packed 64-bit epoch field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Epoch {
    /// Epoch number, bits [0, 24).
    pub number: u64,
    /// Block index within the epoch, bits [24, 40).
    pub index: u64,
    /// Epoch length in blocks, bits [40, 56).
    pub length: u64,
}

impl Epoch {
    /// Split a packed epoch value.
    pub fn from_raw(raw: u64) -> Self {
        Epoch {
            number: raw & 0x00ff_ffff,
            index: (raw >> 24) & 0xffff,
            length: (raw >> 40) & 0xffff,
        }
    }
}

/// Parse a `0x`-prefixed hex integer as emitted by the CKB JSON-RPC.
pub fn parse_hex_u64(field: &str, value: &str) -> Result<u64> {
    let cleaned = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(cleaned, 16).map_err(|e| Error::invalid_hex(field, e.to_string()))
}

/// Parse a `0x`-prefixed hex integer as a u32.
pub fn parse_hex_u32(field: &str, value: &str) -> Result<u32> {
    let cleaned = value.strip_prefix("0x").unwrap_or(value);
    u32::from_str_radix(cleaned, 16).map_err(|e| Error::invalid_hex(field, e.to_string()))
}

/// Parse a `0x`-prefixed 32-byte hash.
pub fn parse_byte32(field: &str, value: &str) -> Result<[u8; 32]> {
    let cleaned = value.strip_prefix("0x").unwrap_or(value);
    let bytes = hex::decode(cleaned).map_err(|e| Error::invalid_hex(field, e.to_string()))?;
    if bytes.len() != 32 {
        return Err(Error::invalid_hex(
            field,
            format!("expected 32 bytes, got {}", bytes.len()),
        ));
    }
    let mut array = [0u8; 32];
    array.copy_from_slice(&bytes);
    Ok(array)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> RawHeader {
        RawHeader {
            version: 0,
            compact_target: 0x1d00ffff,
            timestamp: 0x17e2d4e5f30,
            number: 0x1234,
            epoch: 1000 | (5 << 24) | (1800 << 40),
            parent_hash: [0x11; 32],
            transactions_root: [0x22; 32],
            proposals_hash: [0x33; 32],
            extra_hash: [0x44; 32],
            dao: [0x55; 32],
        }
    }

    #[test]
    fn test_serialize_layout() {
        let raw = sample_header().serialize();
        assert_eq!(raw.len(), 192);
        assert_eq!(
            hex::encode(&raw[..32]),
            "00000000ffff001d305f4e2d7e0100003412000000000000e803000500080700"
        );
        assert_eq!(&raw[32..64], &[0x11; 32]);
        assert_eq!(&raw[160..192], &[0x55; 32]);
    }

    #[test]
    fn test_pow_hash_vector() {
        assert_eq!(
            hex::encode(sample_header().pow_hash()),
            "efa7f8b3a30b6609841a8d1822a0708def2fe0652e94d65eefb82b4045cc1fa8"
        );
    }

    #[test]
    fn test_pow_hash_excludes_nonce() {
        // Two headers that differ only in fields outside the raw layout do
        // not exist; but the zero header must match the 192-zero-byte hash,
        // confirming no nonce bytes leak in.
        let zero = RawHeader {
            version: 0,
            compact_target: 0,
            timestamp: 0,
            number: 0,
            epoch: 0,
            parent_hash: [0; 32],
            transactions_root: [0; 32],
            proposals_hash: [0; 32],
            extra_hash: [0; 32],
            dao: [0; 32],
        };
        assert_eq!(
            hex::encode(zero.pow_hash()),
            "dd45d8653e8fe80a8e41c00d018f6b955c991ae7a2094c513fbb685c9c569630"
        );
    }

    #[test]
    fn test_epoch_split() {
        let epoch = Epoch::from_raw(1000 | (5 << 24) | (1800 << 40));
        assert_eq!(epoch.number, 1000);
        assert_eq!(epoch.index, 5);
        assert_eq!(epoch.length, 1800);

        let max = Epoch::from_raw(u64::MAX);
        assert_eq!(max.number, 0x00ff_ffff);
        assert_eq!(max.index, 0xffff);
        assert_eq!(max.length, 0xffff);
    }

    #[test]
    fn test_hex_parsers() {
        assert_eq!(parse_hex_u64("number", "0x1234").unwrap(), 0x1234);
        assert_eq!(parse_hex_u32("version", "0x0").unwrap(), 0);
        assert!(parse_hex_u64("number", "0xzz").is_err());

        let hash = parse_byte32("parent_hash", &format!("0x{}", "ab".repeat(32))).unwrap();
        assert_eq!(hash, [0xab; 32]);
        assert!(parse_byte32("parent_hash", "0x1234").is_err());
    }
}
