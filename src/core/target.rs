//! Target arithmetic
//!
//! CKB encodes the network target in the Bitcoin compact form (8-bit
//! exponent, 24-bit mantissa) while the ViaBTC Stratum dialect carries
//! targets as 64-char little-endian hex. Everything here operates on fixed
//! four-limb 256-bit values; the only operations needed are shifts,
//! multiply/divide by a scalar, and comparison, so no bignum crate is pulled
//! in.

use crate::error::{Error, Result, ValidationError};
use std::fmt;

/// Difficulty-1 baseline: 2^224. A share of difficulty `d` must hash at or
/// below `T1 / d`.
const DIFF1_EXPONENT: u32 = 224;

/// Fixed-point scale applied to difficulty before dividing, so fractional
/// difficulties down to 1e-6 survive integer arithmetic.
const DIFF_PRECISION: u64 = 1_000_000;

/// Unsigned 256-bit integer as four little-endian u64 limbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct U256(pub [u64; 4]);

impl U256 {
    /// Zero value.
    pub const ZERO: U256 = U256([0; 4]);

    /// Maximum value, 2^256 - 1.
    pub const MAX: U256 = U256([u64::MAX; 4]);

    /// Build from a u64.
    pub fn from_u64(value: u64) -> Self {
        U256([value, 0, 0, 0])
    }

    /// Build from 32 little-endian bytes.
    pub fn from_le_bytes(bytes: &[u8; 32]) -> Self {
        let mut limbs = [0u64; 4];
        for (i, limb) in limbs.iter_mut().enumerate() {
            let mut chunk = [0u8; 8];
            chunk.copy_from_slice(&bytes[i * 8..(i + 1) * 8]);
            *limb = u64::from_le_bytes(chunk);
        }
        U256(limbs)
    }

    /// Serialize to 32 little-endian bytes.
    pub fn to_le_bytes(self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        for (i, limb) in self.0.iter().enumerate() {
            bytes[i * 8..(i + 1) * 8].copy_from_slice(&limb.to_le_bytes());
        }
        bytes
    }

    /// Left shift, saturating to `U256::MAX` if any set bit falls off the
    /// top.
    pub fn shl_saturating(self, shift: u32) -> Self {
        if self == U256::ZERO {
            return self;
        }
        if shift >= 256 || self.bits() + shift > 256 {
            return U256::MAX;
        }
        let limb_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;
        let mut limbs = [0u64; 4];
        for i in (limb_shift..4).rev() {
            let mut value = self.0[i - limb_shift] << bit_shift;
            if bit_shift > 0 && i > limb_shift {
                value |= self.0[i - limb_shift - 1] >> (64 - bit_shift);
            }
            limbs[i] = value;
        }
        U256(limbs)
    }

    /// Number of significant bits.
    pub fn bits(self) -> u32 {
        for i in (0..4).rev() {
            if self.0[i] != 0 {
                return (i as u32) * 64 + (64 - self.0[i].leading_zeros());
            }
        }
        0
    }

    /// Multiply by a u64 scalar, saturating on overflow past 256 bits.
    pub fn mul_u64_saturating(self, scalar: u64) -> Self {
        let mut limbs = [0u64; 4];
        let mut carry: u128 = 0;
        for i in 0..4 {
            let product = (self.0[i] as u128) * (scalar as u128) + carry;
            limbs[i] = product as u64;
            carry = product >> 64;
        }
        if carry != 0 {
            return U256::MAX;
        }
        U256(limbs)
    }

    /// Long division by a u64 scalar. The divisor must be non-zero.
    pub fn div_u64(self, divisor: u64) -> Self {
        debug_assert!(divisor != 0);
        let mut limbs = [0u64; 4];
        let mut remainder: u128 = 0;
        for i in (0..4).rev() {
            let dividend = (remainder << 64) | self.0[i] as u128;
            limbs[i] = (dividend / divisor as u128) as u64;
            remainder = dividend % divisor as u128;
        }
        U256(limbs)
    }

    /// Lossy conversion to f64, adequate for stats display.
    pub fn as_f64(self) -> f64 {
        self.0
            .iter()
            .enumerate()
            .map(|(i, &limb)| limb as f64 * 2f64.powi(64 * i as i32))
            .sum()
    }
}

impl Ord for U256 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        for i in (0..4).rev() {
            match self.0[i].cmp(&other.0[i]) {
                std::cmp::Ordering::Equal => continue,
                ord => return ord,
            }
        }
        std::cmp::Ordering::Equal
    }
}

impl PartialOrd for U256 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A 256-bit mining target stored as 32 little-endian bytes (byte 0 is the
/// least significant), the order the ViaBTC dialect puts on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target(pub [u8; 32]);

impl Target {
    /// The all-ones target every hash satisfies.
    pub const MAX: Target = Target([0xff; 32]);

    /// Decode a compact target (exponent in the high byte, 24-bit mantissa).
    ///
    /// Values whose mantissa shifts past 2^256 clamp to `Target::MAX`.
    pub fn from_compact(compact: u32) -> Self {
        let exponent = compact >> 24;
        let mantissa = (compact & 0x00ff_ffff) as u64;
        let value = if exponent <= 3 {
            U256::from_u64(mantissa >> (8 * (3 - exponent)))
        } else {
            U256::from_u64(mantissa).shl_saturating(8 * (exponent - 3))
        };
        Target(value.to_le_bytes())
    }

    /// Convert a Stratum difficulty to a target: `T1 / d` with `T1 = 2^224`,
    /// carrying at least 1e6 fixed-point precision on `d`.
    pub fn from_difficulty(difficulty: f64) -> Self {
        if difficulty <= 0.0 {
            return Target::MAX;
        }
        let scaled = (difficulty * DIFF_PRECISION as f64).round();
        let scaled = if scaled < 1.0 {
            1
        } else if scaled >= u64::MAX as f64 {
            u64::MAX
        } else {
            scaled as u64
        };
        let numerator =
            U256::from_u64(DIFF_PRECISION).shl_saturating(DIFF1_EXPONENT);
        Target(numerator.div_u64(scaled).to_le_bytes())
    }

    /// Approximate difficulty of this target, for display only.
    pub fn to_difficulty(self) -> f64 {
        let value = U256::from_le_bytes(&self.0).as_f64();
        if value == 0.0 {
            return f64::MAX;
        }
        2f64.powi(DIFF1_EXPONENT as i32) / value
    }

    /// Parse from 64 hex chars in little-endian byte order.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| Error::invalid_hex("target", e.to_string()))?;
        if bytes.len() != 32 {
            return Err(Error::Validation(ValidationError::InvalidTarget {
                value: hex_str.to_string(),
                reason: format!("expected 32 bytes, got {}", bytes.len()),
            }));
        }
        let mut array = [0u8; 32];
        array.copy_from_slice(&bytes);
        Ok(Target(array))
    }

    /// Encode as 64 hex chars, little-endian byte order.
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    /// Whether a 32-byte hash meets this target: both interpreted as
    /// little-endian integers, valid iff `hash <= target`. Compared
    /// byte-wise from the most significant byte (index 31) down.
    pub fn meets(&self, hash: &[u8; 32]) -> bool {
        for i in (0..32).rev() {
            match hash[i].cmp(&self.0[i]) {
                std::cmp::Ordering::Less => return true,
                std::cmp::Ordering::Greater => return false,
                std::cmp::Ordering::Equal => continue,
            }
        }
        true
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
