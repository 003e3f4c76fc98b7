//! Bit-exact proof-of-work vectors and target arithmetic properties

use ckb_stratum_proxy::core::header::RawHeader;
use ckb_stratum_proxy::core::pow::{eaglesong_hash, pow_hash_for_nonce, pow_message};
use ckb_stratum_proxy::core::{ckb_blake2b_256, Target};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

#[test]
fn eaglesong_empty_input() {
    assert_eq!(
        hex::encode(eaglesong_hash(b"")),
        "9e4452fc7aed93d7240b7b55263792befd1be09252b456401122ba71a56f62a0"
    );
}

#[test]
fn eaglesong_ones_with_newline() {
    let mut input = Vec::from([b'1'; 34]);
    input.push(b'\n');
    assert_eq!(
        hex::encode(eaglesong_hash(&input)),
        "a50a3310f78cbaeadcffe2d46262119eeeda9d6568b4df1b636399742c867aca"
    );
}

#[test]
fn ckb_blake2b_empty_input() {
    assert_eq!(
        hex::encode(ckb_blake2b_256(b"")),
        "44f4c69744d5f8c55d642062949dcae49bc4e7ef43d388c5a12f42b5633d163e"
    );
}

#[test]
fn full_pow_pipeline_is_deterministic() {
    // Header -> pow_hash -> 48-byte message -> Eaglesong, end to end.
    let header = RawHeader {
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
    };
    let pow_hash = header.pow_hash();
    assert_eq!(
        hex::encode(pow_hash),
        "efa7f8b3a30b6609841a8d1822a0708def2fe0652e94d65eefb82b4045cc1fa8"
    );

    let nonce = 0xdeadbeef_00112233_44556677_8899aabbu128;
    let message = pow_message(&pow_hash, nonce);
    assert_eq!(
        hex::encode(message),
        "efa7f8b3a30b6609841a8d1822a0708def2fe0652e94d65eefb82b4045cc1fa8\
         bbaa99887766554433221100efbeadde"
    );

    // Same nonce, same hash, every time.
    let first = pow_hash_for_nonce(&pow_hash, nonce);
    let second = pow_hash_for_nonce(&pow_hash, nonce);
    assert_eq!(first, second);
    assert_eq!(first, eaglesong_hash(&message));
}

#[test]
fn compact_target_bitcoin_vector() {
    let target = Target::from_compact(0x1d00ffff);
    let mut be = target.0;
    be.reverse();
    assert_eq!(
        hex::encode(be),
        "00000000ffff0000000000000000000000000000000000000000000000000000"
    );
}

#[test]
fn meets_target_boundary_cases() {
    let target = Target::from_compact(0x1d00ffff);

    // Exactly on target: valid.
    assert!(target.meets(&target.0));

    // One below (LE): subtract one from the least significant byte chain.
    let mut below = target.0;
    // target LE bytes 26..28 are ff ff; byte 26 -> fe keeps it below.
    below[26] = 0xfe;
    assert!(target.meets(&below));

    // One above: bump a byte more significant than the mantissa.
    let mut above = target.0;
    above[28] = 0x01;
    assert!(!target.meets(&above));
}

proptest! {
    #[test]
    fn le_hex_roundtrip_identity(bytes in proptest::array::uniform32(any::<u8>())) {
        let hex_str = hex::encode(bytes);
        let target = Target::from_hex(&hex_str).unwrap();
        prop_assert_eq!(target.to_hex(), hex_str);
        prop_assert_eq!(target.0, bytes);
    }

    #[test]
    fn meets_target_matches_integer_compare(
        hash in proptest::array::uniform32(any::<u8>()),
        target_bytes in proptest::array::uniform32(any::<u8>()),
    ) {
        let target = Target(target_bytes);
        // Reference comparison through big integers (reverse LE -> BE).
        let mut hash_be = hash;
        hash_be.reverse();
        let mut target_be = target_bytes;
        target_be.reverse();
        let expected = hash_be <= target_be;
        prop_assert_eq!(target.meets(&hash), expected);
    }

    #[test]
    fn difficulty_targets_are_monotonic(diff in 0.001f64..1e6) {
        let base = Target::from_difficulty(diff);
        let harder = Target::from_difficulty(diff * 4.0);
        // Higher difficulty always shrinks (or keeps) the target.
        let mut base_be = base.0;
        base_be.reverse();
        let mut harder_be = harder.0;
        harder_be.reverse();
        prop_assert!(harder_be <= base_be);
    }
}
