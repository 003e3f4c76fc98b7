//! Eaglesong proof-of-work evaluation
//!
//! The sponge absorbs input in 256-bit blocks over a 512-bit state of
//! sixteen 32-bit words and squeezes a single 32-byte digest. Each of the
//! 43 permutation rounds applies four steps in sequence: a GF(2) mixing
//! matrix across words, a per-word circulant rotation XOR, injection of
//! round constants, and an add-rotate-add pass over adjacent word pairs.
//!
//! CKB miners grind a 48-byte message, the raw header's pow_hash followed
//! by the 128-bit nonce in little-endian order, and compare the digest
//! against the target as a little-endian integer.

use crate::core::constants::{NONCE_SIZE, POW_HASH_SIZE, POW_MESSAGE_SIZE};

/// Rounds per permutation call.
const NUM_ROUNDS: usize = 43;
/// State width in 32-bit words.
const STATE_WORDS: usize = 16;
/// Rate in 32-bit words: 256 of the 512 state bits absorb input.
const RATE_WORDS: usize = 8;
/// Domain-separation byte appended to every input.
const DELIMITER: u8 = 0x06;

/// Mixing-matrix rows. Bit j of row i selects `state[j]` into the XOR that
/// produces word i of the mixed state. The matrix is invertible over GF(2).
const MIX_MATRIX: [u16; STATE_WORDS] = [
    0b0000010001010001,
    0b0000100010100010,
    0b0001000101000100,
    0b0010001010001000,
    0b0100010100010000,
    0b1000101000100000,
    0b0001010001101101,
    0b0010100011011010,
    0b0101000110110100,
    0b1010001101101000,
    0b0100011011111101,
    0b1000110111111010,
    0b0001101111011001,
    0b0011011110110010,
    0b0110111101100100,
    0b1101111011001000,
];

/// Rotation pairs for the circulant step: word j becomes
/// `w ^ rotl(w, r1) ^ rotl(w, r2)`.
const ROTATIONS: [(u32, u32); STATE_WORDS] = [
    (2, 4), (13, 22), (4, 19), (3, 14),
    (27, 31), (3, 8), (17, 26), (3, 12),
    (18, 22), (12, 18), (4, 7), (4, 31),
    (12, 27), (7, 17), (7, 8), (1, 13),
];

/// Round-constant schedule, sixteen words per round.
const INJECTION_CONSTANTS: [u32; NUM_ROUNDS * STATE_WORDS] = [
    0xc8ff62bf, 0xcc2249ed, 0x4e619959, 0xc6925083, 0xf7783b3b, 0xbc051384, 0x3fbb9a90, 0xd857b4d3,
    0xfd9eb17b, 0x9b232128, 0x78e9a41a, 0x2e1d4895, 0xd8b4c144, 0x30576842, 0xed13d3cd, 0x4f247d8b,
    0x04eb2cb0, 0x73b555d1, 0x1284d330, 0xc99c184a, 0x9f2429eb, 0x43824351, 0xec8e5ae9, 0xc558ee21,
    0x34ea23f9, 0x37d9e078, 0xead70bf5, 0x191d7a73, 0xa4b40efb, 0x176917b8, 0xbf9d79a1, 0x5c7d8474,
    0xa86f5b22, 0xc00a5eb6, 0xb46ceef8, 0xc38e4d03, 0xa4b4471d, 0x5a6a7723, 0x7efb3a98, 0xca069346,
    0xf780db2a, 0xb384a63b, 0xe3e4d78b, 0x0394ce9f, 0xfdc5d217, 0xf28d05c6, 0xaf6cd691, 0xd65501ce,
    0xe8451f7a, 0x4936a603, 0xbd1c5737, 0x95dc7a27, 0x8d0d947a, 0x0d1071fa, 0x254d342c, 0x7b765053,
    0x036d2609, 0x1b657fd4, 0xd6fdc498, 0x90b7fd74, 0x7abd5b83, 0x1c35afa0, 0x6696aa6a, 0x7b4a188a,
    0x8fce6800, 0x582ab40b, 0xd99213e6, 0x7c1248cd, 0xdb160c34, 0xaf7fd3f0, 0xde89b833, 0x5543d044,
    0x8864f921, 0xc48de60a, 0x2ec9f6d3, 0x154d0671, 0x728afb2b, 0x1b8294c1, 0x9f791327, 0xde20acd6,
    0xf9c89c3d, 0x0d5d97f3, 0x4cf31edb, 0x1fa2b736, 0x676160c2, 0x863cfb5a, 0x9e4cc010, 0xd5be5af9,
    0x4e097d91, 0x36e62940, 0xa86f042f, 0x157cd796, 0x71def374, 0xe299f577, 0x78d67cd3, 0x49df8c2a,
    0x8b7fa7bc, 0x2ee58b62, 0x22dc5f0d, 0xa6e93185, 0x4cf768f8, 0x6dec6124, 0x3c42b2c9, 0xd9458f19,
    0x03159faa, 0x19ca9bd3, 0xa00dcb95, 0xeef3980d, 0x14a7bcdf, 0x92011211, 0x5d05f560, 0xc18f433b,
    0x18831754, 0x02060256, 0xb37f4f31, 0x900e5edc, 0x376091b7, 0x341ed7f1, 0x07752bc0, 0xe6b41a19,
    0x0364c3ee, 0x32381067, 0x6c6084ca, 0x243a76ca, 0xc5835b5f, 0x3fed0431, 0xbaf7d9cc, 0x01aa7fa4,
    0xdeb3ac75, 0x33d64d74, 0x3c19d623, 0x838b52c8, 0x4ec352db, 0x03863763, 0x013c0585, 0xd31857a0,
    0x7e7817f0, 0x86b6b79e, 0x5728ae37, 0x67d4f220, 0x4894e5dc, 0x23f9eab8, 0x11259414, 0xb3f25e03,
    0xc9b2cc19, 0x26df6ebf, 0x5b501000, 0x0f603597, 0x3ce055b7, 0x0b1730ed, 0xa926d2fe, 0x38212c40,
    0xba478261, 0xfeec61d3, 0x780dc115, 0x1fb4c5a6, 0x61c43855, 0x8b1b6a7a, 0xa8315cc1, 0xf02630c5,
    0xd4ef1329, 0x15a61b70, 0xe1f52628, 0xa8b0c7ba, 0x812164e2, 0xf8efb197, 0xc5499574, 0x1ac150bd,
    0xcdb7894a, 0xd1adad55, 0x52c22b7c, 0x576a4eed, 0x6234014c, 0x323c6967, 0x481464d3, 0x1ef273fe,
    0x885dcd66, 0x17b184ba, 0x2d0dad83, 0xbb4ed2b2, 0xaa8099df, 0xce7e79f5, 0x63b7658d, 0x166bf1ed,
    0xe2b6bce6, 0x9eac292e, 0xeb9402a6, 0x6d499f41, 0x1e7ce8f8, 0x6dc7b5d2, 0xe41ab7f2, 0x35b66d6e,
    0x61f4e2a9, 0xb1f9f921, 0x5d40c1a4, 0x19cfb62a, 0xe5f11370, 0xfe523a59, 0x716cf427, 0xf79e9d6a,
    0xfba624ad, 0x33b20a2b, 0x22b4a10f, 0xcb0c858c, 0xc4d60698, 0x332d9dda, 0x56b2fdf0, 0x9215c0f6,
    0xa6f217a4, 0xed752f7b, 0x0568857a, 0x20cecf91, 0x99656ff5, 0xfdb134d5, 0xb5c89ece, 0x90cae0c0,
    0x5ebef2c7, 0xe78f9270, 0xb8b06f71, 0x001d6839, 0x973849bb, 0x83df2b01, 0xed1c5775, 0xf955d50f,
    0xaaf29b15, 0x69070cdb, 0x589e3532, 0xe4d498f8, 0x3563195b, 0xa3fd042e, 0xb3681423, 0xe1f80519,
    0x32d25baf, 0x582a554c, 0xa4cff496, 0x9a45db2a, 0x66daa1a3, 0xed86106a, 0x2af07b19, 0xf2a1908e,
    0x9ae14208, 0xdb84114a, 0xab533640, 0xee70ac0c, 0xa39cd7cd, 0xb18b5a5e, 0x70fd20db, 0x40d037c4,
    0xa8af3438, 0xa82651d5, 0x706b35fb, 0x26d32b58, 0x3d7945fd, 0xa2b80434, 0x5c1871b8, 0xeb8f7bda,
    0x560c13dc, 0x44b348f6, 0x403b0723, 0xce2558be, 0x229f136f, 0xc807f93b, 0x82543965, 0x729dfa96,
    0x9abeb455, 0x06942d34, 0x4c024b3c, 0xbc1cf725, 0xdde55765, 0x4850ec82, 0x6365186e, 0x909787a7,
    0xc5d38aaa, 0xb715950f, 0x49edfde3, 0xd19b0326, 0xa8c0b7cd, 0x3e9d31e4, 0xc912268d, 0xd548b28d,
    0x588e9522, 0x537a61fe, 0x98c7861a, 0x8977e634, 0x56070d32, 0xbc5dfb7f, 0xd4c4b6d1, 0xe76bc295,
    0x88c4734f, 0x4eb2d112, 0xb7031645, 0x698b7ebf, 0x335181eb, 0x5861b7de, 0xbe7fa0b4, 0x37da29c8,
    0x0989fa04, 0x14ba37b2, 0x0bffb8ed, 0x0b52e18f, 0x7a3f5f3c, 0xf9213761, 0x429f974c, 0x02087a68,
    0x3cb24fa5, 0xb35865b9, 0xa3699511, 0x8bf53475, 0x77c6947c, 0xd0f65b71, 0x67eb31c3, 0xad4407ad,
    0x5e52e72b, 0x38c437a8, 0x2921dd31, 0x62f8b0dc, 0x5bb1fef0, 0xed0e08d1, 0x2751d882, 0x22e1a0d5,
    0xb70c7a23, 0x570e614a, 0x1b4d2210, 0xe8c93c6f, 0x092e485e, 0xea3db4c2, 0x2523cdf1, 0x016b4cdd,
    0x8d987dc7, 0xb22582a5, 0xeac89b8b, 0x1f6c5df6, 0x0febce0f, 0x9d741ed6, 0xfa029927, 0xad7ab4ce,
    0xaf56744d, 0x8eaa8684, 0x8c62fcd1, 0x0a7e6055, 0x53baec10, 0x6b73af04, 0xe2c79d82, 0xe452f286,
    0x484afd53, 0x266cd886, 0xad6ca999, 0xcdd322f8, 0xd857b56b, 0xaa174238, 0x0aaf9119, 0xa36d242f,
    0xafe7e2fb, 0xfce9adc9, 0xebc629e2, 0xcb8a1d06, 0x6d66252a, 0x10c6eec0, 0xe5018019, 0xd7362b0d,
    0x444e04c9, 0x8bf432ee, 0x291dab71, 0xa7a15793, 0xec6d433f, 0x472862ac, 0x28571ef8, 0x03b3fe5f,
    0x5790e575, 0xebcbd49b, 0xf4d601da, 0xb3307687, 0xb2f94177, 0xa94b5ba3, 0xa17f6c99, 0x74e8929f,
    0xd45eb79f, 0x48b5cf75, 0x98c325aa, 0xa6c825e2, 0x0e569892, 0x22f36b21, 0x0096cc4d, 0xb05d233a,
    0xb5609457, 0x263847d5, 0xb637301d, 0xe7a801eb, 0xc70571ce, 0x23487c92, 0xc86ef45e, 0xdbed4bc8,
    0x8b1a1535, 0xe41b8c45, 0x9c917d26, 0xbbc37c5e, 0x56832689, 0xe091f7cf, 0x0705b84a, 0xaf49dec7,
    0xe7d0b239, 0xb8077cc8, 0xfdec3670, 0xf0dfa3eb, 0xb99010d5, 0x1bea9ff7, 0xfeabeebc, 0x2edf8d89,
    0x142fe1f1, 0x91ca5f14, 0xa1706546, 0x06cc7452, 0x2fe89780, 0x5288fa8d, 0xc9a3e033, 0x81766ac8,
    0xf3bfa53e, 0x94a4c0cc, 0x74e8b500, 0x4e3674c4, 0xc79dae71, 0x5040a84f, 0xfd3a115b, 0x3420e6a0,
    0x869e8f57, 0x390864ab, 0x5866c809, 0xac34eeed, 0xa495290c, 0x1454cdf0, 0x45b12961, 0x497958aa,
    0x0ad2d1e4, 0xda6cdc9f, 0xe9f6181c, 0x4454c7aa, 0xbe5ab260, 0xc2b6ffa6, 0xf9b8dac6, 0x2ae6689d,
    0xd60f0dd3, 0x5991f039, 0x4718669c, 0xaecfd31e, 0x7700873b, 0x8926d897, 0x12d96f8e, 0xca2314ef,
    0x0d62a51f, 0x9afa7132, 0xff25af07, 0xbef53c58, 0xd3cc5b47, 0x077bcba4, 0xa1f21b17, 0x5abc01ae,
    0x7cb4fb81, 0xfee84e21, 0x07d2a526, 0x70b36978, 0x338b23b6, 0xa4624349, 0x05adf610, 0x1f7a6b61,
    0x444724de, 0x1a7c9380, 0xa517a397, 0x244de0d6, 0x4ad6ae19, 0x7bae78f9, 0xa259c205, 0xd650d2f0,
    0x8d573bad, 0x344a3620, 0x744ef5c2, 0x1c60ecb5, 0x67bb8ad9, 0x71827430, 0x661da512, 0x27d30bb1,
    0x78399e02, 0x4bf6d645, 0xdcb24b2c, 0x1403b74b, 0x6e6e51a6, 0x281a050b, 0xfd2e7451, 0xf09350b8,
    0xe3a144d8, 0xe44ada00, 0x6473a972, 0x6e5b82cd, 0x40feea13, 0xc6ae7caa, 0xf2219086, 0x1dc3313e,
    0xa27b59eb, 0x4480b864, 0xeb63ff58, 0xddff4655, 0x4ce26413, 0x6c7cd88c, 0x8efc655e, 0xf327b854,
    0x4b78bcf5, 0x108ace22, 0x535ca78d, 0x8cae32e9, 0xcfa15833, 0xef10768f, 0x610e3ce5, 0xaf818d54,
    0x55e434b1, 0x7b246e91, 0x32995b57, 0x2135c796, 0xbf5778e4, 0xd91601fc, 0x11a1df1f, 0x5b544036,
    0xbfe64f2c, 0xe467f577, 0xef680473, 0x47c9914b, 0xa2553941, 0x88f574fb, 0xdf180a5d, 0x03e2c163,
    0x6ddaeaa7, 0x22e6ff36, 0xb918a5e5, 0xb14b7d27, 0xee26a816, 0x2f443102, 0x62494030, 0x328ed74d,
    0xaf23ceb1, 0x7ad0f7e5, 0x38598b1c, 0x56ffce35, 0x8b13869c, 0xbfd9a5b9, 0x22cd5159, 0xb3bb70e1,
    0x617d21a3, 0x78af6ae3, 0x4e482d80, 0x66d30702, 0x81f08a00, 0x624e641b, 0x5456dd94, 0xf5ef3bcf,
    0x9c7a0e77, 0xfa42e3b1, 0x32e03f78, 0xc69d5172, 0xbefe8486, 0xaa5da035, 0x3a361978, 0x3a914a88,
    0x8da08e88, 0x26f3f086, 0x1a84441f, 0x65b81999, 0xb7e755f8, 0x0b16c22b, 0x6a43a78b, 0xbc1035d9,
    0x3c7654dc, 0xa1ae6f18, 0x7c973e3c, 0xf5605145, 0x6899dc53, 0x10b3767e, 0xbb1c1a33, 0xdbc0c82f,
    0x3568ba73, 0x021f4694, 0xe124957b, 0xbbaed3d1, 0xd4682d2b, 0x878c08e7, 0x56075231, 0xc30b289c,
    0xea27aa1d, 0x1a2c48f3, 0x759ddfda, 0x441d78e5, 0x6a111fcf, 0x1d6ee393, 0xc0c9787d, 0xaaea93e2,
    0xace9a8af, 0x6dfbfa87, 0x4f9e8ec1, 0x1ad019f8, 0x7a37f176, 0x0fad42cd, 0xdd214d7e, 0x3942df1c,
    0x3e0b4b0a, 0x34fa8eb3, 0x31d0fba3, 0x1e1d29e6, 0x57d2fbd6, 0x88bc0a01, 0xdfef9122, 0x69ed73d6,
    0xd0ea26c4, 0x1b10050d, 0xf8ecde53, 0x966f3e06, 0xdf732877, 0x0a5c9fb4, 0x98703685, 0x93291c78,
    0xd8a4e504, 0x6cf8ab14, 0x04467ae7, 0xa82ee6e1, 0x3858b630, 0xc3a03437, 0x68e7ef54, 0x2342ab3f,
    0xa4070f0e, 0xccd0ad4b, 0x4aee749a, 0xc5566d0d, 0x19f0206d, 0x16c21bf3, 0x9c3b8fd4, 0xa58c7fc1,
    0x65d5e422, 0x7516268c, 0x1ea3db46, 0x6caa5c7d, 0x7359c728, 0x1f90f98b, 0x20541c21, 0xa218ab2a,
    0x973a8a36, 0x04bf28ee, 0x794b0e10, 0xfd4e9a61, 0x61a3615f, 0xa0b79400, 0x45eac321, 0x6ace4be9,
    0x882e3859, 0x7bd3a86c, 0x857ffc0e, 0xf8fafbb8, 0x0edd8003, 0xb33c3df4, 0xd18343bd, 0x131fe5cc,
    0x1528ef3c, 0x5e5d1fc6, 0x92407c25, 0x343e411d, 0x7489ca64, 0xfe7d5591, 0x8868b805, 0xce81e2bd,
    0xd5c5bb2b, 0xb157a555, 0x9866e7ee, 0x92e7f271, 0xf3533579, 0x0b535688, 0x1318e644, 0x5dd404b6,
    0x911fe990, 0xc15de492, 0xbad7f3e5, 0x95eec939, 0xa17002d1, 0x8cec1cc4, 0xf72659cb, 0xfbf3c572,
    0x8141ba7a, 0x5b418101, 0x24c029b6, 0x339dbb99, 0xedb78be2, 0xd9e808ae, 0xc76b4f7c, 0xdca6cbcb,
];

/// Apply the 43-round Eaglesong permutation in place.
pub fn eaglesong_permutation(state: &mut [u32; STATE_WORDS]) {
    for round in 0..NUM_ROUNDS {
        // Mix: every output word is the XOR of a fixed subset of the
        // pre-round state; the whole vector is computed before write-back.
        let mut mixed = [0u32; STATE_WORDS];
        for (i, row) in MIX_MATRIX.iter().enumerate() {
            for (j, word) in state.iter().enumerate() {
                if (row >> j) & 1 == 1 {
                    mixed[i] ^= word;
                }
            }
        }
        *state = mixed;

        // Circulant rotation XOR; all three terms read the pre-step word.
        for (word, &(r1, r2)) in state.iter_mut().zip(ROTATIONS.iter()) {
            *word ^= word.rotate_left(r1) ^ word.rotate_left(r2);
        }

        // Inject this round's constants.
        for (j, word) in state.iter_mut().enumerate() {
            *word ^= INJECTION_CONSTANTS[round * STATE_WORDS + j];
        }

        // Add-rotate-add over adjacent pairs. The right word's update reads
        // the just-written left word and the pair's original right word.
        for p in (0..STATE_WORDS).step_by(2) {
            let left = state[p].wrapping_add(state[p + 1]).rotate_left(8);
            state[p + 1] = left.wrapping_add(state[p + 1].rotate_left(24));
            state[p] = left;
        }
    }
}

/// Compute the Eaglesong hash of an arbitrary input.
///
/// Absorption packs four input bytes per word in big-endian order, places
/// the delimiter byte immediately after the input, and zero-fills the rest
/// of the final block; no extra block is added when the delimiter already
/// fits. The 32-byte digest is squeezed from the rate words in little-endian
/// byte order after a single permutation of the last block.
pub fn eaglesong_hash(input: &[u8]) -> [u8; 32] {
    let mut state = [0u32; STATE_WORDS];

    let num_blocks = ((input.len() + 1) * 8).div_ceil(256);
    for block in 0..num_blocks {
        for j in 0..RATE_WORDS {
            let mut word = 0u32;
            for k in 0..4 {
                let index = block * 32 + j * 4 + k;
                let byte = match index.cmp(&input.len()) {
                    std::cmp::Ordering::Less => input[index],
                    std::cmp::Ordering::Equal => DELIMITER,
                    std::cmp::Ordering::Greater => 0,
                };
                word = word << 8 | byte as u32;
            }
            state[j] ^= word;
        }
        eaglesong_permutation(&mut state);
    }

    let mut output = [0u8; 32];
    for (chunk, word) in output.chunks_exact_mut(4).zip(state.iter()) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    output
}

/// Assemble the 48-byte mining message: `pow_hash || nonce (LE)`.
pub fn pow_message(pow_hash: &[u8; POW_HASH_SIZE], nonce: u128) -> [u8; POW_MESSAGE_SIZE] {
    let mut message = [0u8; POW_MESSAGE_SIZE];
    message[..POW_HASH_SIZE].copy_from_slice(pow_hash);
    message[POW_HASH_SIZE..].copy_from_slice(&nonce.to_le_bytes());
    message
}

/// Eaglesong hash of the mining message for a given header hash and nonce.
pub fn pow_hash_for_nonce(pow_hash: &[u8; POW_HASH_SIZE], nonce: u128) -> [u8; 32] {
    eaglesong_hash(&pow_message(pow_hash, nonce))
}

/// Parse a miner-submitted nonce hex string into a u128.
///
/// Miners send up to 32 hex chars; shorter strings are treated as
/// zero-padded on the left, matching the wire encoding the proxy itself
/// emits. A `0x` prefix is tolerated.
pub fn parse_nonce(hex_str: &str) -> Option<u128> {
    let cleaned = hex_str
        .strip_prefix("0x")
        .or_else(|| hex_str.strip_prefix("0X"))
        .unwrap_or(hex_str);
    if cleaned.is_empty() || cleaned.len() > NONCE_SIZE * 2 {
        return None;
    }
    u128::from_str_radix(cleaned, 16).ok()
}

/// Encode a nonce as the 32-char zero-padded hex string used on the wire.
pub fn nonce_to_hex(nonce: u128) -> String {
    format!("{:032x}", nonce)
}
