//! Per-miner session state
//!
//! A session is created on TCP accept and destroyed on disconnect. The
//! shared half (`MinerHandle`) lives in the server registry so the pool
//! client and the stats surface can reach it; everything else stays local to
//! the connection task.

use crate::core::pow::pow_hash_for_nonce;
use crate::core::Target;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;

/// Share counters for one miner.
#[derive(Debug, Default)]
pub struct ShareCounters {
    /// Every `mining.submit` received
    pub submitted: AtomicU64,
    /// Shares acknowledged as accepted (includes stale ACKs, see DESIGN.md)
    pub accepted: AtomicU64,
    /// Shares rejected (low difficulty or bad parameters)
    pub rejected: AtomicU64,
    /// Accepted shares that met the session target but not the network
    /// target (solo mode)
    pub local_only: AtomicU64,
}

/// Registry entry for a connected miner. Cheap to clone via `Arc`; fields
/// mutated from the connection task, read from the pool client and stats.
#[derive(Debug)]
pub struct MinerHandle {
    /// Process-unique id; the low byte doubles as the extranonce suffix
    pub id: u32,
    /// Remote address, for logs
    pub addr: SocketAddr,
    /// Outbound frame queue drained by the connection task
    pub outbound: mpsc::UnboundedSender<String>,
    /// Worker name from `mining.authorize`
    pub worker: parking_lot::RwLock<Option<String>>,
    /// Set once `mining.authorize` succeeds
    pub authorized: AtomicBool,
    /// Accept time, for uptime and hashrate projection
    pub connected_at: Instant,
    /// Share counters
    pub counters: ShareCounters,
    /// Current session difficulty, stored as f64 bits
    difficulty_bits: AtomicU64,
}

impl MinerHandle {
    /// Create a handle for a freshly accepted connection.
    pub fn new(
        id: u32,
        addr: SocketAddr,
        outbound: mpsc::UnboundedSender<String>,
        initial_difficulty: f64,
    ) -> Self {
        Self {
            id,
            addr,
            outbound,
            worker: parking_lot::RwLock::new(None),
            authorized: AtomicBool::new(false),
            connected_at: Instant::now(),
            counters: ShareCounters::default(),
            difficulty_bits: AtomicU64::new(initial_difficulty.to_bits()),
        }
    }

    /// The extranonce suffix byte for this miner.
    pub fn suffix_byte(&self) -> u8 {
        (self.id & 0xff) as u8
    }

    /// Current session difficulty.
    pub fn difficulty(&self) -> f64 {
        f64::from_bits(self.difficulty_bits.load(Ordering::Relaxed))
    }

    /// Record a difficulty change.
    pub fn set_difficulty(&self, difficulty: f64) {
        self.difficulty_bits
            .store(difficulty.to_bits(), Ordering::Relaxed);
    }

    /// Queue a complete frame for delivery. Returns false once the
    /// connection task is gone.
    pub fn send_line(&self, line: String) -> bool {
        self.outbound.send(line).is_ok()
    }

    /// Estimated hashrate in hashes per second:
    /// `accepted / uptime_s * difficulty * 2^32`.
    pub fn hashrate(&self) -> f64 {
        let uptime = self.connected_at.elapsed().as_secs_f64();
        if uptime <= 0.0 {
            return 0.0;
        }
        let accepted = self.counters.accepted.load(Ordering::Relaxed) as f64;
        accepted / uptime * self.difficulty() * 2f64.powi(32)
    }
}

/// Miner-facing extranonce1: the pool's prefix with the miner's suffix byte
/// appended. The prefix may be empty.
pub fn extranonce1_for(pool_extranonce1: &[u8], miner_id: u32) -> String {
    format!("{}{:02x}", hex::encode(pool_extranonce1), miner_id & 0xff)
}

/// Upstream extranonce2: the miner's suffix byte in front of the
/// miner-supplied extranonce2 hex. Distinct miner ids below 256 therefore
/// occupy disjoint nonce ranges.
pub fn rewrite_extranonce2(miner_id: u32, extranonce2_hex: &str) -> String {
    format!("{:02x}{}", miner_id & 0xff, extranonce2_hex)
}

/// Result of validating a solo-mode share.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareOutcome {
    /// Share references an old job: acknowledged without hashing so miners
    /// replaying their buffer do not lock up.
    StaleAck,
    /// Hash above the session target.
    LowDifficulty,
    /// Hash meets the session target; `meets_network` marks a block
    /// candidate.
    Accepted {
        /// Whether the hash also meets the network target
        meets_network: bool,
    },
}

/// Validate a solo share. The stale check runs first and skips hashing
/// entirely for replayed jobs.
pub fn evaluate_share(
    current_job_id: u32,
    submitted_job_id: u32,
    pow_hash: &[u8; 32],
    nonce: u128,
    session_target: &Target,
    network_target: &Target,
) -> ShareOutcome {
    if submitted_job_id != current_job_id {
        return ShareOutcome::StaleAck;
    }

    let hash = pow_hash_for_nonce(pow_hash, nonce);
    if !session_target.meets(&hash) {
        return ShareOutcome::LowDifficulty;
    }

    ShareOutcome::Accepted {
        meets_network: network_target.meets(&hash),
    }
}

/// Session id used in the solo-mode subscribe reply: the client-supplied
/// value when present, otherwise a random 8-hex string.
pub fn session_id_from_params(params: &[Value]) -> String {
    if let Some(Value::String(s)) = params.get(1) {
        if !s.is_empty() {
            return s.clone();
        }
    }
    let bits: u32 = rand::random();
    format!("{:08x}", bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extranonce1_suffix() {
        assert_eq!(extranonce1_for(&[0xab, 0xcd], 7), "abcd07");
        assert_eq!(extranonce1_for(&[], 255), "ff");
        // Ids wrap at the byte boundary.
        assert_eq!(extranonce1_for(&[], 0x1_02), "02");
    }

    #[test]
    fn test_extranonce_partitioning_disjoint() {
        // Distinct ids below 256 produce distinct suffix bytes, so the
        // rewritten extranonce2 values live in disjoint prefix ranges.
        for i in 0..256u32 {
            for j in (i + 1)..256u32 {
                let a = rewrite_extranonce2(i, "aa");
                let b = rewrite_extranonce2(j, "aa");
                assert_ne!(&a[..2], &b[..2]);
            }
        }
    }

    #[test]
    fn test_rewrite_prepends_suffix() {
        assert_eq!(rewrite_extranonce2(0x42, "aabb"), "42aabb");
        assert_eq!(rewrite_extranonce2(0, ""), "00");
    }

    #[test]
    fn test_stale_share_acked_without_hashing() {
        // Impossible targets: if hashing ran, the share could never pass.
        let zero_target = Target([0u8; 32]);
        let outcome = evaluate_share(5, 4, &[0u8; 32], 1, &zero_target, &zero_target);
        assert_eq!(outcome, ShareOutcome::StaleAck);
    }

    #[test]
    fn test_low_difficulty_rejected() {
        let zero_target = Target([0u8; 32]);
        let outcome = evaluate_share(5, 5, &[0u8; 32], 1, &zero_target, &zero_target);
        assert_eq!(outcome, ShareOutcome::LowDifficulty);
    }

    #[test]
    fn test_share_accepted_at_max_target() {
        let outcome = evaluate_share(1, 1, &[0u8; 32], 42, &Target::MAX, &Target::MAX);
        assert_eq!(
            outcome,
            ShareOutcome::Accepted {
                meets_network: true
            }
        );
    }

    #[test]
    fn test_share_accepted_locally_only() {
        // Session target accepts everything, network target nothing.
        let outcome = evaluate_share(1, 1, &[0u8; 32], 42, &Target::MAX, &Target([0u8; 32]));
        assert_eq!(
            outcome,
            ShareOutcome::Accepted {
                meets_network: false
            }
        );
    }

    #[test]
    fn test_session_id_echoes_client_value() {
        let params = vec![
            serde_json::json!("goldshell-miner/1.0"),
            serde_json::json!("deadbeef"),
        ];
        assert_eq!(session_id_from_params(&params), "deadbeef");

        let generated = session_id_from_params(&[]);
        assert_eq!(generated.len(), 8);
        assert!(generated.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_miner_handle_counters() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = MinerHandle::new(3, "127.0.0.1:4444".parse().unwrap(), tx, 1.0);
        assert_eq!(handle.suffix_byte(), 3);
        assert_eq!(handle.difficulty(), 1.0);

        handle.set_difficulty(2.5);
        assert_eq!(handle.difficulty(), 2.5);

        handle
            .counters
            .accepted
            .fetch_add(10, std::sync::atomic::Ordering::Relaxed);
        assert!(handle.hashrate() >= 0.0);
    }
}
