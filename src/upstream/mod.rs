//! Upstream drivers
//!
//! The proxy speaks to exactly one upstream at a time: a remote Stratum pool
//! (`pool`) or a local CKB node over JSON-RPC (`node`). Both feed the same
//! downstream fan-out: events broadcast here are rendered to every
//! authorized miner session.

pub mod node;
pub mod pool;

use serde_json::Value;

/// Work and difficulty updates fanned out to miner sessions.
#[derive(Debug, Clone)]
pub enum DownstreamEvent {
    /// `mining.notify` parameters, forwarded verbatim (pool mode) or built
    /// from the current template (solo mode).
    Notify {
        /// The five-element notify tuple
        params: Vec<Value>,
    },
    /// `mining.set_target` parameters, forwarded verbatim.
    SetTarget {
        /// Single-element params: 64-char little-endian target hex
        params: Vec<Value>,
    },
    /// Pool difficulty update, re-emitted per miner.
    SetDifficulty {
        /// New difficulty value
        difficulty: f64,
    },
}

/// A share a session wants relayed to the pool, extranonce already
/// rewritten. The pool client answers the miner through its outbound queue
/// once the upstream responds.
#[derive(Debug, Clone)]
pub struct ShareForward {
    /// Session that submitted the share
    pub miner_id: u32,
    /// The miner's own request id, echoed back on the relayed response
    pub original_id: Value,
    /// Job id as submitted
    pub job_id: String,
    /// Full extranonce2: miner suffix byte prepended to the miner's value
    pub extranonce2: String,
    /// ntime field as submitted
    pub ntime: String,
    /// Nonce hex as submitted
    pub nonce: String,
}
