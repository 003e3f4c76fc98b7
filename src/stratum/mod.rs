//! Miner-facing Stratum layer
//!
//! Protocol message types, the TCP session server, per-miner state and the
//! variable-difficulty controller.

pub mod protocol;
pub mod server;
pub mod session;
pub mod vardiff;

pub use server::{run_listener, ProxyState, UpstreamHandle};
pub use session::MinerHandle;
pub use vardiff::{Vardiff, VardiffConfig};
