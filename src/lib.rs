//! # CKB Stratum Proxy
//!
//! A Stratum v1 proxy for Nervos CKB miners. Terminates connections from
//! many miner devices on a local network and relays their work to one of
//! two upstreams:
//!
//! - **pool mode**: a remote mining pool over Stratum, with per-miner
//!   extranonce partitioning so devices never overlap nonce space;
//! - **solo mode**: a local CKB full node over JSON-RPC, with every share
//!   validated by recomputing the Eaglesong hash against the template.
//!
//! The miner-facing dialect is ViaBTC's five-parameter `mining.notify` /
//! `mining.set_target` flavor, the one CKB ASICs expect.

#![warn(
    missing_docs,
    rust_2018_idioms,
    unused_lifetimes,
    unused_qualifications,
    clippy::all
)]
#![forbid(unsafe_code)]

pub mod config;
pub mod core;
pub mod error;
pub mod stats;
pub mod stratum;
pub mod upstream;
pub mod utils;

pub use crate::config::{Config, Mode};
pub use crate::core::{RawHeader, Target};
pub use crate::error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        config::{Config, Mode},
        core::{ckb_blake2b_256, eaglesong_hash, RawHeader, Target},
        error::{Error, Result},
        stratum::{ProxyState, UpstreamHandle},
    };
}
