//! CKB Stratum Proxy
//!
//! Entry point: parse CLI arguments, load configuration, wire the
//! mode-specific upstream driver to the miner-facing server, and run.

use ckb_stratum_proxy::config::{Args, Config, Mode};
use ckb_stratum_proxy::error::{Error, Result};
use ckb_stratum_proxy::stats::{run_stats_server, run_summary_logger};
use ckb_stratum_proxy::stratum::server::{run_listener, ProxyState, UpstreamHandle};
use ckb_stratum_proxy::upstream::node::{run_poller, run_watchdog, NodeClient, SoloHandle};
use ckb_stratum_proxy::upstream::pool::{PoolClient, PoolHandle, PoolState};
use ckb_stratum_proxy::utils;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_args(&args)?;

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    utils::init_logging(&args.log_level, &args.log_format);
    info!(
        "Starting ckb-stratum-proxy v{} in {} mode",
        ckb_stratum_proxy::VERSION,
        config.mode
    );

    let (events, _) = broadcast::channel(64);

    let state = match config.mode {
        Mode::Pool => {
            let pool_settings = config
                .pool
                .clone()
                .ok_or_else(|| Error::config("pool settings missing in pool mode"))?;
            info!(
                "Relaying to pool {}:{} as {}",
                pool_settings.host, pool_settings.port, pool_settings.user
            );

            let (forward_tx, forward_rx) = mpsc::unbounded_channel();
            let handle = Arc::new(PoolHandle {
                state: RwLock::new(PoolState::default()),
                forward_tx,
            });
            let state = Arc::new(ProxyState::new(
                config,
                UpstreamHandle::Pool(Arc::clone(&handle)),
                events.clone(),
            ));

            let client = Arc::new(PoolClient::new(
                pool_settings,
                handle,
                events.clone(),
                Arc::clone(&state.miners),
            ));
            tokio::spawn(client.run(forward_rx));
            state
        }
        Mode::Solo => {
            let node_settings = config.node.clone().unwrap_or_default();
            info!(
                "Solo mining against node {}:{}",
                node_settings.host, node_settings.port
            );
            if let Some(coinbase) = &node_settings.coinbase {
                info!(
                    "Rewards expected at {}; the node block assembler must be configured to match",
                    coinbase
                );
            }

            let client = NodeClient::new(&node_settings.host, node_settings.port)?;
            let handle = Arc::new(SoloHandle::new(client));
            let state = Arc::new(ProxyState::new(
                config,
                UpstreamHandle::Solo(Arc::clone(&handle)),
                events.clone(),
            ));

            tokio::spawn(run_poller(Arc::clone(&handle), events.clone()));
            tokio::spawn(run_watchdog(handle));
            state
        }
    };

    {
        let stats_state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = run_stats_server(stats_state).await {
                error!("Stats surface failed: {}", e);
            }
        });
    }
    tokio::spawn(run_summary_logger(Arc::clone(&state)));

    // A bind failure here is fatal, mirroring the error table: the listener
    // port being taken is the one startup condition the proxy cannot paper
    // over.
    run_listener(state).await
}
