//! Read-only HTTP stats surface
//!
//! A thin axum router over a snapshot of the proxy state. Nothing here
//! mutates anything; the session and upstream layers own all writes.

use crate::stratum::server::{ProxyState, UpstreamHandle};
use crate::utils::format_hashrate;
use crate::error::Result;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Serve `GET /` and `GET /health` until the process exits.
pub async fn run_stats_server(state: Arc<ProxyState>) -> Result<()> {
    let addr = format!(
        "{}:{}",
        state.config.local.host, state.config.local.stats_port
    );
    let app = Router::new()
        .route("/", get(snapshot))
        .route("/health", get(health))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Stats surface listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health(State(state): State<Arc<ProxyState>>) -> Json<Value> {
    let miners = state.miners.len();
    let body = match &state.upstream {
        UpstreamHandle::Pool(pool) => {
            let ready = pool.state.read().await.ready;
            json!({"ok": ready, "miners": miners, "upstreamReady": ready})
        }
        UpstreamHandle::Solo(solo) => {
            let healthy = solo.status.read().await.healthy;
            let has_template = solo.template.read().await.is_some();
            json!({"ok": healthy && has_template, "miners": miners, "hasTemplate": has_template})
        }
    };
    Json(body)
}

async fn snapshot(State(state): State<Arc<ProxyState>>) -> Json<Value> {
    let uptime = state.started_at.elapsed().as_secs();

    let miners: Vec<Value> = state
        .miners
        .iter()
        .map(|entry| {
            let miner = entry.value();
            json!({
                "id": miner.id,
                "address": miner.addr.to_string(),
                "worker": miner.worker.read().clone(),
                "authorized": miner.authorized.load(Ordering::Relaxed),
                "submitted": miner.counters.submitted.load(Ordering::Relaxed),
                "accepted": miner.counters.accepted.load(Ordering::Relaxed),
                "rejected": miner.counters.rejected.load(Ordering::Relaxed),
                "localOnly": miner.counters.local_only.load(Ordering::Relaxed),
                "difficulty": miner.difficulty(),
                "hashrate": miner.hashrate(),
                "hashrateDisplay": format_hashrate(miner.hashrate()),
                "uptime": miner.connected_at.elapsed().as_secs(),
            })
        })
        .collect();

    let upstream = match &state.upstream {
        UpstreamHandle::Pool(pool) => {
            let pool_state = pool.state.read().await;
            json!({
                "upstream": {
                    "ready": pool_state.ready,
                    "extranonce1": hex::encode(&pool_state.extranonce1),
                    "extranonce2Size": pool_state.extranonce2_size,
                    "difficulty": pool_state.pool_difficulty,
                    "target": pool_state.current_target.map(|t| t.to_hex()),
                    "hasJob": pool_state.current_job.is_some(),
                }
            })
        }
        UpstreamHandle::Solo(solo) => {
            let status = solo.status.read().await;
            let template = solo.template.read().await;
            json!({
                "node": {
                    "healthy": status.healthy,
                    "failCount": status.fail_count,
                    "lastFetchSecsAgo": status.last_fetch.map(|t| t.elapsed().as_secs()),
                    "job": template.as_ref().map(|s| json!({
                        "jobId": format!("{:x}", s.job_id),
                        "height": s.height,
                        "powHash": hex::encode(s.pow_hash),
                        "target": s.target.to_hex(),
                    })),
                }
            })
        }
    };

    let mut body = json!({
        "mode": state.config.mode,
        "uptime": uptime,
        "miners": miners,
    });
    if let (Some(object), Some(extra)) = (body.as_object_mut(), upstream.as_object()) {
        for (key, value) in extra {
            object.insert(key.clone(), value.clone());
        }
    }
    Json(body)
}

/// Log a one-line fleet summary periodically.
pub async fn run_summary_logger(state: Arc<ProxyState>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(60));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // Skip the immediate first tick.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let miners = state.miners.len();
        let total_hashrate: f64 = state.miners.iter().map(|m| m.hashrate()).sum();
        let accepted: u64 = state
            .miners
            .iter()
            .map(|m| m.counters.accepted.load(Ordering::Relaxed))
            .sum();
        info!(
            "{} miners, {} accepted shares, ~{}",
            miners,
            accepted,
            format_hashrate(total_hashrate)
        );
    }
}
