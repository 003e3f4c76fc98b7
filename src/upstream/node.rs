//! Solo-mode node client
//!
//! Polls `get_block_template` on the local CKB node, tracks template
//! identity by `(work_id, parent_hash)`, and submits assembled blocks when a
//! share meets the network target. The header fields that fed `pow_hash` are
//! captured at job creation so a submitted block always hashes to the value
//! miners actually ground on, even after `current_time` refreshes.

use crate::core::header::{parse_byte32, parse_hex_u32, parse_hex_u64, Epoch, RawHeader};
use crate::core::pow::nonce_to_hex;
use crate::core::Target;
use crate::error::{Error, NodeError, Result};
use crate::upstream::DownstreamEvent;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

/// Template poll cadence.
const POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Per-request RPC deadline.
const RPC_TIMEOUT: Duration = Duration::from_secs(8);
/// Staleness watchdog cadence.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(60);
/// Age after which the watchdog complains about the last template.
const STALE_AFTER: Duration = Duration::from_secs(300);
/// After the first failure, log every Nth repeat.
const FAIL_LOG_EVERY: u64 = 30;

/// JSON-RPC 2.0 client for the CKB node.
pub struct NodeClient {
    http: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl NodeClient {
    /// Create a client for `http://host:port/`.
    pub fn new(host: &str, port: u16) -> Result<Self> {
        Self::with_url(format!("http://{}:{}/", host, port))
    }

    /// Create a client for an explicit URL.
    pub fn with_url(url: String) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(RPC_TIMEOUT).build()?;
        Ok(Self {
            http,
            url,
            next_id: AtomicU64::new(1),
        })
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "id": id,
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::node_rpc(method, e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::node_rpc(
                method,
                format!("HTTP {}", response.status()),
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::node_rpc(method, e.to_string()))?;

        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            return Err(Error::Node(NodeError::RpcError {
                method: method.to_string(),
                code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            }));
        }

        body.get("result")
            .cloned()
            .ok_or_else(|| Error::node_rpc(method, "response missing result"))
    }

    /// Fetch the current block template.
    pub async fn get_block_template(&self) -> Result<Value> {
        self.rpc("get_block_template", json!([null, null, null]))
            .await
    }

    /// Submit an assembled block for the given work id.
    pub async fn submit_block(&self, work_id: &Value, block: Value) -> Result<Value> {
        self.rpc("submit_block", json!([work_id, block])).await
    }
}

/// The active solo job derived from the last accepted template.
#[derive(Debug, Clone)]
pub struct TemplateState {
    /// The raw template, kept opaque; `current_time` is refreshed in place
    /// between job changes
    pub template: Value,
    /// Node work id, passed back verbatim on submit
    pub work_id: Value,
    /// Parent hash string, part of the template identity
    pub parent_hash: String,
    /// Header fields captured at job creation; the timestamp here is frozen
    /// so submitted blocks match the pow_hash miners received
    pub header: RawHeader,
    /// Blake2b-ckb of the packed header
    pub pow_hash: [u8; 32],
    /// Network target decoded from compact_target
    pub target: Target,
    /// Wrapping job counter, bumped only on template identity change
    pub job_id: u32,
    /// Block height
    pub height: u64,
}

/// Node liveness bookkeeping, written by the poll loop.
#[derive(Debug)]
pub struct NodeStatus {
    /// False after any failure until the next success
    pub healthy: bool,
    /// Consecutive failures
    pub fail_count: u64,
    /// Monotonic time of the last successful poll
    pub last_fetch: Option<Instant>,
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self {
            healthy: true,
            fail_count: 0,
            last_fetch: None,
        }
    }
}

/// Shared solo-mode state handed to the session layer.
pub struct SoloHandle {
    /// Active job, if a template has been accepted
    pub template: RwLock<Option<TemplateState>>,
    /// Poll-loop health
    pub status: RwLock<NodeStatus>,
    /// RPC client, also used by the session layer for block submission
    pub client: NodeClient,
}

impl SoloHandle {
    /// Wrap a client with empty state.
    pub fn new(client: NodeClient) -> Self {
        Self {
            template: RwLock::new(None),
            status: RwLock::new(NodeStatus::default()),
            client,
        }
    }

    /// Process one successful template fetch.
    pub async fn accept_template(
        &self,
        template: Value,
        events: &broadcast::Sender<DownstreamEvent>,
    ) {
        {
            let mut status = self.status.write().await;
            if !status.healthy {
                info!("Node recovered after {} failed polls", status.fail_count);
            }
            status.healthy = true;
            status.fail_count = 0;
            status.last_fetch = Some(Instant::now());
        }

        let Some(work_id) = template.get("work_id").cloned() else {
            warn!("Rejecting template without work_id");
            return;
        };
        let Some(parent_hash) = template.get("parent_hash").and_then(Value::as_str) else {
            warn!("Rejecting template without parent_hash");
            return;
        };
        let parent_hash = parent_hash.to_string();

        let mut guard = self.template.write().await;
        let unchanged = matches!(
            guard.as_ref(),
            Some(current) if current.work_id == work_id && current.parent_hash == parent_hash
        );

        if unchanged {
            // Same job: refresh current_time in place, no broadcast.
            if let Some(time) = template.get("current_time").cloned() {
                if let Some(current) = guard.as_mut() {
                    current.template["current_time"] = time;
                }
            }
            debug!("Template unchanged (work_id {})", work_id);
            return;
        }

        let clean = guard
            .as_ref()
            .map(|state| state.parent_hash != parent_hash)
            .unwrap_or(true);
        let next_job_id = guard
            .as_ref()
            .map(|state| state.job_id.wrapping_add(1))
            .unwrap_or(0);
        match template_to_state(template, next_job_id) {
            Ok(state) => {
                let epoch = Epoch::from_raw(state.header.epoch);
                info!(
                    "New job {:x} at height {} (epoch {} block {}/{}, target {})",
                    state.job_id, state.height, epoch.number, epoch.index, epoch.length, state.target
                );
                let params = notify_params(&state, clean);
                *guard = Some(state);
                drop(guard);
                let _ = events.send(DownstreamEvent::Notify { params });
            }
            Err(e) => {
                warn!("Rejecting malformed template: {}", e);
            }
        }
    }

    /// Count a failed poll. The first failure flips the health flag; later
    /// ones log every `FAIL_LOG_EVERY` attempts.
    pub async fn record_failure(&self, error: &Error) {
        let mut status = self.status.write().await;
        status.fail_count += 1;
        if status.fail_count == 1 {
            status.healthy = false;
            warn!("Node poll failed: {}", error);
        } else if status.fail_count % FAIL_LOG_EVERY == 0 {
            warn!(
                "Node still failing after {} attempts: {}",
                status.fail_count, error
            );
        }
    }

    /// Submit the block for a nonce that met the network target, then force
    /// a clean-job broadcast so miners drop the exhausted work.
    pub async fn submit_found_block(
        &self,
        nonce: u128,
        events: &broadcast::Sender<DownstreamEvent>,
    ) {
        let (work_id, block) = {
            let guard = self.template.read().await;
            let Some(state) = guard.as_ref() else {
                warn!("Share met network target but no template is active");
                return;
            };
            (state.work_id.clone(), build_block(state, nonce))
        };

        match self.client.submit_block(&work_id, block).await {
            Ok(result) => {
                info!("Block accepted by node: {}", result);
                let guard = self.template.read().await;
                if let Some(state) = guard.as_ref() {
                    let _ = events.send(DownstreamEvent::Notify {
                        params: notify_params(state, true),
                    });
                }
            }
            Err(e) => {
                // Miners stay connected; the next template supersedes this.
                warn!("Block submission rejected: {}", e);
            }
        }
    }
}

/// Parse a template into an active job.
pub fn template_to_state(template: Value, job_id: u32) -> Result<TemplateState> {
    let field = |name: &str| -> Result<&str> {
        template
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::bad_template(format!("missing field {}", name)))
    };

    let work_id = template
        .get("work_id")
        .cloned()
        .ok_or_else(|| Error::bad_template("missing field work_id"))?;
    let parent_hash = field("parent_hash")?.to_string();

    // Older node releases call the uncles digest `uncles_hash`, newer ones
    // `extra_hash`; accept either.
    let extra_hash_value = template
        .get("uncles_hash")
        .or_else(|| template.get("extra_hash"))
        .and_then(Value::as_str)
        .ok_or_else(|| Error::bad_template("missing field uncles_hash"))?;

    let header = RawHeader {
        version: parse_hex_u32("version", field("version")?)?,
        compact_target: parse_hex_u32("compact_target", field("compact_target")?)?,
        timestamp: parse_hex_u64("current_time", field("current_time")?)?,
        number: parse_hex_u64("number", field("number")?)?,
        epoch: parse_hex_u64("epoch", field("epoch")?)?,
        parent_hash: parse_byte32("parent_hash", &parent_hash)?,
        transactions_root: parse_byte32("transactions_root", field("transactions_root")?)?,
        proposals_hash: parse_byte32("proposals_hash", field("proposals_hash")?)?,
        extra_hash: parse_byte32("uncles_hash", extra_hash_value)?,
        dao: parse_byte32("dao", field("dao")?)?,
    };

    let pow_hash = header.pow_hash();
    let target = Target::from_compact(header.compact_target);
    let height = header.number;

    Ok(TemplateState {
        template,
        work_id,
        parent_hash,
        header,
        pow_hash,
        target,
        job_id,
        height,
    })
}

/// Build the five-parameter ViaBTC notify tuple for a job.
pub fn notify_params(state: &TemplateState, clean: bool) -> Vec<Value> {
    vec![
        json!(format!("{:x}", state.job_id)),
        json!(hex::encode(state.pow_hash)),
        json!(state.height),
        json!(state.target.to_hex()),
        json!(clean),
    ]
}

/// Assemble the block payload for `submit_block`. The header mirrors the
/// captured raw header plus the nonce; uncles, transactions and proposals
/// come from the template (template transaction objects contribute their
/// `data` member, cellbase first).
pub fn build_block(state: &TemplateState, nonce: u128) -> Value {
    let header = &state.header;
    let byte32 = |bytes: &[u8; 32]| format!("0x{}", hex::encode(bytes));

    let mut transactions = Vec::new();
    if let Some(cellbase) = state.template.get("cellbase") {
        transactions.push(unwrap_template_tx(cellbase));
    }
    if let Some(list) = state.template.get("transactions").and_then(Value::as_array) {
        transactions.extend(list.iter().map(unwrap_template_tx));
    }

    json!({
        "header": {
            "version": format!("0x{:x}", header.version),
            "compact_target": format!("0x{:x}", header.compact_target),
            "timestamp": format!("0x{:x}", header.timestamp),
            "number": format!("0x{:x}", header.number),
            "epoch": format!("0x{:x}", header.epoch),
            "parent_hash": byte32(&header.parent_hash),
            "transactions_root": byte32(&header.transactions_root),
            "proposals_hash": byte32(&header.proposals_hash),
            "extra_hash": byte32(&header.extra_hash),
            "dao": byte32(&header.dao),
            "nonce": format!("0x{}", nonce_to_hex(nonce)),
        },
        "uncles": state.template.get("uncles").cloned().unwrap_or_else(|| json!([])),
        "transactions": transactions,
        "proposals": state.template.get("proposals").cloned().unwrap_or_else(|| json!([])),
    })
}

fn unwrap_template_tx(value: &Value) -> Value {
    value.get("data").cloned().unwrap_or_else(|| value.clone())
}

/// Poll `get_block_template` forever.
pub async fn run_poller(handle: Arc<SoloHandle>, events: broadcast::Sender<DownstreamEvent>) {
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        match handle.client.get_block_template().await {
            Ok(template) => handle.accept_template(template, &events).await,
            Err(e) => handle.record_failure(&e).await,
        }
    }
}

/// Complain periodically when templates stop arriving.
pub async fn run_watchdog(handle: Arc<SoloHandle>) {
    let start = tokio::time::Instant::now() + WATCHDOG_INTERVAL;
    let mut ticker = tokio::time::interval_at(start, WATCHDOG_INTERVAL);

    loop {
        ticker.tick().await;
        let status = handle.status.read().await;
        match status.last_fetch {
            Some(last) if last.elapsed() > STALE_AFTER => {
                warn!(
                    "No successful template fetch for {}s",
                    last.elapsed().as_secs()
                );
            }
            None => {
                warn!("No successful template fetch since startup");
            }
            _ => {}
        }
    }
}
