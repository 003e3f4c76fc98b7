//! Miner-facing Stratum server
//!
//! One task per connection. Each inbound line is handled to completion and
//! its responses written in arrival order; job broadcasts are drained ahead
//! of new inbound lines so every authorized miner sees a new job before its
//! next submit is processed.

use crate::config::Config;
use crate::core::Target;
use crate::error::{Error, Result, StratumError};
use crate::stratum::protocol::{
    to_line, StratumMessage, StratumNotification, StratumRequest, StratumResponse, StratumMethod,
    ERR_LOW_DIFFICULTY, ERR_NO_JOB,
};
use crate::stratum::session::{
    evaluate_share, extranonce1_for, rewrite_extranonce2, session_id_from_params, MinerHandle,
    ShareOutcome,
};
use crate::stratum::vardiff::Vardiff;
use crate::upstream::node::{notify_params, SoloHandle};
use crate::upstream::pool::PoolHandle;
use crate::upstream::{DownstreamEvent, ShareForward};
use dashmap::DashMap;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// The active upstream driver.
pub enum UpstreamHandle {
    /// Pool mode: relay through the pool client
    Pool(Arc<PoolHandle>),
    /// Solo mode: validate locally against the node template
    Solo(Arc<SoloHandle>),
}

/// Process-wide proxy state shared between the listener, the upstream
/// driver and the stats surface.
pub struct ProxyState {
    /// Effective configuration
    pub config: Config,
    /// Connected miners by id
    pub miners: Arc<DashMap<u32, Arc<MinerHandle>>>,
    /// Downstream event fan-out
    pub events: broadcast::Sender<DownstreamEvent>,
    /// Mode-specific upstream handle
    pub upstream: UpstreamHandle,
    /// Process start, for uptime reporting
    pub started_at: Instant,
    next_miner_id: AtomicU32,
}

impl ProxyState {
    /// Assemble the shared state.
    pub fn new(
        config: Config,
        upstream: UpstreamHandle,
        events: broadcast::Sender<DownstreamEvent>,
    ) -> Self {
        Self {
            config,
            miners: Arc::new(DashMap::new()),
            events,
            upstream,
            started_at: Instant::now(),
            next_miner_id: AtomicU32::new(0),
        }
    }

    fn allocate_miner_id(&self) -> u32 {
        let id = self.next_miner_id.fetch_add(1, Ordering::Relaxed);
        if id == 256 {
            // The extranonce suffix is a single byte; ids past 255 reuse
            // suffixes and overlap nonce space.
            warn!("More than 256 miners connected since startup; extranonce suffixes now repeat");
        }
        id
    }
}

/// Bind the configured address and accept miner connections forever. A bind
/// failure is fatal and propagates to the caller.
pub async fn run_listener(state: Arc<ProxyState>) -> Result<()> {
    let addr = format!("{}:{}", state.config.local.host, state.config.local.port);
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        Error::Stratum(StratumError::ServerBindingFailed {
            address: addr.clone(),
            reason: e.to_string(),
        })
    })?;
    info!("Stratum server listening on {}", addr);
    serve(listener, state).await
}

/// Accept connections on an already-bound listener.
pub async fn serve(listener: TcpListener, state: Arc<ProxyState>) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(state, stream, peer).await {
                        debug!("Miner {} session ended: {}", peer, e);
                    }
                });
            }
            Err(e) => {
                warn!("Accept failed: {}", e);
            }
        }
    }
}

/// Per-connection session context.
struct SessionCtx {
    state: Arc<ProxyState>,
    miner: Arc<MinerHandle>,
    subscribed: bool,
    vardiff: Vardiff,
    local_target: Target,
}

/// Drive one miner connection to completion.
async fn handle_connection(
    state: Arc<ProxyState>,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<()> {
    let id = state.allocate_miner_id();
    info!("Miner {} connected from {}", id, peer);

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let miner = Arc::new(MinerHandle::new(
        id,
        peer,
        outbound_tx,
        state.config.vardiff.initial_diff,
    ));
    state.miners.insert(id, Arc::clone(&miner));

    let mut events_rx = state.events.subscribe();
    let vardiff = Vardiff::new(&state.config.vardiff, Instant::now());
    let local_target = Target::from_difficulty(vardiff.current_diff());
    let mut ctx = SessionCtx {
        state: Arc::clone(&state),
        miner: Arc::clone(&miner),
        subscribed: false,
        vardiff,
        local_target,
    };

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    // `line` accumulates across select cancellations: read_line keeps what
    // it already copied, so a job broadcast mid-read never corrupts a frame.
    let result = loop {
        tokio::select! {
            biased;

            event = events_rx.recv() => {
                match event {
                    Ok(event) => {
                        if ctx.subscribed && miner.authorized.load(Ordering::Relaxed) {
                            if let Some(frame) = render_event(&event) {
                                if let Err(e) = writer.write_all(frame.as_bytes()).await {
                                    break Err(e.into());
                                }
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Miner {} lagged {} broadcasts", id, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {}
                }
            }

            Some(frame) = outbound_rx.recv() => {
                if let Err(e) = writer.write_all(frame.as_bytes()).await {
                    break Err(e.into());
                }
            }

            read = reader.read_line(&mut line) => {
                match read {
                    Ok(0) => break Ok(()),
                    Ok(_) => {
                        let trimmed = line.trim();
                        let mut write_error = None;
                        if !trimmed.is_empty() {
                            match StratumMessage::from_json(trimmed) {
                                Ok(StratumMessage::Request(request)) => {
                                    let frames = ctx.handle_request(request).await;
                                    for frame in frames {
                                        if let Err(e) = writer.write_all(frame.as_bytes()).await {
                                            write_error = Some(e);
                                            break;
                                        }
                                    }
                                }
                                Ok(_) => {
                                    debug!("Ignoring non-request message from miner {}", id);
                                }
                                Err(e) => {
                                    // Bad line: drop it, keep the connection.
                                    warn!("Miner {} sent malformed line: {}", id, e);
                                }
                            }
                        }
                        line.clear();
                        if let Some(e) = write_error {
                            break Err(e.into());
                        }
                    }
                    Err(e) => break Err(e.into()),
                }
            }
        }
    };

    state.miners.remove(&id);
    info!("Miner {} disconnected", id);
    result
}

/// Render a downstream event to a wire frame.
fn render_event(event: &DownstreamEvent) -> Option<String> {
    let notification = match event {
        DownstreamEvent::Notify { params } => {
            StratumNotification::new("mining.notify", params.clone())
        }
        DownstreamEvent::SetTarget { params } => {
            StratumNotification::new("mining.set_target", params.clone())
        }
        DownstreamEvent::SetDifficulty { difficulty } => {
            StratumNotification::new("mining.set_difficulty", vec![json!(difficulty)])
        }
    };
    to_line(&notification).ok()
}

impl SessionCtx {
    /// Handle one request, returning the frames to write in order. Frames
    /// for asynchronous replies (pool-relayed shares) arrive later through
    /// the miner's outbound queue instead.
    async fn handle_request(&mut self, request: StratumRequest) -> Vec<String> {
        match request.method_enum() {
            StratumMethod::Subscribe => self.handle_subscribe(request).await,
            StratumMethod::Authorize => self.handle_authorize(request).await,
            StratumMethod::Submit => self.handle_submit(request).await,
            StratumMethod::GetTransactions => {
                frames(vec![StratumResponse::success(request.id, json!([]))])
            }
            StratumMethod::ExtranonceSubscribe
            | StratumMethod::SuggestDifficulty
            | StratumMethod::SuggestTarget => {
                frames(vec![StratumResponse::success(request.id, json!(true))])
            }
            other => {
                debug!(
                    "Miner {} called unsupported method {}",
                    self.miner.id,
                    other.as_str()
                );
                frames(vec![StratumResponse::error(
                    request.id,
                    ERR_NO_JOB,
                    "Method not supported",
                )])
            }
        }
    }

    async fn handle_subscribe(&mut self, request: StratumRequest) -> Vec<String> {
        self.subscribed = true;

        match &self.state.upstream {
            UpstreamHandle::Pool(pool) => {
                let state = pool.state.read().await;
                if state.extranonce2_size == 0 {
                    return frames(vec![StratumResponse::error(
                        request.id,
                        ERR_NO_JOB,
                        "Pool not ready",
                    )]);
                }
                let extranonce1 = extranonce1_for(&state.extranonce1, self.miner.id);
                let extranonce2_size = (state.extranonce2_size - 1).max(1);
                frames(vec![StratumResponse::success(
                    request.id,
                    json!([null, extranonce1, extranonce2_size]),
                )])
            }
            UpstreamHandle::Solo(_) => {
                // Goldshell-style session-resume triple.
                let session_id = session_id_from_params(&request.params);
                frames(vec![StratumResponse::success(
                    request.id,
                    json!([
                        [
                            ["mining.set_difficulty", session_id],
                            ["mining.notify", session_id]
                        ],
                        session_id,
                        4
                    ]),
                )])
            }
        }
    }

    async fn handle_authorize(&mut self, request: StratumRequest) -> Vec<String> {
        let worker = request
            .params
            .first()
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        info!("Miner {} authorized as {}", self.miner.id, worker);
        *self.miner.worker.write() = Some(worker);
        self.miner.authorized.store(true, Ordering::Relaxed);

        let mut out = vec![to_line(&StratumResponse::success(request.id, json!(true)))];

        // Push the current difficulty, target and job so the miner starts
        // working without waiting for the next broadcast.
        match &self.state.upstream {
            UpstreamHandle::Solo(solo) => {
                let difficulty = self.vardiff.current_diff();
                out.push(to_line(&StratumNotification::new(
                    "mining.set_difficulty",
                    vec![json!(difficulty)],
                )));
                out.push(to_line(&StratumNotification::new(
                    "mining.set_target",
                    vec![json!(self.local_target.to_hex())],
                )));
                if let Some(state) = solo.template.read().await.as_ref() {
                    out.push(to_line(&StratumNotification::new(
                        "mining.notify",
                        notify_params(state, true),
                    )));
                }
            }
            UpstreamHandle::Pool(pool) => {
                let state = pool.state.read().await;
                if let Some(difficulty) = state.pool_difficulty {
                    out.push(to_line(&StratumNotification::new(
                        "mining.set_difficulty",
                        vec![json!(difficulty)],
                    )));
                }
                if let Some(target) = state.current_target {
                    out.push(to_line(&StratumNotification::new(
                        "mining.set_target",
                        vec![json!(target.to_hex())],
                    )));
                }
                if let Some(job) = &state.current_job {
                    out.push(to_line(&StratumNotification::new(
                        "mining.notify",
                        job.clone(),
                    )));
                }
            }
        }

        out.into_iter().flatten().collect()
    }

    async fn handle_submit(&mut self, request: StratumRequest) -> Vec<String> {
        self.miner
            .counters
            .submitted
            .fetch_add(1, Ordering::Relaxed);

        let params: Vec<&str> = request
            .params
            .iter()
            .take(5)
            .filter_map(Value::as_str)
            .collect();
        if params.len() < 5 {
            self.miner.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return frames(vec![StratumResponse::error(
                request.id,
                ERR_NO_JOB,
                "Invalid submit parameters",
            )]);
        }
        let (_worker, job_id, extranonce2, ntime, nonce) =
            (params[0], params[1], params[2], params[3], params[4]);

        match &self.state.upstream {
            UpstreamHandle::Pool(pool) => {
                if !pool.state.read().await.ready {
                    self.miner.counters.rejected.fetch_add(1, Ordering::Relaxed);
                    return frames(vec![StratumResponse::error(
                        request.id,
                        ERR_NO_JOB,
                        "No job",
                    )]);
                }
                let forward = ShareForward {
                    miner_id: self.miner.id,
                    original_id: request.id.clone(),
                    job_id: job_id.to_string(),
                    extranonce2: rewrite_extranonce2(self.miner.id, extranonce2),
                    ntime: ntime.to_string(),
                    nonce: nonce.to_string(),
                };
                if pool.forward_tx.send(forward).is_err() {
                    self.miner.counters.rejected.fetch_add(1, Ordering::Relaxed);
                    return frames(vec![StratumResponse::error(
                        request.id,
                        ERR_NO_JOB,
                        "Upstream unavailable",
                    )]);
                }
                // The reply comes through the correlation path once the pool
                // answers.
                Vec::new()
            }
            UpstreamHandle::Solo(solo) => {
                self.handle_solo_submit(request.id, job_id, nonce, Arc::clone(solo))
                    .await
            }
        }
    }

    async fn handle_solo_submit(
        &mut self,
        request_id: Value,
        job_id_hex: &str,
        nonce_hex: &str,
        solo: Arc<SoloHandle>,
    ) -> Vec<String> {
        let template = solo.template.read().await;
        let Some(state) = template.as_ref() else {
            self.miner.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return frames(vec![StratumResponse::error(request_id, ERR_NO_JOB, "No job")]);
        };

        let submitted_job = u32::from_str_radix(job_id_hex.trim_start_matches("0x"), 16);
        let nonce = crate::core::pow::parse_nonce(nonce_hex);
        let (Ok(submitted_job), Some(nonce)) = (submitted_job, nonce) else {
            self.miner.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return frames(vec![StratumResponse::error(
                request_id,
                ERR_NO_JOB,
                "Invalid submit parameters",
            )]);
        };

        let outcome = evaluate_share(
            state.job_id,
            submitted_job,
            &state.pow_hash,
            nonce,
            &self.local_target,
            &state.target,
        );
        let current_job = state.job_id;
        drop(template);

        let mut out = Vec::new();
        match outcome {
            ShareOutcome::StaleAck => {
                // Acknowledged to pacify replaying miners; counts as
                // accepted, matching the original behavior.
                self.miner.counters.accepted.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Miner {} submitted stale job {:x} (current {:x})",
                    self.miner.id, submitted_job, current_job
                );
                out.push(to_line(&StratumResponse::success(request_id, json!(true))));
            }
            ShareOutcome::LowDifficulty => {
                self.miner.counters.rejected.fetch_add(1, Ordering::Relaxed);
                out.push(to_line(&StratumResponse::error(
                    request_id,
                    ERR_LOW_DIFFICULTY,
                    "Low difficulty share",
                )));
            }
            ShareOutcome::Accepted { meets_network } => {
                self.miner.counters.accepted.fetch_add(1, Ordering::Relaxed);
                self.vardiff.record_share();
                if meets_network {
                    info!(
                        "Miner {} found a block candidate (job {:x})",
                        self.miner.id, current_job
                    );
                    let events = self.state.events.clone();
                    tokio::spawn(async move {
                        solo.submit_found_block(nonce, &events).await;
                    });
                } else {
                    self.miner
                        .counters
                        .local_only
                        .fetch_add(1, Ordering::Relaxed);
                }
                out.push(to_line(&StratumResponse::success(request_id, json!(true))));
            }
        }

        // Retarget runs on every submission once the interval elapsed.
        if let Some(new_diff) = self
            .vardiff
            .maybe_retarget(&self.state.config.vardiff, Instant::now())
        {
            info!(
                "Miner {} difficulty {} -> {}",
                self.miner.id,
                self.miner.difficulty(),
                new_diff
            );
            self.miner.set_difficulty(new_diff);
            self.local_target = Target::from_difficulty(new_diff);
            out.push(to_line(&StratumNotification::new(
                "mining.set_target",
                vec![json!(self.local_target.to_hex())],
            )));
            out.push(to_line(&StratumNotification::new(
                "mining.set_difficulty",
                vec![json!(new_diff)],
            )));
        }

        out.into_iter().flatten().collect()
    }
}

/// Serialize responses into frames, dropping any that fail to encode.
fn frames(responses: Vec<StratumResponse>) -> Vec<String> {
    responses.iter().filter_map(|r| to_line(r).ok()).collect()
}
