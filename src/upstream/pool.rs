//! Pool-mode upstream client
//!
//! Maintains one Stratum connection to the configured pool through a
//! reconnect loop: subscribe, authorize, then relay. Jobs and difficulty
//! flow downstream through the broadcast channel; shares flow upstream
//! through `ShareForward` messages and their responses are routed back to
//! the originating miner by request id.

use crate::config::PoolSettings;
use crate::error::{Error, Result, StratumError};
use crate::stratum::protocol::{
    to_line, StratumMessage, StratumNotification, StratumRequest, StratumResponse,
};
use crate::stratum::session::MinerHandle;
use crate::upstream::{DownstreamEvent, ShareForward};
use crate::core::Target;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info, warn};

/// First reconnect delay.
const RECONNECT_MIN: Duration = Duration::from_secs(2);
/// Reconnect delay ceiling.
const RECONNECT_MAX: Duration = Duration::from_secs(60);
/// First upstream request id; miner-side ids stay below this in practice,
/// which makes the two spaces easy to tell apart in packet dumps.
const FIRST_REQUEST_ID: u64 = 100;

/// Double the delay after each close, capped at the ceiling.
pub fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(RECONNECT_MAX)
}

/// Shared pool-mode state, written only by the pool client task.
#[derive(Debug, Default)]
pub struct PoolState {
    /// Extranonce prefix assigned by the pool; may be empty
    pub extranonce1: Vec<u8>,
    /// Extranonce2 width the pool expects
    pub extranonce2_size: usize,
    /// Last `mining.notify` params, verbatim
    pub current_job: Option<Vec<Value>>,
    /// Last `mining.set_target` value
    pub current_target: Option<Target>,
    /// Last `mining.set_difficulty` value
    pub pool_difficulty: Option<f64>,
    /// True only between authorize success and disconnect
    pub ready: bool,
}

/// Handle the session layer uses to reach the pool client.
#[derive(Debug)]
pub struct PoolHandle {
    /// Pool connection state
    pub state: RwLock<PoolState>,
    /// Queue of shares awaiting upstream relay
    pub forward_tx: mpsc::UnboundedSender<ShareForward>,
}

/// Outstanding upstream request context.
#[derive(Debug, Clone)]
enum PendingRequest {
    Subscribe,
    Authorize,
    Share { miner_id: u32, original_id: Value },
}

/// The pool client; one instance per process in pool mode.
pub struct PoolClient {
    settings: PoolSettings,
    handle: Arc<PoolHandle>,
    events: broadcast::Sender<DownstreamEvent>,
    miners: Arc<DashMap<u32, Arc<MinerHandle>>>,
    request_id: AtomicU64,
    pending: DashMap<u64, PendingRequest>,
}

impl PoolClient {
    /// Create a client bound to the shared state and miner registry.
    pub fn new(
        settings: PoolSettings,
        handle: Arc<PoolHandle>,
        events: broadcast::Sender<DownstreamEvent>,
        miners: Arc<DashMap<u32, Arc<MinerHandle>>>,
    ) -> Self {
        Self {
            settings,
            handle,
            events,
            miners,
            request_id: AtomicU64::new(FIRST_REQUEST_ID),
            pending: DashMap::new(),
        }
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Reconnect loop; runs for the life of the process.
    pub async fn run(self: Arc<Self>, mut forward_rx: mpsc::UnboundedReceiver<ShareForward>) {
        let addr = format!("{}:{}", self.settings.host, self.settings.port);
        let mut backoff = RECONNECT_MIN;

        loop {
            match TcpStream::connect(&addr).await {
                Ok(stream) => {
                    info!("Connected to pool {}", addr);
                    backoff = RECONNECT_MIN;
                    if let Err(e) = self.drive(stream, &mut forward_rx).await {
                        warn!("Pool connection lost: {}", e);
                    }
                }
                Err(e) => {
                    warn!("Pool connect to {} failed: {}", addr, e);
                }
            }

            self.reset_after_disconnect().await;
            info!("Reconnecting to pool in {:?}", backoff);
            tokio::time::sleep(backoff).await;
            backoff = next_backoff(backoff);
        }
    }

    /// Run one established connection until it drops.
    async fn drive(
        &self,
        stream: TcpStream,
        forward_rx: &mut mpsc::UnboundedReceiver<ShareForward>,
    ) -> Result<()> {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "pool".to_string());
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let subscribe_id = self.next_id();
        self.pending.insert(subscribe_id, PendingRequest::Subscribe);
        let subscribe = StratumRequest::new(
            subscribe_id,
            "mining.subscribe",
            vec![json!(format!("ckb-stratum-proxy/{}", crate::VERSION))],
        );
        writer.write_all(to_line(&subscribe)?.as_bytes()).await?;

        // `line` persists across select cancellations so a share forward
        // racing a half-read notification never clips the frame.
        let mut line = String::new();
        loop {
            tokio::select! {
                result = reader.read_line(&mut line) => {
                    match result {
                        Ok(0) => {
                            return Err(Error::Stratum(StratumError::ConnectionClosed {
                                peer,
                            }));
                        }
                        Ok(_) => {
                            let trimmed = line.trim();
                            if !trimmed.is_empty() {
                                match StratumMessage::from_json(trimmed) {
                                    Ok(message) => {
                                        if let Some(request) = self.handle_message(message).await? {
                                            writer.write_all(to_line(&request)?.as_bytes()).await?;
                                        }
                                    }
                                    Err(e) => {
                                        warn!("Discarding malformed pool line: {}", e);
                                    }
                                }
                            }
                            line.clear();
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Some(share) = forward_rx.recv() => {
                    self.forward_share(share, &mut writer).await?;
                }
            }
        }
    }

    /// Relay a share upstream under a fresh request id.
    async fn forward_share(&self, share: ShareForward, writer: &mut OwnedWriteHalf) -> Result<()> {
        let id = self.next_id();
        self.pending.insert(
            id,
            PendingRequest::Share {
                miner_id: share.miner_id,
                original_id: share.original_id,
            },
        );
        let request = StratumRequest::new(
            id,
            "mining.submit",
            vec![
                json!(self.settings.user),
                json!(share.job_id),
                json!(share.extranonce2),
                json!(share.ntime),
                json!(share.nonce),
            ],
        );
        debug!(
            "Forwarding share from miner {} as upstream id {}",
            share.miner_id, id
        );
        writer.write_all(to_line(&request)?.as_bytes()).await?;
        Ok(())
    }

    /// Dispatch one inbound message. Returns a follow-up request to send, if
    /// any (authorize after the subscribe response).
    async fn handle_message(&self, message: StratumMessage) -> Result<Option<StratumRequest>> {
        match message {
            StratumMessage::Response(response) => self.handle_response(response).await,
            StratumMessage::Notification(notification) => {
                self.handle_notification(notification).await;
                Ok(None)
            }
            StratumMessage::Request(request) => {
                debug!("Ignoring pool request {}", request.method);
                Ok(None)
            }
        }
    }

    async fn handle_response(&self, response: StratumResponse) -> Result<Option<StratumRequest>> {
        let Some(id) = response.id.as_u64() else {
            warn!("Pool response with non-numeric id {}", response.id);
            return Ok(None);
        };
        let Some((_, pending)) = self.pending.remove(&id) else {
            warn!("Pool response with unmatched id {}", id);
            return Ok(None);
        };

        match pending {
            PendingRequest::Subscribe => {
                let result = response.result.unwrap_or(Value::Null);
                let (extranonce1, extranonce2_size) = parse_subscribe_result(&result)?;
                info!(
                    "Subscribed to pool: extranonce1={} extranonce2_size={}",
                    hex::encode(&extranonce1),
                    extranonce2_size
                );
                {
                    let mut state = self.handle.state.write().await;
                    state.extranonce1 = extranonce1;
                    state.extranonce2_size = extranonce2_size;
                }

                let authorize_id = self.next_id();
                self.pending.insert(authorize_id, PendingRequest::Authorize);
                Ok(Some(StratumRequest::new(
                    authorize_id,
                    "mining.authorize",
                    vec![json!(self.settings.user), json!(self.settings.pass)],
                )))
            }
            PendingRequest::Authorize => {
                if response.is_ok() {
                    info!("Authorized with pool as {}", self.settings.user);
                    self.handle.state.write().await.ready = true;
                    Ok(None)
                } else {
                    Err(Error::Stratum(StratumError::UpstreamRejected {
                        request: "mining.authorize".to_string(),
                        reason: response
                            .error
                            .map(|e| e.to_string())
                            .unwrap_or_else(|| "unknown".to_string()),
                    }))
                }
            }
            PendingRequest::Share {
                miner_id,
                original_id,
            } => {
                let relayed = StratumResponse {
                    id: original_id,
                    result: response.result,
                    error: response.error,
                };
                if let Some(miner) = self.miners.get(&miner_id) {
                    if relayed.is_ok() {
                        miner.counters.accepted.fetch_add(1, Ordering::Relaxed);
                    } else {
                        miner.counters.rejected.fetch_add(1, Ordering::Relaxed);
                    }
                    miner.send_line(to_line(&relayed)?);
                } else {
                    debug!("Dropping share response for departed miner {}", miner_id);
                }
                Ok(None)
            }
        }
    }

    async fn handle_notification(&self, notification: StratumNotification) {
        match notification.method.as_str() {
            "mining.notify" => {
                self.handle.state.write().await.current_job = Some(notification.params.clone());
                let _ = self.events.send(DownstreamEvent::Notify {
                    params: notification.params,
                });
            }
            "mining.set_target" => {
                if let Some(Value::String(hex_target)) = notification.params.first() {
                    match Target::from_hex(hex_target) {
                        Ok(target) => {
                            self.handle.state.write().await.current_target = Some(target);
                            let _ = self.events.send(DownstreamEvent::SetTarget {
                                params: notification.params,
                            });
                        }
                        Err(e) => warn!("Ignoring bad pool target: {}", e),
                    }
                } else {
                    warn!("Ignoring mining.set_target without a target param");
                }
            }
            "mining.set_difficulty" => {
                if let Some(difficulty) = notification.params.first().and_then(Value::as_f64) {
                    self.handle.state.write().await.pool_difficulty = Some(difficulty);
                    let _ = self.events.send(DownstreamEvent::SetDifficulty { difficulty });
                } else {
                    warn!("Ignoring mining.set_difficulty without a numeric param");
                }
            }
            other => {
                debug!("Ignoring pool notification {}", other);
            }
        }
    }

    /// Drop connection-scoped state: pending shares vanish silently and the
    /// proxy stops advertising readiness until the next authorize.
    async fn reset_after_disconnect(&self) {
        self.pending.clear();
        self.handle.state.write().await.ready = false;
    }
}

/// Parse a `mining.subscribe` result:
/// `[subscriptions, extranonce1_hex, extranonce2_size]`. A null or empty
/// extranonce1 is allowed.
fn parse_subscribe_result(result: &Value) -> Result<(Vec<u8>, usize)> {
    let items = result
        .as_array()
        .ok_or_else(|| Error::stratum("subscribe result is not an array"))?;

    let extranonce1 = match items.get(1) {
        Some(Value::String(hex_str)) => hex::decode(hex_str)
            .map_err(|e| Error::invalid_hex("extranonce1", e.to_string()))?,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            return Err(Error::stratum(format!(
                "unexpected extranonce1 value {}",
                other
            )))
        }
    };

    let extranonce2_size = items
        .get(2)
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::stratum("subscribe result missing extranonce2 size"))?;
    if extranonce2_size == 0 {
        return Err(Error::stratum("pool advertised zero extranonce2 size"));
    }

    Ok((extranonce1, extranonce2_size as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stratum::session::MinerHandle;

    fn test_client() -> (
        Arc<PoolClient>,
        broadcast::Receiver<DownstreamEvent>,
        Arc<DashMap<u32, Arc<MinerHandle>>>,
    ) {
        let settings = PoolSettings {
            host: "pool.example".to_string(),
            port: 3333,
            user: "ckb1qtest.worker".to_string(),
            pass: "x".to_string(),
        };
        let (forward_tx, _forward_rx) = mpsc::unbounded_channel();
        let handle = Arc::new(PoolHandle {
            state: RwLock::new(PoolState::default()),
            forward_tx,
        });
        let (events, events_rx) = broadcast::channel(16);
        let miners = Arc::new(DashMap::new());
        let client = Arc::new(PoolClient::new(settings, handle, events, Arc::clone(&miners)));
        (client, events_rx, miners)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut delay = RECONNECT_MIN;
        assert_eq!(delay, Duration::from_secs(2));
        delay = next_backoff(delay);
        assert_eq!(delay, Duration::from_secs(4));
        delay = next_backoff(delay);
        assert_eq!(delay, Duration::from_secs(8));
        for _ in 0..10 {
            delay = next_backoff(delay);
        }
        assert_eq!(delay, Duration::from_secs(60));
    }

    #[test]
    fn test_parse_subscribe_result() {
        let result = json!([null, "abcd", 4]);
        let (en1, en2_size) = parse_subscribe_result(&result).unwrap();
        assert_eq!(en1, vec![0xab, 0xcd]);
        assert_eq!(en2_size, 4);

        // Null extranonce1 is an empty prefix.
        let result = json!([[], null, 8]);
        let (en1, en2_size) = parse_subscribe_result(&result).unwrap();
        assert!(en1.is_empty());
        assert_eq!(en2_size, 8);

        assert!(parse_subscribe_result(&json!("nope")).is_err());
        assert!(parse_subscribe_result(&json!([null, "abcd", 0])).is_err());
        assert!(parse_subscribe_result(&json!([null, "xyz", 4])).is_err());
    }

    #[tokio::test]
    async fn test_subscribe_response_triggers_authorize() {
        let (client, _events_rx, _miners) = test_client();

        let id = client.next_id();
        client.pending.insert(id, PendingRequest::Subscribe);
        let response = StratumResponse::success(json!(id), json!([null, "beef", 4]));

        let follow_up = client
            .handle_message(StratumMessage::Response(response))
            .await
            .unwrap()
            .expect("authorize request expected");
        assert_eq!(follow_up.method, "mining.authorize");
        assert_eq!(follow_up.params[0], json!("ckb1qtest.worker"));

        let state = client.handle.state.read().await;
        assert_eq!(state.extranonce1, vec![0xbe, 0xef]);
        assert_eq!(state.extranonce2_size, 4);
        assert!(!state.ready);
    }

    #[tokio::test]
    async fn test_authorize_success_marks_ready() {
        let (client, _events_rx, _miners) = test_client();

        let id = client.next_id();
        client.pending.insert(id, PendingRequest::Authorize);
        let response = StratumResponse::success(json!(id), json!(true));
        let follow_up = client
            .handle_message(StratumMessage::Response(response))
            .await
            .unwrap();
        assert!(follow_up.is_none());
        assert!(client.handle.state.read().await.ready);
    }

    #[tokio::test]
    async fn test_share_response_relayed_with_original_id() {
        let (client, _events_rx, miners) = test_client();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let miner = Arc::new(MinerHandle::new(7, "127.0.0.1:1000".parse().unwrap(), tx, 1.0));
        miners.insert(7, Arc::clone(&miner));

        let id = client.next_id();
        client.pending.insert(
            id,
            PendingRequest::Share {
                miner_id: 7,
                original_id: json!(42),
            },
        );
        let response = StratumResponse::success(json!(id), json!(true));
        client
            .handle_message(StratumMessage::Response(response))
            .await
            .unwrap();

        let line = rx.try_recv().expect("miner should receive the relay");
        assert_eq!(line, "{\"id\":42,\"result\":true,\"error\":null}\n");
        assert_eq!(miner.counters.accepted.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_share_response_for_departed_miner_dropped() {
        let (client, _events_rx, _miners) = test_client();

        let id = client.next_id();
        client.pending.insert(
            id,
            PendingRequest::Share {
                miner_id: 99,
                original_id: json!(1),
            },
        );
        let response = StratumResponse::success(json!(id), json!(true));
        // No panic, no error: the entry just disappears.
        client
            .handle_message(StratumMessage::Response(response))
            .await
            .unwrap();
        assert!(client.pending.is_empty());
    }

    #[tokio::test]
    async fn test_unmatched_response_ignored() {
        let (client, _events_rx, _miners) = test_client();
        let response = StratumResponse::success(json!(12345), json!(true));
        let follow_up = client
            .handle_message(StratumMessage::Response(response))
            .await
            .unwrap();
        assert!(follow_up.is_none());
    }

    #[tokio::test]
    async fn test_notify_updates_state_and_broadcasts() {
        let (client, mut events_rx, _miners) = test_client();

        let params = vec![
            json!("1"),
            json!("00".repeat(32)),
            json!(100),
            json!("ff".repeat(32)),
            json!(true),
        ];
        let notification = StratumNotification::new("mining.notify", params.clone());
        client
            .handle_message(StratumMessage::Notification(notification))
            .await
            .unwrap();

        assert_eq!(
            client.handle.state.read().await.current_job,
            Some(params.clone())
        );
        match events_rx.try_recv().unwrap() {
            DownstreamEvent::Notify { params: sent } => assert_eq!(sent, params),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_set_difficulty_broadcast() {
        let (client, mut events_rx, _miners) = test_client();

        let notification = StratumNotification::new("mining.set_difficulty", vec![json!(16.0)]);
        client
            .handle_message(StratumMessage::Notification(notification))
            .await
            .unwrap();

        assert_eq!(
            client.handle.state.read().await.pool_difficulty,
            Some(16.0)
        );
        match events_rx.try_recv().unwrap() {
            DownstreamEvent::SetDifficulty { difficulty } => assert_eq!(difficulty, 16.0),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnect_clears_pending_and_readiness() {
        let (client, _events_rx, _miners) = test_client();
        client.handle.state.write().await.ready = true;
        client.pending.insert(
            500,
            PendingRequest::Share {
                miner_id: 1,
                original_id: json!(9),
            },
        );

        client.reset_after_disconnect().await;
        assert!(client.pending.is_empty());
        assert!(!client.handle.state.read().await.ready);
    }
}
