//! Pool-mode end-to-end tests: a scripted fake pool on one side, a raw TCP
//! miner on the other, the proxy in between.

use ckb_stratum_proxy::config::{Config, Mode, PoolSettings};
use ckb_stratum_proxy::stratum::server::{serve, ProxyState, UpstreamHandle};
use ckb_stratum_proxy::upstream::pool::{PoolClient, PoolHandle, PoolState};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::timeout;

async fn start_proxy(pool_addr: SocketAddr) -> (SocketAddr, Arc<ProxyState>, Arc<PoolHandle>) {
    let mut config = Config::default();
    config.mode = Mode::Pool;
    config.pool = Some(PoolSettings {
        host: pool_addr.ip().to_string(),
        port: pool_addr.port(),
        user: "proxyuser.1".to_string(),
        pass: "x".to_string(),
    });
    config.validate().unwrap();

    let (events, _) = broadcast::channel(64);
    let (forward_tx, forward_rx) = mpsc::unbounded_channel();
    let handle = Arc::new(PoolHandle {
        state: RwLock::new(PoolState::default()),
        forward_tx,
    });
    let state = Arc::new(ProxyState::new(
        config.clone(),
        UpstreamHandle::Pool(Arc::clone(&handle)),
        events.clone(),
    ));

    let client = Arc::new(PoolClient::new(
        config.pool.clone().unwrap(),
        Arc::clone(&handle),
        events,
        Arc::clone(&state.miners),
    ));
    tokio::spawn(client.run(forward_rx));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, Arc::clone(&state)));
    (addr, state, handle)
}

async fn wait_until_ready(handle: &PoolHandle) {
    timeout(Duration::from_secs(5), async {
        loop {
            if handle.state.read().await.ready {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("pool client never became ready");
}

async fn read_json(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> Value {
    let mut line = String::new();
    timeout(Duration::from_secs(5), reader.read_line(&mut line))
        .await
        .expect("read timed out")
        .expect("read failed");
    assert!(!line.is_empty(), "peer closed the connection");
    serde_json::from_str(line.trim()).unwrap()
}

async fn write_json(writer: &mut tokio::net::tcp::OwnedWriteHalf, value: Value) {
    let mut line = value.to_string();
    line.push('\n');
    writer.write_all(line.as_bytes()).await.unwrap();
}

#[tokio::test]
async fn share_forwarding_roundtrip() {
    let pool_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let pool_addr = pool_listener.local_addr().unwrap();

    // The scripted pool: subscribe -> authorize -> one submit, then a job
    // notification. The captured submit goes back to the test for asserts.
    let (submit_tx, submit_rx) = oneshot::channel::<Value>();
    tokio::spawn(async move {
        let (stream, _) = pool_listener.accept().await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let subscribe = read_json(&mut reader).await;
        assert_eq!(subscribe["method"], json!("mining.subscribe"));
        write_json(
            &mut writer,
            json!({"id": subscribe["id"], "result": [null, "c0ffee", 4], "error": null}),
        )
        .await;

        let authorize = read_json(&mut reader).await;
        assert_eq!(authorize["method"], json!("mining.authorize"));
        write_json(
            &mut writer,
            json!({"id": authorize["id"], "result": true, "error": null}),
        )
        .await;

        let submit = read_json(&mut reader).await;
        write_json(
            &mut writer,
            json!({"id": submit["id"], "result": true, "error": null}),
        )
        .await;
        let _ = submit_tx.send(submit);

        // Push a job so the relay path gets exercised too.
        write_json(
            &mut writer,
            json!({
                "id": null,
                "method": "mining.notify",
                "params": ["j1", "ab".repeat(32), 42, "cd".repeat(32), true]
            }),
        )
        .await;

        // Hold the connection open for the rest of the test.
        tokio::time::sleep(Duration::from_secs(60)).await;
    });

    let (proxy_addr, _state, handle) = start_proxy(pool_addr).await;
    wait_until_ready(&handle).await;

    // Miner side.
    let stream = TcpStream::connect(proxy_addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    // Subscribe: extranonce1 is the pool prefix plus this miner's id byte,
    // and the miner keeps one byte less of extranonce2.
    write_json(
        &mut writer,
        json!({"id": 1, "method": "mining.subscribe", "params": []}),
    )
    .await;
    let reply = read_json(&mut reader).await;
    assert_eq!(reply["id"], json!(1));
    assert_eq!(reply["result"][1], json!("c0ffee00"));
    assert_eq!(reply["result"][2], json!(3));

    write_json(
        &mut writer,
        json!({"id": 2, "method": "mining.authorize", "params": ["rig7", "pw"]}),
    )
    .await;
    let reply = read_json(&mut reader).await;
    assert_eq!(reply["id"], json!(2));
    assert_eq!(reply["result"], json!(true));

    // Submit: the proxy must prepend the id byte to extranonce2, swap in
    // the configured pool user, and answer with the miner's original id.
    write_json(
        &mut writer,
        json!({
            "id": 77,
            "method": "mining.submit",
            "params": ["rig7", "j1", "aa", "1a2b3c", "00000000000000000000000000001234"]
        }),
    )
    .await;

    let forwarded = timeout(Duration::from_secs(5), submit_rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(forwarded["method"], json!("mining.submit"));
    let params = forwarded["params"].as_array().unwrap();
    assert_eq!(params[0], json!("proxyuser.1"));
    assert_eq!(params[1], json!("j1"));
    assert_eq!(params[2], json!("00aa"));
    assert_eq!(params[3], json!("1a2b3c"));
    assert_eq!(params[4], json!("00000000000000000000000000001234"));
    // Upstream ids start at 100, well clear of miner request ids.
    assert!(forwarded["id"].as_u64().unwrap() >= 100);

    // The share ack (correlation path) and the job notification (broadcast
    // path) race each other; accept either order.
    let first = read_json(&mut reader).await;
    let second = read_json(&mut reader).await;
    let (reply, notify) = if first.get("method").is_some() {
        (second, first)
    } else {
        (first, second)
    };

    assert_eq!(reply["id"], json!(77));
    assert_eq!(reply["result"], json!(true));
    assert_eq!(reply["error"], json!(null));

    // The pool's job notification reaches the authorized miner verbatim.
    assert_eq!(notify["method"], json!("mining.notify"));
    assert_eq!(notify["params"][0], json!("j1"));
    assert_eq!(notify["params"][4], json!(true));
}

#[tokio::test]
async fn subscribe_before_pool_ready_is_rejected() {
    // Point the proxy at a dead pool address.
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead.local_addr().unwrap();
    drop(dead);

    let (proxy_addr, _state, _handle) = start_proxy(dead_addr).await;

    let stream = TcpStream::connect(proxy_addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    write_json(
        &mut writer,
        json!({"id": 1, "method": "mining.subscribe", "params": []}),
    )
    .await;
    let reply = read_json(&mut reader).await;
    assert_eq!(reply["id"], json!(1));
    assert_eq!(reply["result"], json!(false));
    assert_eq!(reply["error"][0], json!(20));
}

#[tokio::test]
async fn proxy_reconnects_after_pool_close() {
    let pool_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let pool_addr = pool_listener.local_addr().unwrap();

    let (reconnected_tx, reconnected_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        // First connection: drop it immediately.
        let (stream, _) = pool_listener.accept().await.unwrap();
        drop(stream);
        // Second connection proves the backoff loop fired.
        let (_stream, _) = pool_listener.accept().await.unwrap();
        let _ = reconnected_tx.send(());
        tokio::time::sleep(Duration::from_secs(60)).await;
    });

    let (_proxy_addr, _state, _handle) = start_proxy(pool_addr).await;

    // First retry is scheduled 2 s after the close; allow generous slack.
    timeout(Duration::from_secs(15), reconnected_rx)
        .await
        .expect("proxy never reconnected")
        .unwrap();
}
