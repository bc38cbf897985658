//! End-to-end tests for the link against a fake daemon on a real Unix socket.
//!
//! The fake daemon accepts one connection at a time, forwards every request
//! it reads to the test, and writes whatever the test tells it to.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::path::PathBuf;
use std::time::Duration;

use lnm_core::{ConnectionConfig, ConnectionState, NodeAddress, RpcError};
use lnm_link::{LinkBuilder, LinkConfig, LinkError, LinkEvent, LinkHandle};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

/// Upper bound on waiting for anything the link should do promptly.
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Fake Daemon
// ============================================================================

enum Output {
    Raw(String),
    HangUp,
}

struct FakeDaemon {
    socket_path: PathBuf,
    requests: mpsc::UnboundedReceiver<Value>,
    output: mpsc::UnboundedSender<Output>,
    cancel: CancellationToken,
    _temp_dir: TempDir,
}

impl FakeDaemon {
    fn start() -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let socket_path = temp_dir.path().join("lightning-rpc");
        let listener = UnixListener::bind(&socket_path).expect("bind fake daemon");

        let (requests_tx, requests) = mpsc::unbounded_channel();
        let (output, output_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        tokio::spawn(serve(listener, requests_tx, output_rx, cancel.clone()));

        Self {
            socket_path,
            requests,
            output,
            cancel,
            _temp_dir: temp_dir,
        }
    }

    /// Waits for the next request for `method`, skipping any others.
    async fn request_for(&mut self, method: &str) -> u64 {
        loop {
            let request = timeout(STEP_TIMEOUT, self.requests.recv())
                .await
                .unwrap_or_else(|_| panic!("no {method} request within {STEP_TIMEOUT:?}"))
                .expect("fake daemon stopped");
            if request["method"] == method {
                assert_eq!(request["jsonrpc"], "2.0");
                return request["id"].as_u64().expect("numeric id");
            }
        }
    }

    fn send_raw(&self, text: impl Into<String>) {
        self.output.send(Output::Raw(text.into())).expect("fake daemon running");
    }

    fn respond(&self, id: u64, result: Value) {
        self.send_raw(format!(
            "{}\n",
            json!({"jsonrpc": "2.0", "id": id, "result": result})
        ));
    }

    fn hang_up(&self) {
        self.output.send(Output::HangUp).expect("fake daemon running");
    }
}

impl Drop for FakeDaemon {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn serve(
    listener: UnixListener,
    requests: mpsc::UnboundedSender<Value>,
    mut output: mpsc::UnboundedReceiver<Output>,
    cancel: CancellationToken,
) {
    loop {
        let stream = tokio::select! {
            _ = cancel.cancelled() => return,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(_) => return,
            },
        };

        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Ok(value) = serde_json::from_str(&line) {
                            let _ = requests.send(value);
                        }
                    }
                    _ => break,
                },
                out = output.recv() => match out {
                    Some(Output::Raw(text)) => {
                        if write.write_all(text.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                    Some(Output::HangUp) | None => break,
                },
            }
        }
    }
}

// ============================================================================
// Test Helpers
// ============================================================================

fn link_config() -> LinkConfig {
    LinkConfig {
        retry_initial_delay: Duration::from_millis(50),
        sync_interval: Duration::from_secs(3600),
        spawn_daemon: false,
        ..LinkConfig::default()
    }
}

fn spawn(socket_path: PathBuf, link_config: LinkConfig) -> (LinkHandle, broadcast::Receiver<LinkEvent>) {
    let builder = LinkBuilder::new(ConnectionConfig::default().with_socket_path(socket_path))
        .link_config(link_config);
    let events = builder.subscribe();
    (builder.spawn(), events)
}

/// Waits for the first event matching `pred`.
async fn next_event<F>(events: &mut broadcast::Receiver<LinkEvent>, pred: F) -> LinkEvent
where
    F: Fn(&LinkEvent) -> bool,
{
    timeout(STEP_TIMEOUT, async {
        loop {
            let event = events.recv().await.expect("link events");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected event did not arrive")
}

fn drain(events: &mut broadcast::Receiver<LinkEvent>) -> Vec<LinkEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

// ============================================================================
// Node Info
// ============================================================================

#[tokio::test]
async fn test_getinfo_updates_node_info_exactly_once() {
    let mut daemon = FakeDaemon::start();
    let (link, mut events) = spawn(
        daemon.socket_path.clone(),
        LinkConfig {
            sync_interval: Duration::from_millis(200),
            ..link_config()
        },
    );

    link.wait_connected(STEP_TIMEOUT).await.expect("connected");

    let getinfo = json!({
        "id": "03ab",
        "blockheight": 700000,
        "network": "testnet",
        "port": 9735,
        "version": "v0.9",
        "address": [{"address": "1.2.3.4"}]
    });

    let id = daemon.request_for("getinfo").await;
    daemon.respond(id, getinfo.clone());

    let LinkEvent::InfoChanged(info) =
        next_event(&mut events, |e| matches!(e, LinkEvent::InfoChanged(_))).await
    else {
        unreachable!()
    };
    assert_eq!(info.id.as_str(), "03ab");
    assert_eq!(info.blockheight, 700000);
    assert_eq!(info.network, "testnet");
    assert_eq!(info.port, 9735);
    assert_eq!(info.version, "v0.9");
    assert_eq!(info.addresses, vec![NodeAddress::new("1.2.3.4")]);
    assert_eq!(link.status().await.unwrap().node_info, info);

    // The next pass returns the same snapshot.
    let id = daemon.request_for("getinfo").await;
    daemon.respond(id, getinfo);

    // A reply written after it proves the getinfo reply was processed.
    let ping = link.rpc().call("ping", Value::Null);
    let id = daemon.request_for("ping").await;
    daemon.respond(id, json!({}));
    ping.await.expect("ping");

    assert!(!drain(&mut events)
        .iter()
        .any(|e| matches!(e, LinkEvent::InfoChanged(_))));
    link.shutdown();
}

// ============================================================================
// Correlation
// ============================================================================

#[tokio::test]
async fn test_out_of_order_responses_reach_their_callers() {
    let mut daemon = FakeDaemon::start();
    let (link, mut events) = spawn(daemon.socket_path.clone(), link_config());
    link.wait_connected(STEP_TIMEOUT).await.expect("connected");

    let rpc = link.rpc();
    let alpha = rpc.call("alpha", json!({"n": 1}));
    let beta = rpc.call("beta", json!({"n": 2}));
    let gamma = rpc.call("gamma", json!({"n": 3}));

    let alpha_id = daemon.request_for("alpha").await;
    let beta_id = daemon.request_for("beta").await;
    let gamma_id = daemon.request_for("gamma").await;
    assert!(alpha_id < beta_id && beta_id < gamma_id);

    // Noise first: an id never issued and a notification.
    daemon.send_raw(format!(
        "{}\n{}\n",
        json!({"jsonrpc": "2.0", "id": 9999, "result": {}}),
        json!({"jsonrpc": "2.0", "method": "invoice_payment", "params": {"label": "coffee"}})
    ));
    daemon.respond(gamma_id, json!({"from": "gamma"}));
    daemon.respond(alpha_id, json!({"from": "alpha"}));
    daemon.respond(beta_id, json!({"from": "beta"}));

    assert_eq!(alpha.await.unwrap(), json!({"from": "alpha"}));
    assert_eq!(beta.await.unwrap(), json!({"from": "beta"}));
    assert_eq!(gamma.await.unwrap(), json!({"from": "gamma"}));

    let notification = next_event(&mut events, |e| {
        matches!(e, LinkEvent::Notification { .. })
    })
    .await;
    assert_eq!(
        notification,
        LinkEvent::Notification {
            method: "invoice_payment".into(),
            params: json!({"label": "coffee"}),
        }
    );

    // A repeated answer for a settled id leaves the next call alone.
    let delta = rpc.call("delta", Value::Null);
    let delta_id = daemon.request_for("delta").await;
    daemon.respond(alpha_id, json!({"from": "alpha again"}));
    daemon.respond(delta_id, json!({"from": "delta"}));
    assert_eq!(delta.await.unwrap(), json!({"from": "delta"}));

    let status = link.status().await.unwrap();
    assert!(status.connected);
    // Only the unanswered getinfo from the first sync pass remains.
    assert_eq!(status.pending_calls, 1);
    link.shutdown();
}

#[tokio::test]
async fn test_application_error_stays_with_the_caller() {
    let mut daemon = FakeDaemon::start();
    let (link, mut events) = spawn(daemon.socket_path.clone(), link_config());
    link.wait_connected(STEP_TIMEOUT).await.expect("connected");

    let reply = link.rpc().call("bogus", Value::Null);
    let id = daemon.request_for("bogus").await;
    daemon.send_raw(format!(
        "{}\n",
        json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32601, "message": "Unknown command 'bogus'"}})
    ));

    match reply.await {
        Err(RpcError::Application { code, message, .. }) => {
            assert_eq!(code, -32601);
            assert!(message.contains("bogus"));
        }
        other => panic!("expected application error, got {other:?}"),
    }

    let status = link.status().await.unwrap();
    assert!(status.connected);
    assert_eq!(status.last_error, None);
    assert!(!drain(&mut events)
        .iter()
        .any(|e| matches!(e, LinkEvent::ErrorChanged(_) | LinkEvent::ConnectionChanged { connected: false })));
    link.shutdown();
}

// ============================================================================
// Connection Loss
// ============================================================================

#[tokio::test]
async fn test_disconnect_fails_every_pending_call_then_reconnects() {
    let mut daemon = FakeDaemon::start();
    let (link, mut events) = spawn(daemon.socket_path.clone(), link_config());
    link.wait_connected(STEP_TIMEOUT).await.expect("connected");
    next_event(&mut events, |e| *e == LinkEvent::ConnectionChanged { connected: true }).await;

    let rpc = link.rpc();
    let methods = ["m0", "m1", "m2", "m3", "m4"];
    let replies: Vec<_> = methods.iter().map(|m| rpc.call(*m, Value::Null)).collect();
    for method in methods {
        daemon.request_for(method).await;
    }

    daemon.hang_up();

    for reply in replies {
        assert_eq!(
            timeout(STEP_TIMEOUT, reply).await.expect("resolved"),
            Err(RpcError::ConnectionLost)
        );
    }

    next_event(&mut events, |e| *e == LinkEvent::ConnectionChanged { connected: false }).await;
    next_event(&mut events, |e| *e == LinkEvent::ConnectionChanged { connected: true }).await;

    let status = link.status().await.unwrap();
    assert!(status.connected);
    assert_eq!(status.last_error, None);
    assert!(status.connect_attempts >= 2);
    link.shutdown();
}

#[tokio::test]
async fn test_calls_fail_fast_while_disconnected() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (link, _events) = spawn(temp_dir.path().join("absent.sock"), link_config());

    let reply = link.rpc().call("getinfo", Value::Null);
    assert_eq!(
        timeout(STEP_TIMEOUT, reply).await.expect("resolved"),
        Err(RpcError::NotConnected)
    );

    assert_eq!(
        link.wait_connected(Duration::from_millis(200)).await,
        Err(LinkError::Timeout(Duration::from_millis(200)))
    );

    let status = link.status().await.unwrap();
    assert!(!status.connected);
    assert!(matches!(
        status.state,
        ConnectionState::Connecting | ConnectionState::Retrying
    ));
    assert_eq!(status.last_error, None);
    assert!(status.connect_attempts >= 2);
    link.shutdown();
}

#[tokio::test]
async fn test_shutdown_fails_pending_calls_and_stops_the_actor() {
    let mut daemon = FakeDaemon::start();
    let (link, mut events) = spawn(daemon.socket_path.clone(), link_config());
    link.wait_connected(STEP_TIMEOUT).await.expect("connected");

    let rpc = link.rpc();
    let pending = rpc.call("waitanyinvoice", Value::Null);
    daemon.request_for("waitanyinvoice").await;

    link.shutdown();

    assert_eq!(
        timeout(STEP_TIMEOUT, pending).await.expect("resolved"),
        Err(RpcError::ConnectionLost)
    );
    next_event(&mut events, |e| *e == LinkEvent::ConnectionChanged { connected: false }).await;

    timeout(STEP_TIMEOUT, async {
        while link.status().await.is_ok() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("actor stopped");

    assert_eq!(
        rpc.call("getinfo", Value::Null).await,
        Err(RpcError::ConnectionLost)
    );
    assert_eq!(
        link.wait_connected(STEP_TIMEOUT).await,
        Err(LinkError::ChannelClosed)
    );
}
