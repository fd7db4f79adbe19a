//! End-to-end protocol tests against a minimal in-process control server.
//!
//! The mock speaks raw RFC 6455 from the server side: it completes the
//! upgrade handshake (with a correct `Sec-WebSocket-Accept`), parses masked
//! client frames with the crate's own decoder, and sends unmasked text
//! frames back.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use screencontrol::agent::Agent;
use screencontrol::config::{Config, ConnectionConfig};
use screencontrol::transport::frame::{Frame, FrameDecoder, Opcode};
use screencontrol::transport::{handshake, Transport};

/// Encode an unmasked server-side text frame.
fn server_text_frame(payload: &str) -> Vec<u8> {
    let bytes = payload.as_bytes();
    let mut frame = vec![0x81];
    match bytes.len() {
        0..=125 => frame.push(bytes.len() as u8),
        126..=65535 => {
            frame.push(126);
            frame.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
        }
        _ => {
            frame.push(127);
            frame.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
        }
    }
    frame.extend_from_slice(bytes);
    frame
}

/// One accepted agent connection on the mock side.
struct MockConn {
    stream: TcpStream,
    decoder: FrameDecoder,
    /// Frames already decoded but not yet handed out.
    pending: Vec<Frame>,
}

impl MockConn {
    /// Accept a socket and complete the WebSocket upgrade.
    async fn accept(listener: &TcpListener) -> Self {
        let (mut stream, _) = listener.accept().await.expect("accept");

        let mut head = Vec::new();
        let mut buf = [0u8; 2048];
        let body_start = loop {
            let n = stream.read(&mut buf).await.expect("read handshake");
            assert!(n > 0, "client hung up during handshake");
            head.extend_from_slice(&buf[..n]);
            if let Some(end) = head.windows(4).position(|w| w == b"\r\n\r\n") {
                break end + 4;
            }
        };

        let text = String::from_utf8_lossy(&head[..body_start]);
        assert!(text.starts_with("GET "), "not an upgrade request: {text}");
        assert!(text.contains("Upgrade: websocket"));
        assert!(text.contains("Sec-WebSocket-Version: 13"));
        let key = text
            .lines()
            .find_map(|l| l.strip_prefix("Sec-WebSocket-Key: "))
            .expect("key header")
            .trim()
            .to_string();

        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\r\n",
            handshake::accept_for_key(&key)
        );
        stream
            .write_all(response.as_bytes())
            .await
            .expect("write handshake");

        let mut decoder = FrameDecoder::new();
        decoder.feed(&head[body_start..]);
        Self {
            stream,
            decoder,
            pending: Vec::new(),
        }
    }

    /// Next frame from the agent. Every client frame must carry the RFC 6455
    /// mask bit; that invariant is asserted here for all traffic.
    async fn recv_frame(&mut self) -> Frame {
        loop {
            if !self.pending.is_empty() {
                let frame = self.pending.remove(0);
                assert!(frame.masked, "client frame without mask bit");
                assert!(frame.fin, "client frame without FIN");
                return frame;
            }
            while let Some(frame) = self.decoder.next_frame().expect("well-formed frame") {
                self.pending.push(frame);
            }
            if !self.pending.is_empty() {
                continue;
            }
            let mut buf = [0u8; 4096];
            let n = self.stream.read(&mut buf).await.expect("read frame");
            assert!(n > 0, "connection closed");
            self.decoder.feed(&buf[..n]);
        }
    }

    /// Next text frame payload, skipping control frames.
    async fn recv_text(&mut self) -> String {
        loop {
            let frame = self.recv_frame().await;
            if frame.opcode == Opcode::Text {
                return String::from_utf8(frame.payload).expect("utf8");
            }
        }
    }

    /// Next text frame from the agent, as parsed JSON.
    async fn recv_json(&mut self, timeout: Duration) -> Value {
        let text = tokio::time::timeout(timeout, self.recv_text())
            .await
            .expect("timed out waiting for a frame");
        serde_json::from_str(&text).expect("frame payload is JSON")
    }

    async fn send_json(&mut self, value: &Value) {
        let frame = server_text_frame(&value.to_string());
        self.stream.write_all(&frame).await.expect("write frame");
    }
}

fn test_agent(dir: &std::path::Path) -> Arc<Agent> {
    let mut config = Config::default();
    config.dir = dir.to_path_buf();
    Agent::new(config)
}

#[tokio::test]
async fn register_heartbeat_and_rpc_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let dir = tempfile::tempdir().unwrap();
    let agent = test_agent(dir.path());

    let connect = agent.connect(ConnectionConfig {
        server_url: format!("ws://127.0.0.1:{port}/agent"),
        endpoint_uuid: Some("lic-42".to_string()),
        customer_id: None,
        agent_name: Some("test-rig".to_string()),
        connect_on_startup: false,
    });
    let (conn, connected) = tokio::join!(MockConn::accept(&listener), connect);
    connected.expect("connect succeeds");
    let mut conn = conn;

    // Registration arrives first, carrying identity and bootstrap creds.
    let register = conn.recv_json(Duration::from_millis(300)).await;
    assert_eq!(register["type"], "register");
    assert!(!register["machineId"].as_str().unwrap().is_empty());
    assert_eq!(register["licenseUuid"], "lic-42");
    assert_eq!(register["agentName"], "test-rig");
    assert_eq!(register["fingerprint"]["macAddresses"][0], "service-mode");

    // Acknowledge with a fast heartbeat interval.
    conn.send_json(&json!({
        "type": "registered",
        "agentId": "A1",
        "licenseStatus": "valid",
        "config": {"heartbeatInterval": 250},
    }))
    .await;

    // Two heartbeats at roughly the configured cadence.
    let hb1 = conn.recv_json(Duration::from_millis(600)).await;
    assert_eq!(hb1["type"], "heartbeat");
    assert_eq!(hb1["powerState"], "ACTIVE");
    assert!(hb1["timestamp"].as_u64().unwrap() > 0);
    let hb2 = conn.recv_json(Duration::from_millis(600)).await;
    assert_eq!(hb2["type"], "heartbeat");

    // Status reflects the registration.
    let status = agent.client.status();
    assert!(status.connected);
    assert_eq!(status.agent_id.as_deref(), Some("A1"));
    assert_eq!(status.license_status, "valid");

    // RPC round-trip: the correlation id is echoed verbatim.
    conn.send_json(&json!({
        "type": "request",
        "id": "r1",
        "method": "system_info",
        "params": {},
    }))
    .await;
    let response = loop {
        let msg = conn.recv_json(Duration::from_millis(500)).await;
        if msg["type"] == "response" {
            break msg;
        }
        assert_eq!(msg["type"], "heartbeat");
    };
    assert_eq!(response["id"], "r1");
    assert_eq!(
        response["result"]["platform"],
        screencontrol::identity::platform_tag()
    );

    // Application-level ping echoes the timestamp in a pong.
    conn.send_json(&json!({"type": "ping", "timestamp": 12345})).await;
    let pong = loop {
        let msg = conn.recv_json(Duration::from_millis(500)).await;
        if msg["type"] == "pong" {
            break msg;
        }
        assert_eq!(msg["type"], "heartbeat");
    };
    assert_eq!(pong["timestamp"], 12345);

    agent.disconnect().await;
    assert!(!agent.client.is_connected());
}

#[tokio::test]
async fn permissions_latch_notifies_once_per_change() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let dir = tempfile::tempdir().unwrap();
    let agent = test_agent(dir.path());

    let mut events = agent.client.events();
    let connect = agent.connect(ConnectionConfig {
        server_url: format!("ws://127.0.0.1:{port}/"),
        connect_on_startup: false,
        ..ConnectionConfig::default()
    });
    let (conn, connected) = tokio::join!(MockConn::accept(&listener), connect);
    connected.unwrap();
    let mut conn = conn;

    let _register = conn.recv_json(Duration::from_millis(300)).await;
    conn.send_json(&json!({"type": "registered", "agentId": "A2", "licenseStatus": "valid"}))
        .await;

    // Same permissions twice, then a change.
    let perms = json!({"masterMode": true, "fileTransfer": true, "localSettingsLocked": false});
    for _ in 0..2 {
        conn.send_json(&json!({
            "type": "heartbeat_ack",
            "licenseStatus": "valid",
            "u": 0,
            "permissions": perms,
        }))
        .await;
    }
    conn.send_json(&json!({
        "type": "heartbeat_ack",
        "licenseStatus": "valid",
        "u": 0,
        "permissions": {"masterMode": true, "fileTransfer": false, "localSettingsLocked": false},
    }))
    .await;

    // Exactly two PermissionsChanged events (initial latch + the change).
    let mut changes = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while changes.len() < 2 && tokio::time::Instant::now() < deadline {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Ok(screencontrol::AgentEvent::PermissionsChanged(p))) => changes.push(p),
            Ok(Ok(_)) => {}
            _ => break,
        }
    }
    assert_eq!(changes.len(), 2);
    assert!(changes[0].file_transfer);
    assert!(!changes[1].file_transfer);
    assert!(agent.client.permissions().master_mode);
    assert!(!agent.client.permissions().file_transfer);

    // No third notification is waiting.
    let extra = tokio::time::timeout(Duration::from_millis(200), async {
        loop {
            if let Ok(screencontrol::AgentEvent::PermissionsChanged(_)) =
                events.recv().await
            {
                return;
            }
        }
    })
    .await;
    assert!(extra.is_err(), "unexpected extra permissions notification");

    agent.disconnect().await;
}

#[tokio::test]
async fn concurrent_senders_never_interleave_frames() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let accept = MockConn::accept(&listener);
    let url = format!("ws://127.0.0.1:{port}/");
    let connect = Transport::connect(&url);
    let (conn, transport) = tokio::join!(accept, connect);
    let mut conn = conn;
    let transport = Arc::new(transport.expect("transport connects"));

    // Two tasks blast distinguishable payloads concurrently.
    const PER_TASK: usize = 50;
    let (done_tx, mut done_rx) = mpsc::channel(2);
    for marker in ["a", "b"] {
        let transport = Arc::clone(&transport);
        let done = done_tx.clone();
        tokio::spawn(async move {
            let payload = marker.repeat(2048);
            for _ in 0..PER_TASK {
                transport.send_text(&payload).await.expect("send");
            }
            let _ = done.send(()).await;
        });
    }

    let mut received = 0;
    while received < PER_TASK * 2 {
        let text = conn.recv_text().await;
        assert_eq!(text.len(), 2048);
        let first = text.as_bytes()[0];
        assert!(
            text.bytes().all(|b| b == first),
            "frame bytes interleaved across senders"
        );
        received += 1;
    }
    done_rx.recv().await;
    done_rx.recv().await;

    transport.close().await;
}

#[tokio::test]
async fn protocol_ping_gets_a_masked_pong_with_the_same_payload() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let accept = MockConn::accept(&listener);
    let url = format!("ws://127.0.0.1:{port}/");
    let connect = Transport::connect(&url);
    let (conn, transport) = tokio::join!(accept, connect);
    let mut conn = conn;
    let transport = transport.unwrap();

    // Unmasked server ping with a 125-byte payload (the 7-bit length max).
    let payload: Vec<u8> = (0u8..125).collect();
    let mut ping = vec![0x89, 125];
    ping.extend_from_slice(&payload);
    conn.stream.write_all(&ping).await.unwrap();

    // Drive the client's reader; it answers the ping internally. Follow
    // with a text frame so recv() has something to return.
    let follow_up = server_text_frame("{\"type\":\"noop\"}");
    conn.stream.write_all(&follow_up).await.unwrap();
    let received = tokio::time::timeout(Duration::from_secs(1), transport.recv())
        .await
        .expect("client kept reading")
        .unwrap();
    assert_eq!(received, "{\"type\":\"noop\"}");

    let pong = tokio::time::timeout(Duration::from_secs(1), conn.recv_frame())
        .await
        .expect("pong arrives");
    assert_eq!(pong.opcode, Opcode::Pong);
    assert!(pong.masked);
    assert_eq!(pong.payload, payload);

    transport.close().await;
}

#[tokio::test]
async fn relay_callback_completes_on_relay_response() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let dir = tempfile::tempdir().unwrap();
    let agent = test_agent(dir.path());

    let connect = agent.connect(ConnectionConfig {
        server_url: format!("ws://127.0.0.1:{port}/"),
        connect_on_startup: false,
        ..ConnectionConfig::default()
    });
    let (conn, connected) = tokio::join!(MockConn::accept(&listener), connect);
    connected.unwrap();
    let mut conn = conn;
    let _register = conn.recv_json(Duration::from_millis(300)).await;

    let client = agent.client.clone();
    let relay_call =
        tokio::spawn(async move { client.relay("peer-7", "system_info", json!({})).await });

    // The agent mints relay_<hex16> and sends the relay frame.
    let relayed = conn.recv_json(Duration::from_millis(500)).await;
    assert_eq!(relayed["type"], "relay");
    assert_eq!(relayed["targetAgentId"], "peer-7");
    assert_eq!(relayed["method"], "system_info");
    let id = relayed["id"].as_str().unwrap().to_string();
    assert!(id.starts_with("relay_"));
    assert_eq!(id.len(), "relay_".len() + 16);

    // Echo a relay_response with the same id; the caller's future resolves.
    conn.send_json(&json!({
        "type": "relay_response",
        "id": id,
        "result": {"platform": "linux"},
    }))
    .await;
    let result = tokio::time::timeout(Duration::from_secs(1), relay_call)
        .await
        .expect("relay completes")
        .unwrap()
        .unwrap();
    assert_eq!(result["platform"], "linux");

    agent.disconnect().await;
}

#[tokio::test]
async fn server_close_frame_disconnects_the_client() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let dir = tempfile::tempdir().unwrap();
    let agent = test_agent(dir.path());

    let connect = agent.connect(ConnectionConfig {
        server_url: format!("ws://127.0.0.1:{port}/"),
        connect_on_startup: false,
        ..ConnectionConfig::default()
    });
    let (conn, connected) = tokio::join!(MockConn::accept(&listener), connect);
    connected.unwrap();
    let mut conn = conn;
    let _register = conn.recv_json(Duration::from_millis(300)).await;

    // Unmasked close frame from the server side.
    conn.stream.write_all(&[0x88, 0x00]).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while agent.client.is_connected() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(!agent.client.is_connected());
}
