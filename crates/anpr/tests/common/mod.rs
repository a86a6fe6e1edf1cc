use anp_auth::Identity;
use anp_auth::identity::{DOCUMENT_FILE, KEY_FILE};
use anpr::config::{IdentityConfig, ReceiverConfig, ReconnectConfig};
use anpr::gateway::ConnState;
use anpx::{AnpxDecoder, AnpxMessage, DecodeProgress, HttpMeta};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

pub fn test_config(addr: SocketAddr, identity: IdentityConfig) -> ReceiverConfig {
    ReceiverConfig {
        gateway_url: format!("ws://{addr}"),
        // Keepalive stays out of the way; tests drive traffic themselves.
        ping_interval_s: 30,
        pong_timeout_s: 30,
        reconnect: ReconnectConfig {
            initial_delay_ms: 10,
            max_delay_ms: 50,
            backoff_factor: 1.5,
            max_attempts: 5,
        },
        advertised_services: vec!["anp/status".to_string()],
        identity: vec![identity],
        ..ReceiverConfig::default()
    }
}

pub struct TestIdentity {
    pub identity: Identity,
    pub config: IdentityConfig,
}

/// Generates an identity under `root/user_<user_id>/`, the layout
/// `FileResolver` expects.
pub fn provision_identity(root: &Path, user_id: &str) -> TestIdentity {
    let dir = root.join(format!("user_{user_id}"));
    let identity = Identity::generate(&dir, "localhost", None, user_id).unwrap();
    TestIdentity {
        identity,
        config: IdentityConfig {
            document: dir.join(DOCUMENT_FILE),
            key: dir.join(KEY_FILE),
        },
    }
}

/// In-process stand-in for the gateway end of the WebSocket.
pub struct StubGateway {
    listener: TcpListener,
    pub addr: SocketAddr,
}

pub struct GatewayPeer {
    pub ws: WebSocketStream<TcpStream>,
    pub authorization: Option<String>,
}

impl StubGateway {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        Self { listener, addr }
    }

    /// Accepts the next connection, capturing its Authorization header.
    pub async fn accept(&self) -> GatewayPeer {
        let (stream, _) = self.listener.accept().await.unwrap();
        let auth_cell = Arc::new(OnceLock::new());
        let cell = auth_cell.clone();
        let ws = tokio_tungstenite::accept_hdr_async(
            stream,
            move |req: &Request, resp: Response| {
                if let Some(value) = req.headers().get("Authorization") {
                    if let Ok(text) = value.to_str() {
                        let _ = cell.set(text.to_string());
                    }
                }
                Ok(resp)
            },
        )
        .await
        .unwrap();
        GatewayPeer {
            ws,
            authorization: auth_cell.get().cloned(),
        }
    }

    /// Turns down the next upgrade with `status` instead of completing it.
    pub async fn reject_next(&self, status: u16) {
        let (stream, _) = self.listener.accept().await.unwrap();
        let result = tokio_tungstenite::accept_hdr_async(
            stream,
            move |_req: &Request, _resp: Response| {
                let response: ErrorResponse =
                    Response::builder().status(status).body(None).unwrap();
                Err(response)
            },
        )
        .await;
        assert!(result.is_err(), "upgrade should have been rejected");
    }
}

impl GatewayPeer {
    pub async fn recv_json(&mut self) -> serde_json::Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.ws.next())
                .await
                .expect("timeout waiting for text frame")
                .unwrap()
                .unwrap();
            match msg {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                Message::Ping(_) | Message::Pong(_) => {}
                other => panic!("expected text frame, got {other:?}"),
            }
        }
    }

    pub async fn recv_binary(&mut self) -> Vec<u8> {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.ws.next())
                .await
                .expect("timeout waiting for binary frame")
                .unwrap()
                .unwrap();
            match msg {
                Message::Binary(data) => return data,
                Message::Ping(_) | Message::Pong(_) => {}
                other => panic!("expected binary frame, got {other:?}"),
            }
        }
    }

    pub async fn send_json(&mut self, value: &serde_json::Value) {
        self.ws
            .send(Message::Text(value.to_string()))
            .await
            .unwrap();
    }

    pub async fn send_binary(&mut self, data: Vec<u8>) {
        self.ws.send(Message::Binary(data)).await.unwrap();
    }
}

/// Encodes a bodyless HTTP request as a single ANPX frame.
pub fn http_request(request_id: &str, method: &str, path: &str) -> Vec<u8> {
    let meta = HttpMeta::new(method, path);
    let message = AnpxMessage::request(request_id, &meta, &[]).unwrap();
    message.encode().unwrap()
}

/// Reads binary frames until one logical message completes, reassembling
/// chunked transfers along the way.
pub async fn recv_anpx_message(peer: &mut GatewayPeer) -> AnpxMessage {
    let mut decoder = AnpxDecoder::new(10 * 1024 * 1024, Duration::from_secs(60));
    loop {
        let data = peer.recv_binary().await;
        let mut offset = 0;
        while offset < data.len() {
            match decoder.decode(&data[offset..]).unwrap() {
                DecodeProgress::Complete { message, .. } => return message,
                DecodeProgress::Buffered { consumed } => offset += consumed,
                DecodeProgress::NeedMore => break,
            }
        }
    }
}

pub async fn wait_for_state(state_rx: &mut watch::Receiver<ConnState>, want: ConnState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if *state_rx.borrow_and_update() == want {
                return;
            }
            state_rx.changed().await.unwrap();
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {want:?}"));
}
