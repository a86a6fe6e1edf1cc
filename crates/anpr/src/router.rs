//! Routes decoded frames: requests to the handler, responses out the wire.
//!
//! The router owns the receive side of one connection. Raw WebSocket binary
//! payloads accumulate in a capped buffer, the incremental decoder drains
//! complete frames from it, and every finished HTTP request is dispatched on
//! its own task. Requests are dispatched in decode order; completions may
//! interleave, which is fine because each response carries its request id.

use crate::adapter::RequestAdapter;
use crate::config::ReceiverConfig;
use anpx::{AnpxDecoder, AnpxEncoder, AnpxMessage, DecodeProgress, MessageType};
use bytes::{Buf, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, warn};

/// Accumulates transport bytes until whole frames can be decoded.
///
/// Feeding bytes past the cap clears the buffer; whatever partial frame was
/// in flight is lost but the connection stays usable.
#[derive(Debug)]
pub struct ReceiveBuffer {
    buf: BytesMut,
    limit: usize,
}

impl ReceiveBuffer {
    /// Creates a buffer that clears itself past `limit` bytes.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            limit,
        }
    }

    /// Appends bytes. Returns `false` after clearing if the cap was hit.
    pub fn extend(&mut self, bytes: &[u8]) -> bool {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > self.limit {
            self.buf.clear();
            return false;
        }
        true
    }

    /// Discards `n` consumed bytes from the front.
    pub fn advance(&mut self, n: usize) {
        self.buf.advance(n);
    }

    /// Drops all buffered bytes.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// The buffered bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Number of buffered bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The configured cap in bytes.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// Per-connection message router.
pub struct MessageRouter {
    decoder: AnpxDecoder,
    buffer: ReceiveBuffer,
    adapter: Arc<RequestAdapter>,
    encoder: AnpxEncoder,
    outbox: mpsc::Sender<Message>,
    error_frames: u64,
}

impl MessageRouter {
    /// Creates a router sending responses through `outbox`.
    #[must_use]
    pub fn new(
        config: &ReceiverConfig,
        adapter: Arc<RequestAdapter>,
        outbox: mpsc::Sender<Message>,
    ) -> Self {
        Self {
            decoder: AnpxDecoder::new(
                config.max_message_size,
                Duration::from_secs(config.chunk_timeout_s),
            ),
            buffer: ReceiveBuffer::new(config.recv_buffer_limit),
            adapter,
            encoder: AnpxEncoder::with_chunk_size(config.chunk_size),
            outbox,
            error_frames: 0,
        }
    }

    /// Feeds raw transport bytes and dispatches every logical message they
    /// complete.
    pub async fn ingest(&mut self, bytes: &[u8]) {
        if !self.buffer.extend(bytes) {
            warn!(
                limit = self.buffer.limit(),
                "receive buffer overflow, dropping buffered bytes"
            );
            return;
        }
        loop {
            match self.decoder.decode(self.buffer.as_bytes()) {
                Ok(DecodeProgress::NeedMore) => break,
                Ok(DecodeProgress::Buffered { consumed }) => self.buffer.advance(consumed),
                Ok(DecodeProgress::Complete { message, consumed }) => {
                    self.buffer.advance(consumed);
                    self.dispatch(message);
                }
                Err(e) => {
                    warn!(error = %e, "protocol error, resetting receive buffer");
                    self.buffer.clear();
                    break;
                }
            }
        }
    }

    /// ERROR frames seen on this connection.
    #[must_use]
    pub fn error_frame_count(&self) -> u64 {
        self.error_frames
    }

    fn dispatch(&mut self, message: AnpxMessage) {
        match message.message_type {
            MessageType::HttpRequest => {
                let Some(request_id) = message.request_id().map(str::to_string) else {
                    warn!("dropping request without a request id");
                    return;
                };
                let adapter = Arc::clone(&self.adapter);
                let encoder = self.encoder.clone();
                let outbox = self.outbox.clone();
                tokio::spawn(async move {
                    let reply = adapter.dispatch(&request_id, &message).await;
                    send_frames(&encoder, &outbox, &reply).await;
                });
            }
            MessageType::HttpResponse => {
                warn!(
                    request_id = message.request_id().unwrap_or("<none>"),
                    "dropping unexpected response frame"
                );
            }
            MessageType::Error => {
                self.error_frames += 1;
                error!(
                    request_id = message.request_id().unwrap_or("<none>"),
                    detail = %String::from_utf8_lossy(message.body()),
                    "gateway reported a protocol error"
                );
            }
            MessageType::Ping | MessageType::Pong => {
                warn!(
                    message_type = ?message.message_type,
                    "dropping unexpected control frame"
                );
            }
        }
    }
}

async fn send_frames(encoder: &AnpxEncoder, outbox: &mpsc::Sender<Message>, reply: &AnpxMessage) {
    let frames = match encoder.encode(reply) {
        Ok(frames) => frames,
        Err(e) => {
            error!(error = %e, "failed to encode response frames");
            return;
        }
    };
    for frame in frames {
        if outbox.send(Message::Binary(frame)).await.is_err() {
            debug!("outbox closed, dropping response");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{GatewayRequest, GatewayResponse, HttpHandler};
    use anpx::{FrameDecode, HttpMeta, TlvTag};
    use async_trait::async_trait;

    struct Health;

    #[async_trait]
    impl HttpHandler for Health {
        async fn handle(&self, _request: GatewayRequest) -> anyhow::Result<GatewayResponse> {
            Ok(GatewayResponse::json(200, &serde_json::json!({"status": "healthy"}))?)
        }
    }

    struct Echo;

    #[async_trait]
    impl HttpHandler for Echo {
        async fn handle(&self, request: GatewayRequest) -> anyhow::Result<GatewayResponse> {
            Ok(GatewayResponse::new(200).with_body(request.body))
        }
    }

    fn router_with(
        handler: Arc<dyn HttpHandler>,
        configure: impl FnOnce(&mut ReceiverConfig),
    ) -> (MessageRouter, mpsc::Receiver<Message>) {
        let mut config = ReceiverConfig::default();
        configure(&mut config);
        let (tx, rx) = mpsc::channel(32);
        let router = MessageRouter::new(&config, Arc::new(RequestAdapter::new(handler)), tx);
        (router, rx)
    }

    async fn recv_reply(rx: &mut mpsc::Receiver<Message>) -> AnpxMessage {
        let Some(Message::Binary(frame)) = rx.recv().await else {
            panic!("expected a binary frame");
        };
        let FrameDecode::Complete { message, .. } =
            AnpxMessage::decode_frame(&frame, 1 << 24).unwrap()
        else {
            panic!("expected a complete frame");
        };
        message
    }

    async fn assert_no_reply(rx: &mut mpsc::Receiver<Message>) {
        let outcome = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(outcome.is_err(), "router should not have replied");
    }

    fn health_request(request_id: &str) -> Vec<u8> {
        AnpxMessage::request(request_id, &HttpMeta::new("GET", "/health"), b"")
            .unwrap()
            .encode()
            .unwrap()
    }

    #[tokio::test]
    async fn health_request_split_at_every_boundary_gets_one_response() {
        let bytes = health_request("abc123");
        for cut in 0..=bytes.len() {
            let (mut router, mut rx) = router_with(Arc::new(Health), |_| {});
            router.ingest(&bytes[..cut]).await;
            router.ingest(&bytes[cut..]).await;

            let reply = recv_reply(&mut rx).await;
            assert_eq!(reply.request_id(), Some("abc123"), "split at {cut}");
            assert_eq!(reply.resp_meta().unwrap().unwrap().status, 200);
            assert_eq!(reply.body(), br#"{"status":"healthy"}"#);
        }
    }

    #[tokio::test]
    async fn buffer_overflow_recovers_on_next_request() {
        let (mut router, mut rx) = router_with(Arc::new(Health), |c| c.recv_buffer_limit = 128);

        router.ingest(&[0xAB; 200]).await;
        assert!(router.buffer.is_empty(), "overflow should clear the buffer");

        router.ingest(&health_request("after")).await;
        let reply = recv_reply(&mut rx).await;
        assert_eq!(reply.request_id(), Some("after"));
    }

    #[tokio::test]
    async fn corrupt_frame_resets_buffer_and_later_requests_survive() {
        let (mut router, mut rx) = router_with(Arc::new(Health), |_| {});

        let mut corrupt = health_request("broken");
        corrupt[25] ^= 0x01;
        router.ingest(&corrupt).await;
        assert!(router.buffer.is_empty());

        router.ingest(&health_request("intact")).await;
        let reply = recv_reply(&mut rx).await;
        assert_eq!(reply.request_id(), Some("intact"));
        assert!(rx.try_recv().is_err(), "corrupt frame must not produce a reply");
    }

    #[tokio::test]
    async fn exactly_one_response_per_request() {
        let (mut router, mut rx) = router_with(Arc::new(Health), |_| {});

        let mut blob = Vec::new();
        for id in ["r1", "r2", "r3"] {
            blob.extend_from_slice(&health_request(id));
        }
        router.ingest(&blob).await;

        let mut seen = std::collections::HashSet::new();
        for _ in 0..3 {
            let reply = recv_reply(&mut rx).await;
            seen.insert(reply.request_id().unwrap().to_string());
        }
        assert_eq!(seen.len(), 3);
        assert!(rx.try_recv().is_err(), "no extra responses expected");
    }

    #[tokio::test]
    async fn error_frames_are_counted_not_answered() {
        let (mut router, mut rx) = router_with(Arc::new(Health), |_| {});

        let mut error = AnpxMessage::new(MessageType::Error);
        error.add_field(TlvTag::RequestId, b"bad-1");
        error.add_field(TlvTag::HttpBody, b"malformed frame upstream");
        router.ingest(&error.encode().unwrap()).await;

        assert_eq!(router.error_frame_count(), 1);
        assert_no_reply(&mut rx).await;
    }

    #[tokio::test]
    async fn ping_pong_and_response_frames_are_dropped() {
        let (mut router, mut rx) = router_with(Arc::new(Health), |_| {});

        for message_type in [MessageType::Ping, MessageType::Pong, MessageType::HttpResponse] {
            let mut frame = AnpxMessage::new(message_type);
            frame.add_field(TlvTag::RequestId, b"x");
            router.ingest(&frame.encode().unwrap()).await;
        }

        assert_eq!(router.error_frame_count(), 0);
        assert_no_reply(&mut rx).await;
    }

    #[tokio::test]
    async fn request_without_id_is_dropped() {
        let (mut router, mut rx) = router_with(Arc::new(Health), |_| {});

        let mut message = AnpxMessage::new(MessageType::HttpRequest);
        let meta = serde_json::to_vec(&HttpMeta::new("GET", "/health")).unwrap();
        message.add_field(TlvTag::HttpMeta, &meta);
        router.ingest(&message.encode().unwrap()).await;

        assert_no_reply(&mut rx).await;
    }

    #[tokio::test]
    async fn chunked_request_and_chunked_response_round_trip() {
        let (mut router, mut rx) = router_with(Arc::new(Echo), |c| c.chunk_size = 128);

        let body: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
        let request = AnpxMessage::request("big-1", &HttpMeta::new("POST", "/echo"), &body).unwrap();
        let frames = AnpxEncoder::with_chunk_size(128).encode(&request).unwrap();
        assert!(frames.len() > 1, "request should have been chunked");
        for frame in &frames {
            router.ingest(frame).await;
        }

        let mut decoder = AnpxDecoder::new(10 * 1024 * 1024, Duration::from_secs(60));
        let reply = loop {
            let Some(Message::Binary(frame)) = rx.recv().await else {
                panic!("expected a binary frame");
            };
            match decoder.decode(&frame).unwrap() {
                DecodeProgress::Complete { message, .. } => break message,
                DecodeProgress::Buffered { .. } => {}
                DecodeProgress::NeedMore => panic!("each outbound frame should be whole"),
            }
        };
        assert_eq!(reply.request_id(), Some("big-1"));
        assert_eq!(reply.body(), body.as_slice());
    }

    #[test]
    fn receive_buffer_accumulates_and_advances() {
        let mut buffer = ReceiveBuffer::new(16);
        assert!(buffer.extend(b"hello "));
        assert!(buffer.extend(b"world"));
        assert_eq!(buffer.as_bytes(), b"hello world");

        buffer.advance(6);
        assert_eq!(buffer.as_bytes(), b"world");
        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[test]
    fn receive_buffer_clears_on_overflow() {
        let mut buffer = ReceiveBuffer::new(8);
        assert!(buffer.extend(b"12345678"));
        assert!(!buffer.extend(b"9"));
        assert!(buffer.is_empty());
        assert!(buffer.extend(b"fresh"));
        assert_eq!(buffer.len(), 5);
    }
}
