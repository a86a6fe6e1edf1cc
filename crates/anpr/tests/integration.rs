mod common;

use anp_auth::{DidVerifier, FileResolver, MemoryNonceStore, parse_auth_header};
use anpr::adapter::StatusHandler;
use anpr::gateway::ConnState;
use anpr::service::Receiver;
use anpx::MessageType;
use common::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn status_handler() -> Arc<StatusHandler> {
    Arc::new(StatusHandler::new("anp/status"))
}

#[tokio::test]
async fn startup_authenticates_and_announces_readiness() {
    let dir = tempfile::tempdir().unwrap();
    let provisioned = provision_identity(dir.path(), "alpha");
    let gateway = StubGateway::bind().await;
    let config = test_config(gateway.addr, provisioned.config.clone());

    let (receiver, mut peer) = tokio::join!(
        Receiver::start(config, status_handler()),
        gateway.accept(),
    );
    let receiver = receiver.unwrap();

    let authorization = peer
        .authorization
        .clone()
        .expect("missing Authorization header");
    let verifier = DidVerifier::new(
        Arc::new(FileResolver::new(dir.path())),
        Arc::new(MemoryNonceStore::new(Duration::from_secs(300))),
        Duration::from_secs(300),
    );
    let outcome = verifier.verify(&authorization, "127.0.0.1").await;
    assert!(
        outcome.success,
        "header failed verification: {:?}",
        outcome.error
    );
    assert_eq!(outcome.did.as_deref(), Some(provisioned.identity.did.as_str()));

    let ready = peer.recv_json().await;
    assert_eq!(ready["type"], "connection_ready");
    assert!(ready["connection_id"].is_string());
    assert!(ready["timestamp"].is_i64());

    receiver.stop().await;
}

#[tokio::test]
async fn control_probes_are_answered() {
    let dir = tempfile::tempdir().unwrap();
    let provisioned = provision_identity(dir.path(), "bravo");
    let gateway = StubGateway::bind().await;
    let config = test_config(gateway.addr, provisioned.config);

    let (receiver, mut peer) = tokio::join!(
        Receiver::start(config, status_handler()),
        gateway.accept(),
    );
    let receiver = receiver.unwrap();
    let ready = peer.recv_json().await;
    assert_eq!(ready["type"], "connection_ready");

    peer.send_json(&json!({
        "type": "service_capability_request",
        "request_id": "cap-1",
    }))
    .await;
    let caps = peer.recv_json().await;
    assert_eq!(caps["type"], "service_capability_response");
    assert_eq!(caps["request_id"], "cap-1");
    assert_eq!(
        caps["capabilities"]["supported_services"],
        json!(["anp/status"])
    );
    assert_eq!(caps["capabilities"]["supports_http"], true);

    peer.send_json(&json!({
        "type": "health_check_request",
        "request_id": "h-1",
    }))
    .await;
    let health = peer.recv_json().await;
    assert_eq!(health["type"], "health_check_response");
    assert_eq!(health["request_id"], "h-1");
    assert_eq!(health["status"], "healthy");

    // Unknown control types are ignored without dropping the connection.
    peer.send_json(&json!({"type": "mystery"})).await;

    peer.send_json(&json!({
        "type": "service_assignment",
        "request_id": "a-1",
        "assigned_services": ["agents"],
    }))
    .await;
    let ack = peer.recv_json().await;
    assert_eq!(ack["type"], "service_assignment_ack");
    assert_eq!(ack["status"], "accepted");
    assert_eq!(ack["assigned_services"], json!(["agents"]));

    receiver.stop().await;
}

#[tokio::test]
async fn status_requests_round_trip_over_the_wire() {
    let dir = tempfile::tempdir().unwrap();
    let provisioned = provision_identity(dir.path(), "charlie");
    let gateway = StubGateway::bind().await;
    let config = test_config(gateway.addr, provisioned.config);

    let (receiver, mut peer) = tokio::join!(
        Receiver::start(config, status_handler()),
        gateway.accept(),
    );
    let receiver = receiver.unwrap();
    let _ready = peer.recv_json().await;

    peer.send_binary(http_request("req-1", "GET", "/anp/status"))
        .await;
    let response = recv_anpx_message(&mut peer).await;
    assert_eq!(response.message_type, MessageType::HttpResponse);
    assert_eq!(response.request_id(), Some("req-1"));
    let meta = response
        .resp_meta()
        .unwrap()
        .expect("missing response metadata");
    assert_eq!(meta.status, 200);
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "anp/status");

    // A path the handler does not serve comes back 404, still correlated.
    peer.send_binary(http_request("req-2", "GET", "/elsewhere"))
        .await;
    let response = recv_anpx_message(&mut peer).await;
    assert_eq!(response.request_id(), Some("req-2"));
    let meta = response
        .resp_meta()
        .unwrap()
        .expect("missing response metadata");
    assert_eq!(meta.status, 404);

    receiver.stop().await;
}

#[tokio::test]
async fn a_dropped_connection_is_reestablished() {
    let dir = tempfile::tempdir().unwrap();
    let provisioned = provision_identity(dir.path(), "delta");
    let gateway = StubGateway::bind().await;
    let config = test_config(gateway.addr, provisioned.config);

    let (receiver, mut peer) = tokio::join!(
        Receiver::start(config, status_handler()),
        gateway.accept(),
    );
    let receiver = receiver.unwrap();
    let _ready = peer.recv_json().await;
    let first_auth = peer.authorization.clone().unwrap();

    let mut state_rx = receiver.states().remove(0).1;
    drop(peer);

    let mut peer = gateway.accept().await;
    let ready = peer.recv_json().await;
    assert_eq!(ready["type"], "connection_ready");
    wait_for_state(&mut state_rx, ConnState::Connected).await;

    // Every attempt signs a fresh nonce and timestamp.
    let second_auth = peer.authorization.clone().unwrap();
    assert_ne!(first_auth, second_auth);
    let first = parse_auth_header(&first_auth).unwrap();
    let second = parse_auth_header(&second_auth).unwrap();
    assert_eq!(first.did, second.did);
    assert_ne!(first.nonce, second.nonce);

    receiver.stop().await;
}

#[tokio::test]
async fn reconnect_attempts_are_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let provisioned = provision_identity(dir.path(), "echo");
    let gateway = StubGateway::bind().await;
    let mut config = test_config(gateway.addr, provisioned.config);
    config.reconnect.max_attempts = 2;

    let (receiver, peer) = tokio::join!(
        Receiver::start(config, status_handler()),
        gateway.accept(),
    );
    let receiver = receiver.unwrap();
    let mut state_rx = receiver.states().remove(0).1;

    // No listener left: every retry is refused until the budget runs out.
    drop(gateway);
    drop(peer);

    wait_for_state(&mut state_rx, ConnState::Failed).await;
    receiver.stop().await;
}

#[tokio::test]
async fn a_rejected_upgrade_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let provisioned = provision_identity(dir.path(), "foxtrot");
    let gateway = StubGateway::bind().await;
    let config = test_config(gateway.addr, provisioned.config);

    let gateway_task = tokio::spawn(async move { gateway.reject_next(401).await });
    let error = Receiver::start(config, status_handler())
        .await
        .unwrap_err();
    assert!(
        format!("{error:#}").contains("rejected"),
        "unexpected error: {error:#}"
    );
    gateway_task.await.unwrap();
}

#[tokio::test]
async fn each_identity_gets_its_own_connection() {
    let dir = tempfile::tempdir().unwrap();
    let alpha = provision_identity(dir.path(), "golf");
    let beta = provision_identity(dir.path(), "hotel");
    let gateway = StubGateway::bind().await;
    let mut config = test_config(gateway.addr, alpha.config);
    config.identity.push(beta.config);

    let (receiver, (mut peer_a, mut peer_b)) = tokio::join!(
        Receiver::start(config, status_handler()),
        async {
            let first = gateway.accept().await;
            let second = gateway.accept().await;
            (first, second)
        },
    );
    let receiver = receiver.unwrap();

    let ready = peer_a.recv_json().await;
    assert_eq!(ready["type"], "connection_ready");
    let ready = peer_b.recv_json().await;
    assert_eq!(ready["type"], "connection_ready");

    let did_a = parse_auth_header(&peer_a.authorization.clone().unwrap())
        .unwrap()
        .did;
    let did_b = parse_auth_header(&peer_b.authorization.clone().unwrap())
        .unwrap()
        .did;
    assert_eq!(did_a, alpha.identity.did);
    assert_eq!(did_b, beta.identity.did);

    let states = receiver.states();
    assert_eq!(states.len(), 2);

    receiver.stop().await;
}
