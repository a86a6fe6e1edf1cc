//! Gateway connection manager: connect, authenticate, run, reconnect.
//!
//! One [`GatewayConnection`] owns one WebSocket link to the gateway. The
//! first connection attempt happens inline in [`GatewayConnection::connect`]
//! so a misconfigured receiver fails fast; every later disconnect feeds the
//! reconnect machine, which retries with jittered exponential backoff until
//! `reconnect.max_attempts` consecutive failures push the link into the
//! terminal [`ConnState::Failed`].

use crate::adapter::{HttpHandler, RequestAdapter};
use crate::backoff::ExponentialBackoff;
use crate::config::ReceiverConfig;
use crate::control::{self, GatewayCommand, HealthDetails, ReceiverReply};
use crate::router::MessageRouter;
use anp_auth::{Identity, build_auth_header};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

/// How long `stop()` waits for the manager task before aborting it.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug)]
enum GatewayError {
    Fatal(anyhow::Error),
    Transient(anyhow::Error),
}

impl GatewayError {
    fn into_inner(self) -> anyhow::Error {
        match self {
            Self::Fatal(e) | Self::Transient(e) => e,
        }
    }
}

/// Connection state of the gateway WebSocket link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Not connected and not trying.
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Link up and serving traffic.
    Connected,
    /// Lost the link; backoff and retry in progress.
    Reconnecting,
    /// Reconnect attempts exhausted or a fatal error occurred. Terminal.
    Failed,
}

struct Session {
    ws_tx: SplitSink<WsStream, Message>,
    ws_rx: SplitStream<WsStream>,
}

/// A managed connection to the gateway for one identity.
#[derive(Debug)]
pub struct GatewayConnection {
    state_rx: watch::Receiver<ConnState>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl GatewayConnection {
    /// Connects to the gateway and starts the management task.
    ///
    /// Requests are decoded off the link and served by `handler`. Only this
    /// first attempt's failure is returned; once connected, losses are
    /// handled by reconnection.
    ///
    /// # Errors
    ///
    /// Returns the underlying connect, upgrade, or authentication error.
    pub async fn connect(
        config: Arc<ReceiverConfig>,
        identity: Arc<Identity>,
        handler: Arc<dyn HttpHandler>,
    ) -> anyhow::Result<Self> {
        let (state_tx, state_rx) = watch::channel(ConnState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let first = establish_session(&config, &identity)
            .await
            .map_err(GatewayError::into_inner)?;
        info!(did = %identity.did, gateway = %config.gateway_url, "connected to gateway");

        let adapter = Arc::new(RequestAdapter::new(handler));
        let task = tokio::spawn(run_manager(
            config,
            identity,
            adapter,
            first,
            state_tx,
            shutdown_rx,
        ));
        Ok(Self {
            state_rx,
            shutdown_tx,
            task,
        })
    }

    /// Returns a watcher over the connection state. Late subscribers see the
    /// latest value immediately.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ConnState> {
        self.state_rx.clone()
    }

    /// The connection state right now.
    #[must_use]
    pub fn current_state(&self) -> ConnState {
        *self.state_rx.borrow()
    }

    /// Signals shutdown and waits for the manager task to finish.
    ///
    /// A task that does not stop within [`STOP_TIMEOUT`] is aborted.
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(true);
        if tokio::time::timeout(STOP_TIMEOUT, &mut self.task).await.is_err() {
            warn!("gateway connection did not stop in time, aborting");
            self.task.abort();
        }
    }
}

async fn run_manager(
    config: Arc<ReceiverConfig>,
    identity: Arc<Identity>,
    adapter: Arc<RequestAdapter>,
    first: Session,
    state_tx: watch::Sender<ConnState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = ExponentialBackoff::new(
        Duration::from_millis(config.reconnect.initial_delay_ms),
        Duration::from_millis(config.reconnect.max_delay_ms),
        config.reconnect.backoff_factor,
    );
    let mut attempts: u32 = 0;
    let mut session = Some(first);

    loop {
        let outcome = match session.take() {
            Some(ready) => {
                state_tx.send_replace(ConnState::Connected);
                run_session(&config, &adapter, ready, &mut shutdown_rx).await
            }
            None => match establish_session(&config, &identity).await {
                Ok(ready) => {
                    attempts = 0;
                    backoff.reset();
                    info!(did = %identity.did, "reconnected to gateway");
                    state_tx.send_replace(ConnState::Connected);
                    run_session(&config, &adapter, ready, &mut shutdown_rx).await
                }
                Err(e) => Err(e),
            },
        };

        match outcome {
            Ok(()) => {
                info!("gateway connection stopped");
                state_tx.send_replace(ConnState::Disconnected);
                return;
            }
            Err(GatewayError::Fatal(e)) => {
                error!(error = %e, "fatal gateway error, not retrying");
                state_tx.send_replace(ConnState::Failed);
                return;
            }
            Err(GatewayError::Transient(e)) => {
                attempts += 1;
                if attempts > config.reconnect.max_attempts {
                    error!(error = %e, "reconnect attempts exhausted, giving up");
                    state_tx.send_replace(ConnState::Failed);
                    return;
                }
                warn!(
                    error = %e,
                    attempt = attempts,
                    max_attempts = config.reconnect.max_attempts,
                    "gateway connection lost"
                );
                state_tx.send_replace(ConnState::Reconnecting);
            }
        }

        let delay = backoff.next_delay();
        info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "reconnecting"
        );
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow_and_update() {
                    state_tx.send_replace(ConnState::Disconnected);
                    return;
                }
            }
        }
    }
}

/// Opens the WebSocket, authenticating the upgrade with a freshly built
/// DID-WBA header so every attempt carries a new nonce and timestamp, and
/// announces readiness to the gateway.
async fn establish_session(
    config: &ReceiverConfig,
    identity: &Identity,
) -> Result<Session, GatewayError> {
    let mut request = config
        .gateway_url
        .as_str()
        .into_client_request()
        .map_err(|e| GatewayError::Fatal(e.into()))?;
    let domain = request
        .uri()
        .host()
        .ok_or_else(|| GatewayError::Fatal(anyhow::anyhow!("gateway URL has no host")))?
        .to_string();
    let header = build_auth_header(identity, &domain)
        .map_err(|e| GatewayError::Fatal(anyhow::Error::new(e).context("building auth header")))?;
    request.headers_mut().insert(
        "Authorization",
        header.parse().map_err(|e| {
            GatewayError::Fatal(anyhow::Error::new(e).context("auth header not a valid header value"))
        })?,
    );

    let (ws, response) = connect_async(request).await.map_err(classify_connect_error)?;
    debug!(status = %response.status(), "websocket upgrade accepted");
    let (mut ws_tx, ws_rx) = ws.split();

    let ready = ReceiverReply::connection_ready()
        .to_json()
        .map_err(|e| GatewayError::Fatal(e.into()))?;
    ws_tx
        .send(Message::Text(ready))
        .await
        .map_err(|e| GatewayError::Transient(e.into()))?;

    Ok(Session { ws_tx, ws_rx })
}

fn classify_connect_error(e: tokio_tungstenite::tungstenite::Error) -> GatewayError {
    use tokio_tungstenite::tungstenite::Error as WsError;

    // 401/403 on the upgrade means our credentials were examined and turned
    // down; retrying with the same identity cannot succeed.
    let rejected = matches!(
        &e,
        WsError::Http(response) if response.status().as_u16() == 401 || response.status().as_u16() == 403
    );
    if rejected {
        GatewayError::Fatal(anyhow::Error::new(e).context("gateway rejected credentials"))
    } else {
        GatewayError::Transient(e.into())
    }
}

async fn run_session(
    config: &ReceiverConfig,
    adapter: &Arc<RequestAdapter>,
    session: Session,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<(), GatewayError> {
    let Session {
        mut ws_tx,
        mut ws_rx,
    } = session;

    let (outbox_tx, mut outbox_rx) = mpsc::channel::<Message>(config.outbox_capacity);
    let mut router = MessageRouter::new(config, Arc::clone(adapter), outbox_tx.clone());
    let pong = Arc::new(Notify::new());
    let mut keepalive = tokio::spawn(keepalive_loop(
        Duration::from_secs(config.ping_interval_s),
        Duration::from_secs(config.pong_timeout_s),
        outbox_tx.clone(),
        Arc::clone(&pong),
    ));

    let result = loop {
        tokio::select! {
            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => break Err(GatewayError::Transient(e.into())),
                    None => break Err(GatewayError::Transient(anyhow::anyhow!("connection closed"))),
                };
                match msg {
                    Message::Binary(data) => router.ingest(&data).await,
                    Message::Text(text) => {
                        // Replied on the sink directly: queueing through the
                        // outbox from the task that drains it could deadlock.
                        let Some(command) = control::parse_command(&text) else {
                            continue;
                        };
                        if let Some(reply) = build_control_reply(command, config) {
                            if let Err(e) = ws_tx.send(Message::Text(reply)).await {
                                break Err(GatewayError::Transient(e.into()));
                            }
                        }
                    }
                    Message::Ping(data) => {
                        if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                            break Err(GatewayError::Transient(e.into()));
                        }
                    }
                    Message::Pong(_) => pong.notify_one(),
                    Message::Close(frame) => {
                        debug!(?frame, "gateway closed the connection");
                        break Err(GatewayError::Transient(anyhow::anyhow!("closed by gateway")));
                    }
                    _ => {}
                }
            }

            outbound = outbox_rx.recv() => {
                // outbox_tx lives in this scope, so recv never yields None
                let Some(frame) = outbound else {
                    break Err(GatewayError::Transient(anyhow::anyhow!("outbox closed")));
                };
                if let Err(e) = ws_tx.send(frame).await {
                    break Err(GatewayError::Transient(e.into()));
                }
            }

            failure = &mut keepalive => {
                let error = failure.unwrap_or_else(|join_error| {
                    anyhow::anyhow!("keepalive task failed: {join_error}")
                });
                break Err(GatewayError::Transient(error));
            }

            changed = shutdown_rx.changed() => {
                // Err means the handle was dropped; stop serving.
                if changed.is_err() || *shutdown_rx.borrow_and_update() {
                    info!("closing gateway connection");
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break Ok(());
                }
            }
        }
    };

    keepalive.abort();
    result
}

/// Sends a WebSocket ping every `interval` and requires a pong within
/// `pong_timeout`. Returns the error that ended the loop.
async fn keepalive_loop(
    interval: Duration,
    pong_timeout: Duration,
    outbox: mpsc::Sender<Message>,
    pong: Arc<Notify>,
) -> anyhow::Error {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if outbox.send(Message::Ping(Vec::new())).await.is_err() {
            return anyhow::anyhow!("outbox closed");
        }
        match tokio::time::timeout(pong_timeout, pong.notified()).await {
            Ok(()) => debug!("pong received"),
            Err(_) => return anyhow::anyhow!("no pong within {pong_timeout:?}"),
        }
    }
}

fn build_control_reply(command: GatewayCommand, config: &ReceiverConfig) -> Option<String> {
    let reply = match command {
        GatewayCommand::ServiceCapabilityRequest { request_id } => {
            info!(services = ?config.advertised_services, "answering capability request");
            ReceiverReply::capabilities(
                request_id,
                config.advertised_services.clone(),
                config.max_concurrent_requests,
            )
        }
        GatewayCommand::HealthCheckRequest { request_id } => {
            debug!("answering health check");
            ReceiverReply::healthy(
                request_id,
                HealthDetails {
                    connected: true,
                    running: true,
                    handler_ready: true,
                },
            )
        }
        GatewayCommand::ServiceAssignment {
            request_id,
            assigned_services,
        } => {
            info!(services = ?assigned_services, "accepting service assignment");
            ReceiverReply::assignment_accepted(request_id, assigned_services)
        }
    };
    match reply.to_json() {
        Ok(text) => Some(text),
        Err(e) => {
            error!(error = %e, "failed to serialize control reply");
            None
        }
    }
}
