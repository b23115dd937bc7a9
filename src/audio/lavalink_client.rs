use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use reqwest::{header::AUTHORIZATION, Response};
use serenity::model::id::{GuildId, UserId};
use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
    MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{
    lavalink_protocol::{ErrorResponse, IncomingOp, LoadResult},
    node::{
        LinkState, NodeCommand, NodeEnvelope, NodeEvent, NodeHealth, NodeLink, PlayerEvent,
        ReconnectPolicy,
    },
};
use crate::{config::NodeConfig, error::NodeError};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const REST_TIMEOUT: Duration = Duration::from_secs(10);

/// Credenciales comunes a todos los nodos
#[derive(Debug, Clone)]
pub struct NodeCredentials {
    pub password: String,
    pub user_id: UserId,
    pub client_name: String,
}

/// Cómo terminó una conexión websocket
#[derive(Debug)]
struct LinkClosed {
    code: Option<u16>,
    reason: String,
}

/// Enlace con un nodo Lavalink v4.
///
/// Un único supervisor (`run`) es dueño de la conexión websocket: conecta,
/// bombea eventos y, cuando se cae, espera el intervalo fijo y reintenta.
/// Los comandos de sesión salen por REST usando el `sessionId` del último
/// `ready`.
pub struct LavalinkNode {
    name: String,
    rest_base: String,
    ws_url: String,
    credentials: NodeCredentials,
    http: reqwest::Client,
    state: watch::Sender<LinkState>,
    session_id: RwLock<Option<String>>,
    failed_attempts: AtomicU32,
    policy: ReconnectPolicy,
}

impl LavalinkNode {
    pub fn new(
        node: &NodeConfig,
        credentials: NodeCredentials,
        policy: ReconnectPolicy,
    ) -> Result<Self, NodeError> {
        let http = reqwest::Client::builder().timeout(REST_TIMEOUT).build()?;
        let (state, _) = watch::channel(LinkState::Connecting);

        Ok(Self {
            name: node.name.clone(),
            rest_base: node.uri.as_str().trim_end_matches('/').to_string(),
            ws_url: websocket_url(&node.uri)?,
            credentials,
            http,
            state,
            session_id: RwLock::new(None),
            failed_attempts: AtomicU32::new(0),
            policy,
        })
    }

    /// Espera a que el enlace esté `Ready`. Devuelve `false` si vence el plazo.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let mut rx = self.state.subscribe();
        let ready = matches!(
            tokio::time::timeout(timeout, rx.wait_for(LinkState::is_ready)).await,
            Ok(Ok(_))
        );
        ready
    }

    /// `GET /v4/loadtracks`. No requiere sesión websocket.
    pub async fn load_tracks(&self, identifier: &str) -> Result<LoadResult, NodeError> {
        let url = format!("{}/v4/loadtracks", self.rest_base);
        let response = self
            .http
            .get(&url)
            .header(AUTHORIZATION, &self.credentials.password)
            .query(&[("identifier", identifier)])
            .send()
            .await?;

        let response = check_status(response).await?;
        Ok(response.json::<LoadResult>().await?)
    }

    /// Supervisor de conexión. Corre hasta `shutdown` o hasta agotar los
    /// reintentos configurados.
    pub async fn run(self: Arc<Self>, events: mpsc::Sender<NodeEnvelope>, shutdown: CancellationToken) {
        info!("🔌 Supervisor del nodo {} iniciado ({})", self.name, self.ws_url);

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.connect().await {
                Ok(ws) => {
                    debug!("🔗 Websocket abierto con {}", self.name);
                    let closed = self.pump(ws, &events, &shutdown).await;
                    let was_ready = self.state().is_ready();

                    self.session_id.write().take();
                    self.set_state(LinkState::Reconnecting);

                    if was_ready {
                        warn!(
                            "⚠️ Nodo {} desconectado (code {:?}): {}",
                            self.name, closed.code, closed.reason
                        );
                        self.emit(
                            &events,
                            NodeEvent::Closed {
                                code: closed.code,
                                reason: closed.reason,
                            },
                        )
                        .await;
                    }
                }
                Err(e) => {
                    let attempts = self.failed_attempts.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!("❌ Conexión al nodo {} falló (intento {}): {}", self.name, attempts, e);

                    if self.policy.is_degraded(attempts) {
                        error!("🚨 Nodo {} degradado tras {} intentos fallidos", self.name, attempts);
                    }
                    if !self.policy.should_retry(attempts) {
                        error!("🛑 Nodo {} agotó sus reintentos, se abandona", self.name);
                        break;
                    }
                    self.set_state(LinkState::Reconnecting);
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.policy.interval) => {}
            }
        }

        self.session_id.write().take();
        self.set_state(LinkState::Closed);
        info!("🔌 Supervisor del nodo {} detenido", self.name);
    }

    async fn connect(&self) -> Result<WsStream, NodeError> {
        let mut request = self.ws_url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert("Authorization", header_value(&self.credentials.password)?);
        headers.insert(
            "User-Id",
            header_value(&self.credentials.user_id.get().to_string())?,
        );
        headers.insert("Client-Name", header_value(&self.credentials.client_name)?);

        let (ws, response) = connect_async_with_config(request, None, false).await?;
        debug!("Websocket status: {:?}", response.status());
        Ok(ws)
    }

    async fn pump(
        &self,
        mut ws: WsStream,
        events: &mpsc::Sender<NodeEnvelope>,
        shutdown: &CancellationToken,
    ) -> LinkClosed {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = ws.close(None).await;
                    return LinkClosed { code: Some(1000), reason: "shutdown".to_string() };
                }
                msg = ws.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_text(text.as_str(), events).await,
                    Some(Ok(Message::Close(frame))) => {
                        return match frame {
                            Some(frame) => LinkClosed {
                                code: Some(u16::from(frame.code)),
                                reason: frame.reason.as_str().to_string(),
                            },
                            None => LinkClosed { code: None, reason: "closed".to_string() },
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return LinkClosed { code: None, reason: e.to_string() },
                    None => return LinkClosed { code: None, reason: "stream ended".to_string() },
                }
            }
        }
    }

    async fn handle_text(&self, text: &str, events: &mpsc::Sender<NodeEnvelope>) {
        let op = match serde_json::from_str::<IncomingOp>(text) {
            Ok(op) => op,
            Err(e) => {
                warn!("⚠️ Mensaje inválido de {}: {}", self.name, e);
                return;
            }
        };

        match op {
            IncomingOp::Ready {
                resumed,
                session_id,
            } => {
                info!("✅ Nodo {} listo (sesión {}, resumed={})", self.name, session_id, resumed);
                *self.session_id.write() = Some(session_id);
                self.failed_attempts.store(0, Ordering::Relaxed);
                self.set_state(LinkState::Ready);
                self.emit(events, NodeEvent::Ready { resumed }).await;
            }
            IncomingOp::PlayerUpdate { guild_id, state } => {
                self.emit(
                    events,
                    NodeEvent::Player {
                        guild_id,
                        event: PlayerEvent::PositionUpdate {
                            position_ms: state.position,
                            connected: state.connected,
                        },
                    },
                )
                .await;
            }
            IncomingOp::Stats(stats) => {
                debug!(
                    "📊 {}: {} players ({} sonando), uptime {}s",
                    self.name,
                    stats.players,
                    stats.playing_players,
                    stats.uptime / 1000
                );
            }
            IncomingOp::Event(event) => {
                if let Some(event) = event.into_node_event() {
                    self.emit(events, event).await;
                }
            }
            IncomingOp::Unknown => debug!("Op desconocido de {}", self.name),
        }
    }

    async fn emit(&self, events: &mpsc::Sender<NodeEnvelope>, event: NodeEvent) {
        let envelope = NodeEnvelope {
            node: self.name.clone(),
            event,
        };
        if events.send(envelope).await.is_err() {
            debug!("Router de eventos cerrado, descartando evento de {}", self.name);
        }
    }

    fn set_state(&self, state: LinkState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                debug!("🔄 Nodo {}: {:?} → {:?}", self.name, current, state);
                *current = state;
                true
            }
        });
    }
}

#[async_trait]
impl NodeLink for LavalinkNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    fn health(&self) -> NodeHealth {
        let failed_attempts = self.failed_attempts.load(Ordering::Relaxed);
        NodeHealth {
            name: self.name.clone(),
            state: self.state(),
            failed_attempts,
            degraded: self.policy.is_degraded(failed_attempts),
        }
    }

    async fn send(&self, guild_id: GuildId, command: NodeCommand) -> Result<(), NodeError> {
        if !self.state().is_ready() {
            return Err(NodeError::NotReady);
        }
        let session_id = self.session_id.read().clone().ok_or(NodeError::NotReady)?;

        let url = format!(
            "{}/v4/sessions/{}/players/{}",
            self.rest_base,
            session_id,
            guild_id.get()
        );
        let request = match command.to_patch_body() {
            Some(body) => self.http.patch(&url).json(&body),
            None => self.http.delete(&url),
        };

        debug!("➡️ {} {} → guild {}", self.name, command.name(), guild_id);
        let response = request
            .header(AUTHORIZATION, &self.credentials.password)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: Response) -> Result<Response, NodeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(err) if !err.message.is_empty() => err.message,
        Ok(err) => err.error,
        Err(_) => body,
    };
    Err(NodeError::Rejected {
        status: status.as_u16(),
        message,
    })
}

fn header_value(value: &str) -> Result<HeaderValue, NodeError> {
    HeaderValue::from_str(value).map_err(|e| NodeError::Protocol(format!("invalid header: {e}")))
}

/// `http://host:2333/prefix` → `ws://host:2333/prefix/v4/websocket`
fn websocket_url(uri: &Url) -> Result<String, NodeError> {
    let scheme = match uri.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(NodeError::Protocol(format!(
                "unsupported node scheme `{other}`"
            )))
        }
    };
    let host = uri
        .host_str()
        .ok_or_else(|| NodeError::Protocol("node uri has no host".to_string()))?;

    let path = uri.path().trim_end_matches('/');

    Ok(match uri.port() {
        Some(port) => format!("{scheme}://{host}:{port}{path}/v4/websocket"),
        None => format!("{scheme}://{host}{path}/v4/websocket"),
    })
}
