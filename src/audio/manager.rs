//! Registry of live sessions and the router that feeds node events to them.
//!
//! Each guild gets one task that owns its [`Session`] and drains a bounded
//! inbox. Commands carry a oneshot for the reply; a session that is closing
//! hands undelivered commands back so the caller can retry against a fresh
//! session.

use dashmap::{mapref::entry::Entry, DashMap};
use serenity::model::id::GuildId;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    node::{NodeEnvelope, NodeEvent, NodeHealth, NodeLink, PlayerEvent},
    player::{
        validate_playlist_name, CommandOutcome, Session, SessionCommand, SessionConfig,
        SessionFlow, SessionNotice, SessionServices, SessionSnapshot,
    },
};
use crate::{
    error::{PlayerError, PlayerResult},
    storage::GuildSettings,
};

const INBOX_CAPACITY: usize = 64;
const MAX_DELIVERY_ATTEMPTS: usize = 3;

enum SessionInput {
    Command {
        command: SessionCommand,
        reply: oneshot::Sender<Reply>,
    },
    Player(PlayerEvent),
    LinkUp,
    LinkDown,
    IdleCheck(u64),
}

enum Reply {
    Done(PlayerResult<CommandOutcome>),
    /// La sesión se cerró antes de procesar el comando.
    Rejected(SessionCommand),
}

#[derive(Clone)]
struct SessionHandle {
    id: u64,
    node: String,
    tx: mpsc::Sender<SessionInput>,
}

type Registry = Arc<DashMap<GuildId, SessionHandle>>;

pub struct SessionManager {
    sessions: Registry,
    nodes: Vec<Arc<dyn NodeLink>>,
    services: SessionServices,
    config: SessionConfig,
    next_id: AtomicU64,
}

impl SessionManager {
    pub fn new(
        nodes: Vec<Arc<dyn NodeLink>>,
        services: SessionServices,
        config: SessionConfig,
    ) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            nodes,
            services,
            config,
            next_id: AtomicU64::new(1),
        }
    }

    /// Ejecuta un comando en la sesión del servidor, creándola si el comando
    /// lo permite.
    pub async fn execute(
        &self,
        guild_id: GuildId,
        command: SessionCommand,
    ) -> PlayerResult<CommandOutcome> {
        let mut command = command;

        for _ in 0..MAX_DELIVERY_ATTEMPTS {
            let existing = self.sessions.get(&guild_id).map(|h| h.clone());
            let handle = match existing {
                Some(handle) => handle,
                None if command.creates_session() => self.spawn_session(guild_id).await?,
                None => return self.execute_detached(guild_id, command).await,
            };

            let (reply_tx, reply_rx) = oneshot::channel();
            let input = SessionInput::Command {
                command,
                reply: reply_tx,
            };
            if let Err(mpsc::error::SendError(input)) = handle.tx.send(input).await {
                self.sessions.remove_if(&guild_id, |_, h| h.id == handle.id);
                let SessionInput::Command { command: returned, .. } = input else {
                    return Err(PlayerError::SessionClosed);
                };
                command = returned;
                continue;
            }

            match reply_rx.await {
                Ok(Reply::Done(result)) => return result,
                Ok(Reply::Rejected(returned)) => {
                    debug!("Sesión de {} cerrándose, reintentando {}", guild_id, returned.name());
                    command = returned;
                }
                Err(_) => return Err(PlayerError::SessionClosed),
            }
        }

        Err(PlayerError::SessionClosed)
    }

    pub async fn status(&self, guild_id: GuildId) -> PlayerResult<SessionSnapshot> {
        match self.execute(guild_id, SessionCommand::Status).await? {
            CommandOutcome::Status(snapshot) => Ok(*snapshot),
            _ => Err(PlayerError::NoSession),
        }
    }

    /// Playlists guardadas se gestionan aunque no haya sesión activa.
    async fn execute_detached(
        &self,
        guild_id: GuildId,
        command: SessionCommand,
    ) -> PlayerResult<CommandOutcome> {
        let store = &self.services.store;
        match command {
            SessionCommand::ListPlaylists => {
                Ok(CommandOutcome::Playlists(store.list_snapshots(guild_id).await?))
            }
            SessionCommand::DeletePlaylist(name) => {
                validate_playlist_name(&name)?;
                store.delete_snapshot(guild_id, &name).await?;
                Ok(CommandOutcome::PlaylistDeleted(name))
            }
            _ => Err(PlayerError::NoSession),
        }
    }

    async fn spawn_session(&self, guild_id: GuildId) -> PlayerResult<SessionHandle> {
        let node = self.pick_node().ok_or(PlayerError::NotReady)?;

        let settings = match self.services.store.load_settings(guild_id).await {
            Ok(Some(settings)) => settings,
            Ok(None) => GuildSettings::with_volume(self.config.default_volume),
            Err(e) => {
                warn!("⚠️ Ajustes de {} ilegibles, usando los de defecto: {}", guild_id, e);
                GuildSettings::with_volume(self.config.default_volume)
            }
        };

        let handle = match self.sessions.entry(guild_id) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
                let handle = SessionHandle {
                    id,
                    node: node.name().to_string(),
                    tx: tx.clone(),
                };
                let session = Session::new(
                    guild_id,
                    node,
                    settings,
                    self.config.clone(),
                    self.services.clone(),
                );

                info!("🎧 Nueva sesión para guild {} en nodo {}", guild_id, handle.node);
                tokio::spawn(run_session(
                    session,
                    rx,
                    tx.downgrade(),
                    self.sessions.clone(),
                    id,
                ));
                entry.insert(handle.clone());
                handle
            }
        };
        Ok(handle)
    }

    /// Prefiere un nodo listo; si ninguno lo está, la sesión nace desconectada.
    fn pick_node(&self) -> Option<Arc<dyn NodeLink>> {
        self.nodes
            .iter()
            .find(|node| node.state().is_ready())
            .or_else(|| self.nodes.first())
            .cloned()
    }

    /// Entrega un evento de nodo a las sesiones afectadas.
    pub async fn route(&self, envelope: NodeEnvelope) {
        let NodeEnvelope { node, event } = envelope;
        match event {
            NodeEvent::Player { guild_id, event } => {
                let handle = self.sessions.get(&guild_id).map(|h| h.clone());
                match handle {
                    Some(handle) if handle.node == node => {
                        let sent = handle.tx.send(SessionInput::Player(event)).await;
                        if let Err(mpsc::error::SendError(SessionInput::Player(event))) = sent {
                            debug!("Sesión de {} cerrándose, evento descartado: {:?}", guild_id, event);
                        }
                    }
                    Some(_) => debug!("Evento de {} para guild {} en otro nodo", node, guild_id),
                    None => debug!("Evento de {} para guild {} sin sesión", node, guild_id),
                }
            }
            NodeEvent::Ready { resumed } => {
                debug!("Nodo {} listo (resumed={}), reanudando sesiones", node, resumed);
                self.broadcast_link(&node, || SessionInput::LinkUp).await;
            }
            NodeEvent::Closed { code, reason } => {
                debug!("Nodo {} cerrado ({:?}: {})", node, code, reason);
                self.broadcast_link(&node, || SessionInput::LinkDown).await;
            }
        }
    }

    async fn broadcast_link(&self, node: &str, input: impl Fn() -> SessionInput) {
        let handles: Vec<(GuildId, SessionHandle)> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().node == node)
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        for (guild_id, handle) in handles {
            if handle.tx.send(input()).await.is_err() {
                debug!("Sesión de {} cerrándose, aviso de enlace de {} descartado", guild_id, node);
            }
        }
    }

    /// Bucle del router: consume los sobres de todos los nodos.
    pub async fn run_events(
        self: Arc<Self>,
        mut events: mpsc::Receiver<NodeEnvelope>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                envelope = events.recv() => match envelope {
                    Some(envelope) => self.route(envelope).await,
                    None => break,
                },
            }
        }
        debug!("Router de eventos detenido");
    }

    pub fn notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.services.notices.subscribe()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn health(&self) -> Vec<NodeHealth> {
        self.nodes.iter().map(|node| node.health()).collect()
    }

    /// Destruye todas las sesiones activas.
    pub async fn shutdown_all(&self) {
        let guilds: Vec<GuildId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        info!("🛑 Cerrando {} sesiones", guilds.len());

        for guild_id in guilds {
            if let Err(e) = self.execute(guild_id, SessionCommand::Leave).await {
                debug!("Sesión de {} ya cerrada: {}", guild_id, e);
            }
        }
    }
}

async fn run_session(
    mut session: Session,
    mut inbox: mpsc::Receiver<SessionInput>,
    weak: mpsc::WeakSender<SessionInput>,
    sessions: Registry,
    id: u64,
) {
    let guild_id = session.guild_id();

    while let Some(input) = inbox.recv().await {
        let flow = match input {
            SessionInput::Command { command, reply } => {
                let name = command.name();
                let (result, flow) = session.execute(command).await;
                if let Err(e) = &result {
                    debug!("Comando {} en {} rechazado: {}", name, guild_id, e);
                }
                let _ = reply.send(Reply::Done(result));
                flow
            }
            SessionInput::Player(event) => session.on_player_event(event).await,
            SessionInput::LinkUp => {
                session.link_up().await;
                SessionFlow::Continue
            }
            SessionInput::LinkDown => {
                session.link_down();
                SessionFlow::Continue
            }
            SessionInput::IdleCheck(generation) => session.idle_check(generation).await,
        };

        if let Some((generation, delay)) = session.take_idle_request() {
            schedule_idle_check(weak.clone(), generation, delay);
        }
        if flow == SessionFlow::Teardown {
            break;
        }
    }

    sessions.remove_if(&guild_id, |_, handle| handle.id == id);
    inbox.close();
    while let Ok(input) = inbox.try_recv() {
        if let SessionInput::Command { command, reply } = input {
            let _ = reply.send(Reply::Rejected(command));
        }
    }
    info!("🛑 Sesión de guild {} cerrada", guild_id);
}

fn schedule_idle_check(inbox: mpsc::WeakSender<SessionInput>, generation: u64, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Some(tx) = inbox.upgrade() {
            let _ = tx.send(SessionInput::IdleCheck(generation)).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{
            node::TrackEndReason,
            player::PlaybackState,
            testing::{services, track, MemoryStore, RecordingNode},
        },
        error::ValidationError,
        sources::MockTrackResolver,
    };
    use pretty_assertions::assert_eq;

    fn guild() -> GuildId {
        GuildId::new(7)
    }

    fn manager_with(node: Arc<RecordingNode>, config: SessionConfig) -> SessionManager {
        SessionManager::new(
            vec![node as Arc<dyn NodeLink>],
            services(MockTrackResolver::new(), Arc::new(MemoryStore::default())),
            config,
        )
    }

    fn manager(node: Arc<RecordingNode>) -> SessionManager {
        manager_with(node, SessionConfig::default())
    }

    async fn wait_until_gone(manager: &SessionManager) {
        for _ in 0..100 {
            if manager.session_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session was not torn down");
    }

    #[tokio::test]
    async fn commands_without_session_are_rejected() {
        let manager = manager(Arc::new(RecordingNode::new("main")));
        let result = manager.execute(guild(), SessionCommand::Skip).await;
        assert!(matches!(result, Err(PlayerError::NoSession)));
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn enqueue_creates_a_session() {
        let node = Arc::new(RecordingNode::new("main"));
        let manager = manager(node.clone());

        let outcome = manager
            .execute(guild(), SessionCommand::Enqueue(track("a")))
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Started(track("a")));
        assert_eq!(manager.session_count(), 1);

        let status = manager.status(guild()).await.unwrap();
        assert_eq!(status.state, PlaybackState::Playing);
        assert_eq!(status.node, "main");
        assert_eq!(manager.health()[0].state, crate::audio::node::LinkState::Ready);
        assert_eq!(node.commands()[0].0, guild());
    }

    #[tokio::test]
    async fn routed_track_end_advances_the_queue() {
        let node = Arc::new(RecordingNode::new("main"));
        let manager = manager(node.clone());
        manager.execute(guild(), SessionCommand::Enqueue(track("a"))).await.unwrap();
        manager.execute(guild(), SessionCommand::Enqueue(track("b"))).await.unwrap();
        let play_id = manager.status(guild()).await.unwrap().play_id;
        assert!(play_id.is_some());

        manager
            .route(NodeEnvelope {
                node: "main".to_string(),
                event: NodeEvent::Player {
                    guild_id: guild(),
                    event: PlayerEvent::TrackEnded {
                        play_id,
                        reason: TrackEndReason::Finished,
                    },
                },
            })
            .await;

        let status = manager.status(guild()).await.unwrap();
        assert_eq!(status.current.map(|t| t.identifier().to_string()), Some("b".to_string()));
        assert_eq!(node.played(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn concurrent_skips_are_applied_in_turn() {
        let node = Arc::new(RecordingNode::new("main"));
        let manager = manager(node.clone());
        for id in ["a", "b", "c"] {
            manager.execute(guild(), SessionCommand::Enqueue(track(id))).await.unwrap();
        }

        let (first, second) = tokio::join!(
            manager.execute(guild(), SessionCommand::Skip),
            manager.execute(guild(), SessionCommand::Skip)
        );
        assert!(matches!(first, Ok(CommandOutcome::Skipped { .. })));
        assert!(matches!(second, Ok(CommandOutcome::Skipped { .. })));

        let status = manager.status(guild()).await.unwrap();
        assert_eq!(node.played(), vec!["a", "b", "c"]);
        assert_eq!(status.current.map(|t| t.identifier().to_string()), Some("c".to_string()));
        assert!(status.queue.is_empty());
    }

    #[tokio::test]
    async fn recreated_session_ignores_events_from_the_previous_one() {
        let node = Arc::new(RecordingNode::new("main"));
        let manager = manager(node.clone());
        manager.execute(guild(), SessionCommand::Enqueue(track("a"))).await.unwrap();
        let old_play = manager.status(guild()).await.unwrap().play_id;
        manager.execute(guild(), SessionCommand::Leave).await.unwrap();
        wait_until_gone(&manager).await;

        manager.execute(guild(), SessionCommand::Enqueue(track("b"))).await.unwrap();
        manager.execute(guild(), SessionCommand::Enqueue(track("c"))).await.unwrap();
        let new_play = manager.status(guild()).await.unwrap().play_id;
        assert_ne!(old_play, new_play);

        manager
            .route(NodeEnvelope {
                node: "main".to_string(),
                event: NodeEvent::Player {
                    guild_id: guild(),
                    event: PlayerEvent::TrackEnded {
                        play_id: old_play,
                        reason: TrackEndReason::Finished,
                    },
                },
            })
            .await;

        let status = manager.status(guild()).await.unwrap();
        assert_eq!(status.current.map(|t| t.identifier().to_string()), Some("b".to_string()));
        assert_eq!(node.played(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn link_events_reach_sessions_on_that_node() {
        let node = Arc::new(RecordingNode::new("main"));
        let manager = manager(node.clone());
        manager.execute(guild(), SessionCommand::Enqueue(track("a"))).await.unwrap();

        let closed = NodeEnvelope {
            node: "main".to_string(),
            event: NodeEvent::Closed {
                code: Some(1006),
                reason: "gone".to_string(),
            },
        };
        manager.route(closed).await;
        assert_eq!(
            manager.status(guild()).await.unwrap().state,
            PlaybackState::Disconnected
        );

        let other = NodeEnvelope {
            node: "backup".to_string(),
            event: NodeEvent::Ready { resumed: false },
        };
        manager.route(other).await;
        assert_eq!(
            manager.status(guild()).await.unwrap().state,
            PlaybackState::Disconnected
        );

        let ready = NodeEnvelope {
            node: "main".to_string(),
            event: NodeEvent::Ready { resumed: false },
        };
        manager.route(ready).await;
        assert_eq!(manager.status(guild()).await.unwrap().state, PlaybackState::Playing);
        assert_eq!(node.played(), vec!["a", "a"]);
    }

    #[tokio::test]
    async fn leave_removes_the_session_and_next_enqueue_starts_fresh() {
        let node = Arc::new(RecordingNode::new("main"));
        let manager = manager(node.clone());
        let mut notices = manager.notices();
        manager.execute(guild(), SessionCommand::Enqueue(track("a"))).await.unwrap();
        manager.execute(guild(), SessionCommand::Enqueue(track("b"))).await.unwrap();

        assert_eq!(
            manager.execute(guild(), SessionCommand::Leave).await.unwrap(),
            CommandOutcome::Left
        );
        wait_until_gone(&manager).await;

        let mut left = false;
        while let Ok(notice) = notices.try_recv() {
            left |= matches!(notice, SessionNotice::LeaveVoice { .. });
        }
        assert!(left);

        let outcome = manager
            .execute(guild(), SessionCommand::Enqueue(track("c")))
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Started(track("c")));
        assert!(manager.status(guild()).await.unwrap().queue.is_empty());
    }

    #[tokio::test]
    async fn idle_sessions_are_torn_down() {
        let node = Arc::new(RecordingNode::new("main"));
        let config = SessionConfig {
            idle_disconnect_after: Duration::from_millis(20),
            ..SessionConfig::default()
        };
        let manager = manager_with(node.clone(), config);
        manager.execute(guild(), SessionCommand::Enqueue(track("a"))).await.unwrap();
        manager.execute(guild(), SessionCommand::Stop).await.unwrap();

        wait_until_gone(&manager).await;
        assert!(matches!(
            node.last_command(),
            Some(crate::audio::node::NodeCommand::Destroy)
        ));
    }

    #[tokio::test]
    async fn playlists_are_managed_without_a_session() {
        let manager = manager(Arc::new(RecordingNode::new("main")));

        assert_eq!(
            manager.execute(guild(), SessionCommand::ListPlaylists).await.unwrap(),
            CommandOutcome::Playlists(Vec::new())
        );
        let invalid = manager
            .execute(guild(), SessionCommand::DeletePlaylist("a b".into()))
            .await;
        assert!(matches!(
            invalid,
            Err(PlayerError::Validation(ValidationError::InvalidPlaylistName(_)))
        ));
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn no_nodes_means_not_ready() {
        let manager = SessionManager::new(
            Vec::new(),
            services(MockTrackResolver::new(), Arc::new(MemoryStore::default())),
            SessionConfig::default(),
        );
        let result = manager
            .execute(guild(), SessionCommand::Enqueue(track("a")))
            .await;
        assert!(matches!(result, Err(PlayerError::NotReady)));
    }
}
