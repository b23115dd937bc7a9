//! Fakes compartidos por los tests del crate.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::model::id::{GuildId, UserId};
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::broadcast;

use super::{
    autoplay::AutoplayResolver,
    node::{LinkState, NodeCommand, NodeLink},
    player::{Session, SessionConfig, SessionNotice, SessionServices},
};
use crate::{
    error::{NodeError, StorageError},
    sources::{MockTrackResolver, SourceType, Track},
    storage::{GuildSettings, GuildStore},
};

pub fn track(id: &str) -> Track {
    Track::new(
        id,
        format!("Song {id}"),
        format!("https://example.com/{id}"),
        SourceType::YouTube,
        UserId::new(1),
    )
    .with_author("Artist")
    .with_duration(Duration::from_secs(180))
}

/// Nodo que registra los comandos aceptados
pub struct RecordingNode {
    name: String,
    state: Mutex<LinkState>,
    commands: Mutex<Vec<(GuildId, NodeCommand)>>,
    reject_plays: AtomicBool,
    rejected_tracks: Mutex<HashSet<String>>,
}

impl RecordingNode {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(LinkState::Ready),
            commands: Mutex::new(Vec::new()),
            reject_plays: AtomicBool::new(false),
            rejected_tracks: Mutex::new(HashSet::new()),
        }
    }

    pub fn set_state(&self, state: LinkState) {
        *self.state.lock() = state;
    }

    pub fn reject_plays(&self, reject: bool) {
        self.reject_plays.store(reject, Ordering::SeqCst);
    }

    /// Rechaza solo los plays del track `identifier`.
    pub fn reject_track(&self, identifier: &str) {
        self.rejected_tracks.lock().insert(identifier.to_string());
    }

    pub fn commands(&self) -> Vec<(GuildId, NodeCommand)> {
        self.commands.lock().clone()
    }

    pub fn last_command(&self) -> Option<NodeCommand> {
        self.commands.lock().last().map(|(_, command)| command.clone())
    }

    /// Identificadores de los tracks enviados a reproducir, en orden.
    pub fn played(&self) -> Vec<String> {
        self.plays().into_iter().map(|(id, _)| id).collect()
    }

    pub fn last_play(&self) -> Option<(String, u64)> {
        self.plays().pop()
    }

    fn plays(&self) -> Vec<(String, u64)> {
        self.commands
            .lock()
            .iter()
            .filter_map(|(_, command)| match command {
                NodeCommand::Play(request) => {
                    Some((request.track.identifier().to_string(), request.start_ms))
                }
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl NodeLink for RecordingNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> LinkState {
        *self.state.lock()
    }

    async fn send(&self, guild_id: GuildId, command: NodeCommand) -> Result<(), NodeError> {
        if !self.state().is_ready() {
            return Err(NodeError::NotReady);
        }
        let rejected = match &command {
            NodeCommand::Play(request) => {
                self.reject_plays.load(Ordering::SeqCst)
                    || self
                        .rejected_tracks
                        .lock()
                        .contains(request.track.identifier())
            }
            _ => false,
        };
        if rejected {
            return Err(NodeError::Rejected {
                status: 400,
                message: "track could not be decoded".to_string(),
            });
        }
        self.commands.lock().push((guild_id, command));
        Ok(())
    }
}

/// Almacenamiento en memoria
#[derive(Default)]
pub struct MemoryStore {
    playlists: DashMap<(GuildId, String), Vec<Track>>,
    settings: DashMap<GuildId, GuildSettings>,
}

#[async_trait]
impl GuildStore for MemoryStore {
    async fn save_queue_snapshot(
        &self,
        guild_id: GuildId,
        name: &str,
        tracks: Vec<Track>,
    ) -> Result<(), StorageError> {
        self.playlists.insert((guild_id, name.to_string()), tracks);
        Ok(())
    }

    async fn load_queue_snapshot(
        &self,
        guild_id: GuildId,
        name: &str,
    ) -> Result<Vec<Track>, StorageError> {
        self.playlists
            .get(&(guild_id, name.to_string()))
            .map(|tracks| tracks.clone())
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    async fn list_snapshots(&self, guild_id: GuildId) -> Result<Vec<String>, StorageError> {
        let mut names: Vec<String> = self
            .playlists
            .iter()
            .filter(|entry| entry.key().0 == guild_id)
            .map(|entry| entry.key().1.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn delete_snapshot(&self, guild_id: GuildId, name: &str) -> Result<(), StorageError> {
        self.playlists
            .remove(&(guild_id, name.to_string()))
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    async fn load_settings(&self, guild_id: GuildId) -> Result<Option<GuildSettings>, StorageError> {
        Ok(self.settings.get(&guild_id).map(|s| *s))
    }

    async fn save_settings(
        &self,
        guild_id: GuildId,
        settings: GuildSettings,
    ) -> Result<(), StorageError> {
        self.settings.insert(guild_id, settings);
        Ok(())
    }
}

pub fn services(resolver: MockTrackResolver, store: Arc<dyn GuildStore>) -> SessionServices {
    let (notices, _) = broadcast::channel(64);
    SessionServices {
        autoplay: AutoplayResolver::new(Arc::new(resolver), Duration::from_secs(1)),
        store,
        notices,
    }
}

/// Sesión lista para tests sobre un [`RecordingNode`]
pub struct TestHarness {
    pub session: Session,
    pub node: Arc<RecordingNode>,
    pub notices: broadcast::Sender<SessionNotice>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::build(
            RecordingNode::new("main"),
            MockTrackResolver::new(),
            Arc::new(MemoryStore::default()),
        )
    }

    pub fn with_resolver(resolver: MockTrackResolver) -> Self {
        Self::build(
            RecordingNode::new("main"),
            resolver,
            Arc::new(MemoryStore::default()),
        )
    }

    pub fn with_store(store: impl GuildStore + 'static) -> Self {
        Self::build(RecordingNode::new("main"), MockTrackResolver::new(), Arc::new(store))
    }

    pub fn with_node(node: RecordingNode) -> Self {
        Self::build(node, MockTrackResolver::new(), Arc::new(MemoryStore::default()))
    }

    fn build(node: RecordingNode, resolver: MockTrackResolver, store: Arc<dyn GuildStore>) -> Self {
        let node = Arc::new(node);
        let services = services(resolver, store);
        let notices = services.notices.clone();
        let session = Session::new(
            GuildId::new(42),
            node.clone(),
            GuildSettings::with_volume(50),
            SessionConfig::default(),
            services,
        );
        Self {
            session,
            node,
            notices,
        }
    }
}
