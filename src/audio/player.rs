//! Per-guild playback session.
//!
//! A [`Session`] owns its queue and playback state and is driven by exactly
//! one task (see [`super::manager`]). Every command, node event and link
//! transition for the guild goes through `&mut self`, one at a time, so the
//! state machine never needs internal locking.
//!
//! ```text
//!   Idle ──play──▶ Playing ◀──resume/pause──▶ Paused
//!    ▲               │ track end + successor: Playing → Playing
//!    └── no successor┘
//!   any ──link down──▶ Disconnected ──link up──▶ Playing | Paused | Idle
//! ```

use serde::Serialize;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{
    autoplay::AutoplayResolver,
    effects::{ActiveFilters, FilterPreset},
    node::{NodeCommand, NodeLink, PlayRequest, PlayerEvent, VoiceServerInfo},
    queue::{LoopMode, MusicQueue, QueuePage},
};
use crate::{
    error::{NodeError, PlayerError, PlayerResult, ValidationError},
    sources::{ResolveError, Track},
    storage::{is_valid_playlist_name, GuildSettings, GuildStore},
};

/// Discord cerró la conexión de voz porque el bot fue desconectado del canal.
const VOICE_CLOSE_DISCONNECTED: u16 = 4014;

const QUEUE_PAGE_SIZE: usize = 10;

/// Ids de reproducción únicos en todo el proceso, así una sesión recreada
/// nunca acepta eventos de la anterior.
static NEXT_PLAY_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    Disconnected,
}

/// Límites y valores por defecto de las sesiones
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub default_volume: u8,
    pub max_queue_size: usize,
    /// Fallos consecutivos tras los cuales un track en loop se abandona.
    pub max_track_faults: u32,
    pub idle_disconnect_after: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_volume: 50,
            max_queue_size: 1000,
            max_track_faults: 3,
            idle_disconnect_after: Duration::from_secs(180),
        }
    }
}

/// Colaboradores compartidos por todas las sesiones
#[derive(Clone)]
pub struct SessionServices {
    pub autoplay: AutoplayResolver,
    pub store: Arc<dyn GuildStore>,
    pub notices: broadcast::Sender<SessionNotice>,
}

/// Comandos de usuario sobre una sesión
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Enqueue(Track),
    EnqueueMany(Vec<Track>),
    Skip,
    Stop,
    Pause,
    Resume,
    Seek(u64),
    SetVolume(i64),
    SetDefaultVolume(i64),
    SetFilter { name: String, enabled: bool },
    ClearFilters,
    SetLoop(LoopMode),
    CycleLoop,
    SetAutoplay(bool),
    SetStay(bool),
    /// Índice 0-based en la cola
    Remove(usize),
    Clear,
    Shuffle,
    Move { from: usize, to: usize },
    Status,
    /// Página 1-based de la cola
    ShowQueue(usize),
    Join(ChannelId),
    UpdateVoice(VoiceServerInfo),
    Leave,
    SavePlaylist(String),
    LoadPlaylist(String),
    ListPlaylists,
    DeletePlaylist(String),
}

impl SessionCommand {
    /// Comandos que crean la sesión si todavía no existe.
    pub fn creates_session(&self) -> bool {
        matches!(
            self,
            SessionCommand::Enqueue(_)
                | SessionCommand::EnqueueMany(_)
                | SessionCommand::Join(_)
                | SessionCommand::UpdateVoice(_)
                | SessionCommand::LoadPlaylist(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionCommand::Enqueue(_) => "enqueue",
            SessionCommand::EnqueueMany(_) => "enqueue_many",
            SessionCommand::Skip => "skip",
            SessionCommand::Stop => "stop",
            SessionCommand::Pause => "pause",
            SessionCommand::Resume => "resume",
            SessionCommand::Seek(_) => "seek",
            SessionCommand::SetVolume(_) => "volume",
            SessionCommand::SetDefaultVolume(_) => "default_volume",
            SessionCommand::SetFilter { .. } => "filter",
            SessionCommand::ClearFilters => "clear_filters",
            SessionCommand::SetLoop(_) => "loop",
            SessionCommand::CycleLoop => "cycle_loop",
            SessionCommand::SetAutoplay(_) => "autoplay",
            SessionCommand::SetStay(_) => "stay",
            SessionCommand::Remove(_) => "remove",
            SessionCommand::Clear => "clear",
            SessionCommand::Shuffle => "shuffle",
            SessionCommand::Move { .. } => "move",
            SessionCommand::Status => "status",
            SessionCommand::ShowQueue(_) => "queue",
            SessionCommand::Join(_) => "join",
            SessionCommand::UpdateVoice(_) => "voice_update",
            SessionCommand::Leave => "leave",
            SessionCommand::SavePlaylist(_) => "save_playlist",
            SessionCommand::LoadPlaylist(_) => "load_playlist",
            SessionCommand::ListPlaylists => "list_playlists",
            SessionCommand::DeletePlaylist(_) => "delete_playlist",
        }
    }
}

/// Resultado de un comando exitoso
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Started(Track),
    Queued { track: Track, position: usize },
    QueuedMany { added: usize, started: Option<Track> },
    Skipped { skipped: Track, next: Option<Track> },
    Stopped,
    Paused,
    Resumed,
    Seeked(u64),
    VolumeSet(u8),
    DefaultVolumeSet(u8),
    FiltersChanged(Vec<&'static str>),
    LoopSet(LoopMode),
    AutoplaySet(bool),
    StaySet(bool),
    Removed(Track),
    Cleared(usize),
    Shuffled(usize),
    Moved { track: Track, to: usize },
    Status(Box<SessionSnapshot>),
    Queue {
        current: Option<Track>,
        page: QueuePage,
        total_duration: Duration,
    },
    Joined(ChannelId),
    VoiceUpdated,
    Left,
    PlaylistSaved { name: String, tracks: usize },
    PlaylistLoaded { name: String, added: usize, started: Option<Track> },
    Playlists(Vec<String>),
    PlaylistDeleted(String),
}

/// Copia del estado de una sesión para mostrar al usuario
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub guild_id: GuildId,
    pub state: PlaybackState,
    pub current: Option<Track>,
    pub position_ms: u64,
    pub queue: Vec<Track>,
    pub volume: u8,
    pub filters: Vec<&'static str>,
    pub loop_mode: LoopMode,
    pub autoplay: bool,
    pub stay: bool,
    pub voice_channel: Option<ChannelId>,
    pub node: String,
    pub play_id: Option<u64>,
}

/// Avisos para la capa de chat
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    NowPlaying { guild_id: GuildId, track: Track },
    QueueEnded { guild_id: GuildId },
    Reconnecting { guild_id: GuildId },
    Resumed { guild_id: GuildId, track: Option<Track> },
    LeaveVoice { guild_id: GuildId, channel: Option<ChannelId> },
    AutoplayPicked { guild_id: GuildId, track: Track },
}

/// Qué debe hacer la tarea de la sesión después de procesar una entrada.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFlow {
    Continue,
    Teardown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdvanceCause {
    Finished,
    Fault,
    Skip,
}

pub struct Session {
    guild_id: GuildId,
    node: Arc<dyn NodeLink>,
    queue: MusicQueue,
    current: Option<Track>,
    state: PlaybackState,
    position_ms: u64,
    paused: bool,
    volume: u8,
    filters: ActiveFilters,
    loop_mode: LoopMode,
    settings: GuildSettings,
    voice_channel: Option<ChannelId>,
    voice_server: Option<VoiceServerInfo>,
    current_play: Option<u64>,
    fault_streak: u32,
    idle_generation: u64,
    pending_idle: Option<u64>,
    config: SessionConfig,
    services: SessionServices,
}

impl Session {
    pub fn new(
        guild_id: GuildId,
        node: Arc<dyn NodeLink>,
        settings: GuildSettings,
        config: SessionConfig,
        services: SessionServices,
    ) -> Self {
        let state = if node.state().is_ready() {
            PlaybackState::Idle
        } else {
            PlaybackState::Disconnected
        };

        Self {
            guild_id,
            queue: MusicQueue::new(config.max_queue_size),
            current: None,
            state,
            position_ms: 0,
            paused: false,
            volume: settings.default_volume.min(100),
            filters: ActiveFilters::default(),
            loop_mode: LoopMode::Off,
            settings,
            voice_channel: None,
            voice_server: None,
            current_play: None,
            fault_streak: 0,
            idle_generation: 0,
            pending_idle: None,
            node,
            config,
            services,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn queue(&self) -> &MusicQueue {
        &self.queue
    }

    pub fn current_play_id(&self) -> Option<u64> {
        self.current_play
    }

    pub fn node_name(&self) -> &str {
        self.node.name()
    }

    /// Solicitud de chequeo de inactividad pendiente: generación y espera.
    pub fn take_idle_request(&mut self) -> Option<(u64, Duration)> {
        self.pending_idle
            .take()
            .map(|generation| (generation, self.config.idle_disconnect_after))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            guild_id: self.guild_id,
            state: self.state,
            current: self.current.clone(),
            position_ms: self.position_ms,
            queue: self.queue.snapshot(),
            volume: self.volume,
            filters: self.filters.names(),
            loop_mode: self.loop_mode,
            autoplay: self.settings.autoplay,
            stay: self.settings.stay,
            voice_channel: self.voice_channel,
            node: self.node.name().to_string(),
            play_id: self.current_play,
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    pub async fn execute(
        &mut self,
        command: SessionCommand,
    ) -> (PlayerResult<CommandOutcome>, SessionFlow) {
        if command == SessionCommand::Leave {
            self.teardown().await;
            return (Ok(CommandOutcome::Left), SessionFlow::Teardown);
        }
        (self.apply(command).await, SessionFlow::Continue)
    }

    async fn apply(&mut self, command: SessionCommand) -> PlayerResult<CommandOutcome> {
        match command {
            SessionCommand::Enqueue(track) => self.enqueue(track).await,
            SessionCommand::EnqueueMany(tracks) => {
                let (added, started) = self.enqueue_many(tracks).await?;
                Ok(CommandOutcome::QueuedMany { added, started })
            }
            SessionCommand::Skip => self.skip().await,
            SessionCommand::Stop => Ok(self.stop().await),
            SessionCommand::Pause => self.pause().await,
            SessionCommand::Resume => self.resume().await,
            SessionCommand::Seek(position_ms) => self.seek(position_ms).await,
            SessionCommand::SetVolume(volume) => self.set_volume(volume).await,
            SessionCommand::SetDefaultVolume(volume) => {
                let volume = validate_volume(volume)?;
                self.settings.default_volume = volume;
                self.save_settings().await?;
                Ok(CommandOutcome::DefaultVolumeSet(volume))
            }
            SessionCommand::SetFilter { name, enabled } => {
                let preset: FilterPreset = name.parse()?;
                if self.filters.set(preset, enabled) {
                    self.push_filters().await?;
                }
                Ok(CommandOutcome::FiltersChanged(self.filters.names()))
            }
            SessionCommand::ClearFilters => {
                if !self.filters.is_empty() {
                    self.filters.clear();
                    self.push_filters().await?;
                }
                Ok(CommandOutcome::FiltersChanged(Vec::new()))
            }
            SessionCommand::SetLoop(mode) => {
                self.loop_mode = mode;
                info!("🔁 Loop {} en guild {}", mode, self.guild_id);
                Ok(CommandOutcome::LoopSet(mode))
            }
            SessionCommand::CycleLoop => {
                self.loop_mode = self.loop_mode.next();
                info!("🔁 Loop {} en guild {}", self.loop_mode, self.guild_id);
                Ok(CommandOutcome::LoopSet(self.loop_mode))
            }
            SessionCommand::SetAutoplay(enabled) => {
                self.settings.autoplay = enabled;
                self.persist_toggle().await;
                Ok(CommandOutcome::AutoplaySet(enabled))
            }
            SessionCommand::SetStay(enabled) => {
                self.settings.stay = enabled;
                if enabled {
                    // Invalida cualquier chequeo de inactividad pendiente.
                    self.idle_generation += 1;
                    self.pending_idle = None;
                } else if self.state == PlaybackState::Idle {
                    self.request_idle_check();
                }
                self.persist_toggle().await;
                Ok(CommandOutcome::StaySet(enabled))
            }
            SessionCommand::Remove(index) => Ok(CommandOutcome::Removed(self.queue.remove_at(index)?)),
            SessionCommand::Clear => Ok(CommandOutcome::Cleared(self.queue.clear())),
            SessionCommand::Shuffle => {
                if self.queue.is_empty() {
                    return Err(ValidationError::EmptyQueue.into());
                }
                self.queue.shuffle();
                Ok(CommandOutcome::Shuffled(self.queue.len()))
            }
            SessionCommand::Move { from, to } => {
                self.queue.move_track(from, to)?;
                let track = self.queue.snapshot().swap_remove(to);
                Ok(CommandOutcome::Moved { track, to })
            }
            SessionCommand::Status => Ok(CommandOutcome::Status(Box::new(self.snapshot()))),
            SessionCommand::ShowQueue(page) => Ok(CommandOutcome::Queue {
                current: self.current.clone(),
                page: self.queue.page(page, QUEUE_PAGE_SIZE),
                total_duration: self.queue.total_duration(),
            }),
            SessionCommand::Join(channel) => {
                self.voice_channel = Some(channel);
                info!("🔊 Guild {} en canal de voz {}", self.guild_id, channel);
                Ok(CommandOutcome::Joined(channel))
            }
            SessionCommand::UpdateVoice(voice) => self.update_voice(voice).await,
            SessionCommand::Leave => {
                self.teardown().await;
                Ok(CommandOutcome::Left)
            }
            SessionCommand::SavePlaylist(name) => self.save_playlist(name).await,
            SessionCommand::LoadPlaylist(name) => self.load_playlist(name).await,
            SessionCommand::ListPlaylists => Ok(CommandOutcome::Playlists(
                self.services.store.list_snapshots(self.guild_id).await?,
            )),
            SessionCommand::DeletePlaylist(name) => {
                validate_playlist_name(&name)?;
                self.services.store.delete_snapshot(self.guild_id, &name).await?;
                Ok(CommandOutcome::PlaylistDeleted(name))
            }
        }
    }

    /// Inicia la reproducción si la sesión está inactiva; si no, encola.
    async fn enqueue(&mut self, track: Track) -> PlayerResult<CommandOutcome> {
        if self.state == PlaybackState::Disconnected {
            return Err(PlayerError::NotReady);
        }

        if self.current.is_none() && self.queue.is_empty() {
            self.start_fresh(track.clone()).await?;
            return Ok(CommandOutcome::Started(track));
        }

        let position = self.queue.append(track.clone())?;
        info!("➕ Agregado a la cola de {}: {} (#{})", self.guild_id, track.title(), position);

        if self.current.is_none() {
            // Inactiva con cola pendiente (un inicio anterior falló).
            if let Some(next) = self.queue.dequeue() {
                self.start_fresh(next).await?;
            }
        }
        Ok(CommandOutcome::Queued { track, position })
    }

    async fn enqueue_many(&mut self, tracks: Vec<Track>) -> PlayerResult<(usize, Option<Track>)> {
        if self.state == PlaybackState::Disconnected {
            return Err(PlayerError::NotReady);
        }
        if tracks.is_empty() {
            return Err(ValidationError::EmptyQueue.into());
        }

        let added = self.queue.append_many(tracks);
        if added == 0 {
            return Err(ValidationError::QueueFull {
                max: self.queue.max_size(),
            }
            .into());
        }

        let mut started = None;
        if self.current.is_none() {
            if let Some(next) = self.queue.dequeue() {
                self.start_fresh(next.clone()).await?;
                started = Some(next);
            }
        }
        Ok((added, started))
    }

    async fn skip(&mut self) -> PlayerResult<CommandOutcome> {
        if self.state == PlaybackState::Disconnected {
            return Err(PlayerError::NotReady);
        }
        let skipped = self
            .current
            .clone()
            .ok_or(ValidationError::NothingPlaying)?;

        info!("⏭️ Saltando {} en guild {}", skipped.title(), self.guild_id);
        self.advance(AdvanceCause::Skip).await;
        Ok(CommandOutcome::Skipped {
            skipped,
            next: self.current.clone(),
        })
    }

    /// Limpia la cola y fuerza `Idle` sin pasar por autoplay.
    async fn stop(&mut self) -> CommandOutcome {
        self.queue.clear();
        let had_track = self.current.is_some();
        if self.state == PlaybackState::Disconnected {
            self.current = None;
            self.current_play = None;
            self.position_ms = 0;
            self.paused = false;
            info!("⏹️ Sesión {} detenida sin enlace", self.guild_id);
            return CommandOutcome::Stopped;
        }
        self.go_idle(had_track).await;
        info!("⏹️ Sesión {} detenida", self.guild_id);
        CommandOutcome::Stopped
    }

    async fn pause(&mut self) -> PlayerResult<CommandOutcome> {
        match self.state {
            PlaybackState::Disconnected => return Err(PlayerError::NotReady),
            PlaybackState::Idle => return Err(ValidationError::NothingPlaying.into()),
            PlaybackState::Paused => return Err(ValidationError::AlreadyPaused.into()),
            PlaybackState::Playing => {}
        }

        self.send(NodeCommand::Pause).await?;
        self.paused = true;
        self.state = PlaybackState::Paused;
        info!("⏸️ Reproducción pausada en guild {}", self.guild_id);
        Ok(CommandOutcome::Paused)
    }

    async fn resume(&mut self) -> PlayerResult<CommandOutcome> {
        match self.state {
            PlaybackState::Disconnected => return Err(PlayerError::NotReady),
            PlaybackState::Idle => return Err(ValidationError::NothingPlaying.into()),
            PlaybackState::Playing => return Err(ValidationError::NotPaused.into()),
            PlaybackState::Paused => {}
        }

        self.send(NodeCommand::Resume).await?;
        self.paused = false;
        self.state = PlaybackState::Playing;
        info!("▶️ Reproducción reanudada en guild {}", self.guild_id);
        Ok(CommandOutcome::Resumed)
    }

    async fn seek(&mut self, position_ms: u64) -> PlayerResult<CommandOutcome> {
        if self.state == PlaybackState::Disconnected {
            return Err(PlayerError::NotReady);
        }
        let track = self.current.as_ref().ok_or(ValidationError::NothingPlaying)?;
        let duration_ms = track.duration_ms().ok_or(ValidationError::NotSeekable)?;
        if position_ms > duration_ms {
            return Err(ValidationError::SeekOutOfRange {
                position_ms,
                duration_ms,
            }
            .into());
        }

        self.send(NodeCommand::Seek(position_ms)).await?;
        self.position_ms = position_ms;
        Ok(CommandOutcome::Seeked(position_ms))
    }

    async fn set_volume(&mut self, volume: i64) -> PlayerResult<CommandOutcome> {
        let volume = validate_volume(volume)?;
        if self.current.is_some() && self.state != PlaybackState::Disconnected {
            self.send(NodeCommand::SetVolume(volume)).await?;
        }
        self.volume = volume;
        info!("🔊 Volumen {}% en guild {}", volume, self.guild_id);
        Ok(CommandOutcome::VolumeSet(volume))
    }

    async fn push_filters(&mut self) -> PlayerResult<()> {
        if self.current.is_some() && self.state != PlaybackState::Disconnected {
            self.send(NodeCommand::SetFilters(self.filters.clone())).await?;
        }
        debug!("🎛️ Filtros de {}: {:?}", self.guild_id, self.filters.names());
        Ok(())
    }

    async fn update_voice(&mut self, voice: VoiceServerInfo) -> PlayerResult<CommandOutcome> {
        self.voice_server = Some(voice.clone());
        match self.node.send(self.guild_id, NodeCommand::VoiceUpdate(voice)).await {
            // Se reenvía al reconectar.
            Ok(()) | Err(NodeError::NotReady) => Ok(CommandOutcome::VoiceUpdated),
            Err(e) => Err(PlayerError::PlaybackFault(e.to_string())),
        }
    }

    async fn save_playlist(&mut self, name: String) -> PlayerResult<CommandOutcome> {
        validate_playlist_name(&name)?;
        let tracks: Vec<Track> = self
            .current
            .iter()
            .cloned()
            .chain(self.queue.snapshot())
            .collect();
        if tracks.is_empty() {
            return Err(ValidationError::EmptyQueue.into());
        }

        let count = tracks.len();
        self.services
            .store
            .save_queue_snapshot(self.guild_id, &name, tracks)
            .await?;
        Ok(CommandOutcome::PlaylistSaved { name, tracks: count })
    }

    async fn load_playlist(&mut self, name: String) -> PlayerResult<CommandOutcome> {
        validate_playlist_name(&name)?;
        if self.state == PlaybackState::Disconnected {
            return Err(PlayerError::NotReady);
        }

        let tracks = self
            .services
            .store
            .load_queue_snapshot(self.guild_id, &name)
            .await?;
        let (added, started) = self.enqueue_many(tracks).await?;
        info!("📂 Playlist '{}' cargada en guild {} ({} canciones)", name, self.guild_id, added);
        Ok(CommandOutcome::PlaylistLoaded {
            name,
            added,
            started,
        })
    }

    // ------------------------------------------------------------------
    // Node events
    // ------------------------------------------------------------------

    pub async fn on_player_event(&mut self, event: PlayerEvent) -> SessionFlow {
        match event {
            PlayerEvent::TrackStarted { play_id } => {
                if self.is_current(play_id) {
                    debug!("🎵 Track iniciado en guild {}", self.guild_id);
                }
            }
            PlayerEvent::TrackEnded { play_id, reason } => {
                if !self.is_current(play_id) {
                    debug!("Fin de track atrasado ignorado en {} ({:?})", self.guild_id, reason);
                } else if reason.may_start_next() {
                    let cause = if reason.is_fault() {
                        AdvanceCause::Fault
                    } else {
                        AdvanceCause::Finished
                    };
                    self.advance(cause).await;
                } else {
                    debug!("Fin de track {:?} en {}, sin avanzar", reason, self.guild_id);
                }
            }
            PlayerEvent::TrackStuck {
                play_id,
                threshold_ms,
            } => {
                if self.is_current(play_id) {
                    warn!("⚠️ Track atascado {}ms en guild {}", threshold_ms, self.guild_id);
                    self.advance(AdvanceCause::Fault).await;
                }
            }
            PlayerEvent::TrackException { play_id, cause } => {
                if self.is_current(play_id) {
                    warn!("❌ Error reproduciendo en guild {}: {}", self.guild_id, cause);
                    self.advance(AdvanceCause::Fault).await;
                }
            }
            PlayerEvent::PositionUpdate { position_ms, .. } => {
                if matches!(self.state, PlaybackState::Playing | PlaybackState::Paused) {
                    self.position_ms = position_ms;
                }
            }
            PlayerEvent::VoiceClosed {
                code,
                reason,
                by_remote,
            } => {
                if code == VOICE_CLOSE_DISCONNECTED {
                    info!("👋 Bot desconectado de voz en guild {}", self.guild_id);
                    self.teardown().await;
                    return SessionFlow::Teardown;
                }
                warn!(
                    "⚠️ Voz cerrada en guild {} (code {}, remote={}): {}",
                    self.guild_id, code, by_remote, reason
                );
            }
        }
        SessionFlow::Continue
    }

    pub fn link_down(&mut self) {
        if self.state == PlaybackState::Disconnected {
            return;
        }
        self.paused = self.state == PlaybackState::Paused;
        self.state = PlaybackState::Disconnected;
        self.current_play = None;
        warn!("🔌 Guild {} sin enlace, esperando reconexión", self.guild_id);
        self.notify(SessionNotice::Reconnecting {
            guild_id: self.guild_id,
        });
    }

    /// Restaura la sesión tras reconectar: credenciales de voz primero y luego
    /// el track actual en la última posición conocida.
    pub async fn link_up(&mut self) {
        if self.state != PlaybackState::Disconnected {
            return;
        }

        if let Some(voice) = self.voice_server.clone() {
            if let Err(e) = self.node.send(self.guild_id, NodeCommand::VoiceUpdate(voice)).await {
                warn!("⚠️ No se pudo reenviar la voz de {}: {}", self.guild_id, e);
            }
        }

        match self.current.clone() {
            Some(track) => {
                let start_ms = if track.is_stream() { 0 } else { self.position_ms };
                info!(
                    "🔄 Reanudando {} en guild {} desde {}ms",
                    track.title(),
                    self.guild_id,
                    start_ms
                );
                let paused = self.paused;
                match self.play(track.clone(), start_ms, paused).await {
                    Ok(()) => {}
                    Err(PlayerError::NodeDisconnected) => return,
                    Err(e) => {
                        warn!("❌ No se pudo reanudar en guild {}: {}", self.guild_id, e);
                        self.current = Some(track);
                        self.advance(AdvanceCause::Fault).await;
                        return;
                    }
                }
                self.notify(SessionNotice::Resumed {
                    guild_id: self.guild_id,
                    track: Some(track),
                });
            }
            None => {
                self.state = PlaybackState::Idle;
                self.paused = false;
                self.notify(SessionNotice::Resumed {
                    guild_id: self.guild_id,
                    track: None,
                });
                if self.queue.is_empty() {
                    self.request_idle_check();
                } else {
                    self.advance(AdvanceCause::Finished).await;
                }
            }
        }
    }

    /// Desmonta la sesión si sigue inactiva desde el chequeo `generation`.
    pub async fn idle_check(&mut self, generation: u64) -> SessionFlow {
        if generation != self.idle_generation {
            return SessionFlow::Continue;
        }
        // Una cola que quedó tras agotar los fallos no mantiene viva la sesión.
        let eligible =
            self.state == PlaybackState::Idle && self.current.is_none() && !self.settings.stay;
        if !eligible {
            return SessionFlow::Continue;
        }

        info!("💤 Guild {} inactiva, abandonando el canal", self.guild_id);
        self.teardown().await;
        SessionFlow::Teardown
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// Resolución de fin de track. La primera regla que aplica gana:
    /// loop de track, cabeza de la cola, autoplay, inactividad.
    async fn advance(&mut self, cause: AdvanceCause) {
        let finished = self.current.take();
        self.current_play = None;

        match cause {
            AdvanceCause::Fault => self.fault_streak += 1,
            AdvanceCause::Finished | AdvanceCause::Skip => self.fault_streak = 0,
        }

        let max_faults = self.config.max_track_faults.max(1);
        let mut rejected = 0;

        if let Some(track) = finished.as_ref() {
            let loop_track = self.loop_mode == LoopMode::Track
                && cause != AdvanceCause::Skip
                && self.fault_streak < max_faults;
            if loop_track {
                debug!("🔂 Repitiendo track: {}", track.title());
                if self.start_advance(track.clone()).await {
                    return;
                }
                rejected += 1;
            }

            if self.loop_mode == LoopMode::Queue {
                debug!("🔁 Track agregado al final por loop de cola: {}", track.title());
                self.queue.requeue(track.clone());
            }
        }

        // Cada rechazo del nodo consume un intento; la cola restante queda
        // para el chequeo de inactividad.
        while rejected < max_faults {
            let Some(next) = self.queue.dequeue() else {
                break;
            };
            if self.start_advance(next).await {
                return;
            }
            rejected += 1;
        }

        if self.settings.autoplay && rejected < max_faults {
            if let Some(track) = finished.as_ref() {
                match self.services.autoplay.next_for(track).await {
                    Ok(next) => {
                        info!("🎲 Autoplay eligió: {}", next.title());
                        self.notify(SessionNotice::AutoplayPicked {
                            guild_id: self.guild_id,
                            track: next.clone(),
                        });
                        if self.start_advance(next).await {
                            return;
                        }
                    }
                    Err(ResolveError::NoResults) => {
                        info!("🎲 Autoplay sin resultados para: {}", track.search_key());
                    }
                    Err(e) => {
                        warn!("⚠️ Autoplay falló para {}: {}", track.search_key(), e);
                    }
                }
            }
        }

        let stop_node = matches!(cause, AdvanceCause::Skip | AdvanceCause::Fault);
        self.go_idle(stop_node).await;
    }

    /// Inicia un track como parte de la resolución. Devuelve `false` si el
    /// nodo lo rechazó; el rechazo cuenta como fallo consecutivo.
    async fn start_advance(&mut self, track: Track) -> bool {
        match self.play(track, 0, false).await {
            Ok(()) | Err(PlayerError::NodeDisconnected) => true,
            Err(e) => {
                self.fault_streak += 1;
                warn!(
                    "❌ No se pudo iniciar el siguiente track en {} ({} fallos seguidos): {}",
                    self.guild_id, self.fault_streak, e
                );
                false
            }
        }
    }

    /// Inicia un track pedido por un comando. Si el enlace no está listo, el
    /// track no se retiene.
    async fn start_fresh(&mut self, track: Track) -> PlayerResult<()> {
        self.fault_streak = 0;
        match self.play(track, 0, false).await {
            Err(PlayerError::NodeDisconnected) => {
                self.current = None;
                Err(PlayerError::NotReady)
            }
            other => other,
        }
    }

    async fn play(&mut self, track: Track, start_ms: u64, paused: bool) -> PlayerResult<()> {
        let play_id = NEXT_PLAY_ID.fetch_add(1, Ordering::Relaxed);
        let request = PlayRequest {
            track: track.clone(),
            start_ms,
            play_id,
            volume: self.volume,
            filters: self.filters.clone(),
            paused,
        };

        match self.node.send(self.guild_id, NodeCommand::Play(request)).await {
            Ok(()) => {
                info!("🎵 Reproduciendo en {}: {}", self.guild_id, track.title());
                self.current = Some(track.clone());
                self.current_play = Some(play_id);
                self.position_ms = start_ms;
                self.paused = paused;
                self.state = if paused {
                    PlaybackState::Paused
                } else {
                    PlaybackState::Playing
                };
                self.idle_generation += 1;
                self.pending_idle = None;
                self.notify(SessionNotice::NowPlaying {
                    guild_id: self.guild_id,
                    track,
                });
                Ok(())
            }
            Err(NodeError::NotReady) => {
                self.current = Some(track);
                self.current_play = None;
                self.position_ms = start_ms;
                self.paused = paused;
                self.state = PlaybackState::Disconnected;
                Err(PlayerError::NodeDisconnected)
            }
            Err(e) => {
                self.current = None;
                self.current_play = None;
                self.position_ms = 0;
                self.paused = false;
                self.state = PlaybackState::Idle;
                self.request_idle_check();
                Err(PlayerError::PlaybackFault(e.to_string()))
            }
        }
    }

    async fn go_idle(&mut self, stop_node: bool) {
        if stop_node {
            if let Err(e) = self.node.send(self.guild_id, NodeCommand::Stop).await {
                debug!("No se pudo detener el player de {}: {}", self.guild_id, e);
            }
        }

        self.current = None;
        self.current_play = None;
        self.position_ms = 0;
        self.paused = false;
        self.state = PlaybackState::Idle;
        info!("📭 Cola vacía en guild {}", self.guild_id);
        self.notify(SessionNotice::QueueEnded {
            guild_id: self.guild_id,
        });
        self.request_idle_check();
    }

    async fn teardown(&mut self) {
        if let Err(e) = self.node.send(self.guild_id, NodeCommand::Destroy).await {
            debug!("No se pudo destruir el player de {}: {}", self.guild_id, e);
        }
        self.queue.clear();
        self.current = None;
        self.current_play = None;
        self.state = PlaybackState::Idle;
        self.pending_idle = None;
        self.notify(SessionNotice::LeaveVoice {
            guild_id: self.guild_id,
            channel: self.voice_channel,
        });
    }

    fn request_idle_check(&mut self) {
        if self.settings.stay {
            return;
        }
        self.idle_generation += 1;
        self.pending_idle = Some(self.idle_generation);
    }

    fn is_current(&self, play_id: Option<u64>) -> bool {
        play_id.is_some() && play_id == self.current_play
    }

    async fn send(&self, command: NodeCommand) -> PlayerResult<()> {
        self.node
            .send(self.guild_id, command)
            .await
            .map_err(|e| match e {
                NodeError::NotReady => PlayerError::NotReady,
                other => PlayerError::PlaybackFault(other.to_string()),
            })
    }

    async fn save_settings(&self) -> PlayerResult<()> {
        self.services
            .store
            .save_settings(self.guild_id, self.settings)
            .await?;
        Ok(())
    }

    /// Los toggles no fallan por el almacenamiento; solo se registra.
    async fn persist_toggle(&self) {
        if let Err(e) = self.save_settings().await {
            warn!("⚠️ No se guardaron los ajustes de {}: {}", self.guild_id, e);
        }
    }

    fn notify(&self, notice: SessionNotice) {
        let _ = self.services.notices.send(notice);
    }
}

fn validate_volume(volume: i64) -> Result<u8, ValidationError> {
    u8::try_from(volume)
        .ok()
        .filter(|v| *v <= 100)
        .ok_or(ValidationError::VolumeOutOfRange(volume))
}

pub(crate) fn validate_playlist_name(name: &str) -> Result<(), ValidationError> {
    if is_valid_playlist_name(name) {
        Ok(())
    } else {
        Err(ValidationError::InvalidPlaylistName(name.to_string()))
    }
}
