//! Abstraction over one control connection to an audio node.
//!
//! Sessions talk to a node only through [`NodeLink`]; the real implementation
//! is [`super::lavalink_client::LavalinkNode`], tests use a recording fake.

use async_trait::async_trait;
use serde::Serialize;
use serenity::model::id::GuildId;
use std::time::Duration;

use super::effects::ActiveFilters;
use crate::{error::NodeError, sources::Track};

/// Estado de la conexión de control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Connecting,
    Ready,
    Reconnecting,
    Closed,
}

impl LinkState {
    pub fn is_ready(&self) -> bool {
        matches!(self, LinkState::Ready)
    }
}

/// Parámetros de un `play`. `play_id` identifica esta reproducción concreta
/// para poder descartar eventos atrasados de reproducciones anteriores.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayRequest {
    pub track: Track,
    pub start_ms: u64,
    pub play_id: u64,
    pub volume: u8,
    pub filters: ActiveFilters,
    pub paused: bool,
}

/// Credenciales de voz que Discord entrega al bot y que el nodo necesita.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceServerInfo {
    pub token: String,
    pub endpoint: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

/// Comandos que una sesión puede emitir hacia el nodo.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeCommand {
    Play(PlayRequest),
    Stop,
    Pause,
    Resume,
    Seek(u64),
    SetVolume(u8),
    SetFilters(ActiveFilters),
    VoiceUpdate(VoiceServerInfo),
    Destroy,
}

impl NodeCommand {
    pub fn name(&self) -> &'static str {
        match self {
            NodeCommand::Play(_) => "play",
            NodeCommand::Stop => "stop",
            NodeCommand::Pause => "pause",
            NodeCommand::Resume => "resume",
            NodeCommand::Seek(_) => "seek",
            NodeCommand::SetVolume(_) => "volume",
            NodeCommand::SetFilters(_) => "filters",
            NodeCommand::VoiceUpdate(_) => "voice",
            NodeCommand::Destroy => "destroy",
        }
    }
}

/// Razón de fin de track tal como la reporta el nodo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

impl TrackEndReason {
    /// Solo `finished` y `loadFailed` avanzan la cola. El resto son ecos de
    /// comandos que la propia sesión emitió.
    pub fn may_start_next(&self) -> bool {
        matches!(self, TrackEndReason::Finished | TrackEndReason::LoadFailed)
    }

    /// El track terminó porque el nodo no pudo cargarlo.
    pub fn is_fault(&self) -> bool {
        matches!(self, TrackEndReason::LoadFailed)
    }
}

/// Evento de reproducción para una guild concreta.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    TrackStarted {
        play_id: Option<u64>,
    },
    TrackEnded {
        play_id: Option<u64>,
        reason: TrackEndReason,
    },
    TrackStuck {
        play_id: Option<u64>,
        threshold_ms: u64,
    },
    TrackException {
        play_id: Option<u64>,
        cause: String,
    },
    PositionUpdate {
        position_ms: u64,
        connected: bool,
    },
    VoiceClosed {
        code: u16,
        reason: String,
        by_remote: bool,
    },
}

/// Evento emitido por un enlace.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    Ready { resumed: bool },
    Closed { code: Option<u16>, reason: String },
    Player { guild_id: GuildId, event: PlayerEvent },
}

/// Evento etiquetado con el nodo que lo emitió.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeEnvelope {
    pub node: String,
    pub event: NodeEvent,
}

/// Conexión de control hacia un nodo de audio.
#[async_trait]
pub trait NodeLink: Send + Sync {
    fn name(&self) -> &str;

    fn state(&self) -> LinkState;

    fn health(&self) -> NodeHealth {
        NodeHealth {
            name: self.name().to_string(),
            state: self.state(),
            failed_attempts: 0,
            degraded: false,
        }
    }

    /// Falla con [`NodeError::NotReady`] si el enlace no está `Ready`.
    async fn send(&self, guild_id: GuildId, command: NodeCommand) -> Result<(), NodeError>;
}

/// Política de reconexión del supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub interval: Duration,
    /// `None` reintenta indefinidamente.
    pub max_attempts: Option<u32>,
    pub degraded_after: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: None,
            degraded_after: 3,
        }
    }
}

impl ReconnectPolicy {
    pub fn should_retry(&self, failed_attempts: u32) -> bool {
        self.max_attempts.map_or(true, |max| failed_attempts < max)
    }

    pub fn is_degraded(&self, failed_attempts: u32) -> bool {
        failed_attempts >= self.degraded_after
    }
}

/// Salud de un nodo
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeHealth {
    pub name: String,
    pub state: LinkState,
    pub failed_attempts: u32,
    pub degraded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_natural_endings_advance() {
        assert!(TrackEndReason::Finished.may_start_next());
        assert!(TrackEndReason::LoadFailed.may_start_next());
        assert!(!TrackEndReason::Replaced.may_start_next());
        assert!(!TrackEndReason::Stopped.may_start_next());
        assert!(!TrackEndReason::Cleanup.may_start_next());
    }

    #[test]
    fn unbounded_policy_always_retries() {
        let policy = ReconnectPolicy::default();
        assert!(policy.should_retry(10_000));
        assert!(!policy.is_degraded(2));
        assert!(policy.is_degraded(3));

        let bounded = ReconnectPolicy {
            max_attempts: Some(2),
            ..ReconnectPolicy::default()
        };
        assert!(bounded.should_retry(1));
        assert!(!bounded.should_retry(2));
    }
}
