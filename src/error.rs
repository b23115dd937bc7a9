//! Error types shared by sessions, the node link and storage.

use thiserror::Error;

use crate::sources::ResolveError;

/// Errores de validación de un comando. No producen cambio de estado.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("volume {0} is outside 0-100")]
    VolumeOutOfRange(i64),

    #[error("unknown filter `{0}`")]
    UnknownFilter(String),

    #[error("position {index} is outside a queue of {len} tracks")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("queue is full ({max} tracks)")]
    QueueFull { max: usize },

    #[error("nothing is playing")]
    NothingPlaying,

    #[error("playback is not paused")]
    NotPaused,

    #[error("playback is already paused")]
    AlreadyPaused,

    #[error("seek position {position_ms}ms is outside 0-{duration_ms}ms")]
    SeekOutOfRange { position_ms: u64, duration_ms: u64 },

    #[error("live streams cannot be seeked")]
    NotSeekable,

    #[error("invalid playlist name `{0}`")]
    InvalidPlaylistName(String),

    #[error("queue is empty")]
    EmptyQueue,
}

/// Errores en la frontera con el nodo Lavalink.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("node link is not ready")]
    NotReady,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("node rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),
}

impl From<tokio_tungstenite::tungstenite::Error> for NodeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        NodeError::WebSocket(Box::new(err))
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        NodeError::Protocol(err.to_string())
    }
}

/// Errores del almacenamiento de playlists y ajustes.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("`{0}` not found")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error devuelto por cualquier comando de sesión.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// El nodo no está listo; el comando se rechaza sin encolarse.
    #[error("node link is not ready")]
    NotReady,

    #[error(transparent)]
    Resolution(#[from] ResolveError),

    /// El nodo no pudo iniciar la reproducción del track.
    #[error("playback fault: {0}")]
    PlaybackFault(String),

    /// Enlace caído; el supervisor está reconectando.
    #[error("node disconnected, reconnecting")]
    NodeDisconnected,

    #[error("no active session for this guild")]
    NoSession,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("session closed")]
    SessionClosed,
}

pub type PlayerResult<T> = std::result::Result<T, PlayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_convert_transparently() {
        let err: PlayerError = ValidationError::VolumeOutOfRange(150).into();
        assert_eq!(err.to_string(), "volume 150 is outside 0-100");
    }
}
