pub mod lavalink_search;
pub mod query;
pub mod ytdlp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serenity::model::id::UserId;
use std::time::Duration;
use thiserror::Error;

pub use lavalink_search::LavalinkResolver;
pub use ytdlp::YtDlpExtractor;

/// Resuelve una consulta de usuario a tracks reproducibles.
///
/// Se usa tanto para `play <query>` como para autoplay (semilla título/autor).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Devuelve los candidatos en el orden que los entrega la fuente.
    async fn resolve(
        &self,
        query: &str,
        hint: SourceType,
        requested_by: UserId,
    ) -> Result<Vec<Track>, ResolveError>;
}

/// Fallo de resolución. `NoResults` y `Upstream` tienen el mismo efecto
/// en la sesión pero se registran por separado.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no results")]
    NoResults,

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("resolver timed out")]
    Timeout,
}

/// Representa un track de música ya resuelto.
///
/// Inmutable una vez construido: los campos son privados y los `with_*`
/// consumen el valor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    identifier: String,
    title: String,
    author: String,
    duration: Option<Duration>,
    source_type: SourceType,
    uri: String,
    #[serde(default)]
    encoded: Option<String>,
    requested_by: UserId,
}

impl Track {
    pub fn new(
        identifier: impl Into<String>,
        title: impl Into<String>,
        uri: impl Into<String>,
        source_type: SourceType,
        requested_by: UserId,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            title: title.into(),
            author: String::new(),
            duration: None,
            source_type,
            uri: uri.into(),
            encoded: None,
            requested_by,
        }
    }

    // Getters
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn author(&self) -> &str {
        &self.author
    }
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }
    pub fn source_type(&self) -> SourceType {
        self.source_type
    }
    pub fn uri(&self) -> &str {
        &self.uri
    }
    pub fn encoded(&self) -> Option<&str> {
        self.encoded.as_deref()
    }
    pub fn requested_by(&self) -> UserId {
        self.requested_by
    }

    // Builders
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_encoded(mut self, encoded: impl Into<String>) -> Self {
        self.encoded = Some(encoded.into());
        self
    }

    pub fn with_requested_by(mut self, user_id: UserId) -> Self {
        self.requested_by = user_id;
        self
    }

    /// Streams en vivo no tienen duración y no admiten seek.
    pub fn is_stream(&self) -> bool {
        self.duration.is_none()
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.duration.map(|d| d.as_millis() as u64)
    }

    /// Clave de búsqueda usada por autoplay.
    pub fn search_key(&self) -> String {
        if self.author.is_empty() {
            self.title.clone()
        } else {
            format!("{} {}", self.title, self.author)
        }
    }
}

/// Origen de un track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    YouTube,
    Spotify,
    SoundCloud,
    Direct,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::YouTube => "youtube",
            SourceType::Spotify => "spotify",
            SourceType::SoundCloud => "soundcloud",
            SourceType::Direct => "direct",
        }
    }

    /// Traduce el `sourceName` que reporta Lavalink.
    pub fn from_source_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "youtube" | "youtubemusic" => SourceType::YouTube,
            "spotify" => SourceType::Spotify,
            "soundcloud" => SourceType::SoundCloud,
            _ => SourceType::Direct,
        }
    }

    /// Prefijo de búsqueda de Lavalink, si la fuente admite búsqueda.
    pub fn search_prefix(&self) -> Option<&'static str> {
        match self {
            SourceType::YouTube => Some("ytsearch:"),
            SourceType::Spotify => Some("spsearch:"),
            SourceType::SoundCloud => Some("scsearch:"),
            SourceType::Direct => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_key_includes_author_when_known() {
        let user = UserId::new(7);
        let track = Track::new("abc", "Song", "https://youtu.be/abc", SourceType::YouTube, user)
            .with_author("Band");
        assert_eq!(track.search_key(), "Song Band");

        let bare = Track::new("abc", "Song", "https://youtu.be/abc", SourceType::YouTube, user);
        assert_eq!(bare.search_key(), "Song");
    }

    #[test]
    fn live_streams_have_no_duration() {
        let user = UserId::new(7);
        let live = Track::new("live", "Radio", "https://radio", SourceType::Direct, user);
        assert!(live.is_stream());
        assert_eq!(live.duration_ms(), None);

        let song = live.clone().with_duration(Duration::from_secs(3));
        assert!(!song.is_stream());
        assert_eq!(song.duration_ms(), Some(3000));
    }

    #[test]
    fn source_names_from_lavalink() {
        assert_eq!(SourceType::from_source_name("youtube"), SourceType::YouTube);
        assert_eq!(SourceType::from_source_name("SoundCloud"), SourceType::SoundCloud);
        assert_eq!(SourceType::from_source_name("http"), SourceType::Direct);
        assert_eq!(SourceType::Direct.search_prefix(), None);
    }
}
