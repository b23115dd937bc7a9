use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serenity::model::id::GuildId;
use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::{error::StorageError, sources::Track};

static PLAYLIST_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,32}$").expect("playlist name regex is valid"));

/// Nombres válidos: 1-32 caracteres `[A-Za-z0-9_-]`. También los usamos como
/// nombre de archivo, así que no se aceptan separadores de ruta.
pub fn is_valid_playlist_name(name: &str) -> bool {
    PLAYLIST_NAME.is_match(name)
}

/// Ajustes persistentes de un servidor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildSettings {
    pub autoplay: bool,
    pub default_volume: u8,
    /// Modo 24/7: no abandonar el canal de voz al quedar inactivo
    pub stay: bool,
}

impl GuildSettings {
    pub fn with_volume(default_volume: u8) -> Self {
        Self {
            autoplay: false,
            default_volume,
            stay: false,
        }
    }
}

/// Playlist guardada a partir de una cola
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SavedPlaylist {
    name: String,
    saved_at: DateTime<Utc>,
    tracks: Vec<Track>,
}

/// Almacenamiento de playlists y ajustes por servidor.
///
/// Nunca se llama durante la resolución de fin de track.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GuildStore: Send + Sync {
    async fn save_queue_snapshot(
        &self,
        guild_id: GuildId,
        name: &str,
        tracks: Vec<Track>,
    ) -> Result<(), StorageError>;

    async fn load_queue_snapshot(
        &self,
        guild_id: GuildId,
        name: &str,
    ) -> Result<Vec<Track>, StorageError>;

    async fn list_snapshots(&self, guild_id: GuildId) -> Result<Vec<String>, StorageError>;

    async fn delete_snapshot(&self, guild_id: GuildId, name: &str) -> Result<(), StorageError>;

    /// `None` si el servidor nunca guardó ajustes.
    async fn load_settings(&self, guild_id: GuildId) -> Result<Option<GuildSettings>, StorageError>;

    async fn save_settings(
        &self,
        guild_id: GuildId,
        settings: GuildSettings,
    ) -> Result<(), StorageError>;
}

/// Manager de almacenamiento basado en archivos JSON
///
/// ```text
/// data/guilds/<guild_id>/settings.json
/// data/guilds/<guild_id>/playlists/<name>.json
/// ```
pub struct JsonStorage {
    data_dir: PathBuf,
    settings_cache: DashMap<GuildId, GuildSettings>,
}

impl JsonStorage {
    pub async fn new(data_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(data_dir.join("guilds")).await?;
        info!("📁 Storage inicializado en: {}", data_dir.display());

        Ok(Self {
            data_dir,
            settings_cache: DashMap::new(),
        })
    }

    fn guild_dir(&self, guild_id: GuildId) -> PathBuf {
        self.data_dir.join("guilds").join(guild_id.get().to_string())
    }

    fn playlists_dir(&self, guild_id: GuildId) -> PathBuf {
        self.guild_dir(guild_id).join("playlists")
    }

    fn playlist_path(&self, guild_id: GuildId, name: &str) -> Result<PathBuf, StorageError> {
        if !is_valid_playlist_name(name) {
            return Err(StorageError::NotFound(name.to_string()));
        }
        Ok(self.playlists_dir(guild_id).join(format!("{name}.json")))
    }

    fn settings_path(&self, guild_id: GuildId) -> PathBuf {
        self.guild_dir(guild_id).join("settings.json")
    }

    /// Escribe a un temporal y renombra para no dejar archivos a medias.
    async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(value)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(
        path: &Path,
        missing: &str,
    ) -> Result<T, StorageError> {
        match fs::read_to_string(path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(missing.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl GuildStore for JsonStorage {
    async fn save_queue_snapshot(
        &self,
        guild_id: GuildId,
        name: &str,
        tracks: Vec<Track>,
    ) -> Result<(), StorageError> {
        let path = self.playlist_path(guild_id, name)?;
        let playlist = SavedPlaylist {
            name: name.to_string(),
            saved_at: Utc::now(),
            tracks,
        };
        Self::write_json(&path, &playlist).await?;
        info!(
            "💾 Playlist '{}' guardada para guild {} ({} canciones)",
            name,
            guild_id,
            playlist.tracks.len()
        );
        Ok(())
    }

    async fn load_queue_snapshot(
        &self,
        guild_id: GuildId,
        name: &str,
    ) -> Result<Vec<Track>, StorageError> {
        let path = self.playlist_path(guild_id, name)?;
        let playlist: SavedPlaylist = Self::read_json(&path, name).await?;
        debug!("📂 Playlist '{}' cargada ({} canciones)", name, playlist.tracks.len());
        Ok(playlist.tracks)
    }

    async fn list_snapshots(&self, guild_id: GuildId) -> Result<Vec<String>, StorageError> {
        let dir = self.playlists_dir(guild_id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(name) = path.file_stem().and_then(|n| n.to_str()) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete_snapshot(&self, guild_id: GuildId, name: &str) -> Result<(), StorageError> {
        let path = self.playlist_path(guild_id, name)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("🗑️ Playlist '{}' eliminada para guild {}", name, guild_id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn load_settings(&self, guild_id: GuildId) -> Result<Option<GuildSettings>, StorageError> {
        if let Some(settings) = self.settings_cache.get(&guild_id) {
            return Ok(Some(*settings));
        }

        match Self::read_json::<GuildSettings>(&self.settings_path(guild_id), "settings").await {
            Ok(settings) => {
                self.settings_cache.insert(guild_id, settings);
                Ok(Some(settings))
            }
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => {
                warn!("Error cargando ajustes para guild {}: {}", guild_id, e);
                Err(e)
            }
        }
    }

    async fn save_settings(
        &self,
        guild_id: GuildId,
        settings: GuildSettings,
    ) -> Result<(), StorageError> {
        Self::write_json(&self.settings_path(guild_id), &settings).await?;
        self.settings_cache.insert(guild_id, settings);
        debug!("💾 Ajustes actualizados para guild {}", guild_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::track;
    use pretty_assertions::assert_eq;

    fn guild() -> GuildId {
        GuildId::new(99)
    }

    #[test]
    fn playlist_names_are_restricted() {
        assert!(is_valid_playlist_name("chill_mix-2"));
        assert!(!is_valid_playlist_name(""));
        assert!(!is_valid_playlist_name("../etc/passwd"));
        assert!(!is_valid_playlist_name(&"x".repeat(33)));
    }

    #[tokio::test]
    async fn snapshots_round_trip_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();

        storage
            .save_queue_snapshot(guild(), "b-side", vec![track("a"), track("b")])
            .await
            .unwrap();
        storage
            .save_queue_snapshot(guild(), "a-side", vec![track("c")])
            .await
            .unwrap();

        let loaded = storage.load_queue_snapshot(guild(), "b-side").await.unwrap();
        assert_eq!(loaded, vec![track("a"), track("b")]);
        assert_eq!(
            storage.list_snapshots(guild()).await.unwrap(),
            vec!["a-side".to_string(), "b-side".to_string()]
        );
        assert!(storage
            .list_snapshots(GuildId::new(1))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn missing_snapshots_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();

        assert!(matches!(
            storage.load_queue_snapshot(guild(), "nope").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            storage.delete_snapshot(guild(), "nope").await,
            Err(StorageError::NotFound(_))
        ));

        storage
            .save_queue_snapshot(guild(), "mine", vec![track("a")])
            .await
            .unwrap();
        storage.delete_snapshot(guild(), "mine").await.unwrap();
        assert!(storage.list_snapshots(guild()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn settings_persist_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        assert_eq!(storage.load_settings(guild()).await.unwrap(), None);

        let settings = GuildSettings {
            autoplay: true,
            default_volume: 80,
            stay: true,
        };
        storage.save_settings(guild(), settings).await.unwrap();

        let reopened = JsonStorage::new(dir.path()).await.unwrap();
        assert_eq!(reopened.load_settings(guild()).await.unwrap(), Some(settings));
    }
}
