//! Lavalink v4 wire models.
//!
//! Everything here is plain serde: the websocket ops and events the node
//! pushes, the `loadtracks` response, and the `PATCH` body built from a
//! [`NodeCommand`]. Keeping it pure lets the client stay a thin I/O shell.

use serde::{de::IgnoredAny, Deserialize, Serialize};
use serde_json::{json, Value};
use serenity::model::id::{GuildId, UserId};
use std::time::Duration;

use super::node::{NodeCommand, NodeEvent, PlayerEvent, TrackEndReason, VoiceServerInfo};
use crate::sources::{SourceType, Track};

/// Mensaje entrante por `/v4/websocket`.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum IncomingOp {
    #[serde(rename_all = "camelCase")]
    Ready { resumed: bool, session_id: String },
    #[serde(rename_all = "camelCase")]
    PlayerUpdate { guild_id: GuildId, state: PlayerState },
    Stats(NodeStats),
    Event(LavalinkEvent),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlayerState {
    #[serde(default)]
    pub position: u64,
    #[serde(default)]
    pub connected: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeStats {
    pub players: u32,
    pub playing_players: u32,
    pub uptime: u64,
}

/// Eventos de reproducción (`op: "event"`)
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum LavalinkEvent {
    TrackStartEvent {
        #[serde(rename = "guildId")]
        guild_id: GuildId,
        track: LavalinkTrack,
    },
    TrackEndEvent {
        #[serde(rename = "guildId")]
        guild_id: GuildId,
        track: LavalinkTrack,
        reason: WireEndReason,
    },
    TrackExceptionEvent {
        #[serde(rename = "guildId")]
        guild_id: GuildId,
        track: LavalinkTrack,
        exception: LavalinkException,
    },
    TrackStuckEvent {
        #[serde(rename = "guildId")]
        guild_id: GuildId,
        track: LavalinkTrack,
        #[serde(rename = "thresholdMs")]
        threshold_ms: u64,
    },
    WebSocketClosedEvent {
        #[serde(rename = "guildId")]
        guild_id: GuildId,
        code: u16,
        #[serde(default)]
        reason: String,
        #[serde(rename = "byRemote", default)]
        by_remote: bool,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WireEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

impl From<WireEndReason> for TrackEndReason {
    fn from(reason: WireEndReason) -> Self {
        match reason {
            WireEndReason::Finished => TrackEndReason::Finished,
            WireEndReason::LoadFailed => TrackEndReason::LoadFailed,
            WireEndReason::Stopped => TrackEndReason::Stopped,
            WireEndReason::Replaced => TrackEndReason::Replaced,
            WireEndReason::Cleanup => TrackEndReason::Cleanup,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LavalinkException {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub cause: String,
}

impl LavalinkException {
    pub fn describe(&self) -> String {
        match &self.message {
            Some(message) if !message.is_empty() => message.clone(),
            _ => self.cause.clone(),
        }
    }
}

/// Track tal como lo serializa Lavalink.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LavalinkTrack {
    pub encoded: String,
    pub info: LavalinkTrackInfo,
    #[serde(default)]
    pub user_data: Option<TrackUserData>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LavalinkTrackInfo {
    pub identifier: String,
    #[serde(default)]
    pub is_seekable: bool,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub length: u64,
    #[serde(default)]
    pub is_stream: bool,
    pub title: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub source_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackUserData {
    #[serde(rename = "playId", default, skip_serializing_if = "Option::is_none")]
    pub play_id: Option<u64>,
}

impl LavalinkTrack {
    pub fn play_id(&self) -> Option<u64> {
        self.user_data.as_ref().and_then(|data| data.play_id)
    }

    pub fn into_track(self, requested_by: UserId) -> Track {
        let info = self.info;
        let uri = info.uri.unwrap_or_else(|| info.identifier.clone());
        let mut track = Track::new(
            info.identifier,
            info.title,
            uri,
            SourceType::from_source_name(&info.source_name),
            requested_by,
        )
        .with_author(info.author)
        .with_encoded(self.encoded);

        if !info.is_stream {
            track = track.with_duration(Duration::from_millis(info.length));
        }
        track
    }
}

/// Respuesta de `GET /v4/loadtracks`
#[derive(Debug, Deserialize)]
#[serde(tag = "loadType", content = "data", rename_all = "lowercase")]
pub enum LoadResult {
    Track(LavalinkTrack),
    Playlist(PlaylistData),
    Search(Vec<LavalinkTrack>),
    Empty(IgnoredAny),
    Error(LavalinkException),
}

#[derive(Debug, Deserialize)]
pub struct PlaylistData {
    pub info: PlaylistInfo,
    pub tracks: Vec<LavalinkTrack>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistInfo {
    pub name: String,
    #[serde(default)]
    pub selected_track: i64,
}

impl LoadResult {
    /// Tracks cargados, en el orden de la fuente. `Err` con el mensaje del nodo.
    pub fn into_tracks(self) -> Result<Vec<LavalinkTrack>, String> {
        match self {
            LoadResult::Track(track) => Ok(vec![track]),
            LoadResult::Playlist(playlist) => Ok(playlist.tracks),
            LoadResult::Search(tracks) => Ok(tracks),
            LoadResult::Empty(_) => Ok(Vec::new()),
            LoadResult::Error(exception) => Err(exception.describe()),
        }
    }
}

/// Cuerpo de error REST de Lavalink.
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdatePlayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    track: Option<UpdateTrack>,
    #[serde(skip_serializing_if = "Option::is_none")]
    position: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    volume: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filters: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice: Option<VoiceServerInfo>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateTrack {
    /// `Some(None)` se serializa como `null` y detiene el player.
    #[serde(skip_serializing_if = "Option::is_none")]
    encoded: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_data: Option<TrackUserData>,
}

impl NodeCommand {
    /// Cuerpo del `PATCH /v4/sessions/{sid}/players/{guild}`.
    /// `None` para `Destroy`, que usa `DELETE`.
    pub fn to_patch_body(&self) -> Option<Value> {
        let update = match self {
            NodeCommand::Play(request) => {
                let track = &request.track;
                let (encoded, identifier) = match track.encoded() {
                    Some(encoded) => (Some(Some(encoded.to_string())), None),
                    None if !track.uri().is_empty() => (None, Some(track.uri().to_string())),
                    None => (None, Some(track.identifier().to_string())),
                };
                UpdatePlayer {
                    track: Some(UpdateTrack {
                        encoded,
                        identifier,
                        user_data: Some(TrackUserData {
                            play_id: Some(request.play_id),
                        }),
                    }),
                    position: Some(request.start_ms),
                    paused: Some(request.paused),
                    volume: Some(u16::from(request.volume)),
                    filters: Some(request.filters.to_payload()),
                    voice: None,
                }
            }
            NodeCommand::Stop => UpdatePlayer {
                track: Some(UpdateTrack {
                    encoded: Some(None),
                    ..UpdateTrack::default()
                }),
                ..UpdatePlayer::default()
            },
            NodeCommand::Pause => UpdatePlayer {
                paused: Some(true),
                ..UpdatePlayer::default()
            },
            NodeCommand::Resume => UpdatePlayer {
                paused: Some(false),
                ..UpdatePlayer::default()
            },
            NodeCommand::Seek(position) => UpdatePlayer {
                position: Some(*position),
                ..UpdatePlayer::default()
            },
            NodeCommand::SetVolume(volume) => UpdatePlayer {
                volume: Some(u16::from(*volume)),
                ..UpdatePlayer::default()
            },
            NodeCommand::SetFilters(filters) => UpdatePlayer {
                filters: Some(filters.to_payload()),
                ..UpdatePlayer::default()
            },
            NodeCommand::VoiceUpdate(voice) => UpdatePlayer {
                voice: Some(voice.clone()),
                ..UpdatePlayer::default()
            },
            NodeCommand::Destroy => return None,
        };

        Some(serde_json::to_value(update).unwrap_or_else(|_| json!({})))
    }
}

impl LavalinkEvent {
    /// Traduce un evento del nodo a un [`NodeEvent`] de sesión.
    pub fn into_node_event(self) -> Option<NodeEvent> {
        let (guild_id, event) = match self {
            LavalinkEvent::TrackStartEvent { guild_id, track } => (
                guild_id,
                PlayerEvent::TrackStarted {
                    play_id: track.play_id(),
                },
            ),
            LavalinkEvent::TrackEndEvent {
                guild_id,
                track,
                reason,
            } => (
                guild_id,
                PlayerEvent::TrackEnded {
                    play_id: track.play_id(),
                    reason: reason.into(),
                },
            ),
            LavalinkEvent::TrackExceptionEvent {
                guild_id,
                track,
                exception,
            } => (
                guild_id,
                PlayerEvent::TrackException {
                    play_id: track.play_id(),
                    cause: exception.describe(),
                },
            ),
            LavalinkEvent::TrackStuckEvent {
                guild_id,
                track,
                threshold_ms,
            } => (
                guild_id,
                PlayerEvent::TrackStuck {
                    play_id: track.play_id(),
                    threshold_ms,
                },
            ),
            LavalinkEvent::WebSocketClosedEvent {
                guild_id,
                code,
                reason,
                by_remote,
            } => (
                guild_id,
                PlayerEvent::VoiceClosed {
                    code,
                    reason,
                    by_remote,
                },
            ),
            LavalinkEvent::Unknown => return None,
        };
        Some(NodeEvent::Player { guild_id, event })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{effects::ActiveFilters, node::PlayRequest, testing::track};
    use pretty_assertions::assert_eq;

    fn wire_track(play_id: Option<u64>) -> Value {
        json!({
            "encoded": "QAAA",
            "info": {
                "identifier": "dQw4w9WgXcQ",
                "isSeekable": true,
                "author": "Rick Astley",
                "length": 212000,
                "isStream": false,
                "position": 0,
                "title": "Never Gonna Give You Up",
                "uri": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
                "sourceName": "youtube"
            },
            "pluginInfo": {},
            "userData": match play_id {
                Some(id) => json!({ "playId": id }),
                None => json!({}),
            }
        })
    }

    #[test]
    fn parses_ready_op() {
        let op: IncomingOp =
            serde_json::from_value(json!({"op": "ready", "resumed": false, "sessionId": "abc"}))
                .unwrap();
        match op {
            IncomingOp::Ready {
                resumed,
                session_id,
            } => {
                assert!(!resumed);
                assert_eq!(session_id, "abc");
            }
            other => panic!("unexpected op: {other:?}"),
        }
    }

    #[test]
    fn parses_track_end_with_play_id() {
        let op: IncomingOp = serde_json::from_value(json!({
            "op": "event",
            "type": "TrackEndEvent",
            "guildId": "123",
            "track": wire_track(Some(9)),
            "reason": "loadFailed"
        }))
        .unwrap();

        let IncomingOp::Event(event) = op else {
            panic!("expected event");
        };
        assert_eq!(
            event.into_node_event(),
            Some(NodeEvent::Player {
                guild_id: GuildId::new(123),
                event: PlayerEvent::TrackEnded {
                    play_id: Some(9),
                    reason: TrackEndReason::LoadFailed,
                },
            })
        );
    }

    #[test]
    fn unknown_ops_and_events_are_tolerated() {
        let op: IncomingOp = serde_json::from_value(json!({"op": "somethingNew"})).unwrap();
        assert!(matches!(op, IncomingOp::Unknown));

        let op: IncomingOp = serde_json::from_value(json!({
            "op": "event",
            "type": "SegmentsLoaded",
            "guildId": "1"
        }))
        .unwrap();
        let IncomingOp::Event(event) = op else {
            panic!("expected event");
        };
        assert_eq!(event.into_node_event(), None);
    }

    #[test]
    fn load_result_search_converts_tracks() {
        let result: LoadResult = serde_json::from_value(json!({
            "loadType": "search",
            "data": [wire_track(None)]
        }))
        .unwrap();
        let tracks = result.into_tracks().unwrap();
        let track = tracks.into_iter().next().unwrap().into_track(UserId::new(5));

        assert_eq!(track.title(), "Never Gonna Give You Up");
        assert_eq!(track.author(), "Rick Astley");
        assert_eq!(track.source_type(), SourceType::YouTube);
        assert_eq!(track.duration_ms(), Some(212000));
        assert_eq!(track.encoded(), Some("QAAA"));
    }

    #[test]
    fn load_result_error_and_empty() {
        let empty: LoadResult =
            serde_json::from_value(json!({"loadType": "empty", "data": {}})).unwrap();
        assert!(empty.into_tracks().unwrap().is_empty());

        let error: LoadResult = serde_json::from_value(json!({
            "loadType": "error",
            "data": {"message": "Video unavailable", "severity": "common", "cause": "x"}
        }))
        .unwrap();
        assert_eq!(error.into_tracks().unwrap_err(), "Video unavailable");
    }

    #[test]
    fn play_body_carries_play_id_and_state() {
        let command = NodeCommand::Play(PlayRequest {
            track: track("abc"),
            start_ms: 1500,
            play_id: 4,
            volume: 70,
            filters: ActiveFilters::default(),
            paused: false,
        });
        let body = command.to_patch_body().unwrap();

        assert_eq!(body["track"]["userData"]["playId"], json!(4));
        assert_eq!(body["track"]["identifier"], json!("https://example.com/abc"));
        assert_eq!(body["position"], json!(1500));
        assert_eq!(body["volume"], json!(70));
        assert_eq!(body["filters"], json!({}));
    }

    #[test]
    fn stop_sends_null_track() {
        assert_eq!(
            NodeCommand::Stop.to_patch_body(),
            Some(json!({"track": {"encoded": null}}))
        );
        assert_eq!(NodeCommand::Destroy.to_patch_body(), None);
        assert_eq!(
            NodeCommand::Seek(30_000).to_patch_body(),
            Some(json!({"position": 30000}))
        );
    }
}
