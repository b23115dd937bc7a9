use std::time::Duration;

use crate::{
    audio::{
        player::{CommandOutcome, PlaybackState, SessionNotice, SessionSnapshot},
        queue::QueuePage,
    },
    error::{NodeError, PlayerError, StorageError, ValidationError},
    sources::{ResolveError, Track},
};

impl ValidationError {
    pub fn user_message(&self) -> String {
        match self {
            ValidationError::VolumeOutOfRange(v) => {
                format!("🔊 El volumen debe estar entre 0 y 100 (recibido {v})")
            }
            ValidationError::UnknownFilter(name) => format!("🎛️ Filtro desconocido: `{name}`"),
            ValidationError::IndexOutOfRange { index, len } => {
                format!("❌ Posición {} inválida, la cola tiene {} canciones", index + 1, len)
            }
            ValidationError::QueueFull { max } => format!("📋 La cola está llena ({max} canciones)"),
            ValidationError::NothingPlaying => "🔇 No hay nada reproduciéndose".to_string(),
            ValidationError::NotPaused => "▶️ La reproducción no está pausada".to_string(),
            ValidationError::AlreadyPaused => "⏸️ La reproducción ya está pausada".to_string(),
            ValidationError::SeekOutOfRange { duration_ms, .. } => format!(
                "⏩ Posición fuera de rango (duración {})",
                format_duration(Duration::from_millis(*duration_ms))
            ),
            ValidationError::NotSeekable => "🔴 No se puede adelantar una transmisión en vivo".to_string(),
            ValidationError::InvalidPlaylistName(_) => {
                "📝 Nombre inválido: usa 1-32 letras, números, `-` o `_`".to_string()
            }
            ValidationError::EmptyQueue => "📭 La cola está vacía".to_string(),
        }
    }
}

impl ResolveError {
    pub fn user_message(&self) -> String {
        match self {
            ResolveError::NoResults => "🔍 No se encontraron resultados".to_string(),
            ResolveError::Upstream(_) => "⚠️ El proveedor de música no respondió".to_string(),
            ResolveError::Timeout => "⏱️ La búsqueda tardó demasiado".to_string(),
        }
    }
}

impl NodeError {
    pub fn user_message(&self) -> String {
        match self {
            NodeError::NotReady => "🔌 El servidor de audio no está disponible".to_string(),
            NodeError::Rejected { .. } => "❌ El servidor de audio rechazó la operación".to_string(),
            NodeError::Http(_) | NodeError::Protocol(_) | NodeError::WebSocket(_) => {
                "⚠️ Error de comunicación con el servidor de audio".to_string()
            }
        }
    }
}

impl StorageError {
    pub fn user_message(&self) -> String {
        match self {
            StorageError::NotFound(name) => format!("📂 No existe `{name}`"),
            StorageError::Io(_) | StorageError::Json(_) => {
                "💾 Error accediendo a los datos guardados".to_string()
            }
        }
    }
}

impl PlayerError {
    pub fn user_message(&self) -> String {
        match self {
            PlayerError::Validation(e) => e.user_message(),
            PlayerError::Resolution(e) => e.user_message(),
            PlayerError::Storage(e) => e.user_message(),
            PlayerError::NotReady => "🔌 El servidor de audio no está listo, intenta en unos segundos".to_string(),
            PlayerError::PlaybackFault(_) => "❌ No se pudo reproducir la canción".to_string(),
            PlayerError::NodeDisconnected => "🔄 Reconectando con el servidor de audio...".to_string(),
            PlayerError::NoSession => "🔇 No hay una sesión activa en este servidor".to_string(),
            PlayerError::SessionClosed => "👋 La sesión se cerró, vuelve a intentarlo".to_string(),
        }
    }
}

/// Texto para el resultado de un comando
pub fn describe_outcome(outcome: &CommandOutcome) -> String {
    match outcome {
        CommandOutcome::Started(track) => format!("🎵 Reproduciendo: {}", track_line(track)),
        CommandOutcome::Queued { track, position } => {
            format!("➕ Agregado a la cola (#{}): {}", position, track_line(track))
        }
        CommandOutcome::QueuedMany { added, started } => match started {
            Some(track) => format!("📋 {} canciones agregadas. Reproduciendo: {}", added, track_line(track)),
            None => format!("📋 {} canciones agregadas a la cola", added),
        },
        CommandOutcome::Skipped { skipped, next } => match next {
            Some(next) => format!("⏭️ Saltado **{}**. Ahora: {}", skipped.title(), track_line(next)),
            None => format!("⏭️ Saltado **{}**. No hay más canciones", skipped.title()),
        },
        CommandOutcome::Stopped => "⏹️ Reproducción detenida y cola limpiada".to_string(),
        CommandOutcome::Paused => "⏸️ Pausado".to_string(),
        CommandOutcome::Resumed => "▶️ Reanudado".to_string(),
        CommandOutcome::Seeked(ms) => {
            format!("⏩ Posición: {}", format_duration(Duration::from_millis(*ms)))
        }
        CommandOutcome::VolumeSet(v) => format!("🔊 Volumen: {v}%"),
        CommandOutcome::DefaultVolumeSet(v) => format!("🔊 Volumen por defecto: {v}%"),
        CommandOutcome::FiltersChanged(names) if names.is_empty() => "🎛️ Filtros desactivados".to_string(),
        CommandOutcome::FiltersChanged(names) => format!("🎛️ Filtros activos: {}", names.join(", ")),
        CommandOutcome::LoopSet(mode) => format!("🔁 Repetición: {mode}"),
        CommandOutcome::AutoplaySet(on) => format!("🎲 Autoplay {}", on_off(*on)),
        CommandOutcome::StaySet(on) => format!("🕐 Modo 24/7 {}", on_off(*on)),
        CommandOutcome::Removed(track) => format!("🗑️ Eliminado: **{}**", track.title()),
        CommandOutcome::Cleared(n) => format!("🧹 {n} canciones eliminadas de la cola"),
        CommandOutcome::Shuffled(n) => format!("🔀 {n} canciones mezcladas"),
        CommandOutcome::Moved { track, to } => {
            format!("↕️ **{}** movida a la posición {}", track.title(), to + 1)
        }
        CommandOutcome::Status(snapshot) => describe_status(snapshot),
        CommandOutcome::Queue {
            current,
            page,
            total_duration,
        } => describe_queue(current.as_ref(), page, *total_duration),
        CommandOutcome::Joined(_) => "🔊 Conectado al canal de voz".to_string(),
        CommandOutcome::VoiceUpdated => "🔊 Conexión de voz actualizada".to_string(),
        CommandOutcome::Left => "👋 Desconectado del canal de voz".to_string(),
        CommandOutcome::PlaylistSaved { name, tracks } => {
            format!("💾 Playlist `{name}` guardada ({tracks} canciones)")
        }
        CommandOutcome::PlaylistLoaded { name, added, .. } => {
            format!("📂 Playlist `{name}` cargada ({added} canciones)")
        }
        CommandOutcome::Playlists(names) if names.is_empty() => "📂 No hay playlists guardadas".to_string(),
        CommandOutcome::Playlists(names) => format!("📂 Playlists: {}", names.join(", ")),
        CommandOutcome::PlaylistDeleted(name) => format!("🗑️ Playlist `{name}` eliminada"),
    }
}

/// Texto para un aviso de sesión; `None` si no se anuncia en el chat.
pub fn describe_notice(notice: &SessionNotice) -> Option<String> {
    match notice {
        SessionNotice::NowPlaying { track, .. } => {
            Some(format!("🎵 Reproduciendo Ahora: {}", track_line(track)))
        }
        SessionNotice::QueueEnded { .. } => Some("📭 La cola terminó".to_string()),
        SessionNotice::Reconnecting { .. } => {
            Some("🔄 Se perdió la conexión con el servidor de audio, reconectando...".to_string())
        }
        SessionNotice::Resumed { track: Some(track), .. } => {
            Some(format!("✅ Reconectado, continuando con **{}**", track.title()))
        }
        SessionNotice::Resumed { track: None, .. } => None,
        SessionNotice::LeaveVoice { .. } => Some("👋 Saliendo del canal de voz".to_string()),
        SessionNotice::AutoplayPicked { track, .. } => {
            Some(format!("🎲 Autoplay: {}", track_line(track)))
        }
    }
}

fn describe_status(snapshot: &SessionSnapshot) -> String {
    let mut lines = Vec::new();

    match (&snapshot.current, snapshot.state) {
        (_, PlaybackState::Disconnected) => lines.push("🔄 Reconectando...".to_string()),
        (Some(track), state) => {
            let icon = if state == PlaybackState::Paused { "⏸️" } else { "🎵" };
            lines.push(format!("{} {}", icon, track_line(track)));
            if let Some(duration) = track.duration() {
                let position = Duration::from_millis(snapshot.position_ms);
                lines.push(format!(
                    "{} `{}/{}`",
                    progress_bar(position, duration, 20),
                    format_duration(position),
                    format_duration(duration)
                ));
            }
        }
        (None, _) => lines.push("🔇 Nada reproduciéndose".to_string()),
    }

    lines.push(format!(
        "📋 {} en cola · 🔊 {}% · 🔁 {} · 🎲 {} · 🕐 {}",
        snapshot.queue.len(),
        snapshot.volume,
        snapshot.loop_mode,
        on_off(snapshot.autoplay),
        on_off(snapshot.stay)
    ));
    if !snapshot.filters.is_empty() {
        lines.push(format!("🎛️ {}", snapshot.filters.join(", ")));
    }
    lines.join("\n")
}

fn describe_queue(current: Option<&Track>, page: &QueuePage, total: Duration) -> String {
    let mut lines = Vec::new();
    if let Some(track) = current {
        lines.push(format!("🎵 Ahora: {}", track_line(track)));
    }

    if page.items.is_empty() {
        lines.push("📭 La cola está vacía".to_string());
        return lines.join("\n");
    }

    for (i, track) in page.items.iter().enumerate() {
        lines.push(format!("`{}.` {}", page.offset + i + 1, track_line(track)));
    }
    lines.push(format!(
        "📋 Página {}/{} · {} canciones · ⏱️ {}",
        page.current_page,
        page.total_pages,
        page.total_items,
        format_duration(total)
    ));
    lines.join("\n")
}

fn track_line(track: &Track) -> String {
    let duration = track
        .duration()
        .map(format_duration)
        .unwrap_or_else(|| "🔴 En vivo".to_string());
    if track.author().is_empty() {
        format!("**{}** `[{}]`", track.title(), duration)
    } else {
        format!("**{}** - {} `[{}]`", track.title(), track.author(), duration)
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "activado"
    } else {
        "desactivado"
    }
}

/// Formatea una duración en formato legible
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

/// Barra de progreso visual
pub fn progress_bar(position: Duration, duration: Duration, length: usize) -> String {
    if length == 0 {
        return String::new();
    }
    let progress = if duration.is_zero() {
        0.0
    } else {
        (position.as_secs_f64() / duration.as_secs_f64()).clamp(0.0, 1.0)
    };
    let filled = ((progress * length as f64) as usize).min(length - 1);

    format!(
        "{}🔘{}",
        "▬".repeat(filled),
        "▬".repeat(length - filled - 1)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::track;
    use pretty_assertions::assert_eq;

    #[test]
    fn durations() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0:00");
        assert_eq!(format_duration(Duration::from_secs(185)), "3:05");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1:02:03");
    }

    #[test]
    fn progress_bar_marks_position() {
        let total = Duration::from_secs(100);
        assert_eq!(progress_bar(Duration::ZERO, total, 5), "🔘▬▬▬▬");
        assert_eq!(progress_bar(Duration::from_secs(50), total, 4), "▬▬🔘▬");
        assert_eq!(progress_bar(Duration::from_secs(500), total, 4), "▬▬▬🔘");
    }

    #[test]
    fn errors_map_to_one_message_each() {
        let err = PlayerError::Validation(ValidationError::IndexOutOfRange { index: 4, len: 2 });
        assert_eq!(
            err.user_message(),
            "❌ Posición 5 inválida, la cola tiene 2 canciones"
        );
        assert_eq!(
            PlayerError::Resolution(ResolveError::NoResults).user_message(),
            "🔍 No se encontraron resultados"
        );
        assert!(PlayerError::NotReady.user_message().contains("no está listo"));
    }

    #[test]
    fn outcomes_mention_the_track() {
        let text = describe_outcome(&CommandOutcome::Queued {
            track: track("a"),
            position: 3,
        });
        assert_eq!(text, "➕ Agregado a la cola (#3): **Song a** - Artist `[3:00]`");
    }

    #[test]
    fn queue_pages_number_from_the_offset() {
        let page = QueuePage {
            items: vec![track("k"), track("l")],
            offset: 10,
            current_page: 2,
            total_pages: 2,
            total_items: 12,
        };
        let text = describe_outcome(&CommandOutcome::Queue {
            current: Some(track("a")),
            page,
            total_duration: Duration::from_secs(12 * 180),
        });
        assert_eq!(
            text,
            "🎵 Ahora: **Song a** - Artist `[3:00]`\n\
             `11.` **Song k** - Artist `[3:00]`\n\
             `12.` **Song l** - Artist `[3:00]`\n\
             📋 Página 2/2 · 12 canciones · ⏱️ 36:00"
        );
    }

    #[test]
    fn silent_resume_is_not_announced() {
        let notice = SessionNotice::Resumed {
            guild_id: serenity::model::id::GuildId::new(1),
            track: None,
        };
        assert_eq!(describe_notice(&notice), None);
    }
}
