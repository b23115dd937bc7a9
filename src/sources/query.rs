use regex::Regex;
use std::sync::LazyLock;

use super::SourceType;

static URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+").expect("URL regex is valid"));

static SPOTIFY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://open\.spotify\.com/(track|album|playlist)/([a-zA-Z0-9]+)")
        .expect("Spotify regex is valid")
});

const SOUNDCLOUD_PREFIX: &str = "scsearch:";

/// Forma normalizada de lo que escribió el usuario
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedQuery {
    /// URL directa, con la fuente deducida del host
    Url { url: String, source: SourceType },
    /// Texto libre a buscar en `source`
    Search { text: String, source: SourceType },
}

impl ResolvedQuery {
    /// Identificador que entiende `/v4/loadtracks`.
    pub fn identifier(&self) -> String {
        match self {
            ResolvedQuery::Url { url, .. } => url.clone(),
            ResolvedQuery::Search { text, source } => match source.search_prefix() {
                Some(prefix) => format!("{prefix}{text}"),
                None => text.clone(),
            },
        }
    }
}

/// Limpia la consulta: recorta espacios y, si hay una URL en medio de texto,
/// se queda solo con la URL.
pub fn sanitize(query: &str) -> String {
    let trimmed = query.trim();
    match URL_REGEX.find(trimmed) {
        Some(found) => found.as_str().to_string(),
        None => trimmed.to_string(),
    }
}

/// Clasifica una consulta. `hint` solo se usa para texto libre.
pub fn classify(query: &str, hint: SourceType) -> ResolvedQuery {
    let query = sanitize(query);

    if let Some(text) = query.strip_prefix(SOUNDCLOUD_PREFIX) {
        return ResolvedQuery::Search {
            text: text.trim().to_string(),
            source: SourceType::SoundCloud,
        };
    }

    if query.starts_with("http://") || query.starts_with("https://") {
        let source = if is_spotify_url(&query) {
            SourceType::Spotify
        } else if is_youtube_url(&query) {
            SourceType::YouTube
        } else if query.contains("soundcloud.com") {
            SourceType::SoundCloud
        } else {
            SourceType::Direct
        };
        return ResolvedQuery::Url { url: query, source };
    }

    let source = match hint {
        SourceType::Direct => SourceType::YouTube,
        other => other,
    };
    ResolvedQuery::Search { text: query, source }
}

pub fn is_spotify_url(url: &str) -> bool {
    SPOTIFY_REGEX.is_match(url)
}

pub fn is_youtube_url(url: &str) -> bool {
    url.contains("youtube.com") || url.contains("youtu.be")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn extracts_url_from_surrounding_text() {
        assert_eq!(
            sanitize("  mira esto https://youtu.be/dQw4w9WgXcQ\nmuy bueno "),
            "https://youtu.be/dQw4w9WgXcQ"
        );
        assert_eq!(sanitize("  never gonna give you up \n"), "never gonna give you up");
    }

    #[test]
    fn classifies_urls_by_host() {
        assert_eq!(
            classify("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC", SourceType::YouTube),
            ResolvedQuery::Url {
                url: "https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC".to_string(),
                source: SourceType::Spotify,
            }
        );
        assert_eq!(
            classify("https://www.youtube.com/watch?v=dQw4w9WgXcQ", SourceType::YouTube),
            ResolvedQuery::Url {
                url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
                source: SourceType::YouTube,
            }
        );
        assert_eq!(
            classify("https://example.com/radio.mp3", SourceType::YouTube),
            ResolvedQuery::Url {
                url: "https://example.com/radio.mp3".to_string(),
                source: SourceType::Direct,
            }
        );
    }

    #[test]
    fn soundcloud_prefix_overrides_hint() {
        let query = classify("scsearch: lofi beats", SourceType::YouTube);
        assert_eq!(
            query,
            ResolvedQuery::Search {
                text: "lofi beats".to_string(),
                source: SourceType::SoundCloud,
            }
        );
        assert_eq!(query.identifier(), "scsearch:lofi beats");
    }

    #[test]
    fn free_text_defaults_to_youtube_search() {
        let query = classify("daft punk", SourceType::Direct);
        assert_eq!(query.identifier(), "ytsearch:daft punk");
    }
}
