use async_trait::async_trait;
use serenity::model::id::UserId;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use super::{
    query::{classify, ResolvedQuery},
    ResolveError, SourceType, Track, TrackResolver, YtDlpExtractor,
};
use crate::audio::{lavalink_client::LavalinkNode, node::NodeLink};

/// Tiempo máximo para resolver una consulta completa
pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Carga tracks por identificador (`/v4/loadtracks`).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackLoader: Send + Sync {
    async fn load(&self, identifier: &str, requested_by: UserId)
        -> Result<Vec<Track>, ResolveError>;
}

#[async_trait]
impl TrackLoader for LavalinkNode {
    async fn load(
        &self,
        identifier: &str,
        requested_by: UserId,
    ) -> Result<Vec<Track>, ResolveError> {
        let result = self.load_tracks(identifier).await.map_err(|e| {
            warn!("❌ {} no pudo cargar '{}': {}", self.name(), identifier, e);
            ResolveError::Upstream(e.to_string())
        })?;

        let tracks = result.into_tracks().map_err(ResolveError::Upstream)?;
        Ok(tracks
            .into_iter()
            .map(|track| track.into_track(requested_by))
            .collect())
    }
}

/// Resolver basado en los nodos Lavalink, con pre-resolución opcional por
/// yt-dlp y fallback de YouTube a SoundCloud.
pub struct LavalinkResolver {
    loaders: Vec<Arc<dyn TrackLoader>>,
    ytdlp: Option<YtDlpExtractor>,
    timeout: Duration,
}

impl LavalinkResolver {
    pub fn new(loaders: Vec<Arc<dyn TrackLoader>>, ytdlp: Option<YtDlpExtractor>) -> Self {
        Self {
            loaders,
            ytdlp,
            timeout: RESOLVE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn resolve_query(
        &self,
        query: ResolvedQuery,
        requested_by: UserId,
    ) -> Result<Vec<Track>, ResolveError> {
        match &query {
            ResolvedQuery::Url {
                url,
                source: SourceType::YouTube,
            } => {
                if let Some(tracks) = self.try_ytdlp(url, requested_by).await {
                    return Ok(tracks);
                }
                self.load(url, requested_by).await
            }
            ResolvedQuery::Search {
                text,
                source: SourceType::YouTube,
            } => {
                if let Some(tracks) = self.try_ytdlp(&format!("ytsearch1:{text}"), requested_by).await {
                    return Ok(tracks);
                }

                match self.load(&query.identifier(), requested_by).await {
                    Err(ResolveError::NoResults) => {
                        info!("🔄 Sin resultados en YouTube, probando SoundCloud: {}", text);
                        let fallback = ResolvedQuery::Search {
                            text: text.clone(),
                            source: SourceType::SoundCloud,
                        };
                        self.load(&fallback.identifier(), requested_by).await
                    }
                    other => other,
                }
            }
            _ => self.load(&query.identifier(), requested_by).await,
        }
    }

    async fn try_ytdlp(&self, query: &str, requested_by: UserId) -> Option<Vec<Track>> {
        let ytdlp = self.ytdlp.as_ref()?;
        let stream_url = ytdlp.extract(query).await?;
        match self.load(&stream_url, requested_by).await {
            Ok(tracks) => Some(tracks),
            Err(e) => {
                debug!("yt-dlp devolvió una URL que el nodo no cargó: {}", e);
                None
            }
        }
    }

    /// Prueba cada nodo en orden; el primero que responda decide.
    async fn load(&self, identifier: &str, requested_by: UserId) -> Result<Vec<Track>, ResolveError> {
        let mut last_error = ResolveError::Upstream("no nodes configured".to_string());

        for loader in &self.loaders {
            match loader.load(identifier, requested_by).await {
                Ok(tracks) if tracks.is_empty() => return Err(ResolveError::NoResults),
                Ok(tracks) => return Ok(tracks),
                Err(ResolveError::Upstream(message)) => {
                    last_error = ResolveError::Upstream(message);
                }
                Err(other) => return Err(other),
            }
        }
        Err(last_error)
    }
}

#[async_trait]
impl TrackResolver for LavalinkResolver {
    async fn resolve(
        &self,
        query: &str,
        hint: SourceType,
        requested_by: UserId,
    ) -> Result<Vec<Track>, ResolveError> {
        let classified = classify(query, hint);
        debug!("🔍 Resolviendo {:?}", classified);

        tokio::time::timeout(self.timeout, self.resolve_query(classified, requested_by))
            .await
            .map_err(|_| ResolveError::Timeout)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::track;
    use mockall::predicate::{always, eq};

    fn user() -> UserId {
        UserId::new(1)
    }

    fn resolver(loaders: Vec<MockTrackLoader>) -> LavalinkResolver {
        LavalinkResolver::new(
            loaders
                .into_iter()
                .map(|loader| Arc::new(loader) as Arc<dyn TrackLoader>)
                .collect(),
            None,
        )
    }

    #[tokio::test]
    async fn youtube_search_falls_back_to_soundcloud() {
        let mut loader = MockTrackLoader::new();
        loader
            .expect_load()
            .with(eq("ytsearch:obscure song"), always())
            .times(1)
            .returning(|_, _| Ok(Vec::new()));
        loader
            .expect_load()
            .with(eq("scsearch:obscure song"), always())
            .times(1)
            .returning(|_, _| Ok(vec![track("sc-1")]));

        let tracks = resolver(vec![loader])
            .resolve("obscure song", SourceType::YouTube, user())
            .await
            .unwrap();
        assert_eq!(tracks[0].identifier(), "sc-1");
    }

    #[tokio::test]
    async fn empty_results_are_no_results() {
        let mut loader = MockTrackLoader::new();
        loader.expect_load().returning(|_, _| Ok(Vec::new()));

        let result = resolver(vec![loader])
            .resolve("scsearch:nothing", SourceType::YouTube, user())
            .await;
        assert_eq!(result, Err(ResolveError::NoResults));
    }

    #[tokio::test]
    async fn upstream_errors_fail_over_to_next_node() {
        let mut down = MockTrackLoader::new();
        down.expect_load()
            .returning(|_, _| Err(ResolveError::Upstream("connection refused".into())));
        let mut up = MockTrackLoader::new();
        up.expect_load().returning(|_, _| Ok(vec![track("ok")]));

        let tracks = resolver(vec![down, up])
            .resolve("https://example.com/a.mp3", SourceType::YouTube, user())
            .await
            .unwrap();
        assert_eq!(tracks.len(), 1);
    }

    #[tokio::test]
    async fn no_loaders_is_upstream_error() {
        let result = resolver(Vec::new())
            .resolve("anything", SourceType::SoundCloud, user())
            .await;
        assert!(matches!(result, Err(ResolveError::Upstream(_))));
    }
}
