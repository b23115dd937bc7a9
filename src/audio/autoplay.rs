use std::{sync::Arc, time::Duration};
use tracing::debug;

use crate::sources::{ResolveError, SourceType, Track, TrackResolver};

/// Elige un track de seguimiento cuando la cola se vacía con autoplay activo.
#[derive(Clone)]
pub struct AutoplayResolver {
    resolver: Arc<dyn TrackResolver>,
    timeout: Duration,
}

impl AutoplayResolver {
    pub fn new(resolver: Arc<dyn TrackResolver>, timeout: Duration) -> Self {
        Self { resolver, timeout }
    }

    /// Busca por título y autor del track terminado y devuelve el primer
    /// candidato distinto de él. El plazo vencido cuenta como fallo.
    pub async fn next_for(&self, finished: &Track) -> Result<Track, ResolveError> {
        let query = finished.search_key();
        debug!("🎲 Autoplay buscando a partir de: {}", query);

        let candidates = tokio::time::timeout(
            self.timeout,
            self.resolver
                .resolve(&query, SourceType::YouTube, finished.requested_by()),
        )
        .await
        .map_err(|_| ResolveError::Timeout)??;

        candidates
            .into_iter()
            .find(|candidate| candidate.identifier() != finished.identifier())
            .ok_or(ResolveError::NoResults)
    }
}
