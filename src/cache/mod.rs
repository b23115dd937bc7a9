//! # Cache Module
//!
//! Short-lived caching for query resolution.
//!
//! Resolving a YouTube search through yt-dlp takes seconds, and the same
//! query is often repeated by different users in a short window. The
//! resolver keeps the extracted stream URL for `YTDLP_CACHE_TTL` seconds so
//! repeated `play` commands skip the extraction entirely.
//!
//! ## Configuration
//!
//! ```env
//! YTDLP_CACHE_TTL=1800   # Time-to-live in seconds (30 minutes)
//! ```

pub mod ttl_cache;

use std::time::Duration;
use tracing::info;

pub use ttl_cache::{CacheMetrics, TtlCache};

/// Cache of extracted stream URLs keyed by the normalised query.
pub type StreamUrlCache = TtlCache<String, String>;

/// Default number of stream URLs kept in memory.
pub const STREAM_URL_CACHE_CAPACITY: usize = 512;

pub fn stream_url_cache(ttl: Duration) -> StreamUrlCache {
    TtlCache::new(STREAM_URL_CACHE_CAPACITY, ttl)
}

impl StreamUrlCache {
    /// Performs cache maintenance by removing expired entries.
    ///
    /// Called periodically from a background task started in `main`.
    pub fn cleanup_old_entries(&self) {
        let removed = self.cleanup_expired();
        if removed > 0 {
            let metrics = self.metrics();
            info!(
                "🧹 Cache cleanup: removed {} expired entries (hit rate {:.0}%)",
                removed,
                metrics.hit_rate() * 100.0
            );
        }
    }
}
