use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use crate::cache::StreamUrlCache;

/// Pre-resolución opcional con yt-dlp.
///
/// Convierte una URL de YouTube o un `ytsearch1:` en la URL directa del stream
/// para que el nodo no tenga que hablar con YouTube. Los resultados se
/// guardan en cache con TTL.
pub struct YtDlpExtractor {
    program: String,
    cookies_path: Option<PathBuf>,
    cache: Arc<StreamUrlCache>,
    timeout: Duration,
}

impl YtDlpExtractor {
    pub fn new(cookies_path: Option<PathBuf>, cache: Arc<StreamUrlCache>) -> Self {
        Self {
            program: "yt-dlp".to_string(),
            cookies_path,
            cache,
            timeout: Duration::from_secs(8),
        }
    }

    #[cfg(test)]
    fn with_program(mut self, program: impl Into<String>, timeout: Duration) -> Self {
        self.program = program.into();
        self.timeout = timeout;
        self
    }

    /// Devuelve la URL de stream o `None` si yt-dlp no pudo extraerla.
    /// Los fallos no son fatales: el resolver cae a la búsqueda del nodo.
    pub async fn extract(&self, query: &str) -> Option<String> {
        let key = cache_key(query);
        if let Some(url) = self.cache.get(&key) {
            debug!("🎯 yt-dlp cache hit: {}", query);
            return Some(url);
        }

        let mut cmd = async_process::Command::new(&self.program);
        // Al vencer el timeout se descarta el futuro y el proceso muere con él.
        cmd.kill_on_drop(true);
        cmd.args([
            "--quiet",
            "--no-warnings",
            "--no-playlist",
            "--format",
            "bestaudio/best",
            "--get-url",
        ]);
        if let Some(cookies) = self.cookies_file() {
            cmd.arg("--cookies").arg(cookies);
        }
        cmd.arg(query);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!("❌ yt-dlp no pudo ejecutarse: {}", e);
                return None;
            }
            Err(_) => {
                warn!("⏰ yt-dlp excedió {:?} para: {}", self.timeout, query);
                return None;
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("❌ yt-dlp falló para {}: {}", query, stderr.trim());
            return None;
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let url = first_url(&stdout)?;
        info!("✅ yt-dlp resolvió: {}", query);
        self.cache.insert(key, url.clone());
        Some(url)
    }

    fn cookies_file(&self) -> Option<&PathBuf> {
        self.cookies_path.as_ref().filter(|path| path.exists())
    }
}

fn cache_key(query: &str) -> String {
    query.trim().to_lowercase()
}

fn first_url(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("http"))
        .map(str::to_string)
}
