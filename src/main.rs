use anyhow::{bail, Result};
use std::{sync::Arc, time::Duration};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tunelink::{
    audio::{
        autoplay::AutoplayResolver,
        lavalink_client::LavalinkNode,
        manager::SessionManager,
        node::NodeLink,
        player::SessionServices,
    },
    cache::stream_url_cache,
    config::Config,
    sources::{lavalink_search::TrackLoader, LavalinkResolver, TrackResolver, YtDlpExtractor},
    storage::{GuildStore, JsonStorage},
    ui::describe_notice,
};

const EVENT_BUFFER: usize = 1024;
const NOTICE_BUFFER: usize = 256;
const CACHE_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);
const HEALTH_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tunelink=debug".parse()?)
                .add_directive("reqwest=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando tunelink v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    info!("{}", config.summary());

    // Inicializar almacenamiento JSON
    let storage: Arc<dyn GuildStore> = Arc::new(JsonStorage::new(config.data_dir.clone()).await?);

    // Nodos Lavalink: un supervisor por nodo
    let shutdown = CancellationToken::new();
    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let mut lavalink_nodes = Vec::with_capacity(config.nodes.len());
    let mut supervisors = Vec::with_capacity(config.nodes.len());

    for node_config in &config.nodes {
        let node = Arc::new(LavalinkNode::new(
            node_config,
            config.node_credentials(),
            config.reconnect_policy(),
        )?);
        supervisors.push(tokio::spawn(
            node.clone().run(events_tx.clone(), shutdown.clone()),
        ));
        lavalink_nodes.push(node);
    }
    drop(events_tx);

    info!("🎼 Esperando a los nodos Lavalink...");
    let startup_timeout = config.node_startup_timeout;
    let waits = lavalink_nodes.iter().map(|node| {
        Box::pin(async move {
            if node.wait_ready(startup_timeout).await {
                Ok(node.name().to_string())
            } else {
                Err(node.name().to_string())
            }
        })
    });
    match futures::future::select_ok(waits).await {
        Ok((name, _)) => info!("✅ Nodo {} listo", name),
        Err(last) => {
            error!(
                "❌ Ningún nodo Lavalink estuvo listo en {} (último: {})",
                humantime::format_duration(startup_timeout),
                last
            );
            shutdown.cancel();
            bail!("no Lavalink node became ready");
        }
    }

    // Resolución de tracks
    let stream_cache = Arc::new(stream_url_cache(config.ytdlp_cache_ttl));
    let ytdlp = config.ytdlp_enabled.then(|| {
        info!("📥 Pre-resolución con yt-dlp activada");
        YtDlpExtractor::new(Some(config.ytdlp_cookies_path.clone()), stream_cache.clone())
    });
    let loaders: Vec<Arc<dyn TrackLoader>> = lavalink_nodes
        .iter()
        .map(|node| node.clone() as Arc<dyn TrackLoader>)
        .collect();
    let resolver: Arc<dyn TrackResolver> = Arc::new(LavalinkResolver::new(loaders, ytdlp));

    // Sesiones
    let (notices, _) = broadcast::channel(NOTICE_BUFFER);
    let services = SessionServices {
        autoplay: AutoplayResolver::new(resolver, config.autoplay_timeout),
        store: storage,
        notices,
    };
    let nodes: Vec<Arc<dyn NodeLink>> = lavalink_nodes
        .iter()
        .map(|node| node.clone() as Arc<dyn NodeLink>)
        .collect();
    let manager = Arc::new(SessionManager::new(nodes, services, config.session_config()));

    tokio::spawn(manager.clone().run_events(events_rx, shutdown.clone()));
    tokio::spawn(log_notices(manager.notices(), shutdown.clone()));
    tokio::spawn(monitor_health(manager.clone(), shutdown.clone()));

    // Limpieza periódica de caché
    let cache_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CACHE_CLEANUP_INTERVAL);
        loop {
            tokio::select! {
                _ = cache_shutdown.cancelled() => break,
                _ = interval.tick() => stream_cache.cleanup_old_entries(),
            }
        }
    });

    info!("🚀 tunelink iniciado");

    // Manejar shutdown graceful
    tokio::signal::ctrl_c().await?;
    info!("⚠️ Señal de shutdown recibida, cerrando...");

    manager.shutdown_all().await;
    shutdown.cancel();
    for supervisor in supervisors {
        if let Err(e) = supervisor.await {
            warn!("Supervisor terminó con error: {}", e);
        }
    }

    info!("👋 tunelink detenido");
    Ok(())
}

async fn log_notices(
    mut notices: broadcast::Receiver<tunelink::audio::player::SessionNotice>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            notice = notices.recv() => match notice {
                Ok(notice) => match describe_notice(&notice) {
                    Some(text) => info!("📢 {}", text),
                    None => debug!("Aviso sin texto: {:?}", notice),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("⚠️ Se perdieron {} avisos de sesión", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

async fn monitor_health(manager: Arc<SessionManager>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(HEALTH_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                for health in manager.health() {
                    if health.degraded {
                        warn!(
                            "🚨 Nodo {} degradado ({:?}, {} intentos fallidos)",
                            health.name, health.state, health.failed_attempts
                        );
                    }
                }
                debug!("📊 {} sesiones activas", manager.session_count());
            }
        }
    }
}

async fn health_check(config: &Config) -> Result<()> {
    // Verificar dependencias críticas
    if config.ytdlp_enabled {
        let yt_dlp = async_process::Command::new("yt-dlp")
            .arg("--version")
            .output()
            .await?;
        if !yt_dlp.status.success() {
            bail!("Dependencias faltantes: yt-dlp");
        }
    }

    println!("OK");
    Ok(())
}
