use anyhow::{bail, Context, Result};
use serenity::model::id::UserId;
use std::{collections::HashSet, path::PathBuf, time::Duration};
use url::Url;

use crate::audio::{lavalink_client::NodeCredentials, node::ReconnectPolicy, player::SessionConfig};

/// Un nodo Lavalink configurado
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub name: String,
    pub uri: Url,
}

#[derive(Debug, Clone)]
pub struct Config {
    // Lavalink
    pub nodes: Vec<NodeConfig>,
    pub lavalink_password: String,
    pub bot_user_id: UserId,
    pub client_name: String,
    pub node_startup_timeout: Duration,

    // Reconexión
    pub reconnect_interval: Duration,
    pub reconnect_max_attempts: Option<u32>,
    pub node_degraded_after: u32,

    // Sesiones
    pub autoplay_timeout: Duration,
    pub idle_disconnect_after: Duration,
    pub default_volume: u8,
    pub max_queue_size: usize,
    pub max_track_faults: u32,

    // Paths
    pub data_dir: PathBuf,

    // yt-dlp
    pub ytdlp_enabled: bool,
    pub ytdlp_cookies_path: PathBuf,
    pub ytdlp_cache_ttl: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("cannot create {}", config.data_dir.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Construye la configuración a partir de una fuente de variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let bot_user_id: u64 = var("BOT_USER_ID")
            .context("BOT_USER_ID is required")?
            .trim()
            .parse()
            .context("BOT_USER_ID must be a numeric Discord id")?;
        if bot_user_id == 0 {
            bail!("BOT_USER_ID cannot be 0");
        }

        let config = Self {
            nodes: parse_nodes(
                &var("LAVALINK_NODES").unwrap_or_else(|| "main=http://localhost:2333".to_string()),
            )?,
            lavalink_password: var("LAVALINK_PASSWORD")
                .unwrap_or_else(|| "youshallnotpass".to_string()),
            bot_user_id: UserId::new(bot_user_id),
            client_name: var("CLIENT_NAME")
                .unwrap_or_else(|| format!("tunelink/{}", env!("CARGO_PKG_VERSION"))),
            node_startup_timeout: parse_duration(
                "NODE_STARTUP_TIMEOUT",
                var("NODE_STARTUP_TIMEOUT").as_deref().unwrap_or("30s"),
            )?,

            reconnect_interval: parse_duration(
                "RECONNECT_INTERVAL",
                var("RECONNECT_INTERVAL").as_deref().unwrap_or("5s"),
            )?,
            reconnect_max_attempts: match var("RECONNECT_MAX_ATTEMPTS") {
                Some(value) => match value.trim().parse::<u32>() {
                    Ok(0) => None,
                    Ok(max) => Some(max),
                    Err(_) => bail!("RECONNECT_MAX_ATTEMPTS must be a number, got: {value}"),
                },
                None => None,
            },
            node_degraded_after: var("NODE_DEGRADED_AFTER")
                .unwrap_or_else(|| "3".to_string())
                .trim()
                .parse()
                .context("NODE_DEGRADED_AFTER must be a number")?,

            autoplay_timeout: parse_duration(
                "AUTOPLAY_TIMEOUT",
                var("AUTOPLAY_TIMEOUT").as_deref().unwrap_or("8s"),
            )?,
            idle_disconnect_after: parse_duration(
                "IDLE_DISCONNECT_AFTER",
                var("IDLE_DISCONNECT_AFTER").as_deref().unwrap_or("180s"),
            )?,
            default_volume: var("DEFAULT_VOLUME")
                .unwrap_or_else(|| "50".to_string())
                .trim()
                .parse()
                .context("DEFAULT_VOLUME must be an integer between 0 and 100")?,
            max_queue_size: var("MAX_QUEUE_SIZE")
                .unwrap_or_else(|| "1000".to_string())
                .trim()
                .parse()
                .context("MAX_QUEUE_SIZE must be a number")?,
            max_track_faults: var("MAX_TRACK_FAULTS")
                .unwrap_or_else(|| "3".to_string())
                .trim()
                .parse()
                .context("MAX_TRACK_FAULTS must be a number")?,

            data_dir: var("DATA_DIR").unwrap_or_else(|| "./data".to_string()).into(),

            ytdlp_enabled: parse_bool(var("YTDLP_ENABLED").as_deref().unwrap_or("false")),
            ytdlp_cookies_path: var("YTDLP_COOKIES_PATH")
                .unwrap_or_else(|| "./cookies/cookies.txt".to_string())
                .into(),
            ytdlp_cache_ttl: parse_duration(
                "YTDLP_CACHE_TTL",
                var("YTDLP_CACHE_TTL").as_deref().unwrap_or("1800"),
            )?,
        };

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// A failure here is fatal: the process refuses to start with a
    /// configuration it cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            bail!("At least one Lavalink node must be configured");
        }

        let mut names = HashSet::new();
        for node in &self.nodes {
            if !names.insert(node.name.as_str()) {
                bail!("Duplicate node name: {}", node.name);
            }
        }

        if self.default_volume > 100 {
            bail!("Default volume must be between 0 and 100, got: {}", self.default_volume);
        }

        if self.max_queue_size == 0 {
            bail!("Max queue size must be greater than 0");
        }

        if self.reconnect_interval.is_zero() {
            bail!("Reconnect interval must be greater than 0");
        }

        if self.node_degraded_after == 0 {
            bail!("NODE_DEGRADED_AFTER must be greater than 0");
        }

        if self.autoplay_timeout.is_zero() || self.autoplay_timeout > Duration::from_secs(30) {
            bail!(
                "Autoplay timeout must be between 1ms and 30s, got: {}",
                humantime::format_duration(self.autoplay_timeout)
            );
        }

        Ok(())
    }

    pub fn node_credentials(&self) -> NodeCredentials {
        NodeCredentials {
            password: self.lavalink_password.clone(),
            user_id: self.bot_user_id,
            client_name: self.client_name.clone(),
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            interval: self.reconnect_interval,
            max_attempts: self.reconnect_max_attempts,
            degraded_after: self.node_degraded_after,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            default_volume: self.default_volume,
            max_queue_size: self.max_queue_size,
            max_track_faults: self.max_track_faults,
            idle_disconnect_after: self.idle_disconnect_after,
        }
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the node password.
    pub fn summary(&self) -> String {
        let nodes = self
            .nodes
            .iter()
            .map(|node| format!("{}={}", node.name, node.uri))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "Config Summary:\n  \
            Nodes: {}\n  \
            Reconnect: every {}, max attempts {}, degraded after {}\n  \
            Sessions: {}% vol, {} queue, idle leave after {}, autoplay timeout {}\n  \
            yt-dlp: enabled={}, cache ttl {}\n  \
            Data: {}",
            nodes,
            humantime::format_duration(self.reconnect_interval),
            self.reconnect_max_attempts
                .map_or("unbounded".to_string(), |max| max.to_string()),
            self.node_degraded_after,
            self.default_volume,
            self.max_queue_size,
            humantime::format_duration(self.idle_disconnect_after),
            humantime::format_duration(self.autoplay_timeout),
            self.ytdlp_enabled,
            humantime::format_duration(self.ytdlp_cache_ttl),
            self.data_dir.display()
        )
    }
}

/// `main=http://localhost:2333,backup=https://lava.example.com`
fn parse_nodes(value: &str) -> Result<Vec<NodeConfig>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .enumerate()
        .map(|(index, entry)| {
            let (name, uri) = match entry.split_once('=') {
                Some((name, uri)) => (name.trim().to_string(), uri.trim()),
                None => (format!("node{}", index + 1), entry),
            };
            let uri = Url::parse(uri).with_context(|| format!("invalid node uri: {uri}"))?;
            Ok(NodeConfig { name, uri })
        })
        .collect()
}

/// Acepta segundos (`"1800"`) o formato humantime (`"5s"`, `"3m"`).
fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(value).with_context(|| format!("{key} is not a valid duration: {value}"))
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_with_only_required_vars() {
        let config = config_from(&[("BOT_USER_ID", "1234")]).unwrap();
        config.validate().unwrap();

        assert_eq!(config.bot_user_id, UserId::new(1234));
        assert_eq!(config.nodes.len(), 1);
        assert_eq!(config.nodes[0].name, "main");
        assert_eq!(config.reconnect_interval, Duration::from_secs(5));
        assert_eq!(config.reconnect_max_attempts, None);
        assert_eq!(config.default_volume, 50);
        assert_eq!(config.ytdlp_cache_ttl, Duration::from_secs(1800));
        assert!(!config.ytdlp_enabled);
    }

    #[test]
    fn bot_user_id_is_required() {
        assert!(config_from(&[]).is_err());
        assert!(config_from(&[("BOT_USER_ID", "0")]).is_err());
        assert!(config_from(&[("BOT_USER_ID", "abc")]).is_err());
    }

    #[test]
    fn parses_node_list_and_retry_bounds() {
        let config = config_from(&[
            ("BOT_USER_ID", "1"),
            ("LAVALINK_NODES", "a=http://one:2333, https://two.example.com"),
            ("RECONNECT_MAX_ATTEMPTS", "10"),
            ("RECONNECT_INTERVAL", "2s"),
        ])
        .unwrap();

        assert_eq!(config.nodes[0].name, "a");
        assert_eq!(config.nodes[1].name, "node2");
        assert_eq!(config.nodes[1].uri.host_str(), Some("two.example.com"));
        assert_eq!(config.reconnect_policy().max_attempts, Some(10));
        assert_eq!(config.reconnect_interval, Duration::from_secs(2));

        let unbounded =
            config_from(&[("BOT_USER_ID", "1"), ("RECONNECT_MAX_ATTEMPTS", "0")]).unwrap();
        assert_eq!(unbounded.reconnect_max_attempts, None);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let loud = config_from(&[("BOT_USER_ID", "1"), ("DEFAULT_VOLUME", "150")]).unwrap();
        assert!(loud.validate().is_err());

        let dup = config_from(&[
            ("BOT_USER_ID", "1"),
            ("LAVALINK_NODES", "a=http://one:2333,a=http://two:2333"),
        ])
        .unwrap();
        assert!(dup.validate().is_err());

        let slow = config_from(&[("BOT_USER_ID", "1"), ("AUTOPLAY_TIMEOUT", "2m")]).unwrap();
        assert!(slow.validate().is_err());
    }

    #[test]
    fn summary_hides_password() {
        let config = config_from(&[("BOT_USER_ID", "1"), ("LAVALINK_PASSWORD", "hunter2")]).unwrap();
        assert!(!config.summary().contains("hunter2"));
    }
}
