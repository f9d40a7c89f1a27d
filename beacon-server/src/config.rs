use anyhow::{anyhow, Context as _};
use beacon_core::IceServerConfig;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Server config, resolved once at startup from `BEACON_*` env vars.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Production mode enforces the origin allow-list and a verified token.
    pub production: bool,
    /// Exact origins; a match also covers one subdomain level below the host.
    pub allowed_origins: Vec<String>,
    pub token_secret: Option<String>,
    pub token_ttl: Duration,
    pub connect_limit: ConnectLimitSettings,
    pub message_limit: MessageLimitSettings,
    pub heartbeat: HeartbeatSettings,
    pub max_frame_bytes: usize,
    pub drain_timeout: Duration,
    pub ice_servers: Vec<IceServerConfig>,
}

#[derive(Debug, Clone)]
pub struct ConnectLimitSettings {
    /// Upgrade attempts allowed per address per window.
    pub max_attempts: u32,
    pub window: Duration,
    /// Concurrent sockets allowed per address.
    pub max_concurrent: u32,
}

#[derive(Debug, Clone)]
pub struct MessageLimitSettings {
    /// Bucket capacity (burst).
    pub burst: u32,
    /// Time to refill a drained bucket.
    pub refill_window: Duration,
}

#[derive(Debug, Clone)]
pub struct HeartbeatSettings {
    pub interval: Duration,
    pub max_missed: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 3000)),
            production: false,
            allowed_origins: Vec::new(),
            token_secret: None,
            token_ttl: Duration::from_secs(300),
            connect_limit: ConnectLimitSettings {
                max_attempts: 10,
                window: Duration::from_secs(60),
                max_concurrent: 16,
            },
            message_limit: MessageLimitSettings {
                burst: 100,
                refill_window: Duration::from_secs(10),
            },
            heartbeat: HeartbeatSettings {
                interval: Duration::from_secs(30),
                max_missed: 3,
            },
            max_frame_bytes: 65_536,
            drain_timeout: Duration::from_secs(5),
            ice_servers: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Read config from the environment, falling back to defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut cfg = Self::default();

        if let Some(bind) = read_var("BEACON_BIND") {
            cfg.bind = bind.parse().context("parse BEACON_BIND")?;
        }
        if let Some(env_name) = read_var("BEACON_ENV") {
            cfg.production = match env_name.as_str() {
                "production" | "prod" => true,
                "development" | "dev" => false,
                other => return Err(anyhow!("unsupported BEACON_ENV value `{other}`")),
            };
        }
        if let Some(origins) = read_var("BEACON_ALLOWED_ORIGINS") {
            cfg.allowed_origins = split_csv(&origins);
        }
        cfg.token_secret = read_var("BEACON_TOKEN_SECRET");
        if let Some(ttl) = read_var("BEACON_TOKEN_TTL_SECS") {
            cfg.token_ttl = Duration::from_secs(parse_num(&ttl, "BEACON_TOKEN_TTL_SECS")?);
        }

        if let Some(v) = read_var("BEACON_CONNECT_LIMIT") {
            cfg.connect_limit.max_attempts = parse_num(&v, "BEACON_CONNECT_LIMIT")?;
        }
        if let Some(v) = read_var("BEACON_CONNECT_WINDOW_SECS") {
            cfg.connect_limit.window =
                Duration::from_secs(parse_num(&v, "BEACON_CONNECT_WINDOW_SECS")?);
        }
        if let Some(v) = read_var("BEACON_MAX_CONNS_PER_ADDR") {
            cfg.connect_limit.max_concurrent = parse_num(&v, "BEACON_MAX_CONNS_PER_ADDR")?;
        }
        if let Some(v) = read_var("BEACON_MESSAGE_BURST") {
            cfg.message_limit.burst = parse_num(&v, "BEACON_MESSAGE_BURST")?;
        }
        if let Some(v) = read_var("BEACON_MESSAGE_REFILL_SECS") {
            cfg.message_limit.refill_window =
                Duration::from_secs(parse_num(&v, "BEACON_MESSAGE_REFILL_SECS")?);
        }
        if let Some(v) = read_var("BEACON_HEARTBEAT_SECS") {
            cfg.heartbeat.interval = Duration::from_secs(parse_num(&v, "BEACON_HEARTBEAT_SECS")?);
        }
        if let Some(v) = read_var("BEACON_HEARTBEAT_MAX_MISSED") {
            cfg.heartbeat.max_missed = parse_num(&v, "BEACON_HEARTBEAT_MAX_MISSED")?;
        }
        if let Some(v) = read_var("BEACON_MAX_FRAME_BYTES") {
            cfg.max_frame_bytes = parse_num(&v, "BEACON_MAX_FRAME_BYTES")?;
        }
        if let Some(v) = read_var("BEACON_DRAIN_TIMEOUT_SECS") {
            cfg.drain_timeout = Duration::from_secs(parse_num(&v, "BEACON_DRAIN_TIMEOUT_SECS")?);
        }
        if let Some(urls) = read_var("BEACON_STUN_URLS") {
            let urls = split_csv(&urls);
            if !urls.is_empty() {
                cfg.ice_servers = vec![IceServerConfig {
                    urls,
                    username: None,
                    credential: None,
                }];
            }
        }

        if cfg.production && cfg.token_secret.is_none() {
            return Err(anyhow!(
                "BEACON_TOKEN_SECRET is required when BEACON_ENV=production"
            ));
        }

        Ok(cfg)
    }
}

fn read_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_num<T: std::str::FromStr>(raw: &str, name: &str) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse::<T>().with_context(|| format!("parse {name}"))
}
