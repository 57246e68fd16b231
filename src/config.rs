//! Process configuration loaded from the environment

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BIND: &str = "0.0.0.0:8080";
pub const DEFAULT_GLOBAL_GREETING: &str = "Welcome!";
pub const DEFAULT_STATUS: &str = "ok";
pub const DEFAULT_STATUS_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 2000;

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub bind: SocketAddr,
    /// First value every `global` subscriber sees until something is published
    pub global_greeting: String,
    /// Same for the `status` channel
    pub status_default: String,
    /// Status reporter period (None = reporter disabled)
    pub status_interval: Option<Duration>,
    /// How long teardown waits for a peer to acknowledge the outbound close
    pub close_timeout: Duration,
    pub static_dir: PathBuf,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            global_greeting: DEFAULT_GLOBAL_GREETING.to_string(),
            status_default: DEFAULT_STATUS.to_string(),
            status_interval: Some(Duration::from_millis(DEFAULT_STATUS_INTERVAL_MS)),
            close_timeout: Duration::from_millis(DEFAULT_CLOSE_TIMEOUT_MS),
            static_dir: PathBuf::from("static"),
        }
    }
}

impl HubConfig {
    /// Load config from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bind = match env_non_empty("FANOUT_BIND") {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                tracing::warn!("Invalid FANOUT_BIND {:?}: {}, using {}", raw, e, DEFAULT_BIND);
                defaults.bind
            }),
            None => defaults.bind,
        };

        let global_greeting =
            env_non_empty("FANOUT_GLOBAL_GREETING").unwrap_or(defaults.global_greeting);
        let status_default = env_non_empty("FANOUT_STATUS_DEFAULT").unwrap_or(defaults.status_default);

        let status_interval = match env_non_empty("FANOUT_STATUS_INTERVAL_MS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(0) => None,
                Ok(ms) => Some(Duration::from_millis(ms)),
                Err(e) => {
                    tracing::warn!(
                        "Invalid FANOUT_STATUS_INTERVAL_MS {:?}: {}, using {}ms",
                        raw,
                        e,
                        DEFAULT_STATUS_INTERVAL_MS
                    );
                    defaults.status_interval
                }
            },
            None => defaults.status_interval,
        };

        let close_timeout = match env_non_empty("FANOUT_CLOSE_TIMEOUT_MS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(ms) if ms > 0 => Duration::from_millis(ms),
                _ => {
                    tracing::warn!(
                        "Invalid FANOUT_CLOSE_TIMEOUT_MS {:?}, using {}ms",
                        raw,
                        DEFAULT_CLOSE_TIMEOUT_MS
                    );
                    defaults.close_timeout
                }
            },
            None => defaults.close_timeout,
        };

        let static_dir = env_non_empty("FANOUT_STATIC_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.static_dir);

        Self {
            bind,
            global_greeting,
            status_default,
            status_interval,
            close_timeout,
            static_dir,
        }
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
