//! Server configuration.
//!
//! All options come from `BERRYPOKER_*` environment variables with CLI
//! overrides layered on top; everything has a default so a bare binary
//! boots a working server.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Complete server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// HTTP/WebSocket bind address.
    pub bind: SocketAddr,
    /// Durable store location.
    pub db_path: PathBuf,
    /// Purge and recovery horizon for idle rooms.
    pub room_idle_window: Duration,
    /// Maximum dirty-state age before a snapshot is forced.
    pub persist_interval: Duration,
    /// Pause between hands before the next deal.
    pub hand_start_delay: Duration,
    /// Allowed CORS origins; `*` allows everything.
    pub cors_origins: Vec<String>,
    /// Prometheus exporter bind address, if enabled.
    pub metrics_bind: Option<SocketAddr>,
}

impl ServerConfig {
    /// Load from the environment, with optional CLI overrides for the bind
    /// address and database path.
    pub fn from_env(
        bind_override: Option<SocketAddr>,
        db_path_override: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let bind = match bind_override {
            Some(bind) => bind,
            None => {
                let default_host: IpAddr =
                    "0.0.0.0".parse().expect("default host address is valid");
                let host: IpAddr = parse_env_or("BERRYPOKER_HOST", default_host)?;
                let port: u16 = parse_env_or("BERRYPOKER_PORT", 8080)?;
                SocketAddr::new(host, port)
            }
        };

        let db_path = db_path_override.unwrap_or_else(|| {
            std::env::var("BERRYPOKER_DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./berrypoker.db"))
        });

        let idle_hours: u64 = parse_env_or("BERRYPOKER_ROOM_CLEANUP_HOURS", 24)?;
        let persist_secs: u64 = parse_env_or("BERRYPOKER_PERSIST_INTERVAL", 30)?;
        let hand_delay_ms: u64 = parse_env_or("BERRYPOKER_HAND_START_DELAY_MS", 2000)?;

        let cors_origins: Vec<String> = std::env::var("BERRYPOKER_CORS_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let metrics_bind = match std::env::var("BERRYPOKER_METRICS_BIND") {
            Ok(raw) => Some(raw.parse().map_err(|_| ConfigError::Invalid {
                var: "BERRYPOKER_METRICS_BIND".to_string(),
                reason: format!("'{raw}' is not a socket address"),
            })?),
            Err(_) => None,
        };

        Ok(Self {
            bind,
            db_path,
            room_idle_window: Duration::from_secs(idle_hours * 3600),
            persist_interval: Duration::from_secs(persist_secs),
            hand_start_delay: Duration::from_millis(hand_delay_ms),
            cors_origins,
            metrics_bind,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.room_idle_window < Duration::from_secs(60) {
            return Err(ConfigError::Invalid {
                var: "BERRYPOKER_ROOM_CLEANUP_HOURS".to_string(),
                reason: "idle window must be at least a minute".to_string(),
            });
        }
        if self.persist_interval < Duration::from_secs(1) {
            return Err(ConfigError::Invalid {
                var: "BERRYPOKER_PERSIST_INTERVAL".to_string(),
                reason: "persist interval must be at least 1 second".to_string(),
            });
        }
        if self.hand_start_delay < Duration::from_secs(1) {
            return Err(ConfigError::Invalid {
                var: "BERRYPOKER_HAND_START_DELAY_MS".to_string(),
                reason: "next-hand pause must be at least 1000ms".to_string(),
            });
        }
        Ok(())
    }

    /// Whether CORS should allow any origin.
    #[must_use]
    pub fn cors_allow_all(&self) -> bool {
        self.cors_origins.iter().any(|origin| origin == "*")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

fn parse_env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            var: key.to_string(),
            reason: format!("could not parse '{raw}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ServerConfig {
        ServerConfig {
            bind: "0.0.0.0:8080".parse().unwrap(),
            db_path: PathBuf::from("./berrypoker.db"),
            room_idle_window: Duration::from_secs(24 * 3600),
            persist_interval: Duration::from_secs(30),
            hand_start_delay: Duration::from_secs(2),
            cors_origins: vec!["*".to_string()],
            metrics_bind: None,
        }
    }

    #[test]
    fn defaults_validate() {
        base_config().validate().unwrap();
    }

    #[test]
    fn rejects_sub_second_persist_interval() {
        let mut config = base_config();
        config.persist_interval = Duration::from_millis(100);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_too_short_hand_delay() {
        let mut config = base_config();
        config.hand_start_delay = Duration::from_millis(200);
        assert!(config.validate().is_err());
    }

    #[test]
    fn cors_wildcard_detected() {
        let mut config = base_config();
        assert!(config.cors_allow_all());
        config.cors_origins = vec!["https://example.com".to_string()];
        assert!(!config.cors_allow_all());
    }
}
