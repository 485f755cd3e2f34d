// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for wabot-engine.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Store URL. `postgres://` selects PostgreSQL, `sqlite:` selects SQLite.
    pub database_url: String,
    /// Server identity scoping every store read and write.
    pub server_name: String,
    /// Shared admin username.
    pub admin_username: String,
    /// Shared admin password.
    pub admin_password: String,
    /// HTTP listen address.
    pub http_addr: SocketAddr,
    /// Worker working directory; instance state lives under `instances/<id>`.
    pub bot_dir: PathBuf,
    /// Worker executable.
    pub worker_program: String,
    /// Script passed ahead of the positional arguments, if any.
    pub worker_script: Option<String>,
    /// Port allocator seed. The first issued port is `port_base + 1`.
    pub port_base: u16,
    /// Expiration sweep interval.
    pub sweep_interval: Duration,
    /// Grace period between SIGTERM and SIGKILL.
    pub stop_grace: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("WABOT_DATABASE_URL")
            .or_else(|| lookup("DATABASE_URL"))
            .ok_or(ConfigError::MissingEnvVar(
                "WABOT_DATABASE_URL or DATABASE_URL",
            ))?;

        let server_name = lookup("SERVERNAME").unwrap_or_else(|| "server1".to_string());
        if server_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue("SERVERNAME"));
        }

        let admin_username = lookup("ADMIN_USERNAME").unwrap_or_else(|| "admin".to_string());
        let admin_password = lookup("ADMIN_PASSWORD").unwrap_or_else(|| "admin123".to_string());

        let http_port: u16 = lookup("WABOT_HTTP_PORT")
            .unwrap_or_else(|| "8001".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;
        let http_addr = SocketAddr::from(([0, 0, 0, 0], http_port));

        let bot_dir = PathBuf::from(lookup("WABOT_BOT_DIR").unwrap_or_else(|| "bot".to_string()));
        let worker_program = lookup("WABOT_WORKER_PROGRAM").unwrap_or_else(|| "node".to_string());
        let worker_script = match lookup("WABOT_WORKER_SCRIPT") {
            Some(s) if s.is_empty() => None,
            Some(s) => Some(s),
            None => Some("instance.js".to_string()),
        };

        let port_base: u16 = lookup("WABOT_PORT_BASE")
            .unwrap_or_else(|| "4000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let sweep_interval = parse_secs(&lookup, "WABOT_SWEEP_INTERVAL_SECS", 60)?;
        if sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue("WABOT_SWEEP_INTERVAL_SECS"));
        }
        let stop_grace = parse_secs(&lookup, "WABOT_STOP_GRACE_SECS", 5)?;

        Ok(Self {
            database_url,
            server_name,
            admin_username,
            admin_password,
            http_addr,
            bot_dir,
            worker_program,
            worker_script,
            port_base,
            sweep_interval,
            stop_grace,
        })
    }

    /// Directory holding per-instance on-disk state.
    pub fn instances_dir(&self) -> PathBuf {
        self.bot_dir.join("instances")
    }
}

fn parse_secs<F>(lookup: &F, key: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(v) => v
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidValue(key)),
        None => Ok(Duration::from_secs(default)),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// The port number is invalid.
    #[error("Invalid port number")]
    InvalidPort,
    /// A variable holds a value that cannot be used.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("DATABASE_URL", "sqlite::memory:")]).unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.server_name, "server1");
        assert_eq!(config.admin_username, "admin");
        assert_eq!(config.http_addr.port(), 8001);
        assert_eq!(config.worker_program, "node");
        assert_eq!(config.worker_script.as_deref(), Some("instance.js"));
        assert_eq!(config.port_base, 4000);
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.stop_grace, Duration::from_secs(5));
        assert_eq!(config.instances_dir(), PathBuf::from("bot/instances"));
    }

    #[test]
    fn test_engine_url_takes_precedence() {
        let config = load(&[
            ("DATABASE_URL", "postgres://fallback"),
            ("WABOT_DATABASE_URL", "postgres://primary"),
        ])
        .unwrap();
        assert_eq!(config.database_url, "postgres://primary");
    }

    #[test]
    fn test_missing_database_url() {
        let err = load(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(_)));
    }

    #[test]
    fn test_invalid_port() {
        let err = load(&[("DATABASE_URL", "x"), ("WABOT_HTTP_PORT", "99999")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort));
    }

    #[test]
    fn test_empty_script_disables_it() {
        let config = load(&[
            ("DATABASE_URL", "x"),
            ("WABOT_WORKER_PROGRAM", "/opt/bot/worker"),
            ("WABOT_WORKER_SCRIPT", ""),
        ])
        .unwrap();
        assert_eq!(config.worker_program, "/opt/bot/worker");
        assert!(config.worker_script.is_none());
    }

    #[test]
    fn test_invalid_interval() {
        for value in ["soon", "0"] {
            let err = load(&[
                ("DATABASE_URL", "x"),
                ("WABOT_SWEEP_INTERVAL_SECS", value),
            ])
            .unwrap_err();
            assert!(matches!(
                err,
                ConfigError::InvalidValue("WABOT_SWEEP_INTERVAL_SECS")
            ));
        }
    }

    #[test]
    fn test_zero_grace_is_allowed() {
        let config = load(&[("DATABASE_URL", "x"), ("WABOT_STOP_GRACE_SECS", "0")]).unwrap();
        assert_eq!(config.stop_grace, Duration::ZERO);
    }
}
