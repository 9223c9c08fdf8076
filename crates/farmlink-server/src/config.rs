//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use farmlink_shared::constants::DEFAULT_HTTP_PORT;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:5000`
    pub http_addr: SocketAddr,

    /// SQLite database file. `None` uses the platform data directory.
    /// Env: `DATABASE_PATH`
    pub database_path: Option<PathBuf>,

    /// Browser origin allowed by CORS.
    /// Env: `CLIENT_URL`
    /// Default: `http://localhost:5173`
    pub client_url: String,

    /// Outbound event queue per connection. A full queue drops pushes.
    /// Env: `CONNECTION_QUEUE`
    /// Default: `256`
    pub connection_queue: usize,

    /// Sustained sends (REST messages and typing events) per second per user.
    /// Env: `SEND_RATE_PER_SEC`
    pub send_rate_per_sec: f64,

    /// Burst allowance on top of the sustained rate.
    /// Env: `SEND_BURST`
    pub send_burst: f64,

    /// Privileged account created at startup if absent.
    /// Env: `ADMIN_USER_ID`, `ADMIN_NAME`, `ADMIN_EMAIL`
    pub admin_seed: Option<AdminSeed>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminSeed {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            client_url: "http://localhost:5173".to_string(),
            connection_queue: 256,
            send_rate_per_sec: 5.0,
            send_burst: 20.0,
            admin_seed: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        } else if let Some(port) = var("PORT") {
            match port.parse::<u16>() {
                Ok(port) => config.http_addr.set_port(port),
                Err(_) => tracing::warn!(value = %port, "Invalid PORT, using default"),
            }
        }

        if let Some(path) = var("DATABASE_PATH").filter(|p| !p.is_empty()) {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Some(url) = var("CLIENT_URL").filter(|u| !u.is_empty()) {
            config.client_url = url;
        }

        if let Some(val) = var("CONNECTION_QUEUE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.connection_queue = n,
                _ => tracing::warn!(value = %val, "Invalid CONNECTION_QUEUE, using default"),
            }
        }

        if let Some(val) = var("SEND_RATE_PER_SEC") {
            if let Some(rate) = parse_positive(&val) {
                config.send_rate_per_sec = rate;
            }
        }

        if let Some(val) = var("SEND_BURST") {
            if let Some(burst) = parse_positive(&val) {
                config.send_burst = burst;
            }
        }

        if let Some(id) = var("ADMIN_USER_ID").filter(|v| !v.is_empty()) {
            config.admin_seed = Some(AdminSeed {
                name: var("ADMIN_NAME")
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| "Administrator".to_string()),
                email: var("ADMIN_EMAIL").filter(|v| !v.is_empty()),
                id,
            });
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

fn parse_positive(raw: &str) -> Option<f64> {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => Some(v),
        _ => {
            tracing::warn!(value = %raw, "Expected a positive number, using default");
            None
        }
    }
}
