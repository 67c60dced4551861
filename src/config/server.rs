//! JSON-RPC/WebSocket server configuration.

use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_enabled: bool,
    pub auth_token: Option<String>,
    pub request_timeout_secs: f64,
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8888,
            cors_enabled: true,
            auth_token: None,
            request_timeout_secs: 30.0,
            max_connections: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub cors_enabled: Option<bool>,
    pub auth_token: Option<String>,
    pub request_timeout_secs: Option<f64>,
    pub max_connections: Option<usize>,
}

impl ServerConfig {
    pub fn from_file(file: Option<FileServerConfig>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();
        Self {
            host: file.host.unwrap_or(defaults.host),
            port: file.port.unwrap_or(defaults.port),
            cors_enabled: file.cors_enabled.unwrap_or(defaults.cors_enabled),
            auth_token: file.auth_token.or(defaults.auth_token),
            request_timeout_secs: file
                .request_timeout_secs
                .unwrap_or(defaults.request_timeout_secs),
            max_connections: file.max_connections.unwrap_or(defaults.max_connections),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
