use rustls::ServerConfig as RustlsConfig;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub web_socket_config: WebSocketConfig,
    pub tls_config: Option<Arc<RustlsConfig>>,
    pub keepalive: Keepalive,
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub web_socket_config: WebSocketConfig,
    pub ca_file: Option<String>,
    pub secure: bool,
    pub keepalive: Keepalive,
}

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub max_frame_size: Option<usize>,
    pub max_message_size: Option<usize>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            max_message_size: Some(64 << 20),
            max_frame_size: Some(16 << 20),
        }
    }
}

/// TCP keepalive tuning: servers default to idle 180s / count 3 / interval
/// 10s; clients may override all three.
#[derive(Debug, Clone, Copy)]
pub struct Keepalive {
    pub idle: Duration,
    pub count: u32,
    pub interval: Duration,
}

impl Default for Keepalive {
    fn default() -> Self {
        Keepalive {
            idle: Duration::from_secs(180),
            count: 3,
            interval: Duration::from_secs(10),
        }
    }
}
