use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::policy::{BackoffPolicy, HealingConfig, StallConfig};
use crate::worker::WorkersConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    /// Backoff for every collaborator and store call.
    #[serde(default)]
    pub retry: BackoffPolicy,
    #[serde(default)]
    pub stall: StallConfig,
    #[serde(default)]
    pub healing: HealingConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub transporter: TransporterConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
}

/// Operational HTTP endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8090
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// How long a connection waits for a lock held by another worker.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("mediarelay.db")
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// Default filter directive when `RUST_LOG` is unset (e.g. "info,mediarelay_core=debug").
    #[serde(default)]
    pub filter: Option<String>,
}

/// HTTP link resolver configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolverConfig {
    #[serde(default = "default_resolver_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Regex for the direct link inside the source page. Without it the
    /// final redirect target is used.
    #[serde(default)]
    pub link_pattern: Option<String>,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_resolver_timeout(),
            user_agent: default_user_agent(),
            link_pattern: None,
            max_redirects: default_max_redirects(),
        }
    }
}

fn default_resolver_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("mediarelay/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_redirects() -> usize {
    10
}

/// Transporter backends
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TransporterConfig {
    #[serde(default)]
    pub aria2: Option<Aria2Config>,
}

/// aria2 JSON-RPC configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Aria2Config {
    #[serde(default = "default_aria2_url")]
    pub rpc_url: String,
    /// Value of `--rpc-secret` on the daemon.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_aria2_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_split")]
    pub split: u32,
    #[serde(default = "default_split")]
    pub max_connections_per_server: u32,
    #[serde(default = "default_min_split_size")]
    pub min_split_size: String,
}

impl Default for Aria2Config {
    fn default() -> Self {
        Self {
            rpc_url: default_aria2_url(),
            secret: None,
            timeout_secs: default_aria2_timeout(),
            split: default_split(),
            max_connections_per_server: default_split(),
            min_split_size: default_min_split_size(),
        }
    }
}

fn default_aria2_url() -> String {
    "http://127.0.0.1:6800/jsonrpc".to_string()
}

fn default_aria2_timeout() -> u64 {
    30
}

fn default_split() -> u32 {
    16
}

fn default_min_split_size() -> String {
    "1M".to_string()
}

/// Publisher backends
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PublisherConfig {
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
}

/// Telegram Bot API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Target chat, e.g. "-1001234567890".
    #[serde(default)]
    pub chat_id: String,
    /// Public channel name used for message links.
    #[serde(default)]
    pub channel_username: Option<String>,
    #[serde(default = "default_telegram_api")]
    pub api_url: String,
    #[serde(default = "default_upload_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: String::new(),
            channel_username: None,
            api_url: default_telegram_api(),
            timeout_secs: default_upload_timeout(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}

fn default_upload_timeout() -> u64 {
    600
}

fn default_max_file_bytes() -> u64 {
    // Bot API upload limit; raise it when using a local Bot API server
    50 * 1024 * 1024
}
