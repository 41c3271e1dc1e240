use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::{Path, PathBuf};

use super::{types::Config, ConfigError};

/// Environment variable holding the config file path
pub const CONFIG_PATH_ENV: &str = "MEDIARELAY_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Config file path from `MEDIARELAY_CONFIG`, or `config.toml`
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load configuration from file with environment variable overrides
///
/// Nested keys use a double underscore: `MEDIARELAY_WORKERS__TRANSFER__COUNT=2`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("MEDIARELAY_").ignore(&["config"]).split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogFormat;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.server.port, 8090);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.healing.error_threshold, 3);
        assert_eq!(config.workers.resolve.count, 1);
        assert!(config.transporter.aria2.is_none());
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_load_config_from_str_sections() {
        let toml = r#"
[server]
port = 9000

[logging]
format = "json"

[workers]
poll_interval_ms = 250

[workers.transfer]
count = 3
download_dir = "/srv/downloads"

[retry]
max_attempts = 5

[transporter.aria2]
rpc_url = "http://aria2:6800/jsonrpc"
secret = "s3cret"

[publisher.telegram]
bot_token = "123:abc"
chat_id = "-1001"
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.workers.poll_interval_ms, 250);
        assert_eq!(config.workers.transfer.count, 3);
        assert_eq!(
            config.workers.transfer.download_dir.to_str(),
            Some("/srv/downloads")
        );
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 1000);
        let aria2 = config.transporter.aria2.unwrap();
        assert_eq!(aria2.secret.as_deref(), Some("s3cret"));
        assert_eq!(aria2.split, 16);
        assert_eq!(config.publisher.telegram.unwrap().chat_id, "-1001");
    }

    #[test]
    fn test_load_config_from_str_invalid_type() {
        let result = load_config_from_str("[server]\nport = \"high\"\n");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[server]
host = "127.0.0.1"
port = 3000

[database]
path = "/var/lib/mediarelay/items.db"
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host.to_string(), "127.0.0.1");
        assert_eq!(
            config.database.path.to_str(),
            Some("/var/lib/mediarelay/items.db")
        );
    }
}
