//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::types::WorkerRole;

/// Settings shared by every stage worker, plus one section per role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Sleep between polls that found nothing to claim (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Sleep after a failed pass before polling again (milliseconds).
    #[serde(default = "default_error_retry_delay")]
    pub error_retry_delay_ms: u64,

    /// Delay between starting consecutive workers (milliseconds).
    #[serde(default = "default_stagger")]
    pub stagger_ms: u64,

    /// How long shutdown waits for active items before aborting transfers (seconds).
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// Timeout for a single store call (milliseconds).
    #[serde(default = "default_store_timeout")]
    pub store_timeout_ms: u64,

    /// Candidates examined per claim, oldest first.
    #[serde(default = "default_scan_limit")]
    pub scan_limit: usize,

    #[serde(default)]
    pub resolve: RoleConfig,

    #[serde(default)]
    pub transfer: RoleConfig,

    #[serde(default)]
    pub publish: RoleConfig,
}

fn default_poll_interval() -> u64 {
    5000
}

fn default_error_retry_delay() -> u64 {
    10_000
}

fn default_stagger() -> u64 {
    1000
}

fn default_shutdown_grace() -> u64 {
    30
}

fn default_store_timeout() -> u64 {
    10_000
}

fn default_scan_limit() -> usize {
    50
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            error_retry_delay_ms: default_error_retry_delay(),
            stagger_ms: default_stagger(),
            shutdown_grace_secs: default_shutdown_grace(),
            store_timeout_ms: default_store_timeout(),
            scan_limit: default_scan_limit(),
            resolve: RoleConfig::default(),
            transfer: RoleConfig::default(),
            publish: RoleConfig::default(),
        }
    }
}

impl WorkersConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn error_retry_delay(&self) -> Duration {
        Duration::from_millis(self.error_retry_delay_ms)
    }

    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn role(&self, role: WorkerRole) -> &RoleConfig {
        match role {
            WorkerRole::Resolve => &self.resolve,
            WorkerRole::Transfer => &self.transfer,
            WorkerRole::Publish => &self.publish,
        }
    }

    /// Collaborator call timeout for `role`, falling back to the role default.
    pub fn call_timeout(&self, role: WorkerRole) -> Duration {
        Duration::from_secs(self.call_timeout_secs(role))
    }

    pub fn call_timeout_secs(&self, role: WorkerRole) -> u64 {
        self.role(role)
            .call_timeout_secs
            .unwrap_or_else(|| default_call_timeout(role))
    }
}

/// Per-role worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    /// Number of workers of this role (0 disables the role).
    #[serde(default = "default_count")]
    pub count: usize,

    /// Timeout for one collaborator call (seconds). Unset means the role's
    /// default: 180 for resolve, 30 for transfer, 900 for publish.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_timeout_secs: Option<u64>,

    /// Where transfers write files. Transfer role only.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Delete the local file after it was published. Publish role only.
    #[serde(default = "default_delete_after_publish")]
    pub delete_after_publish: bool,
}

fn default_count() -> usize {
    1
}

fn default_call_timeout(role: WorkerRole) -> u64 {
    match role {
        WorkerRole::Resolve => 180,
        WorkerRole::Transfer => 30,
        WorkerRole::Publish => 900,
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_delete_after_publish() -> bool {
    true
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self {
            count: default_count(),
            call_timeout_secs: None,
            download_dir: default_download_dir(),
            delete_after_publish: default_delete_after_publish(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkersConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.error_retry_delay(), Duration::from_secs(10));
        assert_eq!(config.resolve.count, 1);
        assert_eq!(config.call_timeout_secs(WorkerRole::Resolve), 180);
        assert_eq!(config.call_timeout_secs(WorkerRole::Transfer), 30);
        assert_eq!(config.call_timeout(WorkerRole::Publish), Duration::from_secs(900));
        assert!(config.publish.delete_after_publish);
    }

    #[test]
    fn test_deserialize_minimal() {
        let toml = r#"
            poll_interval_ms = 100

            [transfer]
            count = 4
        "#;
        let config: WorkersConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.poll_interval_ms, 100);
        assert_eq!(config.transfer.count, 4);
        assert_eq!(config.call_timeout_secs(WorkerRole::Transfer), 30);
        assert_eq!(config.call_timeout_secs(WorkerRole::Resolve), 180);
    }

    #[test]
    fn test_partial_role_section_keeps_role_timeout() {
        let toml = r#"
            [publish]
            count = 2
            delete_after_publish = false

            [resolve]
            call_timeout_secs = 45
        "#;
        let config: WorkersConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.publish.count, 2);
        assert!(!config.publish.delete_after_publish);
        assert_eq!(config.call_timeout_secs(WorkerRole::Publish), 900);
        assert_eq!(config.call_timeout_secs(WorkerRole::Resolve), 45);
    }
}
