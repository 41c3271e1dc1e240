//! aria2 JSON-RPC transporter.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::Aria2Config;

use super::{TransferError, TransferHandle, TransferPhase, TransferStatus, Transporter};

const STATUS_KEYS: &[&str] = &[
    "gid",
    "status",
    "totalLength",
    "completedLength",
    "downloadSpeed",
    "errorCode",
    "errorMessage",
    "files",
];

/// aria2 daemon client.
pub struct Aria2Transporter {
    client: Client,
    config: Aria2Config,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Aria2Status {
    status: String,
    #[serde(default)]
    total_length: String,
    #[serde(default)]
    completed_length: String,
    #[serde(default)]
    download_speed: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    files: Vec<Aria2File>,
}

#[derive(Debug, Deserialize)]
struct Aria2File {
    path: String,
}

impl Aria2Transporter {
    pub fn new(config: Aria2Config) -> Result<Self, TransferError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TransferError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            config,
            next_id: AtomicU64::new(1),
        })
    }

    fn params(&self, rest: Vec<Value>) -> Vec<Value> {
        let mut params = Vec::with_capacity(rest.len() + 1);
        if let Some(secret) = self.config.secret.as_deref().filter(|s| !s.is_empty()) {
            params.push(Value::String(format!("token:{}", secret)));
        }
        params.extend(rest);
        params
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, TransferError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": format!("mediarelay-{}", id),
            "method": method,
            "params": self.params(params),
        });

        let response = self
            .client
            .post(&self.config.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransferError::Timeout
                } else {
                    TransferError::ConnectionFailed(e.to_string())
                }
            })?;

        // aria2 answers RPC errors with HTTP 400 and a JSON body
        let status = response.status();
        let payload: RpcResponse = response.json().await.map_err(|e| {
            TransferError::InvalidResponse(format!("{} (HTTP {})", e, status))
        })?;

        if let Some(error) = payload.error {
            return Err(map_rpc_error(error));
        }
        payload
            .result
            .ok_or_else(|| TransferError::InvalidResponse(format!("{}: empty result", method)))
    }
}

fn map_rpc_error(error: RpcError) -> TransferError {
    if error.message.contains("is not found") {
        TransferError::NotFound(error.message)
    } else {
        TransferError::Rpc {
            code: error.code,
            message: error.message,
        }
    }
}

/// File name taken from the URL path, percent-decoded, without query string.
pub(crate) fn output_filename(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let decoded = urlencoding::decode(last).ok()?.into_owned();
    let name = decoded.replace(['/', '\\'], "_");
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name)
    }
}

fn parse_bytes(value: &str) -> u64 {
    value.parse().unwrap_or(0)
}

fn map_status(raw: Aria2Status) -> TransferStatus {
    let phase = match raw.status.as_str() {
        "active" => TransferPhase::Active,
        "waiting" => TransferPhase::Waiting,
        "paused" => TransferPhase::Paused,
        "complete" => TransferPhase::Complete,
        "removed" => TransferPhase::Removed,
        _ => TransferPhase::Error,
    };
    let local_path = raw
        .files
        .first()
        .map(|f| f.path.as_str())
        .filter(|p| !p.is_empty())
        .map(PathBuf::from);
    let error_message = raw.error_message.filter(|m| !m.is_empty()).or_else(|| {
        (phase == TransferPhase::Error).then(|| format!("aria2 status '{}'", raw.status))
    });

    TransferStatus {
        phase,
        completed_bytes: parse_bytes(&raw.completed_length),
        total_bytes: parse_bytes(&raw.total_length),
        speed: parse_bytes(&raw.download_speed),
        local_path,
        error_message,
    }
}

#[async_trait]
impl Transporter for Aria2Transporter {
    fn name(&self) -> &str {
        "aria2"
    }

    async fn start(&self, url: &str, dest_dir: &Path) -> Result<TransferHandle, TransferError> {
        let mut options = json!({
            "dir": dest_dir.to_string_lossy(),
            "continue": "true",
            "split": self.config.split.to_string(),
            "max-connection-per-server": self.config.max_connections_per_server.to_string(),
            "min-split-size": self.config.min_split_size,
            "file-allocation": "none",
        });
        if let Some(name) = output_filename(url) {
            options["out"] = Value::String(name);
        }

        let result = self
            .call("aria2.addUri", vec![json!([url]), options])
            .await?;
        let gid = result
            .as_str()
            .ok_or_else(|| TransferError::InvalidResponse(format!("addUri returned {}", result)))?;

        debug!("aria2 started {} as {}", url, gid);
        Ok(TransferHandle(gid.to_string()))
    }

    async fn status(&self, handle: &TransferHandle) -> Result<TransferStatus, TransferError> {
        let result = self
            .call("aria2.tellStatus", vec![json!(handle.0), json!(STATUS_KEYS)])
            .await?;
        let raw: Aria2Status = serde_json::from_value(result)
            .map_err(|e| TransferError::InvalidResponse(e.to_string()))?;
        Ok(map_status(raw))
    }

    async fn cancel(&self, handle: &TransferHandle) -> Result<(), TransferError> {
        match self.call("aria2.remove", vec![json!(handle.0)]).await {
            Ok(_) | Err(TransferError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        if let Err(e) = self
            .call("aria2.removeDownloadResult", vec![json!(handle.0)])
            .await
        {
            warn!("aria2 could not drop result for {}: {}", handle, e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transporter(secret: Option<&str>) -> Aria2Transporter {
        Aria2Transporter::new(Aria2Config {
            secret: secret.map(str::to_string),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_output_filename_strips_query_and_decodes() {
        assert_eq!(
            output_filename("https://cdn.example/v/My%20Movie%20(2020).mp4?token=abc").as_deref(),
            Some("My Movie (2020).mp4")
        );
        assert_eq!(
            output_filename("https://cdn.example/files/a.mkv/").as_deref(),
            Some("a.mkv")
        );
        assert_eq!(output_filename("https://cdn.example/"), None);
        assert_eq!(output_filename("not a url"), None);
    }

    #[test]
    fn test_params_prepend_secret() {
        let with_secret = transporter(Some("s3cret"));
        let params = with_secret.params(vec![json!("gid")]);
        assert_eq!(params, vec![json!("token:s3cret"), json!("gid")]);

        let without = transporter(None);
        assert_eq!(without.params(vec![json!("gid")]), vec![json!("gid")]);
    }

    #[test]
    fn test_map_status_active() {
        let raw: Aria2Status = serde_json::from_value(json!({
            "gid": "2089b05ecca3d829",
            "status": "active",
            "totalLength": "1000",
            "completedLength": "250",
            "downloadSpeed": "50",
            "files": [{"path": "/downloads/a.mp4", "length": "1000"}]
        }))
        .unwrap();
        let status = map_status(raw);
        assert_eq!(status.phase, TransferPhase::Active);
        assert_eq!(status.completed_bytes, 250);
        assert_eq!(status.total_bytes, 1000);
        assert_eq!(status.local_path, Some(PathBuf::from("/downloads/a.mp4")));
        assert!((status.progress() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_map_status_error_keeps_message() {
        let raw: Aria2Status = serde_json::from_value(json!({
            "status": "error",
            "errorCode": "3",
            "errorMessage": "Resource not found"
        }))
        .unwrap();
        let status = map_status(raw);
        assert_eq!(status.phase, TransferPhase::Error);
        assert_eq!(status.error_message.as_deref(), Some("Resource not found"));
    }

    #[test]
    fn test_map_rpc_error() {
        let not_found = map_rpc_error(RpcError {
            code: 1,
            message: "GID 2089b05ecca3d829 is not found".to_string(),
        });
        assert!(matches!(not_found, TransferError::NotFound(_)));

        let unauthorized = map_rpc_error(RpcError {
            code: 1,
            message: "Unauthorized".to_string(),
        });
        assert!(matches!(unauthorized, TransferError::Rpc { code: 1, .. }));
    }
}
