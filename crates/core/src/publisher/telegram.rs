//! Telegram Bot API publisher.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Body, Client};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::config::TelegramConfig;

use super::{PublishError, PublishedRef, Publisher};

/// Uploads files to a channel with `sendDocument`.
pub struct TelegramPublisher {
    client: Client,
    config: TelegramConfig,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<Message>,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

impl TelegramPublisher {
    pub fn new(config: TelegramConfig) -> Result<Self, PublishError> {
        if config.bot_token.trim().is_empty() || config.chat_id.trim().is_empty() {
            return Err(PublishError::Config(
                "bot_token and chat_id are required".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PublishError::Config(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.bot_token,
            method
        )
    }

    /// Public link to a message in the configured channel.
    fn message_link(&self, message_id: i64) -> String {
        match self
            .config
            .channel_username
            .as_deref()
            .map(|u| u.trim_start_matches('@'))
            .filter(|u| !u.is_empty())
        {
            Some(username) => format!("https://t.me/{}/{}", username, message_id),
            None => {
                let chat = self.config.chat_id.trim_start_matches("-100");
                format!("https://t.me/c/{}/{}", chat, message_id)
            }
        }
    }
}

/// Map a `sendDocument` reply to a message id or a typed error.
fn parse_response(status: u16, body: &str) -> Result<i64, PublishError> {
    let parsed: ApiResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(_) if status == 413 => {
            return Err(PublishError::FileTooLarge { size: 0, limit: 0 });
        }
        Err(e) => {
            return Err(PublishError::Api(format!(
                "HTTP {}: unreadable response: {}",
                status, e
            )))
        }
    };

    if parsed.ok {
        return parsed
            .result
            .map(|m| m.message_id)
            .ok_or_else(|| PublishError::Api("response without message".to_string()));
    }

    let code = parsed.error_code.unwrap_or(status);
    let description = parsed.description.unwrap_or_default();
    let lowered = description.to_lowercase();

    if code == 429 {
        let retry_after = parsed
            .parameters
            .and_then(|p| p.retry_after)
            .unwrap_or(1);
        return Err(PublishError::RateLimited {
            retry_after: Duration::from_secs(retry_after),
        });
    }
    if code == 413 || lowered.contains("too big") || lowered.contains("too large") {
        return Err(PublishError::FileTooLarge { size: 0, limit: 0 });
    }
    Err(PublishError::Api(format!("{}: {}", code, description)))
}

#[async_trait]
impl Publisher for TelegramPublisher {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn publish(&self, local_path: &Path, caption: &str) -> Result<PublishedRef, PublishError> {
        let path_str = local_path.display().to_string();
        let size = tokio::fs::metadata(local_path)
            .await
            .map_err(|_| PublishError::FileNotFound(path_str.clone()))?
            .len();
        if size > self.config.max_file_bytes {
            return Err(PublishError::FileTooLarge {
                size,
                limit: self.config.max_file_bytes,
            });
        }

        let file = tokio::fs::File::open(local_path)
            .await
            .map_err(|_| PublishError::FileNotFound(path_str.clone()))?;
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        let document = multipart::Part::stream_with_length(Body::wrap_stream(ReaderStream::new(file)), size)
            .file_name(file_name);
        let form = multipart::Form::new()
            .text("chat_id", self.config.chat_id.clone())
            .text("caption", caption.to_string())
            .part("document", document);

        debug!("Uploading {} ({} bytes) to telegram", path_str, size);
        let response = self
            .client
            .post(self.endpoint("sendDocument"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PublishError::Timeout
                } else {
                    PublishError::ConnectionFailed(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message_id = parse_response(status, &body).map_err(|e| match e {
            PublishError::FileTooLarge { .. } => PublishError::FileTooLarge {
                size,
                limit: self.config.max_file_bytes,
            },
            other => other,
        })?;

        let reference = self.message_link(message_id);
        info!("Published {} as {}", path_str, reference);
        Ok(PublishedRef {
            reference,
            remote_id: message_id.to_string(),
        })
    }
}
