use super::{types::Config, ConfigError};
use crate::worker::WorkerRole;

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

/// Validate configuration
///
/// Rejects zero intervals and limits, and missing collaborator credentials
/// for every worker role that is enabled.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.enabled && config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }

    let workers = &config.workers;
    if workers.poll_interval_ms == 0 {
        return Err(invalid("workers.poll_interval_ms cannot be 0"));
    }
    if workers.error_retry_delay_ms == 0 {
        return Err(invalid("workers.error_retry_delay_ms cannot be 0"));
    }
    if workers.store_timeout_ms == 0 {
        return Err(invalid("workers.store_timeout_ms cannot be 0"));
    }
    if workers.scan_limit == 0 {
        return Err(invalid("workers.scan_limit cannot be 0"));
    }
    for role in WorkerRole::ALL {
        if workers.call_timeout_secs(role) == 0 {
            return Err(invalid(format!(
                "workers.{}.call_timeout_secs cannot be 0",
                role
            )));
        }
    }

    if config.retry.max_attempts == 0 {
        return Err(invalid("retry.max_attempts must be at least 1"));
    }
    if config.stall.sample_interval_ms == 0 {
        return Err(invalid("stall.sample_interval_ms cannot be 0"));
    }
    if config.stall.max_unchanged_samples == 0 {
        return Err(invalid("stall.max_unchanged_samples cannot be 0"));
    }
    if config.healing.error_threshold == 0 {
        return Err(invalid("healing.error_threshold must be at least 1"));
    }
    if config.healing.stale_after_secs == 0 {
        return Err(invalid("healing.stale_after_secs cannot be 0"));
    }
    if config.retry.max_retry_after_ms >= config.healing.stale_after_secs.saturating_mul(1000) {
        return Err(invalid(
            "retry.max_retry_after_ms must be shorter than healing.stale_after_secs",
        ));
    }

    if workers.transfer.count > 0 {
        match &config.transporter.aria2 {
            None => {
                return Err(invalid(
                    "transfer workers are enabled but [transporter.aria2] is missing",
                ))
            }
            Some(aria2) if aria2.rpc_url.trim().is_empty() => {
                return Err(invalid("transporter.aria2.rpc_url cannot be empty"))
            }
            Some(_) => {}
        }
    }

    if workers.publish.count > 0 {
        match &config.publisher.telegram {
            None => {
                return Err(invalid(
                    "publish workers are enabled but [publisher.telegram] is missing",
                ))
            }
            Some(telegram) if telegram.bot_token.trim().is_empty() => {
                return Err(invalid("publisher.telegram.bot_token is required"))
            }
            Some(telegram) if telegram.chat_id.trim().is_empty() => {
                return Err(invalid("publisher.telegram.chat_id is required"))
            }
            Some(_) => {}
        }
    }

    Ok(())
}
