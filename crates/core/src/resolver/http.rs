//! HTTP link resolver.
//!
//! Fetches the source page following redirects. Without a link pattern the
//! final URL is the direct link; with one, the first match in the page body
//! is (capture group 1 if the pattern has one).

use std::time::Duration;

use async_trait::async_trait;
use regex_lite::Regex;
use reqwest::{redirect, Client, Url};
use tracing::debug;

use crate::config::ResolverConfig;

use super::{ResolveError, Resolver};

pub struct HttpResolver {
    client: Client,
    link_pattern: Option<Regex>,
}

impl HttpResolver {
    pub fn new(config: &ResolverConfig) -> Result<Self, ResolveError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .redirect(redirect::Policy::limited(config.max_redirects))
            .cookie_store(true)
            .build()
            .map_err(|e| ResolveError::Config(e.to_string()))?;

        let link_pattern = config
            .link_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| ResolveError::Config(format!("invalid link pattern: {}", e)))?;

        Ok(Self {
            client,
            link_pattern,
        })
    }
}

/// First pattern match in `body`, made absolute against `base`.
fn extract_link(pattern: &Regex, body: &str, base: &Url) -> Option<String> {
    let captures = pattern.captures(body)?;
    let raw = captures.get(1).or_else(|| captures.get(0))?.as_str();
    let raw = raw.replace("&amp;", "&");
    base.join(&raw).ok().map(|url| url.to_string())
}

#[async_trait]
impl Resolver for HttpResolver {
    fn name(&self) -> &str {
        "http"
    }

    async fn resolve(&self, source_url: &str) -> Result<String, ResolveError> {
        let url = Url::parse(source_url)
            .map_err(|e| ResolveError::InvalidUrl(format!("{}: {}", source_url, e)))?;

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ResolveError::Timeout
            } else {
                ResolveError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::Http(format!("HTTP {} for {}", status, source_url)));
        }

        let final_url = response.url().clone();
        let Some(pattern) = &self.link_pattern else {
            debug!("Resolved {} via redirects to {}", source_url, final_url);
            return Ok(final_url.to_string());
        };

        let body = response
            .text()
            .await
            .map_err(|e| ResolveError::Http(e.to_string()))?;

        match extract_link(pattern, &body, &final_url) {
            Some(link) => {
                debug!("Resolved {} via page link to {}", source_url, link);
                Ok(link)
            }
            None => Err(ResolveError::Unresolvable(format!(
                "no link matching '{}' on {}",
                pattern.as_str(),
                final_url
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://host.example/watch/123").unwrap()
    }

    #[test]
    fn test_extract_link_prefers_capture_group() {
        let pattern = Regex::new(r#"href="(https://cdn\.example/[^"]+)""#).unwrap();
        let body = r#"<a href="/home">home</a><a href="https://cdn.example/v/1.mp4?t=1&amp;s=2">dl</a>"#;
        assert_eq!(
            extract_link(&pattern, body, &base()).as_deref(),
            Some("https://cdn.example/v/1.mp4?t=1&s=2")
        );
    }

    #[test]
    fn test_extract_link_resolves_relative_paths() {
        let pattern = Regex::new(r#"/files/[a-z0-9]+\.mkv"#).unwrap();
        let body = "download: /files/abc123.mkv";
        assert_eq!(
            extract_link(&pattern, body, &base()).as_deref(),
            Some("https://host.example/files/abc123.mkv")
        );
    }

    #[test]
    fn test_extract_link_no_match() {
        let pattern = Regex::new(r#"\.mp4"#).unwrap();
        assert!(extract_link(&pattern, "nothing here", &base()).is_none());
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let config = ResolverConfig {
            link_pattern: Some("(unclosed".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            HttpResolver::new(&config),
            Err(ResolveError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_source_url() {
        let resolver = HttpResolver::new(&ResolverConfig::default()).unwrap();
        let err = resolver.resolve("not a url").await.unwrap_err();
        assert!(matches!(err, ResolveError::InvalidUrl(_)));
    }
}
