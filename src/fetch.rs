use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::config::FetchOptions;
use crate::error::{Result, ScoutError};

/// Retrieves raw page content. Stateless and safe to call concurrently
/// from independent source crawls; retry policy belongs to the caller.
/// Behind a trait so tests can serve fixture pages.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<String>;
}

/// Production fetcher: plain HTTP GET via reqwest, or a fully rendered
/// DOM via a browserless-style `/content` endpoint when the source
/// profile asks for render mode.
pub struct HttpFetcher {
    client: reqwest::Client,
    render_endpoint: Option<String>,
    default_user_agent: String,
}

impl HttpFetcher {
    pub fn new(render_endpoint: Option<String>, default_user_agent: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            render_endpoint: render_endpoint.map(|e| e.trim_end_matches('/').to_string()),
            default_user_agent,
        }
    }

    async fn fetch_plain(&self, url: &str, options: &FetchOptions) -> Result<String> {
        let user_agent = options
            .user_agent
            .as_deref()
            .unwrap_or(&self.default_user_agent);

        let response = self
            .client
            .get(url)
            .header(USER_AGENT, user_agent)
            .timeout(Duration::from_secs(options.timeout_secs))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ScoutError::FetchTimeout(url.to_string())
                } else {
                    ScoutError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScoutError::FetchStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        debug!("Fetched {} bytes from {}", body.len(), url);
        Ok(body)
    }

    async fn fetch_rendered(&self, url: &str, options: &FetchOptions) -> Result<String> {
        let endpoint = self.render_endpoint.as_deref().ok_or_else(|| {
            ScoutError::Config("render mode requested but no render_endpoint configured".into())
        })?;

        let body = serde_json::json!({
            "url": url,
            "gotoOptions": { "waitUntil": "networkidle2", "timeout": options.timeout_secs * 1000 },
            "waitForTimeout": options.wait_after_load_ms,
        });

        // The render service applies its own page-load timeout; this outer
        // deadline catches a wedged service as well.
        let deadline = Duration::from_secs(options.timeout_secs)
            + Duration::from_millis(options.wait_after_load_ms)
            + Duration::from_secs(10);

        let request = self
            .client
            .post(format!("{endpoint}/content"))
            .header("Content-Type", "application/json")
            .json(&body)
            .send();

        let response = tokio::time::timeout(deadline, request)
            .await
            .map_err(|_| ScoutError::RenderTimeout(url.to_string()))?
            .map_err(|e| {
                if e.is_timeout() {
                    ScoutError::RenderTimeout(url.to_string())
                } else {
                    ScoutError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ScoutError::Render {
                url: url.to_string(),
                message: format!("status {}: {}", status.as_u16(), message),
            });
        }

        let content = response.text().await?;
        debug!("Rendered {} bytes from {}", content.len(), url);
        Ok(content)
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    #[instrument(skip(self, options))]
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<String> {
        if options.render {
            self.fetch_rendered(url, options).await
        } else {
            self.fetch_plain(url, options).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn render_without_endpoint_is_a_config_error() {
        let fetcher = HttpFetcher::new(None, "test-agent".to_string());
        let options = FetchOptions {
            render: true,
            ..FetchOptions::default()
        };
        let err = fetcher.fetch("https://example.org", &options).await.unwrap_err();
        assert!(matches!(err, ScoutError::Config(_)));
    }
}
