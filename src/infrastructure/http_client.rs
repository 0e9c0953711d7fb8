//! Plain HTTP retrieval for listing pages
//!
//! Retry policy: connection and TLS handshake failures are transient and
//! retried up to the attempt ceiling with a fixed delay; everything else
//! (timeouts, bad status codes, unreadable bodies) ends the source at once.
//! A CAPTCHA page is reported as a block, never retried.

#![allow(clippy::uninlined_format_args)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use scraper::{Html, Selector};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::domain::{EventBus, PipelineEvent, SourceConfig};
use crate::infrastructure::config::{HttpConfig, PacingConfig};
use crate::infrastructure::fetch_error::{BlockKind, FetchError, FetchResult};

/// Failure of a single HTTP exchange
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Could not establish the connection (includes TLS handshake)
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Connect(_))
    }
}

/// Single GET returning the response body
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get_text(&self, url: &str) -> Result<String, TransportError>;
}

/// reqwest-backed transport with a browser-like identity
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn with_config(config: &HttpConfig) -> anyhow::Result<Self> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(&config.user_agent)
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get_text(&self, url: &str) -> Result<String, TransportError> {
        info!("🌐 HTTP GET: {}", url);
        let response = self.client.get(url).send().await.map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        response
            .text()
            .await
            .map_err(|e| TransportError::Other(format!("Failed to read response body: {}", e)))
    }
}

/// TLS handshake failures surface from the connector as connect errors
fn classify(error: reqwest::Error) -> TransportError {
    if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else if let Some(status) = error.status() {
        TransportError::Status(status.as_u16())
    } else {
        TransportError::Other(error.to_string())
    }
}

/// Fetched listing page, ready for the parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingPage {
    pub url: String,
    pub body: String,
}

/// Listing fetcher: retry loop, pacing and CAPTCHA detection on top of a transport
pub struct HttpFetcher {
    transport: Arc<dyn HttpTransport>,
    max_attempts: u32,
    captcha_selector: Selector,
    pacing: PacingConfig,
    events: EventBus,
}

impl HttpFetcher {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        http: &HttpConfig,
        pacing: PacingConfig,
        events: EventBus,
    ) -> anyhow::Result<Self> {
        let captcha_selector = Selector::parse(&http.captcha_selector)
            .map_err(|e| anyhow::anyhow!("Invalid CAPTCHA selector '{}': {}", http.captcha_selector, e))?;
        Ok(Self {
            transport,
            max_attempts: http.max_attempts.max(1),
            captcha_selector,
            pacing,
            events,
        })
    }

    /// Fetch the source's listing page
    pub async fn fetch_listing(&self, source: &SourceConfig) -> FetchResult<ListingPage> {
        let url = source.target_url();
        let body = self.fetch_with_policy(source, &url).await?;

        // Pacing before looking at the DOM
        sleep(self.pacing.pre_parse_delay()).await;

        if self.is_captcha(&body) {
            warn!("❌ CAPTCHA detected for {}", source.key());
            return Err(FetchError::blocked(BlockKind::Captcha, &url));
        }

        Ok(ListingPage { url, body })
    }

    async fn fetch_with_policy(&self, source: &SourceConfig, url: &str) -> FetchResult<String> {
        let key = source.key();
        let mut attempt = 1;
        loop {
            self.events.publish(PipelineEvent::FetchAttempt {
                source: key.clone(),
                attempt,
                max_attempts: self.max_attempts,
            });

            let error = match self.transport.get_text(url).await {
                Ok(body) => {
                    debug!("Fetched {} ({} bytes) on attempt {}", url, body.len(), attempt);
                    return Ok(body);
                }
                Err(e) if e.is_transient() => FetchError::transient(url, e.to_string()),
                Err(e) => {
                    warn!("❌ Failed to fetch {} (error: {})", url, e);
                    return Err(FetchError::terminal(url, e.to_string()));
                }
            };

            if attempt >= self.max_attempts {
                return Err(error.escalate(attempt));
            }

            self.events.publish(PipelineEvent::FetchRetryScheduled {
                source: key.clone(),
                attempt,
                delay_ms: self.pacing.retry_delay_ms,
                error: error.to_string(),
            });
            sleep(self.pacing.retry_delay()).await;
            attempt += 1;
        }
    }

    fn is_captcha(&self, body: &str) -> bool {
        Html::parse_document(body)
            .select(&self.captcha_selector)
            .next()
            .is_some()
    }
}
