//! Listing page retrieval
//!
//! [`PageFetcher`] is the seam the orchestrator fetches through; the
//! [`HttpFetcher`] implementation uses reqwest with a rotating browser user
//! agent and tolerates broken certificates only on configured hosts.

use crate::config::FetchConfig;
use crate::error::{Error, FetchError, Result};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::error::Error as _;
use url::Url;

/// Fallback user agent when none are configured
const DEFAULT_USER_AGENT: &str = concat!("replay-dl/", env!("CARGO_PKG_VERSION"));

/// Trait for retrieving the listing page markup
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch `url` and return the response body as text
    async fn fetch(&self, url: &Url) -> std::result::Result<String, FetchError>;
}

/// reqwest-backed page fetcher
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    strict: reqwest::Client,
    lenient: reqwest::Client,
    insecure_hosts: Vec<String>,
    user_agents: Vec<String>,
    timeout_secs: u64,
}

impl HttpFetcher {
    /// Build the HTTP clients for `config`
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let build = |accept_invalid: bool| {
            reqwest::Client::builder()
                .timeout(config.timeout)
                .danger_accept_invalid_certs(accept_invalid)
                .build()
                .map_err(|e| {
                    Error::Io(std::io::Error::other(format!(
                        "Failed to create HTTP client: {}",
                        e
                    )))
                })
        };

        Ok(Self {
            strict: build(false)?,
            lenient: build(true)?,
            insecure_hosts: config
                .insecure_hosts
                .iter()
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
            user_agents: config.user_agents.clone(),
            timeout_secs: config.timeout.as_secs(),
        })
    }

    /// Whether certificate errors are tolerated for `host`
    pub fn is_insecure_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.insecure_hosts.iter().any(|domain| {
            host == *domain
                || host
                    .strip_suffix(domain.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }

    fn user_agent(&self) -> &str {
        self.user_agents
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or(DEFAULT_USER_AGENT)
    }

    fn classify(&self, url: &Url, error: reqwest::Error) -> FetchError {
        let url = url.to_string();
        if error.is_timeout() {
            return FetchError::Timeout {
                url,
                timeout_secs: self.timeout_secs,
            };
        }

        // reqwest hides TLS failures behind a generic connect error
        let mut chain = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push_str(": ");
            chain.push_str(&cause.to_string());
            source = cause.source();
        }
        let lowered = chain.to_ascii_lowercase();
        if ["certificate", "ssl", "tls"]
            .iter()
            .any(|needle| lowered.contains(needle))
        {
            FetchError::Ssl {
                url,
                message: chain,
            }
        } else {
            FetchError::Network {
                url,
                message: chain,
            }
        }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> std::result::Result<String, FetchError> {
        let insecure = url.host_str().is_some_and(|h| self.is_insecure_host(h));
        let client = if insecure { &self.lenient } else { &self.strict };

        tracing::debug!(url = %url, insecure, "fetching listing page");
        let response = client
            .get(url.clone())
            .header(reqwest::header::USER_AGENT, self.user_agent())
            .send()
            .await
            .map_err(|e| self.classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Network {
                url: url.to_string(),
                message: format!("HTTP {}", status),
            });
        }

        let body = response.text().await.map_err(|e| self.classify(url, e))?;
        tracing::debug!(url = %url, bytes = body.len(), "listing page fetched");
        Ok(body)
    }
}
