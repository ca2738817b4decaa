//! Blocking image download used by the vectorizer.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, ACCEPT};

/// Default per-request timeout for image downloads.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Retrieves raw image bytes for a URL.
pub trait ImageFetcher {
    /// Downloads the resource at `url`.
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Plain HTTP GET fetcher. Non-2xx responses are errors; there are no retries.
#[derive(Clone)]
pub struct HttpImageFetcher {
    client: Client,
}

impl HttpImageFetcher {
    /// Builds a fetcher; `None` disables the request timeout.
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("image/*"));
        let mut builder = Client::builder()
            .default_headers(headers)
            .user_agent(concat!("visual-search/", env!("CARGO_PKG_VERSION")));
        // reqwest's blocking client defaults to a 30s timeout; `None` here means unlimited.
        builder = builder.timeout(timeout);
        let client = builder.build().context("failed to build image HTTP client")?;
        Ok(Self { client })
    }
}

impl ImageFetcher for HttpImageFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("request to {url} failed"))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("GET {url} returned {status}");
        }
        let bytes = response
            .bytes()
            .with_context(|| format!("failed to read body from {url}"))?;
        Ok(bytes.to_vec())
    }
}

/// In-memory fetcher keyed by URL, for offline runs and tests.
#[derive(Debug, Default, Clone)]
pub struct StaticFetcher {
    images: HashMap<String, Vec<u8>>,
}

impl StaticFetcher {
    /// Empty fetcher; every URL misses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the bytes served for `url`.
    pub fn insert(&mut self, url: impl Into<String>, bytes: Vec<u8>) {
        self.images.insert(url.into(), bytes);
    }
}

impl ImageFetcher for StaticFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.images
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("no image registered for {url}"))
    }
}
