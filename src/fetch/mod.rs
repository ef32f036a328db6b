//! Content fetch backends
//!
//! Two interchangeable ways of turning a URL plus headers into page content:
//! - `http`: a plain GET of the response body
//! - `rendered`: a headless Chrome tab that runs the page's scripts first

pub mod http;
pub mod rendered;

use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;

pub use self::http::HttpFetcher;
pub use self::rendered::{BrowserEndpoint, RenderedFetcher};

/// Which backend a monitor fetches through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    Http,
    Rendered,
}

impl FetchStrategy {
    pub fn from_use_chrome(use_chrome: bool) -> Self {
        if use_chrome {
            FetchStrategy::Rendered
        } else {
            FetchStrategy::Http
        }
    }
}

impl std::fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchStrategy::Http => f.write_str("http"),
            FetchStrategy::Rendered => f.write_str("chrome"),
        }
    }
}

/// Fetched content that has not necessarily been read yet.
///
/// HTTP bodies are only pulled off the connection when the stream is consumed;
/// dropping the stream releases the connection.
pub struct ContentStream {
    inner: StreamInner,
}

enum StreamInner {
    Response(reqwest::Response),
    Text(String),
}

impl ContentStream {
    pub fn from_response(response: reqwest::Response) -> Self {
        Self {
            inner: StreamInner::Response(response),
        }
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            inner: StreamInner::Text(text.into()),
        }
    }

    /// Read the whole body as text, decoding with the response charset when known.
    pub async fn into_string(self) -> Result<String> {
        match self.inner {
            StreamInner::Response(response) => response.text().await.map_err(Error::from),
            StreamInner::Text(text) => Ok(text),
        }
    }
}

impl std::fmt::Debug for ContentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            StreamInner::Response(r) => write!(f, "ContentStream(response {})", r.status()),
            StreamInner::Text(t) => write!(f, "ContentStream(text, {} bytes)", t.len()),
        }
    }
}

/// A fetch backend. Implementations must be safe to call from many monitor
/// tasks at once.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str, headers: &HeaderMap) -> Result<ContentStream>;
    fn strategy(&self) -> FetchStrategy;
}
