//! Direct HTTP fetch.
//!
//! One GET per check with the monitor's headers. Anything outside 2xx is an
//! error; there is no retry here, the next tick is the retry.

use super::{ContentFetcher, ContentStream, FetchStrategy};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound for one request including reading the body.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Browser-like User-Agent so servers that block bots/scrapers allow the request (avoids 403).
/// A `User-Agent` in the monitor's own headers takes precedence.
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, headers: &HeaderMap) -> Result<ContentStream> {
        debug!("Fetch: GET {} ({} extra headers)", url, headers.len());

        let resp = self.client.get(url).headers(headers.clone()).send().await?;

        let status = resp.status();
        if !status.is_success() {
            warn!(
                "Fetch: {} {} for URL {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or(""),
                url
            );
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(ContentStream::from_response(resp))
    }

    fn strategy(&self) -> FetchStrategy {
        FetchStrategy::Http
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned response and hand back the raw request text.
    async fn serve_once(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let mut request = Vec::new();
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if n == 0 || request.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).to_string()
        });
        (format!("http://{}/page", addr), handle)
    }

    #[tokio::test]
    async fn returns_body_and_sends_headers() {
        let (url, server) = serve_once(
            "HTTP/1.1 200 OK\r\ncontent-type: text/html\r\ncontent-length: 12\r\nconnection: close\r\n\r\n<h1>v1</h1>\n",
        )
        .await;
        let mut headers = HeaderMap::new();
        headers.insert("x-token", HeaderValue::from_static("secret"));

        let fetcher = HttpFetcher::new().unwrap();
        let body = fetcher
            .fetch(&url, &headers)
            .await
            .unwrap()
            .into_string()
            .await
            .unwrap();

        assert_eq!(body, "<h1>v1</h1>\n");
        let request = server.await.unwrap().to_lowercase();
        assert!(request.starts_with("get /page"));
        assert!(request.contains("x-token: secret"));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let (url, _server) = serve_once(
            "HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        )
        .await;
        let fetcher = HttpFetcher::new().unwrap();
        match fetcher.fetch(&url, &HeaderMap::new()).await {
            Err(Error::HttpStatus { status, .. }) => assert_eq!(status, 404),
            other => panic!("expected status error, got {other:?}"),
        }
    }
}
