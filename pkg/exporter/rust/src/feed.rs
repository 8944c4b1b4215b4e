// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! JSON over HTTP: the address feed and the helpers shared with the GeoIP
//! lookups.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;

use crate::errors::FeedError;

pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_RETRIES: u32 = 3;

const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Source of the addresses whose balances are excluded from the supply.
#[async_trait]
pub trait AddressFeed: Send + Sync {
    async fn addresses(&self) -> Result<Vec<String>, FeedError>;
}

/// HTTP client asking for JSON, each request bounded by `timeout` and
/// carrying `headers`.
pub fn http_client(
    timeout: Duration,
    mut headers: HeaderMap,
) -> Result<reqwest::Client, reqwest::Error> {
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
}

/// GET `url` and decode the body as JSON. Transport errors, 429 and 5xx
/// responses are retried up to `max_retries` times; other non-2xx statuses
/// and undecodable bodies fail at once.
pub async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    max_retries: u32,
) -> Result<T, FeedError> {
    let mut backoff = RETRY_BACKOFF;
    let mut attempt = 0;

    loop {
        let err = match client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let body = resp.bytes().await.map_err(|source| FeedError::Http {
                    url: url.to_string(),
                    source,
                })?;
                return serde_json::from_slice(&body).map_err(|e| FeedError::Decode {
                    url: url.to_string(),
                    reason: e.to_string(),
                });
            }
            Ok(resp) => {
                let status = resp.status();
                let err = FeedError::Status {
                    url: url.to_string(),
                    status: status.as_u16(),
                };
                if !(status.is_server_error() || status.as_u16() == 429) {
                    return Err(err);
                }
                err
            }
            Err(source) => FeedError::Http {
                url: url.to_string(),
                source,
            },
        };

        if attempt >= max_retries {
            return Err(err);
        }
        attempt += 1;
        warn!("Request failed, retrying ({attempt}/{max_retries}): {err}");
        tokio::time::sleep(backoff).await;
        backoff *= 2;
    }
}

pub struct HttpAddressFeed {
    client: reqwest::Client,
    url: String,
    max_retries: u32,
}

impl HttpAddressFeed {
    pub fn new(url: &str, max_retries: u32) -> Result<Self, FeedError> {
        let client =
            http_client(CLIENT_TIMEOUT, HeaderMap::new()).map_err(|source| FeedError::Http {
                url: url.to_string(),
                source,
            })?;
        Ok(Self {
            client,
            url: url.to_string(),
            max_retries,
        })
    }
}

#[async_trait]
impl AddressFeed for HttpAddressFeed {
    async fn addresses(&self) -> Result<Vec<String>, FeedError> {
        let addresses: Vec<String> = get_json(&self.client, &self.url, self.max_retries).await?;
        debug!("Fetched {} addresses from {}", addresses.len(), self.url);
        Ok(addresses)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal HTTP/1.1 responder answering every request with `status` and
    /// `body`. Returns its base URL and a request counter.
    pub(crate) async fn serve(status: u16, body: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let _ = stream.read(&mut buf).await;
                    let response = format!(
                        "HTTP/1.1 {status} Status\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        (format!("http://{addr}"), hits)
    }

    #[tokio::test]
    async fn test_fetches_addresses() {
        let (url, hits) = serve(200, r#"["manifest1a", "manifest1b"]"#).await;
        let feed = HttpAddressFeed::new(&url, 3).unwrap();

        let addresses = feed.addresses().await.unwrap();
        assert_eq!(addresses, vec!["manifest1a", "manifest1b"]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let (url, hits) = serve(500, "{}").await;
        let feed = HttpAddressFeed::new(&url, 2).unwrap();

        let err = feed.addresses().await.unwrap_err();
        assert!(matches!(err, FeedError::Status { status: 500, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let (url, hits) = serve(404, "{}").await;
        let feed = HttpAddressFeed::new(&url, 3).unwrap();

        assert!(feed.addresses().await.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let (url, _) = serve(200, r#"{"addresses": []}"#).await;
        let feed = HttpAddressFeed::new(&url, 0).unwrap();

        assert!(matches!(
            feed.addresses().await,
            Err(FeedError::Decode { .. })
        ));
    }
}
