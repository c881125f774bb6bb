use futures::StreamExt;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE};
use std::time::Duration;
use url::Url;

use super::error::FetchError;
use super::item::ProxyFeed;

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

const FETCH_PATH: &str = "/api/fetch-feed";

/// One request for one candidate URL through the fetch relay.
///
/// The relay does the network fetch and the XML-to-JSON conversion; this
/// client only builds the relay URL, enforces the timeout and size cap, and
/// classifies what comes back.
#[derive(Debug, Clone)]
pub struct ProxyClient {
    client: reqwest::Client,
    base: Option<String>,
    timeout: Duration,
    cache_max_age: Option<u64>,
}

impl ProxyClient {
    /// Client with its own connection pool.
    pub fn new(proxy_base: Option<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;
        Ok(Self::with_client(client, proxy_base, timeout))
    }

    pub fn with_client(client: reqwest::Client, proxy_base: Option<String>, timeout: Duration) -> Self {
        Self {
            client,
            base: proxy_base,
            timeout,
            cache_max_age: None,
        }
    }

    /// Ask the relay to serve cached responses up to `secs` old on
    /// non-forced fetches.
    pub fn with_cache_max_age(mut self, secs: u64) -> Self {
        self.cache_max_age = Some(secs);
        self
    }

    /// `<base>/api/fetch-feed?url=<target>[&refresh=true]`
    pub fn request_url(&self, target: &str, force_refresh: bool) -> Result<Url, FetchError> {
        let base = self
            .base
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .ok_or(FetchError::NoProxy)?;

        let endpoint = format!("{}{}", base.trim_end_matches('/'), FETCH_PATH);
        let mut url =
            Url::parse(&endpoint).map_err(|e| FetchError::InvalidProxyBase(format!("{base}: {e}")))?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("url", target);
            if force_refresh {
                query.append_pair("refresh", "true");
            }
        }

        Ok(url)
    }

    /// Fetch one candidate URL. The timeout covers the whole exchange,
    /// body included.
    pub async fn fetch(&self, target: &str, force_refresh: bool) -> Result<ProxyFeed, FetchError> {
        let url = self.request_url(target, force_refresh)?;

        let mut request = self.client.get(url);
        request = match (force_refresh, self.cache_max_age) {
            (true, _) => request.header(CACHE_CONTROL, "no-cache"),
            (false, Some(secs)) => request.header(CACHE_CONTROL, format!("max-age={secs}")),
            (false, None) => request,
        };

        let exchange = async {
            let response = request.send().await?;

            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let bytes = read_limited_bytes(response, MAX_FEED_SIZE).await?;
            Ok::<_, FetchError>((content_type, bytes))
        };

        let (content_type, bytes) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| FetchError::Timeout(self.timeout.as_millis() as u64))??;

        parse_body(&bytes, content_type.as_deref())
    }
}

fn parse_body(bytes: &[u8], content_type: Option<&str>) -> Result<ProxyFeed, FetchError> {
    let text = String::from_utf8_lossy(bytes);
    if looks_like_html(&text, content_type) {
        return Err(FetchError::WrongContent);
    }

    let value: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| FetchError::Parse(e.to_string()))?;
    if !value.is_object() {
        return Err(FetchError::Parse("expected a JSON object".to_string()));
    }

    serde_json::from_value(value).map_err(|e| FetchError::Parse(e.to_string()))
}

/// A relay that is missing or misrouted tends to answer with an HTML page.
fn looks_like_html(body: &str, content_type: Option<&str>) -> bool {
    if content_type.is_some_and(|ct| ct.to_lowercase().contains("text/html")) {
        return true;
    }
    let head: String = body.trim_start().chars().take(16).collect::<String>().to_lowercase();
    head.starts_with("<!doctype") || head.starts_with("<html")
}

async fn read_limited_bytes(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, FetchError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
