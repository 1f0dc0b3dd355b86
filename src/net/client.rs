use futures::StreamExt;
use reqwest::header::{self, HeaderMap, HeaderValue};
use std::error::Error as _;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use url::Url;

use super::proxy::ProxyRule;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; feedrelay/0.1; RSS relay)";

const MAX_ATTEMPTS: u32 = 3;
const MAX_REDIRECTS: usize = 10;
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024; // 10MB
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(12);

/// Errors that can occur while performing a request.
///
/// Timeouts, TLS, connection and transport failures are retried; the rest
/// are returned at once.
#[derive(Debug, Error)]
pub enum WebError {
    /// URL could not be parsed or is not http(s)
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    /// The attempt exceeded its timeout
    #[error("Request timed out")]
    Timeout,
    /// Certificate or handshake failure
    #[error("TLS error: {0}")]
    Tls(String),
    /// DNS, refused or reset connection
    #[error("Connection failed: {0}")]
    Connection(String),
    /// Any other client-side transport failure
    #[error("Request failed: {0}")]
    Transport(#[source] reqwest::Error),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Redirect chain longer than 10 hops
    #[error("Too many redirects")]
    TooManyRedirects,
    /// Client could not be built (bad proxy URL or header value)
    #[error("Client setup failed: {0}")]
    Setup(String),
}

/// Coarse classification of transport failures, used for logs and user messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    Timeout,
    Tls,
    Connection,
    Transport,
}

impl std::fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NetworkErrorKind::Timeout => "timeout",
            NetworkErrorKind::Tls => "tls",
            NetworkErrorKind::Connection => "connection",
            NetworkErrorKind::Transport => "transport",
        };
        f.write_str(name)
    }
}

impl WebError {
    pub fn kind(&self) -> NetworkErrorKind {
        match self {
            WebError::Timeout => NetworkErrorKind::Timeout,
            WebError::Tls(_) => NetworkErrorKind::Tls,
            WebError::Connection(_) => NetworkErrorKind::Connection,
            WebError::Transport(_)
            | WebError::InvalidUrl(_)
            | WebError::ResponseTooLarge
            | WebError::TooManyRedirects
            | WebError::Setup(_) => NetworkErrorKind::Transport,
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            WebError::Timeout
            | WebError::Tls(_)
            | WebError::Connection(_)
            | WebError::Transport(_) => true,
            WebError::InvalidUrl(_)
            | WebError::ResponseTooLarge
            | WebError::TooManyRedirects
            | WebError::Setup(_) => false,
        }
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return WebError::Timeout;
        }
        let chain = error_chain(&err);
        let lowered = chain.to_lowercase();
        if lowered.contains("certificate") || lowered.contains("tls") || lowered.contains("handshake")
        {
            return WebError::Tls(chain);
        }
        if err.is_connect() {
            return WebError::Connection(chain);
        }
        WebError::Transport(err)
    }
}

fn error_chain(err: &reqwest::Error) -> String {
    let mut msg = err.to_string();
    let mut cur = err.source();
    while let Some(inner) = cur {
        msg.push_str(": ");
        msg.push_str(&inner.to_string());
        cur = inner.source();
    }
    msg
}

/// Settings shared by every request made through a [`WebClient`].
#[derive(Debug, Clone)]
pub struct WebConfig {
    pub user_agent: String,
    pub proxy: Option<String>,
    pub proxy_bypass_private: bool,
    pub proxy_bypass_domains: Vec<String>,
    pub ipv6_prior: bool,
    /// Size of the shared gate limiting in-flight requests.
    pub max_concurrency: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy: None,
            proxy_bypass_private: false,
            proxy_bypass_domains: Vec::new(),
            ipv6_prior: false,
            max_concurrency: 5,
        }
    }
}

/// Per-call options for [`WebClient::get`].
#[derive(Debug, Clone)]
pub struct GetOptions {
    /// Timeout for each attempt, body included
    pub timeout: Duration,
    /// Merged over the header template; `Accept` here replaces the default `*/*`
    pub headers: HeaderMap,
    /// Wait on the shared concurrency gate before connecting
    pub gated: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            headers: HeaderMap::new(),
            gated: true,
        }
    }
}

/// Response of a single GET.
///
/// `body` is only populated for status 200; every other status is returned
/// as-is for the caller to classify.
#[derive(Debug)]
pub struct WebResponse {
    /// Final URL after redirects
    pub url: String,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

/// HTTP client with retry, proxy routing and a shared concurrency gate.
///
/// Cheap to clone; clones share the gate and connection pools.
#[derive(Clone)]
pub struct WebClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: WebConfig,
    user_agent: HeaderValue,
    direct: reqwest::Client,
    proxied: Option<reqwest::Client>,
    rule: ProxyRule,
    gate: Arc<Semaphore>,
}

impl WebClient {
    pub fn new(config: WebConfig) -> Result<Self, WebError> {
        let user_agent = HeaderValue::from_str(&config.user_agent)
            .map_err(|e| WebError::Setup(format!("invalid user agent: {}", e)))?;

        let direct = client_builder()
            .no_proxy()
            .build()
            .map_err(|e| WebError::Setup(e.to_string()))?;

        let proxied = match config.proxy.as_deref().filter(|p| !p.is_empty()) {
            Some(proxy_url) => {
                let proxy = reqwest::Proxy::all(proxy_url)
                    .map_err(|e| WebError::Setup(format!("invalid proxy: {}", e)))?;
                Some(
                    client_builder()
                        .proxy(proxy)
                        .build()
                        .map_err(|e| WebError::Setup(e.to_string()))?,
                )
            }
            None => None,
        };

        let rule = ProxyRule {
            bypass_private: config.proxy_bypass_private,
            bypass_domains: config.proxy_bypass_domains.clone(),
        };
        let gate = Arc::new(Semaphore::new(config.max_concurrency.max(1)));

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                user_agent,
                direct,
                proxied,
                rule,
                gate,
            }),
        })
    }

    /// Performs a GET with retry and exponential backoff.
    ///
    /// Up to 3 attempts, waiting 1s then 2s between them. Only transport
    /// failures are retried; any HTTP status, 4xx and 5xx included, is
    /// returned to the caller on the first response. Redirects are followed
    /// hop by hop (at most 10), each hop routed and given a `Host` of its own.
    ///
    /// # Errors
    ///
    /// - [`WebError::InvalidUrl`] - unparsable or non-http(s) URL, also as a
    ///   redirect target
    /// - [`WebError::Timeout`], [`WebError::Tls`], [`WebError::Connection`],
    ///   [`WebError::Transport`] - after the last attempt failed
    /// - [`WebError::TooManyRedirects`] - more than 10 redirects
    /// - [`WebError::ResponseTooLarge`] - body over 10MB
    pub async fn get(&self, url: &str, options: GetOptions) -> Result<WebResponse, WebError> {
        let parsed = Url::parse(url).map_err(|e| WebError::InvalidUrl(e.to_string()))?;
        let parsed = check_http_url(parsed)?;

        // Held until this function returns, whatever the outcome
        let _permit: Option<OwnedSemaphorePermit> = if options.gated {
            self.inner.gate.clone().acquire_owned().await.ok()
        } else {
            None
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = tokio::time::timeout(options.timeout, self.follow(&parsed, &options.headers))
                .await
                .unwrap_or(Err(WebError::Timeout));

            match result {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    let delay_secs = 1u64 << (attempt - 1); // 1s, 2s
                    tracing::debug!(
                        url = %parsed,
                        error = %e,
                        attempt = attempt,
                        delay_secs = delay_secs,
                        "Retrying request after transport error"
                    );
                    tokio::time::sleep(Duration::from_secs(delay_secs)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn follow(&self, start: &Url, overrides: &HeaderMap) -> Result<WebResponse, WebError> {
        let mut url = start.clone();
        for _ in 0..=MAX_REDIRECTS {
            let response = self.send_hop(&url, overrides).await?;
            match redirect_target(&url, &response) {
                Some(next) => {
                    let next = check_http_url(next)?;
                    tracing::debug!(from = %url, to = %next, "Following redirect");
                    url = next;
                }
                None => return into_web_response(response).await,
            }
        }
        Err(WebError::TooManyRedirects)
    }

    async fn send_hop(&self, url: &Url, overrides: &HeaderMap) -> Result<reqwest::Response, WebError> {
        let host = url
            .host_str()
            .ok_or_else(|| WebError::InvalidUrl("missing host".to_string()))?;
        let use_proxy = self.inner.proxied.is_some() && self.inner.rule.should_proxy(url);
        let client = self.client_for(url, use_proxy).await;
        let headers = self.request_headers(url, host, overrides);

        client
            .get(url.clone())
            .headers(headers)
            .send()
            .await
            .map_err(WebError::from_reqwest)
    }

    async fn client_for(&self, url: &Url, use_proxy: bool) -> reqwest::Client {
        let proxy = if use_proxy {
            self.inner.config.proxy.as_deref()
        } else {
            None
        };
        if self.inner.config.ipv6_prior {
            if let Some(client) = self.pinned_ipv6_client(url, proxy).await {
                return client;
            }
        }
        match proxy.and(self.inner.proxied.as_ref()) {
            Some(proxied) => proxied.clone(),
            None => self.inner.direct.clone(),
        }
    }

    /// With `ipv6_prior`, resolve the host the connection goes to (the proxy
    /// when there is one) once and pin it to its first IPv6 address.
    /// Resolution failures fall back to the shared clients.
    async fn pinned_ipv6_client(&self, url: &Url, proxy: Option<&str>) -> Option<reqwest::Client> {
        let (host, port) = connect_target(url, proxy)?;
        let v6 = match tokio::net::lookup_host((host.as_str(), port)).await {
            Ok(mut addrs) => addrs.find(SocketAddr::is_ipv6)?,
            Err(e) => {
                tracing::debug!(host = %host, error = %e, "AAAA lookup failed, using default resolution");
                return None;
            }
        };
        let builder = client_builder().resolve(&host, v6);
        let builder = match proxy {
            Some(proxy_url) => match reqwest::Proxy::all(proxy_url) {
                Ok(proxy) => builder.proxy(proxy),
                Err(e) => {
                    tracing::debug!(error = %e, "Invalid proxy for pinned IPv6 client");
                    return None;
                }
            },
            None => builder.no_proxy(),
        };
        builder
            .build()
            .map_err(|e| tracing::debug!(error = %e, "Failed to build pinned IPv6 client"))
            .ok()
    }

    fn request_headers(&self, url: &Url, host: &str, overrides: &HeaderMap) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, self.inner.user_agent.clone());
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(
            header::ACCEPT_ENCODING,
            HeaderValue::from_static("gzip, deflate, br"),
        );
        for (name, value) in overrides {
            headers.insert(name.clone(), value.clone());
        }

        let host_value = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&host_value) {
            headers.insert(header::HOST, value);
        }
        headers
    }
}

fn client_builder() -> reqwest::ClientBuilder {
    // Redirects are followed by hand so each hop gets its own Host and route
    reqwest::Client::builder().redirect(reqwest::redirect::Policy::none())
}

fn check_http_url(url: Url) -> Result<Url, WebError> {
    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(WebError::InvalidUrl(format!("unsupported scheme {}", scheme))),
    }
    if url.host_str().is_none() {
        return Err(WebError::InvalidUrl("missing host".to_string()));
    }
    Ok(url)
}

/// Where a redirect response points, resolved against the URL that produced it.
fn redirect_target(current: &Url, response: &reqwest::Response) -> Option<Url> {
    if !matches!(response.status().as_u16(), 301 | 302 | 303 | 307 | 308) {
        return None;
    }
    let location = response.headers().get(header::LOCATION)?.to_str().ok()?;
    current.join(location).ok()
}

/// Host and port a connection for `url` is opened to: the proxy's when
/// `proxy` is set, else the URL's own. `None` for IP literals, which need no
/// lookup.
fn connect_target(url: &Url, proxy: Option<&str>) -> Option<(String, u16)> {
    let (host, port) = match proxy {
        Some(proxy_url) => {
            let proxy_url = Url::parse(proxy_url).ok()?;
            let port = proxy_url.port_or_known_default().unwrap_or(1080);
            (proxy_url.host_str()?.to_string(), port)
        }
        None => (url.host_str()?.to_string(), url.port_or_known_default().unwrap_or(80)),
    };
    if host.starts_with('[') || host.parse::<IpAddr>().is_ok() {
        return None;
    }
    Some((host, port))
}

async fn into_web_response(response: reqwest::Response) -> Result<WebResponse, WebError> {
    let status = response.status().as_u16();
    let final_url = response.url().to_string();
    let response_headers = response.headers().clone();

    let body = if status == 200 {
        Some(read_limited_bytes(response, MAX_BODY_SIZE).await?)
    } else {
        None
    };

    Ok(WebResponse {
        url: final_url,
        status,
        headers: response_headers,
        body,
    })
}

async fn read_limited_bytes(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, WebError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(WebError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(WebError::from_reqwest)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(WebError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
