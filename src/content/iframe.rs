use crate::net::{GetOptions, WebClient};
use futures::future::join_all;
use lru::LruCache;
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use url::Url;

const TITLE_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_CACHE_SIZE: usize = 256;

fn title_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse("title").expect("title selector is valid"))
}

/// Looks up page titles for embedded frames that carry no text of their own.
///
/// Lookups bypass the shared fetch gate and give up after 3 seconds; on any
/// failure the frame URL's host is used instead. Successful titles are
/// cached.
#[derive(Clone)]
pub struct TitleResolver {
    client: WebClient,
    cache: Arc<Mutex<LruCache<String, String>>>,
}

impl TitleResolver {
    pub fn new(client: WebClient) -> Self {
        Self::with_capacity(client, DEFAULT_CACHE_SIZE)
    }

    pub fn with_capacity(client: WebClient, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            client,
            cache: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    /// Resolves every URL concurrently. The result has an entry per input.
    pub async fn resolve_all(&self, urls: &[String]) -> HashMap<String, String> {
        let titles = join_all(urls.iter().map(|url| self.resolve(url))).await;
        urls.iter().cloned().zip(titles).collect()
    }

    /// Title of the page at `url`, or its host if that cannot be had.
    pub async fn resolve(&self, url: &str) -> String {
        if let Some(title) = self.cached(url) {
            return title;
        }

        match self.fetch_title(url).await {
            Some(title) => {
                if let Ok(mut cache) = self.cache.lock() {
                    cache.put(url.to_string(), title.clone());
                }
                title
            }
            None => host_of(url),
        }
    }

    fn cached(&self, url: &str) -> Option<String> {
        self.cache.lock().ok()?.get(url).cloned()
    }

    async fn fetch_title(&self, url: &str) -> Option<String> {
        let options = GetOptions {
            timeout: TITLE_TIMEOUT,
            gated: false,
            ..GetOptions::default()
        };
        let response = match self.client.get(url, options).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Frame title lookup failed");
                return None;
            }
        };
        if response.status != 200 {
            tracing::debug!(url = %url, status = response.status, "Frame title lookup failed");
            return None;
        }
        let body = response.body?;
        extract_title(&String::from_utf8_lossy(&body))
    }
}

/// Text of the document's `<title>`, whitespace-trimmed.
pub(crate) fn extract_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let title = document.select(title_selector()).next()?;
    let text = title.text().collect::<String>();
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}

/// Host part of `url` (with port), or the URL itself if it has none.
pub(crate) fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            let host = u.host_str()?.to_string();
            Some(match u.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host,
            })
        })
        .unwrap_or_else(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::WebConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resolver() -> TitleResolver {
        TitleResolver::new(WebClient::new(WebConfig::default()).unwrap())
    }

    #[test]
    fn test_extract_title() {
        assert_eq!(
            extract_title("<html><head><title>\n  My   Video </title></head></html>").as_deref(),
            Some("My Video")
        );
        assert_eq!(extract_title("<html><body>no title</body></html>"), None);
        assert_eq!(extract_title("<title>  </title>"), None);
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("https://www.youtube.com/embed/x"), "www.youtube.com");
        assert_eq!(host_of("http://127.0.0.1:8080/a"), "127.0.0.1:8080");
        assert_eq!(host_of("not a url"), "not a url");
    }

    #[tokio::test]
    async fn test_resolve_fetches_and_caches_title() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/embed"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<title>Embedded clip</title>"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let resolver = resolver();
        let url = format!("{}/embed", server.uri());
        assert_eq!(resolver.resolve(&url).await, "Embedded clip");
        // Second lookup is served from the cache
        assert_eq!(resolver.resolve(&url).await, "Embedded clip");
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_host() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = format!("{}/gone", server.uri());
        let expected = host_of(&url);
        assert_eq!(resolver().resolve(&url).await, expected);
    }

    #[tokio::test]
    async fn test_resolve_all_keeps_every_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<title>A</title>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let a = format!("{}/a", server.uri());
        let b = format!("{}/b", server.uri());
        let titles = resolver().resolve_all(&[a.clone(), b.clone()]).await;
        assert_eq!(titles.len(), 2);
        assert_eq!(titles[&a], "A");
        assert_eq!(titles[&b], host_of(&b));
    }
}
