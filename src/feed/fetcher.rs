use crate::feed::parser::{parse_feed, ParsedFeed};
use crate::net::{GetOptions, NetworkErrorKind, WebClient};
use reqwest::header::{self, HeaderMap, HeaderValue};
use std::time::Duration;

pub const FEED_ACCEPT: &str = "application/rss+xml, application/rdf+xml, application/atom+xml, \
application/xml;q=0.9, text/xml;q=0.8, text/*;q=0.7, application/*;q=0.6";

/// Bodies larger than this are parsed on the blocking pool.
const OFFLOAD_THRESHOLD: usize = 512 * 1024; // 512KB

/// Outcome of fetching and parsing one feed.
///
/// Every failure mode is a variant; nothing escapes [`fetch_feed`] as an error.
#[derive(Debug)]
pub enum FetchOutcome {
    Success {
        feed: ParsedFeed,
        /// Final URL after redirects
        url: String,
        headers: HeaderMap,
    },
    NotModified,
    /// Content was fetched but is not a feed, or has no title
    InvalidFeed,
    NetworkError(NetworkErrorKind),
    /// Non-200, non-304 response
    StatusError(u16),
}

impl FetchOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            FetchOutcome::InvalidFeed | FetchOutcome::NetworkError(_) | FetchOutcome::StatusError(_)
        )
    }

    /// Short message suitable for the user who asked for this feed.
    pub fn failure_message(&self) -> Option<String> {
        match self {
            FetchOutcome::InvalidFeed => Some("feed invalid".to_string()),
            FetchOutcome::NetworkError(kind) => Some(format!("network error ({})", kind)),
            FetchOutcome::StatusError(code) => Some(format!("status code error ({})", code)),
            FetchOutcome::Success { .. } | FetchOutcome::NotModified => None,
        }
    }
}

/// Fetches `url` and parses it as RSS/Atom.
pub async fn fetch_feed(client: &WebClient, url: &str, timeout: Duration) -> FetchOutcome {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static(FEED_ACCEPT));
    let options = GetOptions {
        timeout,
        headers,
        ..GetOptions::default()
    };

    let response = match client.get(url, options).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(feed = %url, error = %e, kind = %e.kind(), "Fetch failed (network error)");
            return FetchOutcome::NetworkError(e.kind());
        }
    };

    if response.status == 304 || (response.status == 200 && has_zero_length(&response.headers)) {
        tracing::debug!(feed = %url, status = response.status, "Fetched (not modified)");
        return FetchOutcome::NotModified;
    }
    if response.status != 200 {
        tracing::warn!(feed = %url, status = response.status, "Fetch failed (status code error)");
        return FetchOutcome::StatusError(response.status);
    }
    let Some(body) = response.body else {
        tracing::warn!(feed = %url, "Fetch failed (empty response)");
        return FetchOutcome::StatusError(response.status);
    };
    // Servers that omit Content-Length on an empty 200
    if body.is_empty() {
        tracing::debug!(feed = %url, "Fetched (empty body)");
        return FetchOutcome::NotModified;
    }

    let parsed = if body.len() > OFFLOAD_THRESHOLD {
        match tokio::task::spawn_blocking(move || parse_feed(&body)).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(feed = %url, error = %e, "Feed parser task failed");
                return FetchOutcome::InvalidFeed;
            }
        }
    } else {
        parse_feed(&body)
    };

    let feed = match parsed {
        Ok(feed) if feed.title.is_some() => feed,
        Ok(_) => {
            tracing::warn!(feed = %url, "Fetch failed (feed has no title)");
            return FetchOutcome::InvalidFeed;
        }
        Err(e) => {
            tracing::warn!(feed = %url, error = %e, "Fetch failed (feed invalid)");
            return FetchOutcome::InvalidFeed;
        }
    };

    FetchOutcome::Success {
        feed,
        url: response.url,
        headers: response.headers,
    }
}

fn has_zero_length(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0")
}
