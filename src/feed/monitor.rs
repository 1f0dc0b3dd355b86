use crate::dispatch::{DispatchJob, PipelineHandle};
use crate::feed::fetcher::{fetch_feed, FetchOutcome};
use crate::feed::parser::FeedEntry;
use crate::feed::registry::{Feed, FeedRegistry, RegistryError};
use crate::net::WebClient;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// What changed in a feed since the last dispatched entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryDiff {
    Unchanged,
    /// Entries `[0, n)` are new
    New(usize),
    /// The last dispatched entry is no longer in the feed
    LastMissing,
}

/// Compares `entries` (newest first) against the previous marker.
pub fn diff_entries(entries: &[FeedEntry], last: Option<&str>) -> EntryDiff {
    let Some(newest) = entries.first() else {
        return EntryDiff::Unchanged;
    };
    if Some(newest.diff_key()) == last {
        return EntryDiff::Unchanged;
    }
    let Some(last) = last else {
        return EntryDiff::LastMissing;
    };
    match entries.iter().position(|e| e.diff_key() == last) {
        // Only reachable with duplicate keys; the newest already matched above
        Some(0) => EntryDiff::Unchanged,
        Some(n) => EntryDiff::New(n),
        None => EntryDiff::LastMissing,
    }
}

/// Outcome of polling one feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    Updated,
    NotUpdated,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub updated: usize,
    pub not_updated: usize,
    pub failed: usize,
}

#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("feed name or link already in use")]
    AlreadyExists,
    /// Fetching the feed failed; the message is meant for the requester
    #[error("{0}")]
    Fetch(String),
    #[error(transparent)]
    Registry(RegistryError),
}

/// Polls feeds and hands new entries to the dispatch pipeline.
pub struct Monitor {
    registry: Arc<FeedRegistry>,
    client: WebClient,
    pipeline: PipelineHandle,
    target: String,
    timeout: Duration,
}

impl Monitor {
    pub fn new(
        registry: Arc<FeedRegistry>,
        client: WebClient,
        pipeline: PipelineHandle,
        target: String,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            client,
            pipeline,
            target,
            timeout,
        }
    }

    /// Polls every feed due at `now` (or every feed with `fetch_all`).
    ///
    /// One feed failing never affects the others.
    pub async fn run_cycle(&self, now: DateTime<Utc>, fetch_all: bool) -> CycleStats {
        let due = self.registry.due_this_cycle(now, fetch_all).await;
        tracing::debug!(due = due.len(), fetch_all = fetch_all, "Started feeds monitoring");

        let results = join_all(due.iter().map(|feed| self.poll_feed(feed))).await;

        let mut stats = CycleStats::default();
        for result in results {
            match result {
                PollResult::Updated => stats.updated += 1,
                PollResult::NotUpdated => stats.not_updated += 1,
                PollResult::Failed => stats.failed += 1,
            }
        }
        tracing::info!(
            updated = stats.updated,
            not_updated = stats.not_updated,
            failed = stats.failed,
            "Finished feeds monitoring"
        );
        stats
    }

    /// Fetches one feed, advances its marker and queues new entries
    /// oldest-first.
    ///
    /// The marker is stored before anything is queued, so a crash mid-dispatch
    /// skips entries rather than sending them twice.
    pub async fn poll_feed(&self, feed: &Feed) -> PollResult {
        let parsed = match fetch_feed(&self.client, &feed.link, self.timeout).await {
            FetchOutcome::Success { feed: parsed, .. } => parsed,
            FetchOutcome::NotModified => return PollResult::NotUpdated,
            outcome => {
                tracing::warn!(
                    feed = %feed.link,
                    reason = %outcome.failure_message().unwrap_or_default(),
                    "Fetch failed"
                );
                return PollResult::Failed;
            }
        };

        let diff = diff_entries(&parsed.entries, feed.last.as_deref());
        if diff == EntryDiff::Unchanged {
            tracing::debug!(feed = %feed.link, "Fetched (not updated)");
            return PollResult::NotUpdated;
        }

        // Unchanged covers the empty feed, so there is a newest entry here
        let Some(newest) = parsed.entries.first() else {
            return PollResult::NotUpdated;
        };
        if let Err(e) = self.registry.advance_last(feed.id, newest.diff_key()).await {
            tracing::warn!(feed = %feed.link, error = %e, "Failed to store last-seen marker");
            return PollResult::Failed;
        }
        tracing::info!(feed = %feed.link, "Updated");

        match diff {
            EntryDiff::New(count) => {
                let feed_title = parsed.title.clone().unwrap_or_else(|| feed.name.clone());
                for entry in parsed.entries[..count].iter().rev() {
                    let job = DispatchJob {
                        target: self.target.clone(),
                        feed_title: feed_title.clone(),
                        feed_link: feed.link.clone(),
                        entry: entry.clone(),
                    };
                    if !self.pipeline.submit(job) {
                        tracing::warn!(feed = %feed.link, "Dispatch pipeline closed, entry dropped");
                    }
                }
            }
            EntryDiff::LastMissing => {
                tracing::warn!(
                    feed = %feed.link,
                    "Cannot find the last sent entry in the feed, skipping all current entries"
                );
            }
            EntryDiff::Unchanged => {}
        }
        PollResult::Updated
    }

    /// Adds a feed after checking that it can be fetched.
    ///
    /// The new feed's marker is its current newest entry, so nothing already
    /// in the feed is dispatched.
    pub async fn subscribe(&self, name: &str, link: &str) -> Result<Feed, SubscribeError> {
        if self.registry.find(Some(name), Some(link), false).await.is_some() {
            tracing::warn!(name = %name, link = %link, "Refused to add an existing feed");
            return Err(SubscribeError::AlreadyExists);
        }

        let parsed = match fetch_feed(&self.client, link, SUBSCRIBE_TIMEOUT).await {
            FetchOutcome::Success { feed, .. } => feed,
            outcome => {
                let message = outcome
                    .failure_message()
                    .unwrap_or_else(|| "feed invalid".to_string());
                return Err(SubscribeError::Fetch(message));
            }
        };
        let Some(newest) = parsed.entries.first() else {
            return Err(SubscribeError::Fetch("feed invalid".to_string()));
        };

        match self.registry.add(name, link, Some(newest.diff_key())).await {
            Ok(feed) => Ok(feed),
            Err(RegistryError::Conflict { .. }) => Err(SubscribeError::AlreadyExists),
            Err(e) => Err(SubscribeError::Registry(e)),
        }
    }
}
