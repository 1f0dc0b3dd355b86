use crate::storage::{Database, DatabaseError, StoredFeed};
use chrono::{DateTime, Timelike, Utc};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::RwLock;

/// A tracked feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    pub id: i64,
    /// Unique display key
    pub name: String,
    /// Source URL, also used as the base for relative links in entries
    pub link: String,
    /// Diff key of the most recently dispatched entry
    pub last: Option<String>,
}

impl From<StoredFeed> for Feed {
    fn from(stored: StoredFeed) -> Self {
        Self {
            id: stored.id,
            name: stored.name,
            link: stored.link,
            last: stored.last,
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    /// A feed with the same name or link is already tracked
    #[error("feed name or link already in use: {name} ({link})")]
    Conflict { name: String, link: String },
    #[error("no feed with id {0}")]
    NotFound(i64),
    #[error("storage error: {0}")]
    Storage(#[from] DatabaseError),
}

/// The set of tracked feeds, mirrored to the database.
///
/// Every mutation writes through to storage before the in-memory map is
/// changed. The lock never leaves this type; callers get owned snapshots.
pub struct FeedRegistry {
    db: Database,
    feeds: RwLock<BTreeMap<i64, Feed>>,
    interval: u32,
}

impl FeedRegistry {
    /// Loads every stored feed. `interval` is the number of minute buckets
    /// the feeds are spread over, clamped to `1..=60`.
    pub async fn load(db: Database, interval: u32) -> Result<Self, RegistryError> {
        let feeds = db
            .load_feeds()
            .await?
            .into_iter()
            .map(|stored| (stored.id, Feed::from(stored)))
            .collect::<BTreeMap<_, _>>();
        tracing::debug!(count = feeds.len(), "Loaded feeds");

        Ok(Self {
            db,
            feeds: RwLock::new(feeds),
            interval: interval.clamp(1, 60),
        })
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    /// Looks a feed up by name and/or link.
    ///
    /// With `strict`, every given criterion must match. Otherwise a feed
    /// matching either one is returned. No criteria finds nothing.
    pub async fn find(&self, name: Option<&str>, link: Option<&str>, strict: bool) -> Option<Feed> {
        let feeds = self.feeds.read().await;
        find_in(&feeds, name, link, strict).cloned()
    }

    /// Starts tracking a feed, rejecting it if the name or link is taken.
    pub async fn add(
        &self,
        name: &str,
        link: &str,
        last: Option<&str>,
    ) -> Result<Feed, RegistryError> {
        let mut feeds = self.feeds.write().await;
        if find_in(&feeds, Some(name), Some(link), false).is_some() {
            tracing::warn!(name = %name, link = %link, "Refused to add an existing feed");
            return Err(RegistryError::Conflict {
                name: name.to_string(),
                link: link.to_string(),
            });
        }

        let id = self.db.insert_feed(name, link, last).await?;
        let feed = Feed {
            id,
            name: name.to_string(),
            link: link.to_string(),
            last: last.map(str::to_string),
        };
        feeds.insert(id, feed.clone());

        tracing::info!(feed_id = id, link = %link, "Added feed");
        Ok(feed)
    }

    /// Stops tracking the feed named `name`. Missing names are a no-op.
    pub async fn remove(&self, name: &str) -> Result<Option<Feed>, RegistryError> {
        let mut feeds = self.feeds.write().await;
        let Some(id) = find_in(&feeds, Some(name), None, true).map(|f| f.id) else {
            return Ok(None);
        };

        self.db.delete_feed(name).await?;
        let removed = feeds.remove(&id);

        tracing::info!(feed_id = id, name = %name, "Removed feed");
        Ok(removed)
    }

    /// Feeds due at `now`: the bucket for the current minute, or every feed
    /// with `fetch_all`.
    pub async fn due_this_cycle(&self, now: DateTime<Utc>, fetch_all: bool) -> Vec<Feed> {
        let feeds = self.feeds.read().await;
        if fetch_all {
            return feeds.values().cloned().collect();
        }
        // BTreeMap iterates in id order
        let sorted: Vec<&Feed> = feeds.values().collect();
        bucket(&sorted, now.minute(), self.interval)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn all(&self) -> Vec<Feed> {
        self.feeds.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.feeds.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.feeds.read().await.is_empty()
    }

    /// Records `last` as the newest dispatched entry of feed `id`.
    ///
    /// The database write happens first; the in-memory marker only moves
    /// once it is durable.
    pub async fn advance_last(&self, id: i64, last: &str) -> Result<(), RegistryError> {
        let mut feeds = self.feeds.write().await;
        let Some(feed) = feeds.get_mut(&id) else {
            return Err(RegistryError::NotFound(id));
        };
        if !self.db.update_last(id, last).await? {
            return Err(RegistryError::NotFound(id));
        }
        feed.last = Some(last.to_string());
        Ok(())
    }
}

fn find_in<'a>(
    feeds: &'a BTreeMap<i64, Feed>,
    name: Option<&str>,
    link: Option<&str>,
    strict: bool,
) -> Option<&'a Feed> {
    if name.is_none() && link.is_none() {
        return None;
    }
    feeds.values().find(|feed| {
        let name_matches = name.map(|n| feed.name == n);
        let link_matches = link.map(|l| feed.link == l);
        if strict {
            name_matches.unwrap_or(true) && link_matches.unwrap_or(true)
        } else {
            name_matches.unwrap_or(false) || link_matches.unwrap_or(false)
        }
    })
}

/// Every `interval`-th element starting at `minute % interval`.
///
/// Over `interval` consecutive minutes each element is selected exactly once.
pub(crate) fn bucket<T: Copy>(sorted: &[T], minute: u32, interval: u32) -> Vec<T> {
    let interval = interval.max(1) as usize;
    let head = minute as usize % interval;
    sorted.iter().skip(head).step_by(interval).copied().collect()
}

/// Start of the first wall-clock minute at or after `now`.
pub fn next_minute_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let floor = now
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    if floor == now {
        now
    } else {
        floor + chrono::Duration::minutes(1)
    }
}
