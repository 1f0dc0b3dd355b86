//! Feed tracking, fetching and change detection.
//!
//! - [`registry`] - The set of tracked feeds and the per-minute poll schedule
//! - [`fetcher`] - HTTP retrieval and classification of the result
//! - [`parser`] - RSS/Atom parsing using the `feed-rs` crate
//! - [`monitor`] - Poll cycles: diff against the last-seen marker, queue new entries

mod fetcher;
mod monitor;
mod parser;
mod registry;

pub use fetcher::{fetch_feed, FetchOutcome, FEED_ACCEPT};
pub use monitor::{diff_entries, CycleStats, EntryDiff, Monitor, PollResult, SubscribeError};
pub use parser::{parse_feed, FeedEntry, ParsedFeed};
pub use registry::{next_minute_start, Feed, FeedRegistry, RegistryError};
