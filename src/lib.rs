//! Polls web feeds, turns new entries into structured messages and relays
//! them to a messaging target.
//!
//! A poll cycle runs like this: the [`feed::FeedRegistry`] picks the feeds due
//! this minute, [`feed::fetch_feed`] retrieves each one through
//! [`net::WebClient`], the [`feed::Monitor`] diffs the entries against the
//! stored last-seen marker, and new entries go to the [`dispatch::Pipeline`],
//! which renders them with [`content::parse_html_with_titles`] and delivers
//! them through a [`dispatch::Messenger`].

pub mod config;
pub mod content;
pub mod dispatch;
pub mod feed;
pub mod net;
pub mod storage;
pub mod util;
