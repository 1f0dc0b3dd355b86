use anyhow::Result;
use feed_rs::parser;

/// A feed as seen by the monitor: just enough metadata to validate and
/// diff it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub entries: Vec<FeedEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    /// The entry's own identifier (RSS `guid`, Atom `id`), never synthesized
    pub guid: Option<String>,
    pub link: Option<String>,
    pub title: Option<String>,
    /// Raw HTML markup, full content preferred over summary
    pub content: Option<String>,
}

impl FeedEntry {
    /// Key used to detect changes: guid if present, else link.
    pub fn diff_key(&self) -> &str {
        self.guid
            .as_deref()
            .or(self.link.as_deref())
            .unwrap_or_default()
    }
}

pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed> {
    // feed-rs hashes links and title into an id when the feed has none;
    // an empty id keeps "no guid" distinguishable so the link is used instead.
    let parser = parser::Builder::new()
        .id_generator(|_, _, _| String::new())
        .build();
    let feed = parser.parse(bytes)?;

    let entries = feed
        .entries
        .into_iter()
        .map(|entry| {
            let guid = Some(entry.id.trim().to_string()).filter(|id| !id.is_empty());
            let link = entry.links.first().map(|l| l.href.clone());
            let title = entry.title.map(|t| t.content);
            let content = entry
                .content
                .and_then(|c| c.body)
                .or_else(|| entry.summary.map(|s| s.content));

            FeedEntry {
                guid,
                link,
                title,
                content,
            }
        })
        .collect();

    Ok(ParsedFeed {
        title: feed.title.map(|t| t.content).filter(|t| !t.trim().is_empty()),
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Example</title>
    <link>https://example.com/</link>
    <item>
      <title>With guid</title>
      <link>https://example.com/2</link>
      <guid>urn:post:2</guid>
      <description>&lt;p&gt;second&lt;/p&gt;</description>
    </item>
    <item>
      <title>Without guid</title>
      <link>https://example.com/1</link>
      <description>first</description>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_rss_entries_in_feed_order() {
        let feed = parse_feed(RSS.as_bytes()).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Example"));
        assert_eq!(feed.entries.len(), 2);
        assert_eq!(feed.entries[0].title.as_deref(), Some("With guid"));
        assert_eq!(feed.entries[0].content.as_deref(), Some("<p>second</p>"));
    }

    #[test]
    fn test_diff_key_prefers_guid_then_link() {
        let feed = parse_feed(RSS.as_bytes()).unwrap();
        assert_eq!(feed.entries[0].diff_key(), "urn:post:2");
        assert_eq!(feed.entries[1].guid, None);
        assert_eq!(feed.entries[1].diff_key(), "https://example.com/1");
    }

    #[test]
    fn test_diff_key_empty_when_nothing_identifies_entry() {
        let entry = FeedEntry {
            guid: None,
            link: None,
            title: Some("orphan".to_string()),
            content: None,
        };
        assert_eq!(entry.diff_key(), "");
    }

    #[test]
    fn test_missing_channel_title() {
        let xml = r#"<rss version="2.0"><channel><item><link>https://a/1</link></item></channel></rss>"#;
        let feed = parse_feed(xml.as_bytes()).unwrap();
        assert_eq!(feed.title, None);
        assert_eq!(feed.entries.len(), 1);
    }

    #[test]
    fn test_atom_content_preferred_over_summary() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom</title>
  <id>urn:feed</id>
  <updated>2024-01-01T00:00:00Z</updated>
  <entry>
    <title>Post</title>
    <id>urn:entry:1</id>
    <updated>2024-01-01T00:00:00Z</updated>
    <link href="https://example.com/post"/>
    <summary>short</summary>
    <content type="html">&lt;b&gt;long&lt;/b&gt;</content>
  </entry>
</feed>"#;
        let feed = parse_feed(xml.as_bytes()).unwrap();
        assert_eq!(feed.entries[0].diff_key(), "urn:entry:1");
        assert_eq!(feed.entries[0].content.as_deref(), Some("<b>long</b>"));
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(parse_feed(b"<html><body>not a feed</body></html>").is_err());
    }
}
