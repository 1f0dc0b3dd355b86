use crate::content::{parse_html_with_titles, MediaItem, TitleResolver};
use crate::feed::FeedEntry;
use crate::util::emojify;
use html_escape::{encode_double_quoted_attribute, encode_text};
use serde::Serialize;

/// One entry waiting to be rendered and delivered.
#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub target: String,
    pub feed_title: String,
    /// Base for relative URLs in the entry's markup
    pub feed_link: String,
    pub entry: FeedEntry,
}

/// A finished message, ready for a [`Messenger`](super::Messenger).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedMessage {
    /// Title, content and source line as chat-flavoured HTML
    pub html: String,
    pub title: Option<String>,
    pub link: Option<String>,
    pub feed_title: String,
    pub media: Vec<MediaItem>,
}

/// Turns entries into messages. Cheap to clone.
#[derive(Clone)]
pub struct Renderer {
    titles: TitleResolver,
}

impl Renderer {
    pub fn new(titles: TitleResolver) -> Self {
        Self { titles }
    }

    pub async fn render(&self, job: &DispatchJob) -> RenderedMessage {
        let entry = &job.entry;
        let content = match entry.content.as_deref() {
            Some(html) => parse_html_with_titles(html, Some(&job.feed_link), &self.titles).await,
            None => Default::default(),
        };

        let title = entry
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| emojify(t).into_owned());

        let mut sections = Vec::new();
        if let Some(title) = &title {
            sections.push(format!("<b>{}</b>", encode_text(title)));
        }
        if !content.html.is_empty() {
            sections.push(content.html);
        }
        sections.push(source_line(&job.feed_title, entry.link.as_deref()));

        RenderedMessage {
            html: sections.join("\n\n"),
            title,
            link: entry.link.clone(),
            feed_title: job.feed_title.clone(),
            media: content.media,
        }
    }
}

fn source_line(feed_title: &str, link: Option<&str>) -> String {
    let feed_title = encode_text(feed_title);
    match link {
        Some(link) => format!(
            "<a href=\"{}\">{}</a>",
            encode_double_quoted_attribute(link),
            feed_title
        ),
        None => feed_title.into_owned(),
    }
}
