use serde::Serialize;

/// A media reference collected while parsing, kept apart from the text.
///
/// `urls` is ordered best-first; senders try them in turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MediaItem {
    Image {
        urls: Vec<String>,
    },
    Video {
        urls: Vec<String>,
        /// Poster image to send if no video URL works
        #[serde(skip_serializing_if = "Option::is_none")]
        fallback: Option<String>,
    },
    Animation {
        urls: Vec<String>,
    },
}

impl MediaItem {
    pub fn urls(&self) -> &[String] {
        match self {
            MediaItem::Image { urls }
            | MediaItem::Video { urls, .. }
            | MediaItem::Animation { urls } => urls,
        }
    }
}
