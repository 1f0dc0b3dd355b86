//! Entry markup to structured content.
//!
//! HTML is parsed with `scraper` and walked tag by tag into a
//! [`ContentNode`] tree. Images and videos are not part of the tree; they are
//! collected into a separate [`MediaItem`] list in document order.
//!
//! - [`parse_html`] is synchronous and never touches the network. Frames
//!   without text are labelled with their host.
//! - [`parse_html_with_titles`] runs the same parse on the blocking pool and,
//!   when frames need a label, looks their page titles up and parses again.

mod iframe;
mod media;
mod parser;
mod srcset;
mod tree;

pub use iframe::TitleResolver;
pub use media::MediaItem;
pub use parser::ParsedContent;
pub use tree::ContentNode;

use parser::Parser;
use std::collections::HashMap;

/// Parses `html`, resolving relative URLs against `base`.
///
/// Malformed markup never fails the parse; whatever cannot be interpreted
/// is dropped.
pub fn parse_html(html: &str, base: Option<&str>) -> ParsedContent {
    Parser::new(base, HashMap::new()).run(html).0
}

/// Like [`parse_html`], but textless frames are labelled with the title of
/// the page they embed.
pub async fn parse_html_with_titles(
    html: &str,
    base: Option<&str>,
    resolver: &TitleResolver,
) -> ParsedContent {
    let (first, pending) = parse_blocking(html, base, HashMap::new()).await;
    if pending.is_empty() {
        return first;
    }

    let titles = resolver.resolve_all(&pending).await;
    parse_blocking(html, base, titles).await.0
}

async fn parse_blocking(
    html: &str,
    base: Option<&str>,
    titles: HashMap<String, String>,
) -> (ParsedContent, Vec<String>) {
    let html = html.to_string();
    let base = base.map(str::to_string);
    tokio::task::spawn_blocking(move || Parser::new(base.as_deref(), titles).run(&html))
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Content parser task failed");
            (ParsedContent::default(), Vec::new())
        })
}
