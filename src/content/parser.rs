use super::iframe::host_of;
use super::media::MediaItem;
use super::srcset;
use super::tree::ContentNode;
use crate::util::{collapse_whitespace, emojify, normalize_rendered};
use regex::Regex;
use scraper::{ElementRef, Html};
use std::collections::HashMap;
use std::sync::OnceLock;
use url::Url;

const ANIMATED_EXTENSIONS: &[&str] = &[".gif", ".gifv", ".webm", ".mp4", ".m4v"];
const ICON_MAX_DIMENSION: u64 = 30;

fn small_icon_style() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(width|height): ?(([012]?\d|30)(\.\d)?px|([01](\.\d)?|2)r?em)")
            .expect("icon style regex is valid")
    })
}

/// Result of parsing one entry's markup.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedContent {
    /// `None` when the markup had no text content at all
    pub tree: Option<ContentNode>,
    /// Media in document order
    pub media: Vec<MediaItem>,
    /// Rendered and normalized HTML of `tree`
    pub html: String,
}

type Handler = fn(&mut Parser, ElementRef<'_>) -> Option<ContentNode>;

/// Tag handlers. Tags not listed here are transparent: their children are
/// parsed and spliced into the parent.
const HANDLERS: &[(&str, Handler)] = &[
    ("p", Parser::paragraph),
    ("section", Parser::paragraph),
    ("blockquote", Parser::blockquote),
    ("pre", Parser::pre),
    ("code", Parser::code),
    ("br", Parser::line_break),
    ("hr", Parser::rule),
    ("a", Parser::link),
    ("img", Parser::image),
    ("video", Parser::video),
    ("b", Parser::bold),
    ("strong", Parser::bold),
    ("i", Parser::italic),
    ("em", Parser::italic),
    ("u", Parser::underline),
    ("ins", Parser::underline),
    ("h1", Parser::heading),
    ("h2", Parser::heading),
    ("h3", Parser::heading),
    ("h4", Parser::heading),
    ("h5", Parser::heading),
    ("h6", Parser::heading),
    ("ol", Parser::list),
    ("ul", Parser::list),
    ("li", Parser::list_item),
    ("iframe", Parser::iframe),
    ("script", Parser::skip),
    ("style", Parser::skip),
    ("noscript", Parser::skip),
    ("template", Parser::skip),
];

fn handler_for(tag: &str) -> Option<Handler> {
    HANDLERS
        .iter()
        .find(|(name, _)| *name == tag)
        .map(|(_, handler)| *handler)
}

/// Walks a parsed fragment and builds the content tree.
///
/// Frames without text are labelled from `titles` when it has their URL;
/// otherwise they get the host as label and are recorded in `pending_frames`
/// so a caller can look titles up and parse again.
pub(crate) struct Parser {
    base: Option<Url>,
    titles: HashMap<String, String>,
    media: Vec<MediaItem>,
    pending_frames: Vec<String>,
    pre_depth: usize,
}

impl Parser {
    pub(crate) fn new(base: Option<&str>, titles: HashMap<String, String>) -> Self {
        Self {
            base: base.and_then(|b| Url::parse(b).ok()),
            titles,
            media: Vec::new(),
            pending_frames: Vec::new(),
            pre_depth: 0,
        }
    }

    /// Parses `html` as a body fragment. Returns the content and the frame
    /// URLs that still lack a title.
    pub(crate) fn run(mut self, html: &str) -> (ParsedContent, Vec<String>) {
        let fragment = Html::parse_fragment(html);
        let tree = self.children(fragment.root_element(), false);
        let html = tree
            .as_ref()
            .map(|t| normalize_rendered(&t.to_html()))
            .unwrap_or_default();

        let mut pending = self.pending_frames;
        pending.sort();
        pending.dedup();
        (
            ParsedContent {
                tree,
                media: self.media,
                html,
            },
            pending,
        )
    }

    fn element(&mut self, el: ElementRef<'_>) -> Option<ContentNode> {
        match handler_for(el.value().name()) {
            Some(handler) => handler(self, el),
            None => self.children(el, false),
        }
    }

    fn children(&mut self, el: ElementRef<'_>, elements_only: bool) -> Option<ContentNode> {
        ContentNode::from_nodes(self.child_nodes(el, elements_only))
    }

    /// Parses the children of `el`. With `elements_only`, bare text between
    /// child elements is dropped.
    fn child_nodes(&mut self, el: ElementRef<'_>, elements_only: bool) -> Vec<ContentNode> {
        let mut nodes = Vec::new();
        for child in el.children() {
            let node = if let Some(child_el) = ElementRef::wrap(child) {
                self.element(child_el)
            } else if let Some(text) = child.value().as_text() {
                if elements_only {
                    continue;
                }
                self.text(text)
            } else {
                // Comments, doctypes and processing instructions
                None
            };
            nodes.extend(node);
        }
        nodes
    }

    fn text(&self, raw: &str) -> Option<ContentNode> {
        let text = if self.pre_depth > 0 {
            emojify(raw).into_owned()
        } else {
            emojify(&collapse_whitespace(raw)).into_owned()
        };
        (!text.is_empty()).then_some(ContentNode::Text(text))
    }

    /// Resolves `href` against the feed link. Absolute URLs are kept as
    /// written; relative ones without a base are kept as well.
    fn resolve(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() {
            return None;
        }
        if Url::parse(href).is_ok() {
            return Some(href.to_string());
        }
        match &self.base {
            Some(base) => base.join(href).ok().map(String::from),
            None => Some(href.to_string()),
        }
    }

    fn skip(&mut self, _el: ElementRef<'_>) -> Option<ContentNode> {
        None
    }

    fn paragraph(&mut self, el: ElementRef<'_>) -> Option<ContentNode> {
        let text = self.children(el, false)?;
        let in_list_item = el
            .parent()
            .and_then(ElementRef::wrap)
            .is_some_and(|parent| parent.value().name() == "li");
        if in_list_item {
            return Some(text);
        }
        Some(ContentNode::Group(vec![
            ContentNode::Break(1),
            text,
            ContentNode::Break(1),
        ]))
    }

    fn blockquote(&mut self, el: ElementRef<'_>) -> Option<ContentNode> {
        let quote = self.children(el, false)?.trim()?;
        Some(ContentNode::Group(vec![
            ContentNode::Rule,
            quote,
            ContentNode::Rule,
        ]))
    }

    fn pre(&mut self, el: ElementRef<'_>) -> Option<ContentNode> {
        self.pre_depth += 1;
        let inner = self.children(el, false);
        self.pre_depth -= 1;
        inner.map(|inner| ContentNode::Pre(Box::new(inner)))
    }

    fn code(&mut self, el: ElementRef<'_>) -> Option<ContentNode> {
        self.children(el, false)
            .map(|inner| ContentNode::Code(Box::new(inner)))
    }

    fn line_break(&mut self, _el: ElementRef<'_>) -> Option<ContentNode> {
        Some(ContentNode::Break(1))
    }

    fn rule(&mut self, _el: ElementRef<'_>) -> Option<ContentNode> {
        Some(ContentNode::Rule)
    }

    fn link(&mut self, el: ElementRef<'_>) -> Option<ContentNode> {
        let text = self.children(el, false)?;
        let href = el.value().attr("href").filter(|h| !h.trim().is_empty())?;
        match self.resolve(href) {
            Some(href) => Some(ContentNode::Link {
                text: Box::new(text),
                href,
            }),
            // Unresolvable target: keep the text, lose the link
            None => Some(text),
        }
    }

    fn bold(&mut self, el: ElementRef<'_>) -> Option<ContentNode> {
        self.children(el, false)
            .map(|inner| ContentNode::Bold(Box::new(inner)))
    }

    fn italic(&mut self, el: ElementRef<'_>) -> Option<ContentNode> {
        self.children(el, false)
            .map(|inner| ContentNode::Italic(Box::new(inner)))
    }

    fn underline(&mut self, el: ElementRef<'_>) -> Option<ContentNode> {
        self.children(el, false)
            .map(|inner| ContentNode::Underline(Box::new(inner)))
    }

    fn heading(&mut self, el: ElementRef<'_>) -> Option<ContentNode> {
        let text = self.children(el, false)?;
        let styled = match el.value().name() {
            "h1" => ContentNode::Bold(Box::new(ContentNode::Underline(Box::new(text)))),
            "h2" => ContentNode::Bold(Box::new(text)),
            _ => ContentNode::Underline(Box::new(text)),
        };
        Some(ContentNode::Group(vec![
            ContentNode::Break(2),
            styled,
            ContentNode::Break(1),
        ]))
    }

    fn list(&mut self, el: ElementRef<'_>) -> Option<ContentNode> {
        let mut items = self.child_nodes(el, true);
        if items.is_empty() {
            return None;
        }
        items.insert(0, ContentNode::Break(1));
        items.push(ContentNode::Break(1));
        Some(ContentNode::List {
            ordered: el.value().name() == "ol",
            items,
        })
    }

    fn list_item(&mut self, el: ElementRef<'_>) -> Option<ContentNode> {
        self.children(el, false)
            .map(|inner| ContentNode::ListItem(Box::new(inner)))
    }

    fn image(&mut self, el: ElementRef<'_>) -> Option<ContentNode> {
        let attrs = el.value();
        let src = attrs.attr("src").filter(|s| !s.trim().is_empty());
        let srcset = attrs.attr("srcset").filter(|s| !s.trim().is_empty());
        if src.is_none() && srcset.is_none() {
            return None;
        }

        let alt = attrs.attr("alt").unwrap_or_default();
        if is_icon(el) {
            return (!alt.is_empty()).then(|| ContentNode::Text(emojify(alt).into_owned()));
        }

        let mut animated = false;
        let urls: Vec<String> = srcset::candidates(src, srcset)
            .iter()
            .filter_map(|candidate| self.resolve(candidate))
            .inspect(|url| animated |= is_animated(url))
            .collect();

        if !urls.is_empty() {
            self.media.push(if animated {
                MediaItem::Animation { urls }
            } else {
                MediaItem::Image { urls }
            });
        }
        None
    }

    fn video(&mut self, el: ElementRef<'_>) -> Option<ContentNode> {
        let sources = el
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|child| child.value().name() == "source")
            .filter_map(|child| child.value().attr("src"));
        let urls: Vec<String> = sources
            .chain(el.value().attr("src"))
            .filter_map(|src| self.resolve(src))
            .collect();
        let fallback = el.value().attr("poster").and_then(|p| self.resolve(p));

        if !urls.is_empty() {
            self.media.push(MediaItem::Video { urls, fallback });
        }
        None
    }

    fn iframe(&mut self, el: ElementRef<'_>) -> Option<ContentNode> {
        let text = self
            .children(el, false)
            .map(|inner| inner.plain_text().trim().to_string())
            .filter(|t| !t.is_empty());
        let src = self.resolve(el.value().attr("src")?)?;

        let label = match text {
            Some(text) => text,
            None => match self.titles.get(&src) {
                Some(title) => title.clone(),
                None => {
                    self.pending_frames.push(src.clone());
                    host_of(&src)
                }
            },
        };

        Some(ContentNode::Group(vec![
            ContentNode::Break(2),
            ContentNode::Link {
                text: Box::new(ContentNode::Text(format!("iframe ({})", label))),
                href: src,
            },
            ContentNode::Break(2),
        ]))
    }
}

/// Images that are decoration rather than content: tiny, emoji-classed,
/// or carrying a `:shortcode:` alt text.
fn is_icon(el: ElementRef<'_>) -> bool {
    let attrs = el.value();
    let dimension = |name: &str| {
        attrs
            .attr(name)
            .filter(|v| !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(u64::MAX)
    };
    let alt = attrs.attr("alt").unwrap_or_default();

    dimension("width") <= ICON_MAX_DIMENSION
        || dimension("height") <= ICON_MAX_DIMENSION
        || attrs
            .attr("style")
            .is_some_and(|style| small_icon_style().is_match(style))
        || attrs.classes().any(|class| class == "emoji")
        || (alt.starts_with(':') && alt.ends_with(':'))
}

fn is_animated(url: &str) -> bool {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_ascii_lowercase(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase(),
    };
    ANIMATED_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BASE: &str = "https://example.com/feed/";

    fn parse(html: &str) -> ParsedContent {
        Parser::new(Some(BASE), HashMap::new()).run(html).0
    }

    fn text(s: &str) -> ContentNode {
        ContentNode::text(s)
    }

    #[test]
    fn test_paragraph_with_inline_styles() {
        let parsed = parse("<p>Hello <b>world</b></p>");
        assert_eq!(
            parsed.tree,
            Some(ContentNode::Group(vec![
                ContentNode::Break(1),
                ContentNode::Group(vec![text("Hello "), ContentNode::Bold(Box::new(text("world")))]),
                ContentNode::Break(1),
            ]))
        );
        assert_eq!(parsed.html, "Hello <b>world</b>");
    }

    #[test]
    fn test_empty_inline_tags_collapse() {
        let parsed = parse("<p><b></b><i> </i>x</p>");
        assert_eq!(parsed.html, "<i> </i>x");
        let parsed = parse("<p><b></b>x</p>");
        assert_eq!(parsed.html, "x");
    }

    #[test]
    fn test_unknown_tags_are_transparent() {
        let parsed = parse("<div><span>a</span><custom-tag>b</custom-tag></div>");
        assert_eq!(parsed.tree, Some(ContentNode::Group(vec![text("a"), text("b")])));
    }

    #[test]
    fn test_relative_link_resolved_against_base() {
        let parsed = parse(r#"<a href="/post/1">read</a>"#);
        assert_eq!(
            parsed.tree,
            Some(ContentNode::Link {
                text: Box::new(text("read")),
                href: "https://example.com/post/1".to_string(),
            })
        );
    }

    #[test]
    fn test_link_without_href_or_text_dropped() {
        assert_eq!(parse("<a>orphan text</a>").tree, None);
        assert_eq!(parse(r#"<a href="https://x.org/"></a>"#).tree, None);
    }

    #[test]
    fn test_headings() {
        let parsed = parse("<h1>Title</h1><p>body</p>");
        assert_eq!(parsed.html, "<b><u>Title</u></b>\n\nbody");
        let parsed = parse("<h2>Sub</h2><h4>Minor</h4>");
        assert_eq!(parsed.html, "<b>Sub</b>\n\n<u>Minor</u>");
    }

    #[test]
    fn test_blockquote_trimmed_between_rules() {
        let parsed = parse("<blockquote><p>quoted</p></blockquote>");
        assert_eq!(
            parsed.tree,
            Some(ContentNode::Group(vec![
                ContentNode::Rule,
                text("quoted"),
                ContentNode::Rule,
            ]))
        );
    }

    #[test]
    fn test_lists_drop_stray_text() {
        let parsed = parse("<ul>\n  <li>one</li>\n  <li>two</li>\n</ul>");
        assert_eq!(parsed.html, "● one\n● two");
        let parsed = parse("<ol><li>one</li><li>two</li></ol>");
        assert_eq!(parsed.html, "1. one\n2. two");
    }

    #[test]
    fn test_paragraph_in_list_item_has_no_breaks() {
        let parsed = parse("<ul><li><p>item</p></li></ul>");
        assert_eq!(
            parsed.tree,
            Some(ContentNode::List {
                ordered: false,
                items: vec![
                    ContentNode::Break(1),
                    ContentNode::ListItem(Box::new(text("item"))),
                    ContentNode::Break(1),
                ],
            })
        );
    }

    #[test]
    fn test_whitespace_collapsed_outside_pre() {
        let parsed = parse("<p>a   b\n c</p><pre>x\n  y</pre>");
        assert_eq!(parsed.html, "a b c\n<pre>x\n  y</pre>");
    }

    #[test]
    fn test_script_style_and_comments_dropped() {
        let parsed = parse("<p>a<script>alert(1)</script><style>p{}</style><!-- note --></p>");
        assert_eq!(parsed.html, "a");
    }

    #[test]
    fn test_text_shortcodes_emojified() {
        assert_eq!(parse("<p>hi :smile:</p>").html, "hi 😄");
    }

    #[test]
    fn test_srcset_order() {
        let parsed = parse(r#"<img src="c.jpg" srcset="a.jpg 480w, b.jpg 800w">"#);
        assert_eq!(parsed.tree, None);
        assert_eq!(
            parsed.media,
            vec![MediaItem::Image {
                urls: vec![
                    "https://example.com/feed/b.jpg".to_string(),
                    "https://example.com/feed/a.jpg".to_string(),
                    "https://example.com/feed/c.jpg".to_string(),
                ]
            }]
        );
    }

    #[test]
    fn test_small_image_suppressed() {
        let parsed = parse(r#"<img src="icon.png" width="20" height="20">"#);
        assert_eq!(parsed.tree, None);
        assert!(parsed.media.is_empty());
    }

    #[test]
    fn test_small_image_with_shortcode_alt_becomes_emoji() {
        let parsed = parse(r#"<img src="icon.png" width="20" height="20" alt=":smile:">"#);
        assert_eq!(parsed.tree, Some(text("😄")));
        assert!(parsed.media.is_empty());
    }

    #[test]
    fn test_icon_heuristics() {
        assert!(parse(r#"<img src="x.png" style="width: 16px">"#).media.is_empty());
        assert!(parse(r#"<img src="x.png" style="height:1.5em">"#).media.is_empty());
        assert!(parse(r#"<img src="x.png" alt=":wave:">"#).media.is_empty());

        let parsed = parse(r#"<img class="wp-smiley emoji" src="x.png" alt="😀">"#);
        assert_eq!(parsed.tree, Some(text("😀")));
        assert!(parsed.media.is_empty());

        // Only the exact class token counts, and non-numeric sizes are not small
        assert_eq!(parse(r#"<img class="emojis" src="x.png">"#).media.len(), 1);
        assert_eq!(parse(r#"<img src="x.png" width="100%">"#).media.len(), 1);
        assert_eq!(parse(r#"<img src="x.png" style="width: 300px">"#).media.len(), 1);
    }

    #[test]
    fn test_animated_extension_makes_animation() {
        let parsed = parse(r#"<img src="https://cdn.example.com/a.GIF?size=large">"#);
        assert_eq!(
            parsed.media,
            vec![MediaItem::Animation {
                urls: vec!["https://cdn.example.com/a.GIF?size=large".to_string()]
            }]
        );
    }

    #[test]
    fn test_video_sources_and_poster() {
        let parsed = parse(r#"<video src="v.mp4" poster="p.jpg"><source src="v.webm"></video>"#);
        assert_eq!(
            parsed.media,
            vec![MediaItem::Video {
                urls: vec![
                    "https://example.com/feed/v.webm".to_string(),
                    "https://example.com/feed/v.mp4".to_string(),
                ],
                fallback: Some("https://example.com/feed/p.jpg".to_string()),
            }]
        );
    }

    #[test]
    fn test_iframe_without_title_uses_host() {
        let (parsed, pending) = Parser::new(Some(BASE), HashMap::new())
            .run(r#"<iframe src="https://www.youtube.com/embed/x"></iframe>"#);
        assert_eq!(
            parsed.html,
            r#"<a href="https://www.youtube.com/embed/x">iframe (www.youtube.com)</a>"#
        );
        assert_eq!(pending, vec!["https://www.youtube.com/embed/x".to_string()]);
    }

    #[test]
    fn test_iframe_uses_known_title() {
        let titles = HashMap::from([(
            "https://www.youtube.com/embed/x".to_string(),
            "Clip".to_string(),
        )]);
        let (parsed, pending) = Parser::new(Some(BASE), titles)
            .run(r#"<iframe src="https://www.youtube.com/embed/x"></iframe>"#);
        assert_eq!(
            parsed.html,
            r#"<a href="https://www.youtube.com/embed/x">iframe (Clip)</a>"#
        );
        assert!(pending.is_empty());
    }

    #[test]
    fn test_media_in_document_order() {
        let parsed = parse(r#"<p><img src="1.png"></p><video src="2.mp4"></video><img src="3.png">"#);
        let firsts: Vec<&str> = parsed.media.iter().map(|m| m.urls()[0].as_str()).collect();
        assert_eq!(
            firsts,
            vec![
                "https://example.com/feed/1.png",
                "https://example.com/feed/2.mp4",
                "https://example.com/feed/3.png",
            ]
        );
    }

    #[test]
    fn test_parse_is_deterministic() {
        let html = r#"<h2>t</h2><p>a <a href="x">b</a></p><img srcset="a 1x, b 2x"><ul><li>c</li></ul>"#;
        assert_eq!(parse(html), parse(html));
    }
}
