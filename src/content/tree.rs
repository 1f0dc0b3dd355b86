use html_escape::{encode_double_quoted_attribute, encode_text};

const RULE: &str = "\n----------------------\n";
const BULLET: &str = "● ";

/// One node of the structured content produced by the parser.
///
/// Nodes are built bottom-up and never mutated afterwards. Rendering walks
/// the tree depth-first in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentNode {
    Text(String),
    /// Sequence of nodes without formatting of its own
    Group(Vec<ContentNode>),
    Bold(Box<ContentNode>),
    Italic(Box<ContentNode>),
    Underline(Box<ContentNode>),
    /// `n` line breaks
    Break(u8),
    Rule,
    Link {
        text: Box<ContentNode>,
        href: String,
    },
    List {
        ordered: bool,
        items: Vec<ContentNode>,
    },
    ListItem(Box<ContentNode>),
    Code(Box<ContentNode>),
    Pre(Box<ContentNode>),
}

impl ContentNode {
    pub fn text(s: impl Into<String>) -> Self {
        ContentNode::Text(s.into())
    }

    /// Collapses a list of siblings: one node stands alone, several are grouped.
    pub fn from_nodes(mut nodes: Vec<ContentNode>) -> Option<Self> {
        match nodes.len() {
            0 => None,
            1 => nodes.pop(),
            _ => Some(ContentNode::Group(nodes)),
        }
    }

    /// Concatenated text of every run below this node, without markup.
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        self.push_plain(&mut out);
        out
    }

    fn push_plain(&self, out: &mut String) {
        match self {
            ContentNode::Text(s) => out.push_str(s),
            ContentNode::Break(n) => out.extend(std::iter::repeat('\n').take(*n as usize)),
            ContentNode::Rule => out.push_str(RULE),
            ContentNode::Group(nodes) | ContentNode::List { items: nodes, .. } => {
                nodes.iter().for_each(|n| n.push_plain(out))
            }
            ContentNode::Bold(inner)
            | ContentNode::Italic(inner)
            | ContentNode::Underline(inner)
            | ContentNode::ListItem(inner)
            | ContentNode::Code(inner)
            | ContentNode::Pre(inner)
            | ContentNode::Link { text: inner, .. } => inner.push_plain(out),
        }
    }

    /// Removes leading and trailing breaks and whitespace.
    ///
    /// Returns `None` if nothing is left.
    pub fn trim(self) -> Option<Self> {
        self.trim_start().and_then(ContentNode::trim_end)
    }

    fn trim_start(self) -> Option<Self> {
        match self {
            ContentNode::Text(s) => {
                let trimmed = s.trim_start();
                (!trimmed.is_empty()).then(|| ContentNode::Text(trimmed.to_string()))
            }
            ContentNode::Break(_) => None,
            ContentNode::Group(nodes) => {
                let mut rest = nodes.into_iter();
                let mut kept = Vec::new();
                for node in rest.by_ref() {
                    if let Some(node) = node.trim_start() {
                        kept.push(node);
                        break;
                    }
                }
                kept.extend(rest);
                ContentNode::from_nodes(kept)
            }
            other => Some(other),
        }
    }

    fn trim_end(self) -> Option<Self> {
        match self {
            ContentNode::Text(s) => {
                let trimmed = s.trim_end();
                (!trimmed.is_empty()).then(|| ContentNode::Text(trimmed.to_string()))
            }
            ContentNode::Break(_) => None,
            ContentNode::Group(mut nodes) => {
                while let Some(last) = nodes.pop() {
                    if let Some(last) = last.trim_end() {
                        nodes.push(last);
                        break;
                    }
                }
                ContentNode::from_nodes(nodes)
            }
            other => Some(other),
        }
    }

    /// Renders the tree as the HTML subset understood by chat platforms
    /// (`b`, `i`, `u`, `a`, `code`, `pre`), with lists and rules spelled out
    /// as text.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        self.push_html(&mut out);
        out
    }

    fn push_html(&self, out: &mut String) {
        match self {
            ContentNode::Text(s) => out.push_str(&encode_text(s)),
            ContentNode::Group(nodes) => nodes.iter().for_each(|n| n.push_html(out)),
            ContentNode::Bold(inner) => wrap(out, "b", inner),
            ContentNode::Italic(inner) => wrap(out, "i", inner),
            ContentNode::Underline(inner) => wrap(out, "u", inner),
            ContentNode::Code(inner) => wrap(out, "code", inner),
            ContentNode::Pre(inner) => wrap(out, "pre", inner),
            ContentNode::Break(n) => out.extend(std::iter::repeat('\n').take(*n as usize)),
            ContentNode::Rule => out.push_str(RULE),
            ContentNode::Link { text, href } => {
                out.push_str("<a href=\"");
                out.push_str(&encode_double_quoted_attribute(href));
                out.push_str("\">");
                text.push_html(out);
                out.push_str("</a>");
            }
            ContentNode::List { ordered, items } => {
                let mut index = 0;
                for item in items {
                    match item {
                        ContentNode::ListItem(inner) => {
                            index += 1;
                            if *ordered {
                                out.push_str(&format!("{}. ", index));
                            } else {
                                out.push_str(BULLET);
                            }
                            inner.push_html(out);
                            out.push('\n');
                        }
                        other => other.push_html(out),
                    }
                }
            }
            ContentNode::ListItem(inner) => {
                out.push_str(BULLET);
                inner.push_html(out);
                out.push('\n');
            }
        }
    }
}

fn wrap(out: &mut String, tag: &str, inner: &ContentNode) {
    out.push('<');
    out.push_str(tag);
    out.push('>');
    inner.push_html(out);
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn text(s: &str) -> ContentNode {
        ContentNode::text(s)
    }

    #[test]
    fn test_from_nodes() {
        assert_eq!(ContentNode::from_nodes(vec![]), None);
        assert_eq!(ContentNode::from_nodes(vec![text("a")]), Some(text("a")));
        assert_eq!(
            ContentNode::from_nodes(vec![text("a"), text("b")]),
            Some(ContentNode::Group(vec![text("a"), text("b")]))
        );
    }

    #[test]
    fn test_trim_removes_outer_breaks_and_spaces() {
        let node = ContentNode::Group(vec![
            ContentNode::Break(1),
            text("  quoted"),
            ContentNode::Break(1),
            text(" more "),
            ContentNode::Break(2),
        ]);
        assert_eq!(
            node.trim(),
            Some(ContentNode::Group(vec![
                text("quoted"),
                ContentNode::Break(1),
                text(" more"),
            ]))
        );
        assert_eq!(ContentNode::Break(2).trim(), None);
        assert_eq!(text("   ").trim(), None);
    }

    #[test]
    fn test_to_html_escapes_and_wraps() {
        let node = ContentNode::Group(vec![
            ContentNode::Bold(Box::new(text("a < b"))),
            ContentNode::Break(1),
            ContentNode::Link {
                text: Box::new(text("link")),
                href: "https://example.com/?a=1&b=2".to_string(),
            },
        ]);
        assert_eq!(
            node.to_html(),
            "<b>a &lt; b</b>\n<a href=\"https://example.com/?a=1&amp;b=2\">link</a>"
        );
    }

    #[test]
    fn test_quotes_escaped_only_inside_href() {
        let node = ContentNode::Link {
            text: Box::new(text("say \"hi\" & go")),
            href: "https://example.com/q?x=\"y\"".to_string(),
        };
        assert_eq!(
            node.to_html(),
            "<a href=\"https://example.com/q?x=&quot;y&quot;\">say \"hi\" &amp; go</a>"
        );
    }

    #[test]
    fn test_lists_number_items_only() {
        let items = vec![
            ContentNode::Break(1),
            ContentNode::ListItem(Box::new(text("one"))),
            ContentNode::ListItem(Box::new(text("two"))),
            ContentNode::Break(1),
        ];
        let ordered = ContentNode::List {
            ordered: true,
            items: items.clone(),
        };
        assert_eq!(ordered.to_html(), "\n1. one\n2. two\n\n");

        let unordered = ContentNode::List {
            ordered: false,
            items,
        };
        assert_eq!(unordered.to_html(), "\n● one\n● two\n\n");
    }

    #[test]
    fn test_plain_text_drops_markup() {
        let node = ContentNode::Italic(Box::new(ContentNode::Group(vec![
            text("x"),
            ContentNode::Code(Box::new(text("<y>"))),
        ])));
        assert_eq!(node.plain_text(), "x<y>");
    }
}
