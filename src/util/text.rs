use regex::{Captures, Regex};
use std::borrow::Cow;
use std::sync::OnceLock;

fn shortcode_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r":([a-zA-Z0-9_+\-]+):").expect("shortcode regex is valid"))
}

fn newline_run_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("newline regex is valid"))
}

/// Replaces `:shortcode:` sequences with the emoji they name.
///
/// Unknown shortcodes are left as written, so `10:30:00` survives.
///
/// ```
/// use feedrelay::util::emojify;
///
/// assert_eq!(emojify("ship it :rocket:"), "ship it 🚀");
/// assert_eq!(emojify(":not_an_emoji:"), ":not_an_emoji:");
/// ```
pub fn emojify(s: &str) -> Cow<'_, str> {
    if !s.contains(':') {
        return Cow::Borrowed(s);
    }
    shortcode_pattern().replace_all(s, |caps: &Captures<'_>| {
        match emojis::get_by_shortcode(&caps[1]) {
            Some(emoji) => emoji.as_str().to_string(),
            None => caps[0].to_string(),
        }
    })
}

/// Collapses every run of whitespace into a single space.
///
/// Leading and trailing whitespace is kept (as one space) since text runs
/// are concatenated with their neighbours.
pub fn collapse_whitespace(s: &str) -> Cow<'_, str> {
    let needs_collapse = s
        .as_bytes()
        .windows(2)
        .any(|w| w[0].is_ascii_whitespace() && w[1].is_ascii_whitespace())
        || s.bytes().any(|b| b.is_ascii_whitespace() && b != b' ');
    if !needs_collapse {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut in_space = false;
    for c in s.chars() {
        if c.is_ascii_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    Cow::Owned(out)
}

/// Final cleanup of rendered text: trailing whitespace removed from every
/// line, blank-line runs capped at one empty line, the whole text trimmed.
pub fn normalize_rendered(s: &str) -> String {
    let stripped = s
        .split('\n')
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    newline_run_pattern()
        .replace_all(&stripped, "\n\n")
        .trim()
        .to_string()
}
