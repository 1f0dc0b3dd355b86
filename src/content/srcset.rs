use regex::Regex;
use std::collections::VecDeque;
use std::sync::OnceLock;

fn descriptor_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+(?:\.\d+)?)([wx])$").expect("descriptor regex is valid"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Width,
    Density,
}

#[derive(Debug, Clone, PartialEq)]
struct Candidate {
    url: String,
    value: f64,
    unit: Unit,
}

/// Splits a `srcset` attribute into candidates.
///
/// A URL may itself contain commas; only a comma after whitespace (or
/// trailing the URL) separates candidates. A missing descriptor means `1x`.
/// Candidates with a descriptor that is not a single `<number>w` or
/// `<number>x` are dropped.
fn tokenize(srcset: &str) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let mut rest = srcset;

    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        if rest.is_empty() {
            break;
        }

        let url_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let raw_url = &rest[..url_end];
        rest = &rest[url_end..];

        let (url, descriptor) = if raw_url.ends_with(',') {
            (raw_url.trim_end_matches(','), "")
        } else {
            let desc_end = rest.find(',').unwrap_or(rest.len());
            let descriptor = rest[..desc_end].trim();
            rest = &rest[desc_end..];
            (raw_url, descriptor)
        };
        if url.is_empty() {
            continue;
        }

        let parsed = if descriptor.is_empty() {
            Some((1.0, Unit::Density))
        } else {
            descriptor_pattern().captures(descriptor).and_then(|caps| {
                let value = caps[1].parse::<f64>().ok()?;
                let unit = if &caps[2] == "w" { Unit::Width } else { Unit::Density };
                Some((value, unit))
            })
        };

        if let Some((value, unit)) = parsed {
            candidates.push(Candidate {
                url: url.to_string(),
                value,
                unit,
            });
        }
    }

    candidates
}

/// Orders the image sources of an `<img>` best-first.
///
/// Without `srcset` this is just `src`. Otherwise `src` joins the `srcset`
/// candidates as an implicit `1x`, and the list alternates between the
/// widest remaining `w` candidate and the densest remaining `x` candidate.
/// An `x` candidate of density 1 or less waits until every `w` candidate has
/// been taken.
pub(crate) fn candidates(src: Option<&str>, srcset: Option<&str>) -> Vec<String> {
    let Some(srcset) = srcset.filter(|s| !s.trim().is_empty()) else {
        return src.map(|s| vec![s.to_string()]).unwrap_or_default();
    };

    let mut all = tokenize(srcset);
    if let Some(src) = src {
        all.push(Candidate {
            url: src.to_string(),
            value: 1.0,
            unit: Unit::Density,
        });
    }

    let (mut widths, mut densities): (Vec<_>, Vec<_>) =
        all.into_iter().partition(|c| c.unit == Unit::Width);
    // Stable sorts: equal values keep document order
    widths.sort_by(|a, b| b.value.total_cmp(&a.value));
    densities.sort_by(|a, b| b.value.total_cmp(&a.value));
    let mut widths = VecDeque::from(widths);
    let mut densities = VecDeque::from(densities);

    let mut ordered = Vec::new();
    loop {
        let width = widths.pop_front();
        let density = densities.pop_front();
        if width.is_none() && density.is_none() {
            break;
        }
        if let Some(width) = width {
            ordered.push(width.url);
        }
        if let Some(density) = density {
            if density.value <= 1.0 && !widths.is_empty() {
                densities.push_front(density);
                continue;
            }
            ordered.push(density.url);
        }
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_widths_descending_then_src() {
        assert_eq!(
            candidates(Some("c.jpg"), Some("a.jpg 480w, b.jpg 800w")),
            vec!["b.jpg", "a.jpg", "c.jpg"]
        );
    }

    #[test]
    fn test_no_srcset_uses_src() {
        assert_eq!(candidates(Some("c.jpg"), None), vec!["c.jpg"]);
        assert_eq!(candidates(Some("c.jpg"), Some("  ")), vec!["c.jpg"]);
        assert!(candidates(None, None).is_empty());
    }

    #[test]
    fn test_densities_interleave_with_widths() {
        assert_eq!(
            candidates(
                Some("base.jpg"),
                Some("s.jpg 300w, l.jpg 900w, hi.jpg 2x, mid.jpg 1.5x")
            ),
            vec!["l.jpg", "hi.jpg", "s.jpg", "mid.jpg", "base.jpg"]
        );
    }

    #[test]
    fn test_density_only() {
        assert_eq!(
            candidates(None, Some("one.jpg, two.jpg 2x")),
            vec!["two.jpg", "one.jpg"]
        );
    }

    #[test]
    fn test_commas_inside_urls() {
        assert_eq!(
            candidates(
                None,
                Some("https://cdn/img,w_800.jpg 800w, https://cdn/img,w_400.jpg 400w")
            ),
            vec!["https://cdn/img,w_800.jpg", "https://cdn/img,w_400.jpg"]
        );
    }

    #[test]
    fn test_comma_separation_needs_whitespace_or_trailing_comma() {
        assert_eq!(
            candidates(None, Some("a.jpg, b.jpg 2x")),
            vec!["b.jpg", "a.jpg"]
        );
        assert_eq!(candidates(None, Some("a.jpg,b.jpg 2x")), vec!["a.jpg,b.jpg"]);
    }

    #[test]
    fn test_invalid_descriptors_dropped() {
        assert_eq!(
            candidates(None, Some("a.jpg 100q, b.jpg 200w, c.jpg 1x 2x")),
            vec!["b.jpg"]
        );
    }
}
