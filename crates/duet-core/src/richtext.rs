//! Rich-text span mapping.
//!
//! Posts arrive either as plain text with byte-offset facets (AT Protocol) or
//! as rendered HTML (Mastodon). Both are mapped onto [`StyledText`]: decoded
//! text plus non-overlapping spans addressed in *character* indices.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::Network;

/// Scheme used for in-app profile and tag links.
pub const INTERNAL_SCHEME: &str = "duet";

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\b(?:https?://|www\.)[^\s<>"]+"#).unwrap());

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

static TAG_PARTS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<\s*(/?)\s*([a-zA-Z][a-zA-Z0-9]*)([^>]*?)/?\s*>$").unwrap());

static ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([a-zA-Z][a-zA-Z0-9_-]*)\s*=\s*"([^"]*)""#).unwrap());

static ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(amp|lt|gt|quot|#39);").unwrap());

/// What a span points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SpanKind {
    Link { url: String },
    /// A mention of an account on `network`. Mastodon handles are
    /// qualified with the instance the mention links to.
    Mention { network: Network, handle: String },
    Tag { tag: String },
}

impl SpanKind {
    /// The URL a tap on this span should open.
    ///
    /// Mentions and tags resolve to internal links so the presentation layer
    /// can route them to a profile or tag view.
    pub fn target(&self) -> String {
        match self {
            SpanKind::Link { url } => url.clone(),
            SpanKind::Mention { network, handle } => {
                format!("{INTERNAL_SCHEME}://profile/{}/{handle}", network.prefix())
            }
            SpanKind::Tag { tag } => format!("{INTERNAL_SCHEME}://tag/{tag}"),
        }
    }
}

/// A marked range `[start, end)` in character indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpan {
    pub start: usize,
    pub end: usize,
    pub kind: SpanKind,
}

impl TextSpan {
    fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start < end && start < self.end
    }
}

/// Decoded text with ordered, non-overlapping spans.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StyledText {
    pub text: String,
    pub spans: Vec<TextSpan>,
}

impl StyledText {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            spans: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// The text covered by a span.
    pub fn span_text(&self, span: &TextSpan) -> String {
        self.text
            .chars()
            .skip(span.start)
            .take(span.end.saturating_sub(span.start))
            .collect()
    }

    /// Returns true if any existing span intersects `[start, end)`.
    pub fn is_covered(&self, start: usize, end: usize) -> bool {
        self.spans.iter().any(|s| s.overlaps(start, end))
    }

    /// Insert a span, keeping order. Empty or overlapping spans are rejected.
    pub fn add_span(&mut self, span: TextSpan) -> bool {
        if span.start >= span.end || self.is_covered(span.start, span.end) {
            return false;
        }
        let at = self.spans.partition_point(|s| s.start < span.start);
        self.spans.insert(at, span);
        true
    }
}

/// A feature attached to a byte range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FacetFeature {
    Link { uri: String },
    /// The actor id is kept for completeness; spans use the visible handle.
    Mention { did: String },
    Tag { tag: String },
}

/// A byte-offset annotation over UTF-8 text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteFacet {
    pub byte_start: usize,
    pub byte_end: usize,
    pub feature: FacetFeature,
}

/// Translate a UTF-8 byte offset into a character index.
///
/// Walks the string accumulating each character's encoded width. Returns
/// `None` when the offset falls inside a character or past the end.
///
/// ```
/// use duet_core::richtext::byte_to_char_offset;
///
/// assert_eq!(byte_to_char_offset("héllo", 3), Some(2));
/// assert_eq!(byte_to_char_offset("héllo", 2), None);
/// assert_eq!(byte_to_char_offset("héllo", 6), Some(5));
/// ```
pub fn byte_to_char_offset(text: &str, byte_offset: usize) -> Option<usize> {
    let mut bytes = 0usize;
    let mut chars = 0usize;
    for ch in text.chars() {
        if bytes == byte_offset {
            return Some(chars);
        }
        if bytes > byte_offset {
            return None;
        }
        bytes += ch.len_utf8();
        chars += 1;
    }
    (bytes == byte_offset).then_some(chars)
}

/// Map byte-offset facets onto `text`.
///
/// Facets with `start > end`, empty ranges, unmappable offsets or ranges that
/// overlap an earlier facet are dropped. Afterwards plain URLs in the text
/// are linked wherever no annotated span already covers them.
pub fn from_byte_facets(text: &str, facets: &[ByteFacet]) -> StyledText {
    let mut styled = StyledText::plain(text);

    let mut ordered: Vec<&ByteFacet> = facets.iter().collect();
    ordered.sort_by_key(|f| (f.byte_start, f.byte_end));

    for facet in ordered {
        if facet.byte_start > facet.byte_end {
            continue;
        }
        let (Some(start), Some(end)) = (
            byte_to_char_offset(text, facet.byte_start),
            byte_to_char_offset(text, facet.byte_end),
        ) else {
            continue;
        };

        let kind = match &facet.feature {
            FacetFeature::Link { uri } => SpanKind::Link { url: uri.clone() },
            FacetFeature::Mention { .. } => {
                let visible = &text[facet.byte_start..facet.byte_end];
                let handle = visible.trim().trim_start_matches('@');
                if handle.is_empty() {
                    continue;
                }
                SpanKind::Mention {
                    network: Network::Bluesky,
                    handle: handle.to_string(),
                }
            }
            FacetFeature::Tag { tag } => SpanKind::Tag { tag: tag.clone() },
        };

        styled.add_span(TextSpan { start, end, kind });
    }

    for (start, end, url) in detect_links(text) {
        if !styled.is_covered(start, end) {
            styled.add_span(TextSpan {
                start,
                end,
                kind: SpanKind::Link { url },
            });
        }
    }

    styled
}

/// Find plain URLs in text. Returns character ranges and normalized URLs.
pub fn detect_links(text: &str) -> Vec<(usize, usize, String)> {
    let mut links = Vec::new();
    for m in URL_RE.find_iter(text) {
        let raw = trim_trailing_punctuation(m.as_str());
        if raw.is_empty() {
            continue;
        }
        let byte_end = m.start() + raw.len();
        let (Some(start), Some(end)) = (
            byte_to_char_offset(text, m.start()),
            byte_to_char_offset(text, byte_end),
        ) else {
            continue;
        };
        let url = if raw.to_ascii_lowercase().starts_with("www.") {
            format!("https://{raw}")
        } else {
            raw.to_string()
        };
        links.push((start, end, url));
    }
    links
}

fn trim_trailing_punctuation(url: &str) -> &str {
    let mut trimmed = url;
    loop {
        let Some(last) = trimmed.chars().last() else {
            return trimmed;
        };
        let strip = match last {
            '.' | ',' | ';' | ':' | '!' | '?' | '\'' | '"' => true,
            ')' => trimmed.matches('(').count() < trimmed.matches(')').count(),
            _ => false,
        };
        if !strip {
            return trimmed;
        }
        trimmed = &trimmed[..trimmed.len() - last.len_utf8()];
    }
}

/// Decode the basic HTML entities in one pass.
pub fn decode_entities(s: &str) -> String {
    ENTITY_RE
        .replace_all(s, |caps: &Captures<'_>| match &caps[1] {
            "amp" => "&",
            "lt" => "<",
            "gt" => ">",
            "quot" => "\"",
            _ => "'",
        })
        .into_owned()
}

struct OpenAnchor {
    start: usize,
    href: Option<String>,
    class: String,
}

/// Render post HTML into styled text.
///
/// Tags are stripped, `<br>` becomes a newline and paragraphs are separated
/// by a blank line. Anchors become spans: `mention` anchors map to the
/// visible handle, `hashtag` anchors to tags, and everything else to links.
/// Content inside `invisible` spans is dropped and `ellipsis` spans end in
/// `…`.
pub fn from_html(html: &str) -> StyledText {
    let mut out = String::with_capacity(html.len());
    let mut len = 0usize;
    let mut spans: Vec<TextSpan> = Vec::new();
    let mut anchors: Vec<OpenAnchor> = Vec::new();
    // Per open <span>: (invisible, ellipsis)
    let mut span_stack: Vec<(bool, bool)> = Vec::new();
    let mut last = 0usize;

    for m in TAG_RE.find_iter(html) {
        let hidden = span_stack.iter().any(|(invisible, _)| *invisible);
        if !hidden {
            let text = decode_entities(&html[last..m.start()]);
            push(&mut out, &mut len, &text);
        }
        last = m.end();

        let Some(parts) = TAG_PARTS_RE.captures(m.as_str()) else {
            continue;
        };
        let closing = !parts[1].is_empty();
        let name = parts[2].to_ascii_lowercase();
        let attrs = parts.get(3).map(|a| a.as_str()).unwrap_or("");

        match (name.as_str(), closing) {
            ("br", _) => push(&mut out, &mut len, "\n"),
            ("p", false) => {
                let keep = out.trim_end_matches([' ', '\n']).len();
                if keep > 0 {
                    len -= out[keep..].chars().count();
                    out.truncate(keep);
                    clamp_spans(&mut spans, len);
                    push(&mut out, &mut len, "\n\n");
                }
            }
            ("a", false) => anchors.push(OpenAnchor {
                start: len,
                href: attr(attrs, "href").map(|h| decode_entities(&h)),
                class: attr(attrs, "class").unwrap_or_default(),
            }),
            ("a", true) => {
                if let Some(anchor) = anchors.pop() {
                    let visible: String = out.chars().skip(anchor.start).collect();
                    if let Some(kind) = anchor_kind(&anchor, &visible) {
                        let span = TextSpan {
                            start: anchor.start,
                            end: len,
                            kind,
                        };
                        if span.start < span.end
                            && !spans.iter().any(|s| s.overlaps(span.start, span.end))
                        {
                            spans.push(span);
                        }
                    }
                }
            }
            ("span", false) => {
                let class = attr(attrs, "class").unwrap_or_default();
                let classes: Vec<&str> = class.split_whitespace().collect();
                span_stack.push((
                    classes.contains(&"invisible"),
                    classes.contains(&"ellipsis"),
                ));
            }
            ("span", true) => {
                if let Some((_, true)) = span_stack.pop() {
                    push(&mut out, &mut len, "…");
                }
            }
            _ => {}
        }
    }

    if !span_stack.iter().any(|(invisible, _)| *invisible) {
        let text = decode_entities(&html[last..]);
        push(&mut out, &mut len, &text);
    }

    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    clamp_spans(&mut spans, out.chars().count());
    spans.sort_by_key(|s| s.start);

    StyledText { text: out, spans }
}

/// Cut spans back to `len` characters after the text was truncated.
fn clamp_spans(spans: &mut Vec<TextSpan>, len: usize) {
    for span in spans.iter_mut() {
        span.end = span.end.min(len);
    }
    spans.retain(|s| s.start < s.end);
}

fn push(out: &mut String, len: &mut usize, s: &str) {
    out.push_str(s);
    *len += s.chars().count();
}

fn attr(attrs: &str, name: &str) -> Option<String> {
    ATTR_RE
        .captures_iter(attrs)
        .find(|c| c[1].eq_ignore_ascii_case(name))
        .map(|c| c[2].to_string())
}

fn anchor_kind(anchor: &OpenAnchor, visible: &str) -> Option<SpanKind> {
    let classes: Vec<&str> = anchor.class.split_whitespace().collect();
    let visible = visible.trim();

    if classes.contains(&"hashtag") || (visible.starts_with('#') && classes.contains(&"mention")) {
        let tag = visible.trim_start_matches('#');
        return (!tag.is_empty()).then(|| SpanKind::Tag {
            tag: tag.to_string(),
        });
    }
    if classes.contains(&"mention") || classes.contains(&"u-url") {
        let handle = visible.trim_start_matches('@');
        if handle.is_empty() {
            return None;
        }
        let handle = match anchor.href.as_deref().and_then(href_host) {
            Some(host) if !handle.contains('@') => format!("{handle}@{host}"),
            _ => handle.to_string(),
        };
        return Some(SpanKind::Mention {
            network: Network::Mastodon,
            handle,
        });
    }
    anchor
        .href
        .clone()
        .filter(|h| !h.is_empty())
        .map(|url| SpanKind::Link { url })
}

/// Lowercased host of an absolute http(s) URL.
fn href_host(href: &str) -> Option<String> {
    let rest = href
        .strip_prefix("https://")
        .or_else(|| href.strip_prefix("http://"))?;
    let host = rest.split(['/', '?', '#']).next()?;
    (!host.is_empty()).then(|| host.to_ascii_lowercase())
}
