//! Stateless text normalization for post titles, bodies and comments.
//!
//! Cleaning preserves link substrings verbatim and only strips noise around
//! them, so URL extraction gives the same answer before and after `clean`.

use regex::Regex;
use std::ops::Range;
use std::sync::OnceLock;

const KEPT_PUNCTUATION: &[char] = &[
    '.', ',', '!', '?', '\'', '"', '-', ':', ';', '(', ')', '/', '%',
];
const TRAILING_URL_NOISE: &[char] = &['.', ',', ';', ':', '!', '?'];

fn url_pattern() -> &'static Regex {
    static URL_RE: OnceLock<Regex> = OnceLock::new();
    // Constant pattern; covered by test_url_pattern_compiles
    URL_RE.get_or_init(|| {
        Regex::new(r#"(?i)(?:https?://|www\.)[^\s<>\[\]"'`]+"#).expect("URL pattern is valid")
    })
}

/// Undo the HTML escaping Reddit applies to text fields.
pub fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x200B;", "")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

fn trim_url(candidate: &str) -> &str {
    let mut url = candidate;
    loop {
        let trimmed = url.trim_end_matches(TRAILING_URL_NOISE);
        let opens = trimmed.matches('(').count();
        let closes = trimmed.matches(')').count();
        let trimmed = if trimmed.ends_with(')') && closes > opens {
            &trimmed[..trimmed.len() - 1]
        } else {
            trimmed
        };
        if trimmed.len() == url.len() {
            return url;
        }
        url = trimmed;
    }
}

fn url_spans(text: &str) -> Vec<Range<usize>> {
    url_pattern()
        .find_iter(text)
        .filter_map(|m| {
            let url = trim_url(m.as_str());
            let looks_complete = url.len() > "www.".len() && !url.ends_with("://");
            looks_complete.then(|| m.start()..m.start() + url.len())
        })
        .collect()
}

/// URLs in order of first occurrence; duplicates are kept.
pub fn extract_urls(text: &str) -> Vec<String> {
    let decoded = decode_entities(text);
    url_spans(&decoded)
        .into_iter()
        .map(|span| decoded[span].to_string())
        .collect()
}

fn strip_noise(segment: &str, out: &mut String) {
    for c in segment.chars() {
        if c.is_alphanumeric() || c.is_whitespace() || KEPT_PUNCTUATION.contains(&c) {
            out.push(c);
        } else {
            out.push(' ');
        }
    }
}

/// Strip noise characters outside of links and collapse whitespace.
pub fn clean(text: &str) -> String {
    let decoded = decode_entities(text);
    let mut stripped = String::with_capacity(decoded.len());
    let mut cursor = 0;

    for span in url_spans(&decoded) {
        strip_noise(&decoded[cursor..span.start], &mut stripped);
        stripped.push(' ');
        stripped.push_str(&decoded[span.clone()]);
        stripped.push(' ');
        cursor = span.end;
    }
    strip_noise(&decoded[cursor..], &mut stripped);

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keywords that occur in any of `texts`, compared case-insensitively.
pub fn matched_keywords(keywords: &[String], texts: &[&str]) -> Vec<String> {
    let haystacks: Vec<String> = texts.iter().map(|t| t.to_lowercase()).collect();
    keywords
        .iter()
        .filter(|keyword| {
            let needle = keyword.to_lowercase();
            !needle.is_empty() && haystacks.iter().any(|h| h.contains(&needle))
        })
        .cloned()
        .collect()
}
