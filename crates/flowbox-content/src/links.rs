use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use url::Url;

const IMAGE_EXTENSIONS: [&str; 7] = [".png", ".jpg", ".jpeg", ".gif", ".webp", ".bmp", ".svg"];

/// A run of display text. Links pointing at images are split out so they can
/// be previewed inline.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Segment {
    Text(String),
    Link(String),
    Image(String),
}

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)\b(?:https?://|www\.)[^\s<>"']+"#).expect("valid url regex")
    })
}

pub fn is_image_url(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Splits plain text into text, link and image segments.
pub fn linkify(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut pending = String::new();
    let mut cursor = 0;

    for found in url_pattern().find_iter(text) {
        let raw = found
            .as_str()
            .trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | ')' | ']'));
        let end = found.start() + raw.len();

        let candidate = if raw.to_ascii_lowercase().starts_with("www.") {
            format!("https://{raw}")
        } else {
            raw.to_string()
        };
        let Ok(url) = Url::parse(&candidate) else {
            continue;
        };

        pending.push_str(&text[cursor..found.start()]);
        if !pending.is_empty() {
            segments.push(Segment::Text(std::mem::take(&mut pending)));
        }

        let href = url.to_string();
        segments.push(if is_image_url(&url) {
            Segment::Image(href)
        } else {
            Segment::Link(href)
        });
        cursor = end;
    }

    pending.push_str(&text[cursor..]);
    if !pending.is_empty() {
        segments.push(Segment::Text(pending));
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_links_out_of_text() {
        let segments = linkify("See https://example.com/docs, then reply.");
        assert_eq!(
            segments,
            vec![
                Segment::Text("See ".to_string()),
                Segment::Link("https://example.com/docs".to_string()),
                Segment::Text(", then reply.".to_string()),
            ]
        );
    }

    #[test]
    fn image_links_are_marked_for_preview() {
        let segments = linkify("photo: https://cdn.example.com/a/B.JPG?size=large");
        assert_eq!(
            segments.last(),
            Some(&Segment::Image(
                "https://cdn.example.com/a/B.JPG?size=large".to_string()
            ))
        );
    }

    #[test]
    fn bare_www_gets_a_scheme() {
        let segments = linkify("go to www.example.org.");
        assert_eq!(
            segments,
            vec![
                Segment::Text("go to ".to_string()),
                Segment::Link("https://www.example.org/".to_string()),
                Segment::Text(".".to_string()),
            ]
        );
    }

    #[test]
    fn text_without_links_is_one_segment() {
        assert_eq!(linkify("no links"), vec![Segment::Text("no links".to_string())]);
        assert!(linkify("").is_empty());
    }
}
