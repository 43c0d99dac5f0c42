use crate::links::{linkify, Segment};
use crate::payload::{decode_payload, looks_like_base64, DecodedPayload};
use crate::quotes::strip_quoted_thread;
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BodyKind {
    Html,
    PlainText,
    EncodedPayload,
}

/// Display-ready form of a message body. Derived on demand, never stored.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NormalizedBody {
    pub kind: BodyKind,
    /// Newest content as plain text, or a placeholder for binary payloads.
    pub text: String,
    /// Sanitized HTML of the newest content, for HTML bodies only.
    pub html: Option<String>,
    pub segments: Vec<Segment>,
    pub payload: Option<DecodedPayload>,
}

impl NormalizedBody {
    fn plain(text: String) -> Self {
        let segments = linkify(&text);
        Self {
            kind: BodyKind::PlainText,
            text,
            html: None,
            segments,
            payload: None,
        }
    }
}

fn html_hint() -> &'static Regex {
    static HINT: OnceLock<Regex> = OnceLock::new();
    HINT.get_or_init(|| {
        Regex::new(r"(?i)<(?:br|p|div|span|html|body|a|table|blockquote|img|b|i|ul|ol|li)\b[^>]*>|</[a-z][a-z0-9]*>")
            .expect("valid html hint regex")
    })
}

fn block_breaks() -> &'static Regex {
    static BREAKS: OnceLock<Regex> = OnceLock::new();
    BREAKS.get_or_init(|| {
        Regex::new(r"(?i)<br\s*/?>|</(?:p|div|li|tr|h[1-6]|blockquote)>")
            .expect("valid block break regex")
    })
}

fn any_tag() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid tag regex"))
}

fn blank_runs() -> &'static Regex {
    static RUNS: OnceLock<Regex> = OnceLock::new();
    RUNS.get_or_init(|| Regex::new(r"\n[ \t]*(?:\n[ \t]*)+").expect("valid blank line regex"))
}

pub fn looks_like_html(body: &str) -> bool {
    html_hint().is_match(body)
}

/// Flattens sanitized HTML into text, keeping line structure.
pub fn html_to_text(html: &str) -> String {
    let with_breaks = block_breaks().replace_all(html, "\n");
    let stripped = any_tag().replace_all(&with_breaks, "");
    let decoded = decode_entities(&stripped);
    blank_runs()
        .replace_all(&decoded, "\n\n")
        .trim()
        .to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

/// First `max_chars` characters of the normalized text, on one line.
pub fn preview_text(body: &NormalizedBody, max_chars: usize) -> String {
    body.text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(max_chars)
        .collect()
}

/// Normalizes one raw message body for display.
///
/// Base64 payloads become a placeholder naming the sniffed type and size.
/// HTML is stripped of quoted history, sanitized, flattened to text and
/// stripped again before linkification. Anything undecodable is treated as
/// plain text.
pub fn normalize_body(raw: &str) -> NormalizedBody {
    if looks_like_base64(raw) {
        match decode_payload(raw) {
            Ok(payload) => {
                let text = payload.placeholder();
                return NormalizedBody {
                    kind: BodyKind::EncodedPayload,
                    segments: vec![Segment::Text(text.clone())],
                    text,
                    html: None,
                    payload: Some(payload),
                };
            }
            Err(err) => {
                tracing::debug!(error = %err, "base64-shaped body did not decode, showing as text");
                return NormalizedBody::plain(raw.trim().to_string());
            }
        }
    }

    if looks_like_html(raw) {
        let newest = strip_quoted_thread(raw);
        let safe = ammonia::clean(&newest);
        let text = strip_quoted_thread(&html_to_text(&safe));
        let segments = linkify(&text);
        return NormalizedBody {
            kind: BodyKind::Html,
            text,
            html: Some(safe),
            segments,
            payload: None,
        };
    }

    NormalizedBody::plain(strip_quoted_thread(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    #[test]
    fn html_thread_keeps_only_newest_text() {
        let raw = "Hello<br>On Mon, Jan 1, 2024 at 10:00 AM John Doe <john@x.com> wrote:<br>Old content";
        let body = normalize_body(raw);
        assert_eq!(body.kind, BodyKind::Html);
        assert_eq!(body.text, "Hello");
        assert_eq!(body.segments, vec![Segment::Text("Hello".to_string())]);
    }

    #[test]
    fn html_is_sanitized() {
        let raw = r#"<p>Hi <script>alert(1)</script><a href="https://example.com" onclick="x()">there</a></p>"#;
        let body = normalize_body(raw);
        let html = body.html.expect("html kept");
        assert!(!html.contains("script"));
        assert!(!html.contains("onclick"));
        assert_eq!(body.text, "Hi there");
    }

    #[test]
    fn plain_text_links_are_split() {
        let body = normalize_body("Tracking: https://track.example.com/123");
        assert_eq!(body.kind, BodyKind::PlainText);
        assert_eq!(
            body.segments,
            vec![
                Segment::Text("Tracking: ".to_string()),
                Segment::Link("https://track.example.com/123".to_string()),
            ]
        );
    }

    #[test]
    fn encoded_image_becomes_placeholder() {
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
        bytes.extend(std::iter::repeat(7_u8).take(2044));
        let raw = STANDARD.encode(&bytes);

        let body = normalize_body(&raw);
        assert_eq!(body.kind, BodyKind::EncodedPayload);
        assert_eq!(body.text, "[JPEG image, 2.0 KB]");
        let payload = body.payload.expect("payload kept");
        assert!(payload.is_image());
        assert_eq!(payload.encoded, raw);
    }

    #[test]
    fn unknown_binary_falls_back_to_text() {
        let mut bytes = b"%PDF-1.7\n".to_vec();
        bytes.extend(std::iter::repeat(42_u8).take(120));
        let raw = STANDARD.encode(&bytes);

        let body = normalize_body(&raw);
        assert_eq!(body.kind, BodyKind::PlainText);
        assert_eq!(body.text, raw);
        assert!(body.payload.is_none());
    }

    #[test]
    fn entities_are_decoded_after_flattening() {
        assert_eq!(
            html_to_text("<div>Fish &amp; chips</div><div>&lt;tomorrow&gt;</div>"),
            "Fish & chips\n<tomorrow>"
        );
    }

    #[test]
    fn preview_collapses_whitespace() {
        let body = normalize_body("line one\n\n  line   two");
        assert_eq!(preview_text(&body, 12), "line one lin");
    }
}
