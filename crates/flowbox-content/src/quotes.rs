use regex::Regex;
use std::sync::OnceLock;

/// Markers that open the quoted copy of an earlier message. The body is cut
/// at whichever occurs first.
fn quote_markers() -> &'static [Regex] {
    static MARKERS: OnceLock<Vec<Regex>> = OnceLock::new();
    MARKERS.get_or_init(|| {
        [
            // On Mon, Jan 1, 2024 at 10:00 AM John Doe &lt;john@x.com&gt; wrote:
            r"(?i)\bOn\s[^<>\n]{1,200}?&lt;[^\s&<>]+@[^\s&<>]+&gt;\s*wrote:",
            // On Mon, Jan 1, 2024 at 10:00 AM John Doe <john@x.com> wrote:
            r"(?i)\bOn\s[^<>\n]{1,200}?<[^\s<>]+@[^\s<>]+>\s*wrote:",
            // On 1 Jan 2024, John Doe wrote:  (after tags have been flattened)
            r"(?im)^On\s[^\n<>]*\d[^\n<>]{0,200}?\bwrote:\s*$",
            r#"(?i)<div[^>]*class="[^"]*gmail_quote"#,
            r#"(?i)<blockquote[^>]*type="cite""#,
            r"(?im)^-{2,}\s*Original Message\s*-{2,}",
        ]
        .into_iter()
        .map(|pattern| Regex::new(pattern).expect("valid quote marker regex"))
        .collect()
    })
}

fn residual_cleanups() -> &'static [(Regex, &'static str)] {
    static CLEANUPS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    CLEANUPS.get_or_init(|| {
        [
            // Attribution lines that lost their leading "On ...".
            (
                r"(?i)[^\n<>]*(?:&lt;|<)[^\s<>&]+@[^\s<>&]+(?:&gt;|>)\s*wrote:\s*",
                "",
            ),
            (r"(?i)(^|\n|<br\s*/?>)\s*wrote:\s*", "$1"),
            // Escaped quote markers left at the start of a line.
            (r"(?i)(^|\n|<br\s*/?>)[ \t]*(?:&gt;[ \t]?)+", "$1"),
            (r"(?i)(?:\s|&nbsp;|<br\s*/?>|<div>\s*</div>|<p>\s*</p>)+$", ""),
        ]
        .into_iter()
        .map(|(pattern, replacement)| {
            (
                Regex::new(pattern).expect("valid quote cleanup regex"),
                replacement,
            )
        })
        .collect()
    })
}

/// Keeps only the newest part of an email body.
///
/// Works on raw HTML, entity-escaped HTML and flattened plain text. If the
/// whole body is quoted the original is returned trimmed.
pub fn strip_quoted_thread(body: &str) -> String {
    let cut = quote_markers()
        .iter()
        .filter_map(|marker| marker.find(body).map(|found| found.start()))
        .min()
        .unwrap_or(body.len());

    let mut kept = body[..cut].to_string();
    for (pattern, replacement) in residual_cleanups() {
        kept = pattern.replace_all(&kept, *replacement).into_owned();
    }

    let kept = kept.trim();
    if kept.is_empty() {
        return body.trim().to_string();
    }
    kept.to_string()
}
