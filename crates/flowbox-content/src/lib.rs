//! Turns raw message bodies into safe display content.
//!
//! Bodies arrive as HTML email threads, plain text, or bare Base64 payloads
//! pasted in by messaging providers. [`normalize_body`] picks the right path
//! and never fails: anything it cannot decode is shown as plain text.

mod error;
mod links;
mod normalize;
mod payload;
mod quotes;

pub use error::ContentError;
pub use links::{is_image_url, linkify, Segment};
pub use normalize::{
    html_to_text, looks_like_html, normalize_body, preview_text, BodyKind, NormalizedBody,
};
pub use payload::{
    decode_payload, looks_like_base64, sniff_content_type, DecodedPayload, SniffedType,
};
pub use quotes::strip_quoted_thread;
