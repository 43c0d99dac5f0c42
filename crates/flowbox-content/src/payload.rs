use crate::ContentError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;

const MIN_ENCODED_LEN: usize = 100;

/// Content types recognized from the leading magic bytes.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SniffedType {
    Jpeg,
    Png,
    Gif,
    Webp,
    Wav,
    Avi,
    /// RIFF container with an unrecognized form type.
    Riff,
}

impl SniffedType {
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Wav => "audio/wav",
            Self::Avi => "video/x-msvideo",
            Self::Riff => "application/octet-stream",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Jpeg => "JPEG image",
            Self::Png => "PNG image",
            Self::Gif => "GIF image",
            Self::Webp => "WebP image",
            Self::Wav => "WAV audio",
            Self::Avi => "AVI video",
            Self::Riff => "RIFF file",
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Self::Jpeg | Self::Png | Self::Gif | Self::Webp)
    }
}

/// A Base64 body decoded far enough to describe it.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DecodedPayload {
    pub content_type: SniffedType,
    pub size: usize,
    /// Original encoded text, kept for on-demand inline rendering.
    pub encoded: String,
}

impl DecodedPayload {
    pub fn is_image(&self) -> bool {
        self.content_type.is_image()
    }

    pub fn placeholder(&self) -> String {
        format!("[{}, {}]", self.content_type.label(), human_size(self.size))
    }

    /// `data:` URI for inline previews. Only images get one.
    pub fn inline_data_uri(&self) -> Option<String> {
        if !self.is_image() {
            return None;
        }
        Some(format!(
            "data:{};base64,{}",
            self.content_type.mime_type(),
            self.encoded
        ))
    }
}

/// Whether `value` is an encoded binary payload rather than prose.
///
/// Requires a length that is a multiple of four and at least 100 characters,
/// the standard alphabet with trailing padding only, at least one digit or
/// symbol, and an exact decode/re-encode round trip.
pub fn looks_like_base64(value: &str) -> bool {
    let value = value.trim();
    if value.len() < MIN_ENCODED_LEN || value.len() % 4 != 0 {
        return false;
    }

    let body = value.trim_end_matches('=');
    if value.len() - body.len() > 2 {
        return false;
    }
    if !body
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
    {
        return false;
    }

    // Long runs of letters pass every check above; real payloads almost
    // always contain a digit or symbol somewhere.
    if !value
        .bytes()
        .any(|b| b.is_ascii_digit() || matches!(b, b'+' | b'/' | b'='))
    {
        return false;
    }

    match STANDARD.decode(value) {
        Ok(bytes) => STANDARD.encode(bytes) == value,
        Err(_) => false,
    }
}

pub fn sniff_content_type(bytes: &[u8]) -> Option<SniffedType> {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => Some(SniffedType::Jpeg),
        [0x89, b'P', b'N', b'G', ..] => Some(SniffedType::Png),
        [b'G', b'I', b'F', b'8', ..] => Some(SniffedType::Gif),
        [b'R', b'I', b'F', b'F', rest @ ..] => Some(match rest.get(4..8) {
            Some(b"WEBP") => SniffedType::Webp,
            Some(b"WAVE") => SniffedType::Wav,
            Some(b"AVI ") => SniffedType::Avi,
            _ => SniffedType::Riff,
        }),
        _ => None,
    }
}

pub fn decode_payload(value: &str) -> Result<DecodedPayload, ContentError> {
    let encoded = value.trim();
    let bytes = STANDARD.decode(encoded)?;
    let content_type =
        sniff_content_type(&bytes).ok_or(ContentError::UnknownType(bytes.len()))?;

    Ok(DecodedPayload {
        content_type,
        size: bytes.len(),
        encoded: encoded.to_string(),
    })
}

fn human_size(bytes: usize) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;

    let value = bytes as f64;
    if value < KB {
        format!("{bytes} B")
    } else if value < MB {
        format!("{:.1} KB", value / KB)
    } else {
        format!("{:.1} MB", value / MB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded_png(len: usize) -> String {
        let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        bytes.extend((0..len).map(|i| (i % 251) as u8));
        STANDARD.encode(bytes)
    }

    #[test]
    fn lowercase_prose_is_not_base64() {
        let letters = "qwertyuiopasdfghjklzxcvbnm".repeat(5);
        let value = &letters[..120];
        assert_eq!(value.len() % 4, 0);
        assert!(!looks_like_base64(value));
    }

    #[test]
    fn short_or_misaligned_values_are_rejected() {
        assert!(!looks_like_base64("aGVsbG8gd29ybGQ="));
        let png = encoded_png(200);
        assert!(!looks_like_base64(&png[..png.len() - 1]));
    }

    #[test]
    fn png_payload_is_detected_and_sniffed() {
        let png = encoded_png(300);
        assert!(looks_like_base64(&png));

        let decoded = decode_payload(&png).expect("decodes");
        assert_eq!(decoded.content_type, SniffedType::Png);
        assert_eq!(decoded.size, 308);
        assert_eq!(decoded.placeholder(), "[PNG image, 308 B]");
        assert!(decoded
            .inline_data_uri()
            .expect("image gets a data uri")
            .starts_with("data:image/png;base64,iVBOR"));
    }

    #[test]
    fn riff_form_type_refines_the_guess() {
        let mut wav = b"RIFF\x24\x00\x00\x00WAVEfmt ".to_vec();
        wav.resize(64, 0);
        assert_eq!(sniff_content_type(&wav), Some(SniffedType::Wav));

        let mut other = b"RIFF\x24\x00\x00\x00XXXX".to_vec();
        other.resize(64, 0);
        assert_eq!(sniff_content_type(&other), Some(SniffedType::Riff));
        assert!(!SniffedType::Riff.is_image());
    }

    #[test]
    fn unknown_magic_is_an_error() {
        let encoded = STANDARD.encode([0x25, 0x50, 0x44, 0x46, 0x2D, 0x31]);
        assert!(matches!(
            decode_payload(&encoded),
            Err(ContentError::UnknownType(6))
        ));
    }

    #[test]
    fn sizes_are_humanized() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.0 KB");
        assert_eq!(human_size(3 * 1024 * 1024), "3.0 MB");
    }
}
