use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("payload is not base64: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("unrecognized binary payload ({0} bytes)")]
    UnknownType(usize),
}
