use flowbox_stream::CollaboratorError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{context} failed with status {status}")]
    Status { status: u16, context: String },
    #[error("smtp transport error: {0}")]
    Smtp(String),
    #[error("message build error: {0}")]
    Build(String),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("config error: {0}")]
    Config(#[from] flowbox_config::ConfigError),
    #[error("environment variable {0} is not set")]
    MissingEnv(String),
}

impl From<RemoteError> for CollaboratorError {
    fn from(err: RemoteError) -> Self {
        let message = err.to_string();
        match err {
            RemoteError::Status { status: 404, .. } => Self::NotFound(message),
            RemoteError::Status { status, .. } if (400..500).contains(&status) => {
                Self::Rejected(message)
            }
            RemoteError::Status { .. } => Self::Unavailable(message),
            RemoteError::Http(err) if err.is_timeout() || err.is_connect() => {
                Self::Unavailable(message)
            }
            RemoteError::Build(_) => Self::Rejected(message),
            _ => Self::Transport(message),
        }
    }
}
