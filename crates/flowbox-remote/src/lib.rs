//! Network collaborators for the stream engine: the JSON inbox API, the
//! messaging relay and SMTP delivery.

mod dispatch;
mod error;
mod http;
mod identity;
mod smtp;

pub use dispatch::ChannelTransport;
pub use error::RemoteError;
pub use http::{ApiClient, HttpStore, RelayTransport};
pub use identity::EnvIdentity;
pub use smtp::{build_message, SmtpTransport};
