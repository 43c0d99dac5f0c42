use crate::error::RemoteError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flowbox_config::SmtpConfig;
use flowbox_content::{html_to_text, looks_like_html};
use flowbox_core::OutgoingMessage;
use flowbox_stream::{CollaboratorError, Transport};
use lettre::message::{header, Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

/// Email transport over an authenticated SMTP relay.
pub struct SmtpTransport {
    from: Mailbox,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpTransport {
    pub fn from_config(config: &SmtpConfig) -> Result<Self, RemoteError> {
        let from = mailbox(&config.from_address, config.from_name.as_deref())?;
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|err| RemoteError::Smtp(err.to_string()))?
            .port(config.port);

        match std::env::var(&config.password_env) {
            Ok(password) => {
                builder = builder.credentials(Credentials::new(config.username.clone(), password));
            }
            Err(_) if config.username.is_empty() => {}
            Err(_) => return Err(RemoteError::MissingEnv(config.password_env.clone())),
        }

        Ok(Self {
            from,
            mailer: builder.build(),
        })
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, outgoing: &OutgoingMessage) -> Result<(), CollaboratorError> {
        let message = build_message(&self.from, outgoing)?;
        self.mailer
            .send(message)
            .await
            .map_err(|err| RemoteError::Smtp(err.to_string()))?;
        tracing::info!(recipients = outgoing.to.len(), "reply sent over smtp");
        Ok(())
    }
}

fn mailbox(address: &str, name: Option<&str>) -> Result<Mailbox, RemoteError> {
    let email = address
        .parse()
        .map_err(|err| RemoteError::Build(format!("invalid email {address}: {err}")))?;
    Ok(Mailbox::new(name.map(str::to_string), email))
}

fn parse_mailbox(raw: &str) -> Result<Mailbox, RemoteError> {
    raw.parse()
        .map_err(|err| RemoteError::Build(format!("invalid recipient {raw}: {err}")))
}

/// Builds the MIME message: an alternative part when the body is HTML,
/// wrapped in a mixed part when there are attachments.
pub fn build_message(from: &Mailbox, outgoing: &OutgoingMessage) -> Result<Message, RemoteError> {
    let mut builder = Message::builder().from(from.clone());
    for to in &outgoing.to {
        builder = builder.to(parse_mailbox(to)?);
    }
    for cc in &outgoing.cc {
        builder = builder.cc(parse_mailbox(cc)?);
    }
    for bcc in &outgoing.bcc {
        builder = builder.bcc(parse_mailbox(bcc)?);
    }
    if let Some(subject) = &outgoing.subject {
        builder = builder.subject(subject.clone());
    }
    if let Some(hint) = &outgoing.threading_hint {
        if let Some(in_reply_to) = &hint.in_reply_to {
            builder = builder.in_reply_to(in_reply_to.clone());
        }
        if !hint.references.is_empty() {
            builder = builder.references(hint.references.join(" "));
        }
    }

    let alternative = if looks_like_html(&outgoing.body) {
        MultiPart::alternative()
            .singlepart(SinglePart::plain(html_to_text(&outgoing.body)))
            .singlepart(
                SinglePart::builder()
                    .header(header::ContentType::TEXT_HTML)
                    .body(outgoing.body.clone()),
            )
    } else {
        MultiPart::alternative().singlepart(SinglePart::plain(outgoing.body.clone()))
    };

    let payload = if outgoing.attachments.is_empty() {
        alternative
    } else {
        let mut mixed = MultiPart::mixed().multipart(alternative);
        for attachment in &outgoing.attachments {
            let bytes = STANDARD
                .decode(attachment.content_base64.as_bytes())
                .map_err(|err| RemoteError::Build(format!("invalid attachment base64: {err}")))?;
            let mime = attachment
                .mime_type
                .parse()
                .map_err(|err| RemoteError::Build(format!("invalid attachment mime type: {err}")))?;
            let part = if attachment.inline {
                Attachment::new_inline(attachment.file_name.clone())
            } else {
                Attachment::new(attachment.file_name.clone())
            };
            mixed = mixed.singlepart(part.body(bytes, mime));
        }
        mixed
    };

    builder
        .multipart(payload)
        .map_err(|err| RemoteError::Build(err.to_string()))
}
