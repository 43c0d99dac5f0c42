use async_trait::async_trait;
use flowbox_core::{Channel, OutgoingMessage};
use flowbox_stream::{CollaboratorError, Transport};
use std::sync::Arc;

/// Routes each reply to the transport for its channel.
pub struct ChannelTransport {
    email: Option<Arc<dyn Transport>>,
    messaging: Arc<dyn Transport>,
}

impl ChannelTransport {
    /// Without an email transport, email replies are refused.
    pub fn new(email: Option<Arc<dyn Transport>>, messaging: Arc<dyn Transport>) -> Self {
        Self { email, messaging }
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), CollaboratorError> {
        match message.channel {
            Channel::Email => match &self.email {
                Some(email) => email.send(message).await,
                None => Err(CollaboratorError::Rejected(
                    "email sending is not configured".to_string(),
                )),
            },
            Channel::Messaging => self.messaging.send(message).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowbox_stream::memory::RecordingTransport;

    fn outgoing(channel: Channel, to: &str) -> OutgoingMessage {
        OutgoingMessage {
            channel,
            to: vec![to.to_string()],
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: None,
            body: "On my way".to_string(),
            attachments: Vec::new(),
            threading_hint: None,
        }
    }

    #[tokio::test]
    async fn replies_follow_their_channel() {
        let email = Arc::new(RecordingTransport::new());
        let messaging = Arc::new(RecordingTransport::new());
        let transport = ChannelTransport::new(Some(email.clone()), messaging.clone());

        transport
            .send(&outgoing(Channel::Email, "ana@customer.com"))
            .await
            .expect("email sent");
        transport
            .send(&outgoing(Channel::Messaging, "14155551234@s.whatsapp.net"))
            .await
            .expect("message relayed");

        assert_eq!(email.sent().await[0].to, vec!["ana@customer.com"]);
        assert_eq!(messaging.sent().await[0].to, vec!["14155551234@s.whatsapp.net"]);
    }

    #[tokio::test]
    async fn email_without_smtp_is_rejected() {
        let messaging = Arc::new(RecordingTransport::new());
        let transport = ChannelTransport::new(None, messaging.clone());
        let err = transport
            .send(&outgoing(Channel::Email, "ana@customer.com"))
            .await
            .expect_err("no email transport");
        assert!(matches!(err, CollaboratorError::Rejected(_)));
        assert_eq!(messaging.attempts().await, 0);
    }
}
