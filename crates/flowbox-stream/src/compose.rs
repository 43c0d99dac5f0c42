use crate::account::{is_group_handle, is_phone_shaped};
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use flowbox_core::{
    Channel, Conversation, ConversationId, Direction, MailAddress, Message, MessageId,
    OutgoingAttachment, OutgoingMessage, ThreadingHint, ThreadingIds,
};
use mailparse::MailAddr;
use std::collections::HashSet;

// Only local-part markers; domains are never filtered.
const NO_REPLY_LOCAL_PARTS: [&str; 3] = ["noreply", "no-reply", "do-not-reply"];

/// What the user typed, before recipients and subject are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyDraft {
    pub conversation_id: ConversationId,
    pub body: String,
    /// Message being answered. Defaults to the newest incoming one.
    pub reply_to: Option<MessageId>,
    pub subject: Option<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub attachments: Vec<OutgoingAttachment>,
}

impl ReplyDraft {
    pub fn new(conversation_id: impl Into<ConversationId>, body: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            body: body.into(),
            reply_to: None,
            subject: None,
            cc: Vec::new(),
            bcc: Vec::new(),
            attachments: Vec::new(),
        }
    }

    pub fn replying_to(mut self, message: impl Into<MessageId>) -> Self {
        self.reply_to = Some(message.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_attachment(mut self, attachment: OutgoingAttachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

fn is_no_reply_address(address: &str) -> bool {
    let normalized = address.trim().to_ascii_lowercase();
    let local = normalized.split('@').next().unwrap_or("");
    !local.is_empty() && NO_REPLY_LOCAL_PARTS.contains(&local)
}

/// Parses one header-style address list into bare addresses.
fn parse_email_list(raw: &str) -> Result<Vec<String>, EngineError> {
    let parsed =
        mailparse::addrparse(raw).map_err(|_| EngineError::InvalidRecipient(raw.to_string()))?;

    let mut addresses = Vec::new();
    for entry in parsed.iter() {
        match entry {
            MailAddr::Single(info) => addresses.push(info.addr.clone()),
            MailAddr::Group(group) => {
                addresses.extend(group.addrs.iter().map(|info| info.addr.clone()))
            }
        }
    }

    for address in &addresses {
        let valid = address
            .split_once('@')
            .map(|(local, domain)| !local.is_empty() && domain.contains('.'))
            .unwrap_or(false);
        if !valid {
            return Err(EngineError::InvalidRecipient(address.clone()));
        }
    }
    Ok(addresses)
}

fn dedupe(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|value| seen.insert(value.to_ascii_lowercase()))
        .collect()
}

fn answered_message<'a>(messages: &'a [Message], draft: &ReplyDraft) -> Option<&'a Message> {
    match &draft.reply_to {
        Some(id) => messages.iter().find(|message| &message.id == id),
        None => messages
            .iter()
            .filter(|message| !message.ephemeral && message.direction == Direction::Incoming)
            .max_by_key(|message| message.sent_at),
    }
}

fn addresses_of(list: &[MailAddress]) -> Vec<String> {
    list.iter()
        .map(|address| address.address.trim().to_string())
        .filter(|address| !address.is_empty())
        .collect()
}

/// Sender of the answered message, then the thread's other contact
/// addresses, then the conversation's own contact fields.
fn email_recipients(
    conversation: &Conversation,
    answered: Option<&Message>,
) -> Result<Vec<String>, EngineError> {
    let from_message = answered
        .map(|message| match message.direction {
            Direction::Incoming => addresses_of(&message.from),
            Direction::Outgoing => addresses_of(&message.to),
        })
        .unwrap_or_default();

    let from_contact_fields = [
        Some(conversation.contact_identifier.as_str()),
        conversation.legacy.contact_email.as_deref(),
        conversation.legacy.from_email.as_deref(),
    ]
    .into_iter()
    .flatten()
    .filter(|value| value.contains('@'))
    .map(str::to_string)
    .collect::<Vec<_>>();

    for candidates in [
        from_message,
        conversation.contact_addresses.clone(),
        from_contact_fields,
    ] {
        let mut resolved = Vec::new();
        for raw in candidates {
            resolved.extend(parse_email_list(&raw)?);
        }
        let replyable = resolved
            .into_iter()
            .filter(|address| !is_no_reply_address(address))
            .collect::<Vec<_>>();
        if !replyable.is_empty() {
            return Ok(dedupe(replyable));
        }
    }
    Ok(Vec::new())
}

fn messaging_recipients(conversation: &Conversation) -> Vec<String> {
    [
        Some(conversation.contact_identifier.as_str()),
        conversation.legacy.phone_number.as_deref(),
        conversation.legacy.contact_phone.as_deref(),
        Some(conversation.id.as_str()),
    ]
    .into_iter()
    .flatten()
    .map(str::trim)
    .find(|value| is_phone_shaped(value) || is_group_handle(value))
    .map(|value| vec![value.to_string()])
    .unwrap_or_default()
}

/// Prefixes `Re: ` unless the subject already carries a reply prefix.
pub fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    let already_reply = trimmed
        .get(..3)
        .map(|prefix| prefix.eq_ignore_ascii_case("re:"))
        .unwrap_or(false);
    if already_reply {
        trimmed.to_string()
    } else {
        format!("Re: {trimmed}")
    }
}

fn threading_hint(answered: Option<&Message>) -> Option<ThreadingHint> {
    let ThreadingIds {
        message_id,
        references,
        provider_thread_id,
        ..
    } = &answered?.threading;

    let mut chain = references.clone();
    if let Some(message_id) = message_id {
        if !chain.contains(message_id) {
            chain.push(message_id.clone());
        }
    }
    if message_id.is_none() && provider_thread_id.is_none() && chain.is_empty() {
        return None;
    }
    Some(ThreadingHint {
        in_reply_to: message_id.clone(),
        references: chain,
        provider_thread_id: provider_thread_id.clone(),
    })
}

/// Assembles the transport payload for a reply in `conversation`.
pub fn assemble_reply(
    conversation: &Conversation,
    messages: &[Message],
    draft: &ReplyDraft,
) -> Result<OutgoingMessage, EngineError> {
    let answered = answered_message(messages, draft);

    let (to, subject) = match conversation.channel {
        Channel::Email => {
            let to = email_recipients(conversation, answered)?;
            let base = draft
                .subject
                .clone()
                .or_else(|| answered.and_then(|message| message.subject.clone()))
                .or_else(|| conversation.last_subject.clone())
                .filter(|subject| !subject.trim().is_empty());
            (to, base.map(|subject| reply_subject(&subject)))
        }
        Channel::Messaging => (messaging_recipients(conversation), None),
    };

    if to.is_empty() {
        return Err(EngineError::EmptyRecipients(conversation.id.clone()));
    }

    let (cc, bcc) = match conversation.channel {
        Channel::Email => {
            let mut cc = Vec::new();
            for raw in &draft.cc {
                cc.extend(parse_email_list(raw)?);
            }
            let mut bcc = Vec::new();
            for raw in &draft.bcc {
                bcc.extend(parse_email_list(raw)?);
            }
            (dedupe(cc), dedupe(bcc))
        }
        Channel::Messaging => (Vec::new(), Vec::new()),
    };

    Ok(OutgoingMessage {
        channel: conversation.channel,
        to,
        cc,
        bcc,
        subject,
        body: draft.body.clone(),
        attachments: draft.attachments.clone(),
        threading_hint: threading_hint(answered),
    })
}

/// Display-only stand-in for a reply still inside its undo window.
pub fn ephemeral_message(
    id: MessageId,
    conversation_id: &ConversationId,
    payload: &OutgoingMessage,
    sent_at: DateTime<Utc>,
) -> Message {
    Message {
        id,
        conversation_id: conversation_id.clone(),
        direction: Direction::Outgoing,
        channel: payload.channel,
        sent_at,
        body: payload.body.clone(),
        subject: payload.subject.clone(),
        from: Vec::new(),
        to: payload.to.iter().map(MailAddress::bare).collect(),
        cc: payload.cc.iter().map(MailAddress::bare).collect(),
        bcc: payload.bcc.iter().map(MailAddress::bare).collect(),
        attachments: Vec::new(),
        threading: ThreadingIds::default(),
        ephemeral: true,
    }
}
