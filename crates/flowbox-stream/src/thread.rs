use flowbox_content::{normalize_body, preview_text, NormalizedBody};
use flowbox_core::{Direction, Message};
use serde::Serialize;

const PREVIEW_CHARS: usize = 140;

/// A message ready for display. The raw message is kept untouched.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ThreadMessage {
    pub message: Message,
    pub body: NormalizedBody,
    pub preview: String,
}

impl ThreadMessage {
    fn from_message(message: Message) -> Self {
        let body = normalize_body(&message.body);
        let preview = preview_text(&body, PREVIEW_CHARS);
        Self {
            message,
            body,
            preview,
        }
    }
}

fn same_text(a: &str, b: &str) -> bool {
    let squash = |value: &str| value.split_whitespace().collect::<Vec<_>>().join(" ");
    squash(a) == squash(b)
}

/// Timestamp-ordered thread. The pending stand-in goes last unless a real
/// outgoing message with the same body already arrived at or after the
/// moment it was queued.
pub fn build_thread(mut messages: Vec<Message>, ephemeral: Option<Message>) -> Vec<ThreadMessage> {
    messages.retain(|message| !message.ephemeral);
    messages.sort_by_key(|message| message.sent_at);

    if let Some(pending) = ephemeral {
        let delivered = messages.iter().any(|message| {
            message.direction == Direction::Outgoing
                && message.sent_at >= pending.sent_at
                && same_text(&message.body, &pending.body)
        });
        if !delivered {
            messages.push(pending);
        }
    }

    messages.into_iter().map(ThreadMessage::from_message).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use flowbox_content::BodyKind;
    use flowbox_core::{Channel, ConversationId, MessageId, ThreadingIds};

    fn message(id: &str, direction: Direction, minute: u32, body: &str) -> Message {
        Message {
            id: MessageId::from(id),
            conversation_id: ConversationId::from("c1"),
            direction,
            channel: Channel::Email,
            sent_at: Utc.with_ymd_and_hms(2024, 6, 1, 9, minute, 0).unwrap(),
            body: body.to_string(),
            subject: None,
            from: Vec::new(),
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            attachments: Vec::new(),
            threading: ThreadingIds::default(),
            ephemeral: false,
        }
    }

    fn pending(minute: u32, body: &str) -> Message {
        Message {
            ephemeral: true,
            ..message("pending-1", Direction::Outgoing, minute, body)
        }
    }

    #[test]
    fn messages_are_ordered_and_normalized() {
        let thread = build_thread(
            vec![
                message("m2", Direction::Outgoing, 5, "Sure, see https://acme.io"),
                message(
                    "m1",
                    Direction::Incoming,
                    1,
                    "Hi<br>On Mon, Jan 1, 2024 at 10:00 AM Jo <jo@x.com> wrote:<br>old",
                ),
            ],
            None,
        );

        let ids = thread
            .iter()
            .map(|entry| entry.message.id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert_eq!(thread[0].body.kind, BodyKind::Html);
        assert_eq!(thread[0].preview, "Hi");
        assert!(thread[0].message.body.contains("old"));
    }

    #[test]
    fn pending_reply_is_appended_last() {
        let thread = build_thread(
            vec![message("m1", Direction::Incoming, 1, "Where is my order?")],
            Some(pending(2, "Shipped today.")),
        );
        assert_eq!(thread.len(), 2);
        assert!(thread[1].message.ephemeral);
    }

    #[test]
    fn arrived_copy_replaces_the_stand_in() {
        let stand_in = pending(2, "Shipped today.");
        let mut delivered = message("m2", Direction::Outgoing, 2, "Shipped  today.\n");
        delivered.sent_at += Duration::seconds(15);

        let thread = build_thread(
            vec![message("m1", Direction::Incoming, 1, "Where?"), delivered],
            Some(stand_in),
        );
        assert_eq!(thread.len(), 2);
        assert!(thread.iter().all(|entry| !entry.message.ephemeral));
    }

    #[test]
    fn older_identical_reply_does_not_hide_the_stand_in() {
        let thread = build_thread(
            vec![message("m0", Direction::Outgoing, 1, "Thanks!")],
            Some(pending(3, "Thanks!")),
        );
        assert_eq!(thread.len(), 2);
        assert!(thread[1].message.ephemeral);
    }
}
