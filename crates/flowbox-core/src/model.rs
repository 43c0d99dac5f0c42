use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Reserved secondary tag marking a soft-deleted conversation.
pub const DELETED_TAG: &str = "deleted";

/// Secondary tags are compared trimmed and lowercased; stored spelling is
/// left untouched.
pub fn normalize_tag(tag: &str) -> String {
    tag.trim().to_lowercase()
}

pub fn same_tag(a: &str, b: &str) -> bool {
    normalize_tag(a) == normalize_tag(b)
}

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(UserId);
string_id!(ConversationId);
string_id!(MessageId);
string_id!(CommentId);

/// The signed-in user, passed explicitly into every engine operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub display_name: String,
}

impl Identity {
    pub fn new(user_id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Messaging,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Messaging => "messaging",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Open,
    Waiting,
    Resolved,
    Overdue,
}

impl Default for ConversationStatus {
    fn default() -> Self {
        Self::Open
    }
}

/// Exclusive classification of a conversation. At most one applies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryTag {
    Sales,
    Support,
    Logistics,
}

impl PrimaryTag {
    pub const ALL: [PrimaryTag; 3] = [Self::Sales, Self::Support, Self::Logistics];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sales => "sales",
            Self::Support => "support",
            Self::Logistics => "logistics",
        }
    }

    /// Case-insensitive lookup in the controlled vocabulary.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|tag| tag.as_str().eq_ignore_ascii_case(label))
    }
}

impl fmt::Display for PrimaryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contact fields written by older records. Kept so account matching can
/// still classify them.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct LegacyContactFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub owner_id: UserId,
    pub channel: Channel,
    /// Email address, phone number or group handle of the external contact.
    pub contact_identifier: String,
    #[serde(default)]
    pub contact_name: Option<String>,
    #[serde(default)]
    pub primary_tag: Option<PrimaryTag>,
    #[serde(default)]
    pub secondary_tags: BTreeSet<String>,
    #[serde(default)]
    pub status: ConversationStatus,
    #[serde(default)]
    pub participants: BTreeSet<UserId>,
    /// External addresses seen on the thread besides the main contact.
    #[serde(default)]
    pub contact_addresses: Vec<String>,
    /// Connected account (mailbox or number) the conversation arrived on, when known.
    #[serde(default)]
    pub account_identity: Option<String>,
    #[serde(default)]
    pub last_message_preview: Option<String>,
    #[serde(default)]
    pub last_subject: Option<String>,
    #[serde(default)]
    pub last_activity_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub legacy: LegacyContactFields,
}

impl Conversation {
    pub fn new(
        id: impl Into<ConversationId>,
        owner_id: impl Into<UserId>,
        channel: Channel,
        contact_identifier: impl Into<String>,
    ) -> Self {
        let owner_id = owner_id.into();
        let mut participants = BTreeSet::new();
        participants.insert(owner_id.clone());

        Self {
            id: id.into(),
            owner_id,
            channel,
            contact_identifier: contact_identifier.into(),
            contact_name: None,
            primary_tag: None,
            secondary_tags: BTreeSet::new(),
            status: ConversationStatus::Open,
            participants,
            contact_addresses: Vec::new(),
            account_identity: None,
            last_message_preview: None,
            last_subject: None,
            last_activity_at: None,
            created_at: None,
            legacy: LegacyContactFields::default(),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.secondary_tags
            .iter()
            .any(|tag| same_tag(tag, DELETED_TAG))
    }

    pub fn is_owned_by(&self, user: &UserId) -> bool {
        &self.owner_id == user
    }

    pub fn has_participant(&self, user: &UserId) -> bool {
        self.participants.contains(user)
    }

    /// Participants other than the owner.
    pub fn shared_participants(&self) -> impl Iterator<Item = &UserId> {
        self.participants.iter().filter(|user| **user != self.owner_id)
    }

    /// Creation time, else last activity, else the Unix epoch.
    pub fn best_timestamp(&self) -> DateTime<Utc> {
        self.created_at
            .or(self.last_activity_at)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MailAddress {
    pub name: Option<String>,
    pub address: String,
}

impl MailAddress {
    pub fn bare(address: impl Into<String>) -> Self {
        Self {
            name: None,
            address: address.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageAttachment {
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
    #[serde(default)]
    pub url: Option<String>,
}

/// Provider threading identifiers used to thread replies.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ThreadingIds {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub in_reply_to: Option<String>,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub provider_thread_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub direction: Direction,
    pub channel: Channel,
    pub sent_at: DateTime<Utc>,
    /// Raw body as delivered: HTML, plain text or a Base64 payload.
    pub body: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub from: Vec<MailAddress>,
    #[serde(default)]
    pub to: Vec<MailAddress>,
    #[serde(default)]
    pub cc: Vec<MailAddress>,
    #[serde(default)]
    pub bcc: Vec<MailAddress>,
    #[serde(default)]
    pub attachments: Vec<MessageAttachment>,
    #[serde(default)]
    pub threading: ThreadingIds,
    /// Local stand-in for a reply still in its undo window. Never persisted.
    #[serde(default, skip_serializing)]
    pub ephemeral: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    pub id: CommentId,
    pub conversation_id: ConversationId,
    pub author_id: UserId,
    pub author_name: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewComment {
    pub author_id: UserId,
    pub author_name: String,
    pub text: String,
}

/// Complete replacement of a conversation's tag pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagReplacement {
    pub primary_tag: Option<PrimaryTag>,
    pub secondary_tags: BTreeSet<String>,
}

/// Field groups sent to the conversation store. Each present group fully
/// replaces the stored value.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ConversationUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<TagReplacement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ConversationStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participants: Option<BTreeSet<UserId>>,
}

impl ConversationUpdate {
    pub fn is_empty(&self) -> bool {
        self.tags.is_none() && self.status.is_none() && self.participants.is_none()
    }

    /// Applies the present field groups to a local copy.
    pub fn apply_to(&self, conversation: &mut Conversation) {
        if let Some(tags) = &self.tags {
            conversation.primary_tag = tags.primary_tag;
            conversation.secondary_tags = tags.secondary_tags.clone();
        }
        if let Some(status) = self.status {
            conversation.status = status;
        }
        if let Some(participants) = &self.participants {
            conversation.participants = participants.clone();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ThreadingHint {
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub provider_thread_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutgoingAttachment {
    pub file_name: String,
    pub mime_type: String,
    pub content_base64: String,
    pub inline: bool,
}

/// Fully assembled payload handed to the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub channel: Channel,
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    #[serde(default)]
    pub subject: Option<String>,
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<OutgoingAttachment>,
    #[serde(default)]
    pub threading_hint: Option<ThreadingHint>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ViewSelector {
    #[default]
    Owned,
    SharedWithMe,
    SharedByMe,
    Deleted,
    /// Externally curated list; bypasses account, category and status stages.
    Discussions,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
    #[default]
    All,
    Only(ConversationStatus),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AccountIdentity {
    /// Every identity connected for the channel's provider.
    AllIdentities,
    Specific(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AccountSelector {
    pub channel: Channel,
    pub identity: AccountIdentity,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccountFilter {
    #[default]
    All,
    Account(AccountSelector),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FilterState {
    pub view: ViewSelector,
    pub status: StatusFilter,
    /// Requested tag names; empty means no restriction.
    pub categories: BTreeSet<String>,
    pub account: AccountFilter,
    pub search: String,
    pub sort: SortOrder,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectedAccount {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Mailbox address or phone number.
    pub identity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ChannelConnections {
    pub connected: bool,
    #[serde(default)]
    pub accounts: Vec<ConnectedAccount>,
}

pub type Connections = BTreeMap<Channel, ChannelConnections>;
