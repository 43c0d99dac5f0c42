use flowbox_core::{
    AccountFilter, AccountIdentity, AccountSelector, Channel, Connections, Conversation,
};
use serde::Serialize;

const GROUP_SUFFIXES: [&str; 1] = ["@g.us"];
const DIRECT_SUFFIXES: [&str; 2] = ["@s.whatsapp.net", "@c.us"];

/// `+` prefixed or all digits, ignoring a direct-chat handle suffix.
pub fn is_phone_shaped(value: &str) -> bool {
    let value = value.trim();
    let value = DIRECT_SUFFIXES
        .iter()
        .find_map(|suffix| value.strip_suffix(suffix))
        .unwrap_or(value);
    let digits = value.strip_prefix('+').unwrap_or(value);
    if digits.is_empty() {
        return false;
    }
    value.starts_with('+') || digits.chars().all(|c| c.is_ascii_digit())
}

pub fn is_group_handle(value: &str) -> bool {
    let value = value.trim().to_ascii_lowercase();
    GROUP_SUFFIXES.iter().any(|suffix| value.ends_with(suffix))
}

fn is_messaging_handle(value: &str) -> bool {
    is_group_handle(value) || (value.contains('@') && is_phone_shaped(value))
}

fn is_email_shaped(value: &str) -> bool {
    value.contains('@') && !is_messaging_handle(value)
}

/// Identifier fields an email account may match, legacy ones included.
/// The conversation id counts only when it is itself an address.
fn email_candidates(conversation: &Conversation) -> impl Iterator<Item = &str> {
    [
        Some(conversation.contact_identifier.as_str()),
        conversation.legacy.contact_email.as_deref(),
        conversation.legacy.from_email.as_deref(),
        Some(conversation.id.as_str()),
    ]
    .into_iter()
    .flatten()
    .map(str::trim)
    .filter(|value| is_email_shaped(value))
}

fn messaging_candidates(conversation: &Conversation) -> impl Iterator<Item = &str> {
    [
        Some(conversation.contact_identifier.as_str()),
        conversation.legacy.phone_number.as_deref(),
        conversation.legacy.contact_phone.as_deref(),
    ]
    .into_iter()
    .flatten()
    .map(str::trim)
    .filter(|value| !value.is_empty())
}

fn normalize_phone(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect()
}

/// Whether `conversation` belongs to the connected account `selector`.
pub fn matches_account(selector: &AccountSelector, conversation: &Conversation) -> bool {
    match selector.channel {
        Channel::Email => match &selector.identity {
            AccountIdentity::AllIdentities => email_candidates(conversation).next().is_some(),
            AccountIdentity::Specific(address) => {
                let address = address.trim();
                email_candidates(conversation).any(|value| value.eq_ignore_ascii_case(address))
            }
        },
        Channel::Messaging => {
            let shaped = messaging_candidates(conversation)
                .any(|value| is_phone_shaped(value) || is_group_handle(value))
                || is_phone_shaped(conversation.id.as_str());
            if !shaped {
                return false;
            }
            match (&selector.identity, conversation.account_identity.as_deref()) {
                (AccountIdentity::Specific(number), Some(received_on)) => {
                    normalize_phone(number) == normalize_phone(received_on)
                }
                _ => true,
            }
        }
    }
}

pub fn matches_filter(filter: &AccountFilter, conversation: &Conversation) -> bool {
    match filter {
        AccountFilter::All => true,
        AccountFilter::Account(selector) => matches_account(selector, conversation),
    }
}

/// One entry of the account picker.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AccountOption {
    pub label: String,
    pub filter: AccountFilter,
}

/// "All" first, then per connected channel an all-identities entry followed
/// by one entry per account. Disconnected channels are skipped.
pub fn selectable_accounts(connections: &Connections) -> Vec<AccountOption> {
    let mut options = vec![AccountOption {
        label: "All accounts".to_string(),
        filter: AccountFilter::All,
    }];

    for (channel, entry) in connections {
        if !entry.connected {
            continue;
        }
        options.push(AccountOption {
            label: format!("All {} accounts", channel.as_str()),
            filter: AccountFilter::Account(AccountSelector {
                channel: *channel,
                identity: AccountIdentity::AllIdentities,
            }),
        });
        for account in &entry.accounts {
            let label = match &account.display_name {
                Some(name) if !name.trim().is_empty() => {
                    format!("{} ({})", name.trim(), account.identity)
                }
                _ => account.identity.clone(),
            };
            options.push(AccountOption {
                label,
                filter: AccountFilter::Account(AccountSelector {
                    channel: *channel,
                    identity: AccountIdentity::Specific(account.identity.clone()),
                }),
            });
        }
    }

    options
}
